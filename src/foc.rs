// FOC (Field Oriented Control) module
// Encoder-based vector control for PMSM drives

pub mod current_sense;
pub mod decoupling;
pub mod encoder;
pub mod pi_controller;
pub mod pwm;
pub mod transforms;

// Re-export main types for easier access
pub use current_sense::{AdcSample, CurrentSense, MovingAverage, PhaseCurrents};
pub use decoupling::decoupling;
pub use encoder::{Calibration, EncoderEstimator, SpeedSample, Wrap, MAX_GLITCH_ITERATIONS};
pub use pi_controller::{ControlLaw, PiController, PiGains};
pub use pwm::{DutyMapper, PhaseDuties};
pub use transforms::{clarke, inverse_clarke, inverse_park, park, SinTable};
