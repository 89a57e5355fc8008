// PI / I-P regulator with pole-placement gain design

use crate::config::{LoopTuning, MotorParams};

/// Placement of the proportional term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlLaw {
    /// I-P: `u = -Kp·y + Ki·∫(r - y)dt` (no proportional kick on reference steps)
    IntegralProportional,
    /// PI: `u = Kp·(r - y) + Ki·∫(r - y)dt`
    ProportionalIntegral,
}

/// Proportional and integral gains
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PiGains {
    pub kp: f32,
    pub ki: f32,
}

impl PiGains {
    pub const fn new(kp: f32, ki: f32) -> Self {
        Self { kp, ki }
    }

    /// Current loop gains from second-order pole placement
    ///
    /// `Kp = 2ζω_c·L − R`, `Ki = ω_c²·L`
    pub fn current_loop(motor: &MotorParams, tuning: &LoopTuning) -> Self {
        let wc = tuning.cutoff;
        Self {
            kp: 2.0 * tuning.damping * wc * motor.inductance - motor.resistance,
            ki: wc * wc * motor.inductance,
        }
    }

    /// Speed loop gains from second-order pole placement
    ///
    /// `Kp = 2ζω_c·J/(p²φ)`, `Ki = ω_c²·J/(p²φ)`
    pub fn speed_loop(motor: &MotorParams, tuning: &LoopTuning) -> Self {
        let wc = tuning.cutoff;
        let p = motor.pole_pairs as f32;
        let scale = motor.inertia / (p * p * motor.flux_linkage);
        Self {
            kp: 2.0 * tuning.damping * wc * scale,
            ki: wc * wc * scale,
        }
    }
}

/// Integrator-based regulator shared by the current and speed loops
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PiController {
    gains: PiGains,
    law: ControlLaw,
    /// Integration step [s]
    dt: f32,
    /// Integral accumulator
    integral: f32,
    /// Symmetric output limit (None = unlimited)
    output_limit: Option<f32>,
    /// Last calculated output
    last_output: f32,
}

impl PiController {
    /// Create a regulator
    ///
    /// # Arguments
    /// * `gains` - Proportional and integral gains
    /// * `law` - Where the proportional term acts
    /// * `dt` - Integration step [s]
    pub const fn new(gains: PiGains, law: ControlLaw, dt: f32) -> Self {
        Self {
            gains,
            law,
            dt,
            integral: 0.0,
            output_limit: None,
            last_output: 0.0,
        }
    }

    /// I-P regulator
    pub const fn new_ip(gains: PiGains, dt: f32) -> Self {
        Self::new(gains, ControlLaw::IntegralProportional, dt)
    }

    /// Conventional PI regulator
    pub const fn new_pi(gains: PiGains, dt: f32) -> Self {
        Self::new(gains, ControlLaw::ProportionalIntegral, dt)
    }

    /// Clamp the output to ±`limit`; integration pauses while saturated
    pub fn with_limit(mut self, limit: f32) -> Self {
        self.output_limit = Some(limit);
        self
    }

    /// Update the regulator
    ///
    /// # Arguments
    /// * `reference` - Desired value
    /// * `measured` - Actual measured value
    ///
    /// # Returns
    /// Regulator output
    pub fn update(&mut self, reference: f32, measured: f32) -> f32 {
        let error = reference - measured;

        let saturated = match self.output_limit {
            Some(limit) => self.last_output >= limit || self.last_output <= -limit,
            None => false,
        };
        if !saturated {
            self.integral += error * self.dt;
        }

        let p_term = match self.law {
            ControlLaw::IntegralProportional => -self.gains.kp * measured,
            ControlLaw::ProportionalIntegral => self.gains.kp * error,
        };
        let output = p_term + self.gains.ki * self.integral;

        self.last_output = match self.output_limit {
            Some(limit) => output.clamp(-limit, limit),
            None => output,
        };
        self.last_output
    }

    /// Reset the integral term to zero
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_output = 0.0;
    }

    pub fn set_gains(&mut self, gains: PiGains) {
        self.gains = gains;
    }

    pub fn gains(&self) -> PiGains {
        self.gains
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    pub fn output(&self) -> f32 {
        self.last_output
    }
}
