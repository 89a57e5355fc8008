#![cfg_attr(not(test), no_std)]

// fmt must come first so its macros are visible in the modules below
mod fmt;

pub mod axis;
pub mod bus;
pub mod config;
pub mod foc;
pub mod hardware;
pub mod protocol;
pub mod scan;
pub mod state_machine;

pub use axis::{CommandLatch, ServoAxis};
pub use config::{DriveConfig, ReferenceMode};
pub use protocol::{ControlCommand, MasterToSlave, ProcessData, SlaveToMaster, StateReport};
pub use scan::{InverterPeripherals, InverterRuntime, MotorContext};
pub use state_machine::{OperationalState, OperatorStateMachine};
