//! Fieldbus master application for field-oriented servo drives

pub mod config;
pub mod control;
pub mod operator;
pub mod sim;
pub mod timing;

use ecat_servo::bus::InitState;

/// Process exit code for a failed bring-up
///
/// # Returns
/// `None` when all slaves are operational
pub fn exit_code(state: InitState) -> Option<i32> {
    match state {
        InitState::AllOperational => None,
        InitState::PortOpenFailed => Some(1),
        InitState::SlavesNotFound => Some(2),
        InitState::NotAllOperational => Some(3),
    }
}
