//! Master-side proxy for one servo axis
//!
//! Owns the typed channels for the axis, the pending reference and the
//! operator command latch. One [`ServoAxis::update`] per bus cycle.

use core::f32::consts::TAU;

use crate::bus::{ProcessDataChannel, ProcessImage};
use crate::config::EncoderParams;
use crate::protocol::{ControlCommand, MasterToSlave, SlaveToMaster, StateReport};

/// Edge-triggered operator requests
///
/// A flag stays set until the reported remote state shows it took effect.
/// ServoOn and ServoOff cancel each other, and a reset request also drops a
/// pending ServoOn, so the latest operator request wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandLatch {
    servo_on: bool,
    servo_off: bool,
    reset_error: bool,
}

impl CommandLatch {
    pub const fn new() -> Self {
        Self {
            servo_on: false,
            servo_off: false,
            reset_error: false,
        }
    }

    /// # Returns
    /// `false` if the remote is already running
    pub fn request_servo_on(&mut self, reported: StateReport) -> bool {
        self.servo_off = false;
        if reported == StateReport::Run {
            return false;
        }
        self.servo_on = true;
        true
    }

    /// Cancels a pending ServoOn even if the remote is already stopped
    ///
    /// # Returns
    /// `false` if the remote is already stopped
    pub fn request_servo_off(&mut self, reported: StateReport) -> bool {
        self.servo_on = false;
        if reported == StateReport::Stop {
            return false;
        }
        self.servo_off = true;
        true
    }

    /// Cancels a pending ServoOn; restart needs a new request after the reset
    ///
    /// # Returns
    /// `false` unless the remote reports Error
    pub fn request_reset(&mut self, reported: StateReport) -> bool {
        self.servo_on = false;
        if reported != StateReport::Error {
            return false;
        }
        self.reset_error = true;
        true
    }

    /// Clear every flag the reported state satisfies
    pub fn observe(&mut self, reported: StateReport) {
        if self.servo_on && reported == StateReport::Run {
            self.servo_on = false;
        }
        if self.servo_off && reported == StateReport::Stop {
            self.servo_off = false;
        }
        if self.reset_error && reported != StateReport::Error {
            self.reset_error = false;
        }
    }

    /// Wire command; ResetError > ServoOff > ServoOn
    pub fn command(&self) -> ControlCommand {
        if self.reset_error {
            ControlCommand::ResetError
        } else if self.servo_off {
            ControlCommand::ServoOff
        } else if self.servo_on {
            ControlCommand::ServoOn
        } else {
            ControlCommand::None
        }
    }

    pub fn servo_on(&self) -> bool {
        self.servo_on
    }

    pub fn servo_off(&self) -> bool {
        self.servo_off
    }

    pub fn reset_error(&self) -> bool {
        self.reset_error
    }

    pub fn is_idle(&self) -> bool {
        !(self.servo_on || self.servo_off || self.reset_error)
    }
}

pub struct ServoAxis {
    tx: ProcessDataChannel<MasterToSlave>,
    rx: ProcessDataChannel<SlaveToMaster>,
    reference: f32,
    latch: CommandLatch,
    feedback: SlaveToMaster,
    /// Whether the last update received feedback
    online: bool,
    counts_per_rev: f32,
    speed_period_us: f32,
}

impl ServoAxis {
    /// # Arguments
    /// * `position` - 1-based slave position on the bus
    /// * `encoder` - Encoder geometry of the remote drive (for unit conversion)
    pub fn new(position: usize, encoder: &EncoderParams) -> Self {
        Self {
            tx: ProcessDataChannel::new(position),
            rx: ProcessDataChannel::new(position),
            reference: 0.0,
            latch: CommandLatch::new(),
            feedback: SlaveToMaster::new(),
            online: false,
            counts_per_rev: encoder.counts_per_rev.max(1) as f32,
            speed_period_us: encoder.sample_period_us.max(1) as f32,
        }
    }

    pub fn position_on_bus(&self) -> usize {
        self.tx.index()
    }

    pub fn servo_on(&mut self) -> bool {
        self.latch.request_servo_on(self.feedback.state)
    }

    pub fn servo_off(&mut self) -> bool {
        self.latch.request_servo_off(self.feedback.state)
    }

    pub fn reset_error(&mut self) -> bool {
        self.latch.request_reset(self.feedback.state)
    }

    /// Velocity [rad/s] or q-axis current [A], depending on the drive's reference mode
    pub fn set_reference(&mut self, reference: f32) {
        self.reference = reference;
    }

    pub fn reference(&self) -> f32 {
        self.reference
    }

    /// One bus cycle: read feedback, settle the latch, write the command
    ///
    /// # Returns
    /// `true` if feedback was received this cycle
    pub fn update<I: ProcessImage + ?Sized>(&mut self, image: &mut I) -> bool {
        self.online = match self.rx.receive(image) {
            Some(feedback) => {
                self.feedback = feedback;
                self.latch.observe(feedback.state);
                true
            }
            None => false,
        };

        let command = MasterToSlave {
            reference: self.reference,
            command: self.latch.command(),
        };
        self.tx.send(image, &command);
        self.online
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn latch(&self) -> &CommandLatch {
        &self.latch
    }

    pub fn feedback(&self) -> &SlaveToMaster {
        &self.feedback
    }

    pub fn state(&self) -> StateReport {
        self.feedback.state
    }

    /// Mechanical position [rad]
    pub fn position(&self) -> f32 {
        self.feedback.position as f32 * TAU / self.counts_per_rev
    }

    /// Mechanical speed [rad/s]
    pub fn speed(&self) -> f32 {
        self.feedback.velocity as f32 * TAU * 1.0e6 / (self.speed_period_us * self.counts_per_rev)
    }

    /// q-axis current [A]
    pub fn current(&self) -> f32 {
        self.feedback.current
    }
}
