//! Operator command injection
//!
//! Commands arrive on a non-real-time thread and are handed to the control
//! loop through [`OperatorPanel`]. The mutex is held only to set or take the
//! pending flags.

use std::io::BufRead;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use tracing::{info, warn};

/// One line of operator input
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorCommand {
    ServoOn,
    ServoOff,
    ResetError,
    /// Target speed [rad/s]
    SetSpeed(f32),
    Quit,
}

impl FromStr for OperatorCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or_else(|| anyhow!("empty command"))?;
        let parsed = match command {
            "o" => Self::ServoOn,
            "f" => Self::ServoOff,
            "r" => Self::ResetError,
            "q" => Self::Quit,
            "s" => {
                let value = words
                    .next()
                    .ok_or_else(|| anyhow!("usage: s <rad/s>"))?;
                let speed: f32 = value
                    .parse()
                    .with_context(|| format!("invalid speed: {}", value))?;
                if !speed.is_finite() {
                    bail!("invalid speed: {}", value);
                }
                Self::SetSpeed(speed)
            }
            other => bail!("unknown command: {}", other),
        };
        if let Some(extra) = words.next() {
            bail!("unexpected argument: {}", extra);
        }
        Ok(parsed)
    }
}

/// Pending operator requests, consumed once per control tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OperatorRequests {
    pub servo_on: bool,
    pub servo_off: bool,
    pub reset_error: bool,
    pub target_speed: Option<f32>,
}

impl OperatorRequests {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Shared between the operator thread and the control loop
#[derive(Debug, Default)]
pub struct OperatorPanel {
    requests: Mutex<OperatorRequests>,
    exit: AtomicBool,
}

impl OperatorPanel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, OperatorRequests> {
        // Only flags inside; a poisoned lock is still usable
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn submit(&self, command: OperatorCommand) {
        if command == OperatorCommand::Quit {
            self.request_exit();
            return;
        }

        let mut requests = self.lock();
        match command {
            // A later request cancels the opposite one
            OperatorCommand::ServoOn => {
                requests.servo_on = true;
                requests.servo_off = false;
            }
            OperatorCommand::ServoOff => {
                requests.servo_off = true;
                requests.servo_on = false;
            }
            OperatorCommand::ResetError => {
                requests.reset_error = true;
                requests.servo_on = false;
            }
            OperatorCommand::SetSpeed(speed) => requests.target_speed = Some(speed),
            OperatorCommand::Quit => {}
        }
    }

    /// Take and clear everything pending
    pub fn take(&self) -> OperatorRequests {
        std::mem::take(&mut *self.lock())
    }

    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::Release);
    }

    pub fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }
}

/// Read commands line by line until `q`, EOF or an exit request
pub fn run_reader<R: BufRead>(panel: &OperatorPanel, reader: R) -> Result<()> {
    info!("Operator commands: o=servo on, f=servo off, r=reset error, s <rad/s>=speed, q=quit");
    for line in reader.lines() {
        let line = line.context("Failed to read operator input")?;
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<OperatorCommand>() {
            Ok(command) => {
                info!("Operator command: {:?}", command);
                panel.submit(command);
                if command == OperatorCommand::Quit {
                    break;
                }
            }
            Err(e) => warn!("Ignoring operator input '{}': {}", line.trim(), e),
        }
        if panel.exit_requested() {
            break;
        }
    }
    Ok(())
}
