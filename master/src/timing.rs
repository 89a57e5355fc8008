//! Fixed-period real-time slot

use std::time::{Duration, Instant};

/// Deadline-based periodic wait
///
/// Deadlines advance by exactly one period per tick. A tick that finishes past
/// its deadline counts as an overrun and the schedule restarts from now.
#[derive(Debug)]
pub struct PeriodicSlot {
    period: Duration,
    next: Instant,
    overruns: u64,
}

impl PeriodicSlot {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
            overruns: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep until the next deadline
    ///
    /// # Returns
    /// `false` if the deadline had already passed
    pub fn wait(&mut self) -> bool {
        let now = Instant::now();
        if now < self.next {
            std::thread::sleep(self.next - now);
            self.next += self.period;
            true
        } else {
            self.overruns += 1;
            self.next = now + self.period;
            false
        }
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}
