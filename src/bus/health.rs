//! Working-counter health bookkeeping
//!
//! The per-cycle result of `FieldbusMaster::update` is only a hint. This
//! tracker turns it into counters and edge notifications; it never halts
//! anything by itself.

/// Health edge reported by [`BusHealth::record`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HealthTransition {
    /// Consecutive misses reached the degrade threshold
    Degraded,
    /// First good cycle after being degraded
    Recovered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusHealth {
    degrade_after: u32,
    consecutive_misses: u32,
    total_misses: u64,
    cycles: u64,
    degraded: bool,
}

impl BusHealth {
    /// # Arguments
    /// * `degrade_after` - Consecutive missed cycles before reporting `Degraded` (min 1)
    pub const fn new(degrade_after: u32) -> Self {
        Self {
            degrade_after: if degrade_after == 0 { 1 } else { degrade_after },
            consecutive_misses: 0,
            total_misses: 0,
            cycles: 0,
            degraded: false,
        }
    }

    /// Record one cycle's result
    pub fn record(&mut self, healthy: bool) -> Option<HealthTransition> {
        self.cycles += 1;
        if healthy {
            self.consecutive_misses = 0;
            if self.degraded {
                self.degraded = false;
                return Some(HealthTransition::Recovered);
            }
            return None;
        }

        self.total_misses += 1;
        self.consecutive_misses = self.consecutive_misses.saturating_add(1);
        if !self.degraded && self.consecutive_misses >= self.degrade_after {
            self.degraded = true;
            return Some(HealthTransition::Degraded);
        }
        None
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }

    pub fn total_misses(&self) -> u64 {
        self.total_misses
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

impl Default for BusHealth {
    fn default() -> Self {
        Self::new(10)
    }
}
