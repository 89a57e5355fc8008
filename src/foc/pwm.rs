// Phase voltage → PWM compare value mapping

use crate::config::ScanTiming;

/// Bus voltage below which the bridge is treated as uncharged [V]
const MIN_VDC: f32 = 1.0e-3;

/// Compare values for the three half-bridges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhaseDuties {
    pub u: u16,
    pub v: u16,
    pub w: u16,
}

/// Triangle-carrier duty mapping with dead-time compensation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DutyMapper {
    /// Carrier period in timer cycles (compare value range)
    period: u16,
    /// Dead time in timer cycles
    dead_time: u16,
}

impl DutyMapper {
    pub const fn new(period: u16, dead_time: u16) -> Self {
        Self { period, dead_time }
    }

    /// Derive period and dead time from the scan timing
    ///
    /// A center-aligned counter runs up and down once per carrier period, so the
    /// compare range is `timer_clock / (2 · carrier)`.
    pub fn from_timing(timing: &ScanTiming) -> Self {
        let carrier_khz = timing.carrier_freq_hz as u64 * 2 / 1000;
        let period = if carrier_khz == 0 {
            u16::MAX
        } else {
            (timing.pwm_timer_freq_khz as u64 / carrier_khz).min(u16::MAX as u64) as u16
        };
        let dead_time =
            (timing.pwm_timer_freq_khz as u64 * timing.dead_time_ns as u64 / 1_000_000) as u16;
        Self { period, dead_time }
    }

    pub const fn period(&self) -> u16 {
        self.period
    }

    pub const fn dead_time(&self) -> u16 {
        self.dead_time
    }

    /// 50 % duty (zero average phase voltage)
    pub const fn midpoint(&self) -> u16 {
        self.period / 2
    }

    /// Map one phase voltage to a compare value
    ///
    /// `duty = period·(0.5 − V/Vdc) + dead/2`, clamped to `[1, period − 1]`.
    /// An uncharged bus or a NaN voltage gives the midpoint.
    pub fn duty(&self, v_phase: f32, vdc: f32) -> u16 {
        if !(vdc > MIN_VDC) || v_phase.is_nan() {
            return self.midpoint();
        }
        let period = self.period as f32;
        let raw = period * (0.5 - v_phase / vdc) + self.dead_time as f32 * 0.5;
        let max = self.period.saturating_sub(1).max(1) as f32;
        raw.clamp(1.0, max) as u16
    }

    /// Map three phase voltages
    pub fn duties(&self, u: f32, v: f32, w: f32, vdc: f32) -> PhaseDuties {
        PhaseDuties {
            u: self.duty(u, vdc),
            v: self.duty(v, vdc),
            w: self.duty(w, vdc),
        }
    }

    /// Compare value → phase voltage (inverse mapping, dead time ignored)
    pub fn phase_voltage(&self, duty: u16, vdc: f32) -> f32 {
        if self.period == 0 {
            return 0.0;
        }
        (0.5 - duty as f32 / self.period as f32) * vdc
    }
}
