//! Command-line configuration

use std::time::Duration;

use clap::{Parser, ValueEnum};
use ecat_servo::config::{DriveConfig, ReferenceMode};

use crate::sim::SimOptions;

/// Default tracing filter (overridden by `RUST_LOG`)
pub const DEFAULT_LOG_FILTER: &str = "ecat_servo_master=debug,ecat_servo=info,info";

/// Outer speed loop gains [A per mechanical rad/s]
pub const DEFAULT_SPEED_KP: f32 = 0.08;
pub const DEFAULT_SPEED_KI: f32 = 5.0;

/// q-axis current limit of the outer speed loop [A]
pub const DEFAULT_MAX_CURRENT: f32 = 5.0;

/// Consecutive working-counter misses before the bus is reported degraded
pub const DEFAULT_DEGRADE_AFTER: u32 = 10;

/// Meaning of the reference sent to the drive
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    /// Mechanical speed [rad/s], speed loop on the drive
    Velocity,
    /// q-axis current [A], speed loop on the master
    Current,
}

impl From<ModeArg> for ReferenceMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Velocity => ReferenceMode::Velocity,
            ModeArg::Current => ReferenceMode::Current,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "ecat-servo-master")]
#[command(about = "Fieldbus master for field-oriented servo drives")]
pub struct MasterConfig {
    /// Network interface name
    #[arg(short, long, default_value = "sim0")]
    pub interface: String,

    /// Control period [µs]
    #[arg(long, default_value_t = 500)]
    pub period_us: u64,

    /// Position of the controlled slave on the bus (1-based)
    #[arg(long, default_value_t = 1)]
    pub slave: usize,

    /// Reference mode
    #[arg(short, long, value_enum, default_value_t = ModeArg::Velocity)]
    pub mode: ModeArg,

    /// Initial target speed [rad/s]
    #[arg(long, default_value_t = 0.0)]
    pub target_speed: f32,

    /// Speed loop proportional gain (current mode)
    #[arg(long, default_value_t = DEFAULT_SPEED_KP)]
    pub speed_kp: f32,

    /// Speed loop integral gain (current mode)
    #[arg(long, default_value_t = DEFAULT_SPEED_KI)]
    pub speed_ki: f32,

    /// Current reference limit [A] (current mode)
    #[arg(long, default_value_t = DEFAULT_MAX_CURRENT)]
    pub max_current: f32,

    /// Consecutive missed cycles before the bus is reported degraded
    #[arg(long, default_value_t = DEFAULT_DEGRADE_AFTER)]
    pub degrade_after: u32,

    /// Number of simulated slaves
    #[arg(long, default_value_t = 1)]
    pub sim_slaves: usize,

    /// Simulated DC bus voltage [V]
    #[arg(long, default_value_t = 24.0)]
    pub sim_vdc: f32,

    /// Simulated slaves never reach OPERATIONAL
    #[arg(long)]
    pub sim_refuse_op: bool,

    /// Drop the working counter every n-th cycle
    #[arg(long)]
    pub sim_miss_every: Option<u32>,

    /// Tracing filter
    #[arg(long, default_value = DEFAULT_LOG_FILTER)]
    pub log: String,

    /// Stop after this many seconds
    #[arg(long)]
    pub max_runtime_s: Option<f64>,
}

impl MasterConfig {
    pub fn period(&self) -> Duration {
        Duration::from_micros(self.period_us.max(1))
    }

    pub fn max_runtime(&self) -> Option<Duration> {
        self.max_runtime_s
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
    }

    pub fn reference_mode(&self) -> ReferenceMode {
        self.mode.into()
    }

    /// Drive configuration of the simulated inverters
    pub fn drive_config(&self) -> DriveConfig {
        DriveConfig {
            reference_mode: self.reference_mode(),
            ..DriveConfig::default()
        }
    }

    pub fn sim_options(&self) -> SimOptions {
        SimOptions {
            slaves: self.sim_slaves,
            vdc: self.sim_vdc,
            fail_open: false,
            refuse_op: self.sim_refuse_op,
            miss_every: self.sim_miss_every,
            cycle: self.period(),
        }
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            interface: "sim0".to_string(),
            period_us: 500,
            slave: 1,
            mode: ModeArg::Velocity,
            target_speed: 0.0,
            speed_kp: DEFAULT_SPEED_KP,
            speed_ki: DEFAULT_SPEED_KI,
            max_current: DEFAULT_MAX_CURRENT,
            degrade_after: DEFAULT_DEGRADE_AFTER,
            sim_slaves: 1,
            sim_vdc: 24.0,
            sim_refuse_op: false,
            sim_miss_every: None,
            log: DEFAULT_LOG_FILTER.to_string(),
            max_runtime_s: None,
        }
    }
}
