//! Real-time control loop
//!
//! One tick per control period: apply operator requests, exchange process
//! data, update the axis and (in current mode) run the outer speed loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ecat_servo::bus::{BusDriver, BusHealth, FieldbusMaster, HealthTransition};
use ecat_servo::config::{EncoderParams, ReferenceMode};
use ecat_servo::foc::{PiController, PiGains};
use ecat_servo::protocol::StateReport;
use ecat_servo::ServoAxis;
use tracing::{debug, info, warn};

use crate::config::MasterConfig;
use crate::operator::{OperatorPanel, OperatorRequests};
use crate::timing::PeriodicSlot;

/// Status log interval
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlSummary {
    pub ticks: u64,
    pub overruns: u64,
    pub missed_cycles: u64,
}

pub struct ControlLoop<D: BusDriver> {
    master: FieldbusMaster<D>,
    axis: ServoAxis,
    health: BusHealth,
    speed_loop: PiController,
    mode: ReferenceMode,
    target_speed: f32,
    panel: Arc<OperatorPanel>,
    ticks: u64,
    status_every: u64,
}

impl<D: BusDriver> ControlLoop<D> {
    /// # Arguments
    /// * `master` - Master that already completed bring-up
    /// * `config` - Master configuration
    /// * `panel` - Operator request channel
    pub fn new(master: FieldbusMaster<D>, config: &MasterConfig, panel: Arc<OperatorPanel>) -> Self {
        let period = config.period();
        let speed_loop = PiController::new_pi(
            PiGains::new(config.speed_kp, config.speed_ki),
            period.as_secs_f32(),
        )
        .with_limit(config.max_current);

        Self {
            master,
            axis: ServoAxis::new(config.slave, &EncoderParams::default()),
            health: BusHealth::new(config.degrade_after),
            speed_loop,
            mode: config.reference_mode(),
            target_speed: config.target_speed,
            panel,
            ticks: 0,
            status_every: (STATUS_INTERVAL.as_micros() / period.as_micros().max(1)).max(1) as u64,
        }
    }

    pub fn axis(&self) -> &ServoAxis {
        &self.axis
    }

    pub fn master(&self) -> &FieldbusMaster<D> {
        &self.master
    }

    pub fn master_mut(&mut self) -> &mut FieldbusMaster<D> {
        &mut self.master
    }

    pub fn health(&self) -> &BusHealth {
        &self.health
    }

    pub fn target_speed(&self) -> f32 {
        self.target_speed
    }

    fn apply(&mut self, requests: OperatorRequests) {
        if let Some(speed) = requests.target_speed {
            info!("Target speed {} rad/s", speed);
            self.target_speed = speed;
        }
        if requests.reset_error && !self.axis.reset_error() {
            debug!("Reset ignored: axis reports {:?}", self.axis.state());
        }
        if requests.servo_off && !self.axis.servo_off() {
            debug!("Servo off ignored: axis already stopped");
        }
        if requests.servo_on {
            if self.axis.servo_on() {
                self.speed_loop.reset();
            } else {
                debug!("Servo on ignored: axis already running");
            }
        }
    }

    /// Reference for the next cycle
    fn reference(&mut self) -> f32 {
        match self.mode {
            ReferenceMode::Velocity => self.target_speed,
            ReferenceMode::Current => {
                if self.axis.state() == StateReport::Run {
                    self.speed_loop.update(self.target_speed, self.axis.speed())
                } else {
                    self.speed_loop.reset();
                    0.0
                }
            }
        }
    }

    /// One control period
    pub fn tick(&mut self) {
        let requests = self.panel.take();
        if !requests.is_empty() {
            self.apply(requests);
        }

        let healthy = self.master.update();
        match self.health.record(healthy) {
            Some(HealthTransition::Degraded) => warn!(
                "Bus degraded: wkc {} < expected {} for {} cycles",
                self.master.last_wkc(),
                self.master.expected_wkc(),
                self.health.consecutive_misses()
            ),
            Some(HealthTransition::Recovered) => info!("Bus recovered"),
            None => {}
        }

        let reference = self.reference();
        self.axis.set_reference(reference);
        self.axis.update(&mut self.master);

        self.ticks += 1;
        if self.ticks % self.status_every == 0 {
            self.log_status();
        }
    }

    fn log_status(&self) {
        info!(
            "state={:?} pos={:.3}rad speed={:.2}rad/s iq={:.3}A ref={:.3} bus={} misses={}",
            self.axis.state(),
            self.axis.position(),
            self.axis.speed(),
            self.axis.current(),
            self.axis.reference(),
            if self.health.is_degraded() { "degraded" } else { "ok" },
            self.health.total_misses()
        );
    }

    /// Run until an exit request or `max_runtime`, then close the bus
    pub fn run(mut self, mut slot: PeriodicSlot, max_runtime: Option<Duration>) -> ControlSummary {
        info!("Control loop started ({:?} period)", slot.period());
        let start = Instant::now();

        while !self.panel.exit_requested() {
            self.tick();
            if max_runtime.is_some_and(|limit| start.elapsed() >= limit) {
                info!("Maximum runtime reached");
                break;
            }
            slot.wait();
        }

        // Send a servo-off before closing
        if self.axis.is_online() && self.axis.servo_off() {
            self.tick();
        }
        self.master.close();

        let summary = ControlSummary {
            ticks: self.ticks,
            overruns: slot.overruns(),
            missed_cycles: self.health.total_misses(),
        };
        info!("Control loop stopped: {:?}", summary);
        summary
    }
}
