//! Simulated fieldbus backend
//!
//! Every simulated slave runs the complete inverter runtime (scans, encoder
//! estimator, state machine, slave controller runtime) against a first-order
//! PMSM model. Simulated time advances by one control period per received
//! frame, so the master loop drives the simulation.

use std::f32::consts::TAU;
use std::time::Duration;

use ecat_servo::bus::{
    AlState, BusDriver, PortError, SyncMode, VirtualEsc, WkcContribution,
};
use ecat_servo::config::{CurrentSenseParams, DriveConfig, EncoderParams, MotorParams};
use ecat_servo::foc::{clarke, inverse_clarke, AdcSample, DutyMapper, PhaseDuties, Wrap};
use ecat_servo::hardware::{FaultInput, PhaseAdc, PowerStage, QuadratureCounter};
use ecat_servo::protocol::{MasterToSlave, ProcessData, SlaveToMaster};
use ecat_servo::scan::{InverterPeripherals, InverterRuntime};
use tracing::{debug, info, warn};

/// Plant integration steps per carrier period
const PLANT_SUBSTEPS: u32 = 5;

/// Viscous friction [N·m·s/rad]
const FRICTION: f32 = 1.0e-6;

/// Simulation options
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Number of slaves answering on the bus
    pub slaves: usize,
    /// DC bus voltage [V]
    pub vdc: f32,
    /// Make `open` fail
    pub fail_open: bool,
    /// Slaves never leave SAFE-OP
    pub refuse_op: bool,
    /// Drop the working counter every n-th cycle
    pub miss_every: Option<u32>,
    /// Simulated time per process-data cycle
    pub cycle: Duration,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            slaves: 1,
            vdc: 24.0,
            fail_open: false,
            refuse_op: false,
            miss_every: None,
            cycle: Duration::from_micros(500),
        }
    }
}

/// First-order PMSM model in the rotor frame
#[derive(Debug, Clone)]
pub struct PmsmPlant {
    motor: MotorParams,
    /// Electrical offset between the encoder count origin and the rotor flux [rad]
    theta_offset: f32,
    pub id: f32,
    pub iq: f32,
    /// Mechanical speed [rad/s]
    pub omega_m: f32,
    /// Mechanical angle [rad] (multi-turn)
    pub theta_m: f64,
}

impl PmsmPlant {
    pub fn new(motor: MotorParams, encoder: &EncoderParams) -> Self {
        let counts_per_elec = encoder.counts_per_electrical_rev().max(1) as f32;
        Self {
            motor,
            theta_offset: TAU * encoder.z_offset as f32 / counts_per_elec,
            id: 0.0,
            iq: 0.0,
            omega_m: 0.0,
            theta_m: 0.0,
        }
    }

    /// Electrical angle seen by the windings [rad]
    pub fn theta_e(&self) -> f32 {
        let pp = self.motor.pole_pairs as f64;
        ((pp * self.theta_m).rem_euclid(std::f64::consts::TAU) as f32 - self.theta_offset)
            .rem_euclid(TAU)
    }

    pub fn omega_e(&self) -> f32 {
        self.motor.pole_pairs as f32 * self.omega_m
    }

    /// Phase currents from the rotor-frame state
    pub fn phase_currents(&self) -> (f32, f32, f32) {
        let (sin, cos) = self.theta_e().sin_cos();
        let alpha = cos * self.id - sin * self.iq;
        let beta = sin * self.id + cos * self.iq;
        inverse_clarke(alpha, beta)
    }

    /// Advance by `dt` with phase voltages applied (`None` = bridge off)
    pub fn step(&mut self, phase_voltages: Option<(f32, f32, f32)>, dt: f32) {
        let m = self.motor;
        let omega_e = self.omega_e();

        match phase_voltages {
            Some((u, v, w)) => {
                let (alpha, beta) = clarke(u, v, w);
                let (sin, cos) = self.theta_e().sin_cos();
                let vd = cos * alpha + sin * beta;
                let vq = -sin * alpha + cos * beta;

                let did = (vd - m.resistance * self.id + omega_e * m.inductance * self.iq)
                    / m.inductance;
                let diq = (vq
                    - m.resistance * self.iq
                    - omega_e * (m.inductance * self.id + m.flux_linkage))
                    / m.inductance;
                self.id += did * dt;
                self.iq += diq * dt;
            }
            None => {
                // Gate off: no current flows while the bus voltage exceeds the back-EMF
                self.id = 0.0;
                self.iq = 0.0;
            }
        }

        let torque = m.pole_pairs as f32 * m.flux_linkage * self.iq;
        let domega = (torque - FRICTION * self.omega_m) / m.inertia;
        self.omega_m += domega * dt;
        self.theta_m += (self.omega_m * dt) as f64;
    }
}

/// Bridge model: latches duties and the gate enable
#[derive(Debug, Clone, Default)]
pub struct SimPowerStage {
    pub duties: PhaseDuties,
    pub enabled: bool,
}

impl PowerStage for SimPowerStage {
    fn set_duties(&mut self, duties: PhaseDuties) {
        self.duties = duties;
    }

    fn enable(&mut self) {
        if !self.enabled {
            debug!("Simulated bridge enabled");
        }
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }
}

/// ADC returning the codes prepared for the current carrier period
#[derive(Debug, Clone, Default)]
pub struct SimAdc {
    pub sample: AdcSample,
}

impl PhaseAdc for SimAdc {
    fn sample(&mut self) -> AdcSample {
        self.sample
    }
}

/// Encoder-mode counter
#[derive(Debug, Clone, Default)]
pub struct SimEncoder {
    pub count: u16,
    pub up: bool,
    pub wrap: Wrap,
}

impl QuadratureCounter for SimEncoder {
    fn count(&self) -> u16 {
        self.count
    }

    fn counting_up(&self) -> bool {
        self.up
    }

    fn take_wrap(&mut self) -> Wrap {
        std::mem::take(&mut self.wrap)
    }
}

/// External fault input (can be forced by tests)
#[derive(Debug, Clone, Default)]
pub struct SimFault {
    pub latched: bool,
    pub active: bool,
}

impl FaultInput for SimFault {
    fn latched(&mut self) -> bool {
        self.latched || self.active
    }

    fn source_active(&mut self) -> bool {
        self.active
    }

    fn clear_latch(&mut self) {
        self.latched = false;
    }
}

type SimRuntime = InverterRuntime<VirtualEsc, SimPowerStage, SimAdc, SimEncoder, SimFault, ()>;

/// One inverter with its plant
pub struct SimulatedSlave {
    runtime: SimRuntime,
    plant: PmsmPlant,
    sense: CurrentSenseParams,
    duty: DutyMapper,
    counts_per_rev: i64,
    /// Number of completed revolutions at the last carrier tick
    revolutions: i64,
    vdc: f32,
    carrier_dt: f32,
}

impl SimulatedSlave {
    pub fn new(config: &DriveConfig, vdc: f32) -> Self {
        let hw = InverterPeripherals {
            power: SimPowerStage::default(),
            adc: SimAdc::default(),
            counter: SimEncoder::default(),
            fault: SimFault::default(),
            indicator: (),
        };
        let mut runtime = InverterRuntime::new(config, VirtualEsc::new(), hw);
        if let Err(e) = runtime.init(SyncMode::DcSync) {
            warn!("Simulated ESC init failed: {:?}", e);
        }

        Self {
            runtime,
            plant: PmsmPlant::new(config.motor, &config.encoder),
            sense: config.sense,
            duty: DutyMapper::from_timing(&config.timing),
            counts_per_rev: config.encoder.counts_per_rev.max(1) as i64,
            revolutions: 0,
            vdc,
            carrier_dt: config.timing.carrier_period_s(),
        }
    }

    pub fn runtime(&self) -> &SimRuntime {
        &self.runtime
    }

    pub fn plant(&self) -> &PmsmPlant {
        &self.plant
    }

    pub fn fault_mut(&mut self) -> &mut SimFault {
        &mut self.runtime.peripherals_mut().fault
    }

    fn esc_mut(&mut self) -> &mut VirtualEsc {
        self.runtime.slave_mut().esc_mut()
    }

    fn esc(&self) -> &VirtualEsc {
        self.runtime.slave().esc()
    }

    fn adc_code(value: f32, gain: f32, offset: i16) -> i16 {
        let code = offset as f32 + (value / gain).round();
        code.clamp(i16::MIN as f32, i16::MAX as f32) as i16
    }

    /// Sample the plant into the simulated peripherals
    fn sense_plant(&mut self) {
        let (iu, iv, iw) = self.plant.phase_currents();
        let sense = self.sense;
        let sample = AdcSample {
            iu: Self::adc_code(iu, sense.current_gain, sense.current_offset_code),
            iv: Self::adc_code(iv, sense.current_gain, sense.current_offset_code),
            iw: Self::adc_code(iw, sense.current_gain, sense.current_offset_code),
            vdc: Self::adc_code(self.vdc, sense.vdc_gain, sense.vdc_offset_code),
        };

        let absolute =
            (self.plant.theta_m * self.counts_per_rev as f64 / std::f64::consts::TAU).floor() as i64;
        let revolutions = absolute.div_euclid(self.counts_per_rev);
        let up = self.plant.omega_m >= 0.0;

        let hw = self.runtime.peripherals_mut();
        hw.adc.sample = sample;
        hw.counter.count = absolute.rem_euclid(self.counts_per_rev) as u16;
        hw.counter.up = up;
        if revolutions > self.revolutions {
            hw.counter.wrap = Wrap::Overflow;
        } else if revolutions < self.revolutions {
            hw.counter.wrap = Wrap::Underflow;
        }

        if revolutions != self.revolutions {
            self.revolutions = revolutions;
            // Z pulse on every origin crossing; the estimator decides whether to capture it
            self.runtime.index_edge();
        }
    }

    /// One carrier period of firmware plus plant
    pub fn carrier_tick(&mut self) {
        self.sense_plant();
        self.runtime.carrier_tick();

        let power = &self.runtime.peripherals().power;
        let voltages = power.enabled.then(|| {
            let d = power.duties;
            (
                self.duty.phase_voltage(d.u, self.vdc),
                self.duty.phase_voltage(d.v, self.vdc),
                self.duty.phase_voltage(d.w, self.vdc),
            )
        });
        let dt = self.carrier_dt / PLANT_SUBSTEPS as f32;
        for _ in 0..PLANT_SUBSTEPS {
            self.plant.step(voltages, dt);
        }
    }
}

/// `BusDriver` backed by simulated slaves
pub struct SimulatedBus {
    options: SimOptions,
    slaves: Vec<SimulatedSlave>,
    outputs: Vec<Vec<u8>>,
    inputs: Vec<Vec<u8>>,
    carrier_ticks_per_cycle: u32,
    opened: bool,
    sent: bool,
    cycles: u64,
}

impl SimulatedBus {
    pub fn new(options: SimOptions, config: DriveConfig) -> Self {
        let slaves = (0..options.slaves)
            .map(|_| SimulatedSlave::new(&config, options.vdc))
            .collect();
        let carrier_ticks_per_cycle = (options.cycle.as_micros() as u64
            * config.timing.carrier_freq_hz as u64
            / 1_000_000)
            .max(1) as u32;

        Self {
            slaves,
            outputs: vec![vec![0u8; MasterToSlave::SIZE]; options.slaves],
            inputs: vec![vec![0u8; SlaveToMaster::SIZE]; options.slaves],
            carrier_ticks_per_cycle,
            opened: false,
            sent: false,
            cycles: 0,
            options,
        }
    }

    pub fn slave(&self, position: usize) -> Option<&SimulatedSlave> {
        self.slaves.get(position.checked_sub(1)?)
    }

    pub fn slave_mut(&mut self, position: usize) -> Option<&mut SimulatedSlave> {
        self.slaves.get_mut(position.checked_sub(1)?)
    }

    pub fn carrier_ticks_per_cycle(&self) -> u32 {
        self.carrier_ticks_per_cycle
    }

    fn lowest_state(&self) -> AlState {
        self.slaves
            .iter()
            .map(|s| s.esc().al_state())
            .min_by_key(|s| *s as u8)
            .unwrap_or(AlState::None)
    }

    fn set_state(&mut self, slave: u16, state: AlState) {
        let state = if state == AlState::Op && self.options.refuse_op {
            AlState::SafeOp
        } else {
            state
        };
        for (i, s) in self.slaves.iter_mut().enumerate() {
            if slave == 0 || slave as usize == i + 1 {
                let esc = s.esc_mut();
                esc.set_al_state(state);
                esc.set_watchdog_ok(state == AlState::Op);
            }
        }
    }
}

impl BusDriver for SimulatedBus {
    fn open(&mut self, ifname: &str) -> Result<(), PortError> {
        if self.options.fail_open {
            return Err(PortError::NotFound);
        }
        info!("Simulated interface {} opened ({} slaves)", ifname, self.slaves.len());
        self.opened = true;
        Ok(())
    }

    fn config_init(&mut self) -> usize {
        self.set_state(0, AlState::PreOp);
        self.slaves.len()
    }

    fn config_map(&mut self) -> WkcContribution {
        self.set_state(0, AlState::SafeOp);
        let n = self.slaves.len() as u16;
        WkcContribution {
            outputs: n,
            inputs: n,
        }
    }

    fn config_dc(&mut self) {
        debug!("Simulated DC configuration");
    }

    fn state_check(&mut self, slave: u16, _state: AlState, _timeout: Duration) -> AlState {
        if slave == 0 {
            self.lowest_state()
        } else {
            self.slave(slave as usize)
                .map(|s| s.esc().al_state())
                .unwrap_or(AlState::None)
        }
    }

    fn write_state(&mut self, slave: u16, state: AlState) {
        self.set_state(slave, state);
    }

    fn send_processdata(&mut self) {
        for (slave, output) in self.slaves.iter_mut().zip(&self.outputs) {
            let pram = slave.esc_mut().outputs_mut();
            pram[..output.len()].copy_from_slice(output);
        }
        self.sent = true;
    }

    fn receive_processdata(&mut self, _timeout: Duration) -> i32 {
        if !self.opened || !std::mem::take(&mut self.sent) {
            return 0;
        }

        for slave in &mut self.slaves {
            for _ in 0..self.carrier_ticks_per_cycle {
                slave.carrier_tick();
            }
        }
        for (slave, input) in self.slaves.iter().zip(&mut self.inputs) {
            let len = input.len();
            input.copy_from_slice(&slave.esc().inputs()[..len]);
        }

        self.cycles += 1;
        if let Some(n) = self.options.miss_every {
            if n > 0 && self.cycles % n as u64 == 0 {
                return 0;
            }
        }
        let n = self.slaves.len() as i32;
        n * 2 + n
    }

    fn slave_count(&self) -> usize {
        self.slaves.len()
    }

    fn inputs(&self, slave: usize) -> Option<&[u8]> {
        self.inputs.get(slave.checked_sub(1)?).map(|v| v.as_slice())
    }

    fn outputs_mut(&mut self, slave: usize) -> Option<&mut [u8]> {
        self.outputs
            .get_mut(slave.checked_sub(1)?)
            .map(|v| v.as_mut_slice())
    }

    fn close(&mut self) {
        info!("Simulated interface closed");
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecat_servo::state_machine::OperationalState;

    fn approx_eq(a: f32, b: f32, tolerance: f32) -> bool {
        (a - b).abs() < tolerance
    }

    #[test]
    fn test_plant_currents_round_trip() {
        let mut plant = PmsmPlant::new(MotorParams::default(), &EncoderParams::default());
        plant.id = 0.5;
        plant.iq = 1.5;
        plant.theta_m = 0.3;
        let (u, v, w) = plant.phase_currents();
        assert!(approx_eq(u + v + w, 0.0, 1e-5));

        let (alpha, beta) = clarke(u, v, w);
        let (sin, cos) = plant.theta_e().sin_cos();
        assert!(approx_eq(cos * alpha + sin * beta, 0.5, 1e-4));
        assert!(approx_eq(-sin * alpha + cos * beta, 1.5, 1e-4));
    }

    #[test]
    fn test_plant_accelerates_with_q_current() {
        let mut plant = PmsmPlant::new(MotorParams::default(), &EncoderParams::default());
        plant.iq = 1.0;
        let (u, v, w) = plant.phase_currents();
        // Apply the resistive drop to hold the current
        let r = MotorParams::default().resistance;
        for _ in 0..10 {
            plant.step(Some((u * r, v * r, w * r)), 1.0e-5);
        }
        assert!(plant.omega_m > 0.0);
    }

    #[test]
    fn test_gate_off_has_no_current() {
        let mut plant = PmsmPlant::new(MotorParams::default(), &EncoderParams::default());
        plant.iq = 2.0;
        plant.step(None, 1.0e-5);
        assert_eq!(plant.iq, 0.0);
    }

    #[test]
    fn test_cycle_advances_slaves() {
        let mut bus = SimulatedBus::new(SimOptions::default(), DriveConfig::default());
        assert_eq!(bus.carrier_ticks_per_cycle(), 10);
        assert!(bus.open("sim0").is_ok());
        assert_eq!(bus.receive_processdata(Duration::ZERO), 0);

        bus.send_processdata();
        assert_eq!(bus.receive_processdata(Duration::ZERO), 3);

        // 20 cycles = 10 ms, one sequence scan
        for _ in 0..20 {
            bus.send_processdata();
            bus.receive_processdata(Duration::ZERO);
        }
        let state = bus.slave(1).map(|s| s.runtime().context().state());
        assert_eq!(state, Some(OperationalState::Stop));
    }

    #[test]
    fn test_refuse_op() {
        let options = SimOptions {
            refuse_op: true,
            ..SimOptions::default()
        };
        let mut bus = SimulatedBus::new(options, DriveConfig::default());
        bus.config_init();
        bus.config_map();
        bus.write_state(0, AlState::Op);
        assert_eq!(
            bus.state_check(0, AlState::Op, Duration::ZERO),
            AlState::SafeOp
        );
    }

    #[test]
    fn test_miss_every() {
        let options = SimOptions {
            miss_every: Some(2),
            ..SimOptions::default()
        };
        let mut bus = SimulatedBus::new(options, DriveConfig::default());
        assert!(bus.open("sim0").is_ok());
        bus.send_processdata();
        assert_eq!(bus.receive_processdata(Duration::ZERO), 3);
        bus.send_processdata();
        assert_eq!(bus.receive_processdata(Duration::ZERO), 0);
    }
}
