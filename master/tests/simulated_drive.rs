//! End-to-end: bring-up over the simulated bus, then drive the inverter
//! through Run and back to Stop with operator commands.

use std::sync::Arc;

use ecat_servo::bus::{FieldbusMaster, InitState};
use ecat_servo::protocol::StateReport;
use ecat_servo_master::config::{MasterConfig, ModeArg};
use ecat_servo_master::control::ControlLoop;
use ecat_servo_master::exit_code;
use ecat_servo_master::operator::{OperatorCommand, OperatorPanel};
use ecat_servo_master::sim::{SimOptions, SimulatedBus};

fn bring_up(config: &MasterConfig) -> (ControlLoop<SimulatedBus>, Arc<OperatorPanel>) {
    let bus = SimulatedBus::new(config.sim_options(), config.drive_config());
    let mut master = FieldbusMaster::new(bus);
    assert_eq!(master.init(&config.interface), InitState::AllOperational);
    let panel = Arc::new(OperatorPanel::new());
    (ControlLoop::new(master, config, panel.clone()), panel)
}

/// Tick until the axis reports `state`; returns the number of ticks taken
fn tick_until(control: &mut ControlLoop<SimulatedBus>, state: StateReport, limit: u32) -> u32 {
    for n in 0..limit {
        if control.axis().state() == state {
            return n;
        }
        control.tick();
    }
    panic!(
        "axis did not reach {:?} within {} ticks (now {:?})",
        state,
        limit,
        control.axis().state()
    );
}

fn run_ticks(control: &mut ControlLoop<SimulatedBus>, ticks: u32) {
    for _ in 0..ticks {
        control.tick();
    }
}

#[test]
fn bring_up_failures_map_to_exit_codes() {
    let config = MasterConfig::default();

    let failing = SimOptions {
        fail_open: true,
        ..config.sim_options()
    };
    let mut master = FieldbusMaster::new(SimulatedBus::new(failing, config.drive_config()));
    let state = master.init("sim0");
    assert_eq!(state, InitState::PortOpenFailed);
    assert_eq!(exit_code(state), Some(1));

    let empty = SimOptions {
        slaves: 0,
        ..config.sim_options()
    };
    let mut master = FieldbusMaster::new(SimulatedBus::new(empty, config.drive_config()));
    let state = master.init("sim0");
    assert_eq!(state, InitState::SlavesNotFound);
    assert_eq!(exit_code(state), Some(2));

    let stuck = SimOptions {
        refuse_op: true,
        ..config.sim_options()
    };
    let mut master = FieldbusMaster::new(SimulatedBus::new(stuck, config.drive_config()));
    let state = master.init("sim0");
    assert_eq!(state, InitState::NotAllOperational);
    assert_eq!(exit_code(state), Some(3));
}

#[test]
fn velocity_mode_run_and_stop() {
    let config = MasterConfig::default();
    let (mut control, panel) = bring_up(&config);

    // First sequence scan after start-up reports Stop
    tick_until(&mut control, StateReport::Stop, 200);

    panel.submit(OperatorCommand::ServoOn);
    tick_until(&mut control, StateReport::Run, 200);
    assert!(control.axis().latch().is_idle());

    panel.submit(OperatorCommand::SetSpeed(20.0));
    // 0.5 s
    run_ticks(&mut control, 1000);
    let speed = control.axis().speed();
    assert!(speed > 10.0 && speed < 30.0, "speed {}", speed);
    assert!(control.health().total_misses() == 0);

    panel.submit(OperatorCommand::ServoOff);
    tick_until(&mut control, StateReport::Stop, 200);
    assert!(control.axis().latch().is_idle());
    let plant_current = control
        .master()
        .driver()
        .slave(1)
        .map(|s| s.plant().iq)
        .unwrap_or(f32::NAN);
    assert_eq!(plant_current, 0.0);
}

#[test]
fn current_mode_speed_loop_on_master() {
    let config = MasterConfig {
        mode: ModeArg::Current,
        ..MasterConfig::default()
    };
    let (mut control, panel) = bring_up(&config);
    tick_until(&mut control, StateReport::Stop, 200);

    panel.submit(OperatorCommand::ServoOn);
    panel.submit(OperatorCommand::SetSpeed(15.0));
    tick_until(&mut control, StateReport::Run, 200);
    run_ticks(&mut control, 1000);

    assert!(control.axis().speed() > 0.0);
    assert!(control.axis().reference().abs() <= config.max_current);
}

#[test]
fn fault_needs_reset_before_restart() {
    let config = MasterConfig::default();
    let (mut control, panel) = bring_up(&config);
    tick_until(&mut control, StateReport::Stop, 200);

    if let Some(slave) = control.master_mut().driver_mut().slave_mut(1) {
        slave.fault_mut().active = true;
    }
    tick_until(&mut control, StateReport::Error, 200);

    // No Run while faulted
    panel.submit(OperatorCommand::ServoOn);
    run_ticks(&mut control, 100);
    assert_eq!(control.axis().state(), StateReport::Error);

    // Reset has no effect while the source is still active
    panel.submit(OperatorCommand::ResetError);
    run_ticks(&mut control, 100);
    assert_eq!(control.axis().state(), StateReport::Error);
    assert!(control.axis().latch().reset_error());

    if let Some(slave) = control.master_mut().driver_mut().slave_mut(1) {
        slave.fault_mut().active = false;
    }
    // After the reset the drive stays in Stop; the ServoOn from before the fault does not restart it
    tick_until(&mut control, StateReport::Stop, 400);
    run_ticks(&mut control, 200);
    assert_eq!(control.axis().state(), StateReport::Stop);
    assert!(control.axis().latch().is_idle());

    panel.submit(OperatorCommand::ServoOn);
    tick_until(&mut control, StateReport::Run, 200);
    assert!(control.axis().latch().is_idle());
}

#[test]
fn servo_off_before_run_cancels_start() {
    let config = MasterConfig::default();
    let (mut control, panel) = bring_up(&config);
    tick_until(&mut control, StateReport::Stop, 200);

    // Cancel within one sequence period (10 ms = 20 ticks)
    panel.submit(OperatorCommand::ServoOn);
    control.tick();
    panel.submit(OperatorCommand::ServoOff);
    run_ticks(&mut control, 200);

    assert_eq!(control.axis().state(), StateReport::Stop);
    assert!(control.axis().latch().is_idle());
}
