use std::io;
use std::process;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ecat_servo::bus::{FieldbusMaster, InitState};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ecat_servo_master::config::MasterConfig;
use ecat_servo_master::control::ControlLoop;
use ecat_servo_master::exit_code;
use ecat_servo_master::operator::{self, OperatorPanel};
use ecat_servo_master::sim::SimulatedBus;
use ecat_servo_master::timing::PeriodicSlot;

#[tokio::main]
async fn main() -> Result<()> {
    let config = MasterConfig::parse();

    // RUST_LOG takes precedence over --log
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting master on {} ({} µs period, {:?} reference)",
        config.interface,
        config.period_us,
        config.reference_mode()
    );

    // Bring-up on the non-real-time path
    let bus = SimulatedBus::new(config.sim_options(), config.drive_config());
    let mut master = FieldbusMaster::new(bus);
    let state = master.init(&config.interface);
    if let Some(code) = exit_code(state) {
        error!("Bring-up failed: {:?}", state);
        drop(master);
        process::exit(code);
    }
    debug_assert_eq!(state, InitState::AllOperational);
    info!("Expected working counter {}", master.expected_wkc());

    let panel = Arc::new(OperatorPanel::new());

    {
        let panel = panel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping");
                panel.request_exit();
            }
        });
    }

    {
        let panel = panel.clone();
        std::thread::Builder::new()
            .name("operator".into())
            .spawn(move || {
                if let Err(e) = operator::run_reader(&panel, io::stdin().lock()) {
                    warn!("Operator input stopped: {:#}", e);
                }
            })
            .context("Failed to spawn operator thread")?;
    }

    let control = ControlLoop::new(master, &config, panel);
    let slot = PeriodicSlot::new(config.period());
    let max_runtime = config.max_runtime();
    let handle = std::thread::Builder::new()
        .name("control".into())
        .spawn(move || control.run(slot, max_runtime))
        .context("Failed to spawn control thread")?;

    let summary = tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("Failed to join control thread")?
        .map_err(|_| anyhow!("Control thread panicked"))?;

    info!(
        "Finished after {} cycles ({} overruns, {} missed)",
        summary.ticks, summary.overruns, summary.missed_cycles
    );
    Ok(())
}
