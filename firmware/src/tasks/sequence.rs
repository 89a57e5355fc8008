//! シーケンススキャンタスク
//!
//! 状態遷移、異常処理、ゲート許可、電流ゼロ点校正を行います。

use ecat_servo::scan::sequence_scan;
use ecat_servo::OperationalState;
use embassy_time::{Duration, Ticker};

use crate::state::with_inverter;

/// 状態ログの間隔 [シーケンス周期]
const LOG_INTERVAL: u32 = 100;

#[embassy_executor::task]
pub async fn sequence_scan_task(period: Duration) {
    info!("Sequence scan task started ({} us)", period.as_micros());

    let mut ticker = Ticker::every(period);
    let mut log_counter = 0u32;

    loop {
        ticker.next().await;

        let snapshot = with_inverter(|inv| {
            let hw = &mut inv.hw;
            sequence_scan(&mut inv.ctx, &mut hw.fault, &mut hw.power, &mut hw.indicator);
            (
                inv.ctx.state(),
                inv.ctx.speed.omega_e,
                inv.ctx.current.vdc,
                inv.ctx.encoder.total_corrections(),
            )
        });

        // デバッグログ（1秒ごと）
        log_counter += 1;
        if log_counter >= LOG_INTERVAL {
            log_counter = 0;
            if let Some((state, omega_e, vdc, corrections)) = snapshot {
                if state == OperationalState::Run {
                    debug!(
                        "[Seq] {:?} omega_e={} rad/s, Vdc={} V, corrections={}",
                        state, omega_e, vdc, corrections
                    );
                } else {
                    trace!("[Seq] {:?} Vdc={} V", state, vdc);
                }
            }
        }
    }
}
