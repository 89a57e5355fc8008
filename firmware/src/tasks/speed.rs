//! 速度スキャンタスク
//!
//! 速度推定と速度制御のあと、LAN9252 とプロセスデータを交換します。
//! SPI 転送はキャリア割り込みを止めないよう共有状態のロック外で行います。

use ecat_servo::bus::FieldbusSlaveRuntime;
use ecat_servo::scan::{exchange_process_data, speed_scan};
use embassy_time::{Duration, Ticker};

use crate::lan9252::Lan9252;
use crate::state::with_inverter;

/// 速度スキャンタスク（速度制御周期）
#[embassy_executor::task]
pub async fn speed_scan_task(mut esc: FieldbusSlaveRuntime<Lan9252>, period: Duration) {
    info!("Speed scan task started ({} us)", period.as_micros());

    let mut ticker = Ticker::every(period);
    let mut was_operational = false;

    loop {
        ticker.next().await;

        // 1. 速度推定・速度制御
        let Some(feedback) = with_inverter(|inv| {
            speed_scan(&mut inv.ctx, &mut inv.hw.counter, &mut inv.hw.power);
            inv.ctx.feedback
        }) else {
            continue;
        };

        // 2. プロセスデータ交換（ロック外）
        let cycle = exchange_process_data(&mut esc, &feedback);
        if let Err(e) = &cycle.status {
            if was_operational {
                warn!("ESC exchange failed: {:?}", e);
            }
        }
        let status = cycle.link_status();

        if status.is_operational() != was_operational {
            info!("Bus operational: {} (AL status {:x})", status.is_operational(), status.raw());
            was_operational = status.is_operational();
        }

        // 3. 受信結果を反映
        with_inverter(|inv| cycle.apply(&mut inv.ctx));
    }
}
