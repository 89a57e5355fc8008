//! Z相入力タスク
//!
//! 電源投入後の最初の Z相エッジで電気角・機械角の原点を取り込みます。
//! 取り込み後のエッジは推定器が無視するので、タスクは終了します。

use embassy_stm32::exti::ExtiInput;
use ecat_servo::hardware::QuadratureCounter;

use crate::state::with_inverter;

#[embassy_executor::task]
pub async fn index_task(mut z_phase: ExtiInput<'static>) {
    info!("Waiting for encoder index pulse");

    loop {
        z_phase.wait_for_rising_edge().await;

        let captured = with_inverter(|inv| {
            let counter = &inv.hw.counter;
            inv.ctx
                .encoder
                .capture_index(counter.count(), counter.counting_up())
        });

        if captured == Some(true) {
            break;
        }
    }
}
