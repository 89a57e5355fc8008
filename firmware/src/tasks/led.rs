//! 生存表示タスク

use embassy_stm32::gpio::Output;
use embassy_time::{Duration, Timer};

use crate::config::HEARTBEAT_MS;

/// 生存表示LEDを点滅させます（Run/Error 表示はシーケンススキャンが行う）
#[embassy_executor::task]
pub async fn heartbeat_task(mut led: Output<'static>) {
    loop {
        led.toggle();
        Timer::after(Duration::from_millis(HEARTBEAT_MS)).await;
    }
}
