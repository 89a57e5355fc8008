//! キャリア割り込み
//!
//! TIM1 の谷で電流検出から PWM 更新までを行います。割り込み内で完結させ、
//! 共有状態のロックは1回だけ取ります。

use ecat_servo::scan::carrier_scan;

use crate::hardware;
use crate::state::with_inverter;

/// TIM1 更新割り込みのRust側エントリーポイント
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn TIM1_UP_TIM16() {
    if !hardware::clear_carrier_flag() {
        return;
    }
    with_inverter(|inv| {
        let hw = &mut inv.hw;
        carrier_scan(&mut inv.ctx, &mut hw.adc, &hw.counter, &mut hw.power);
    });
}
