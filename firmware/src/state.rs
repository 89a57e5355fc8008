//! グローバル共有状態管理
//!
//! キャリア割り込みと各スキャンタスクで共有する状態を、クリティカルセクションの
//! blocking Mutex で保護します。ロック中に待ち合わせや SPI 転送はしないこと。
//! LAN9252 のランタイムは速度スキャンタスクが単独で所有します。

use core::cell::RefCell;

use ecat_servo::scan::{InverterPeripherals, MotorContext};
use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};

use crate::board::{CurrentAdc, FaultPin, StatusLeds};
use crate::encoder_tim::EncoderTimer;
use crate::motor_driver::MotorDriver;

pub type Peripherals = InverterPeripherals<MotorDriver, CurrentAdc, EncoderTimer, FaultPin, StatusLeds>;

/// 1軸分のモーター状態とペリフェラル
pub struct Inverter {
    pub ctx: MotorContext,
    pub hw: Peripherals,
}

/// モーター制御状態（キャリア割り込み・速度・シーケンス・Z相で共有）
pub static INVERTER: Mutex<CriticalSectionRawMutex, RefCell<Option<Inverter>>> =
    Mutex::new(RefCell::new(None));

/// 初期化済みなら `f` を実行
///
/// # 戻り値
/// 未初期化なら `None`
pub fn with_inverter<R>(f: impl FnOnce(&mut Inverter) -> R) -> Option<R> {
    INVERTER.lock(|cell| cell.borrow_mut().as_mut().map(f))
}
