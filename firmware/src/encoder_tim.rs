//! TIM3ベースのエンコーダインターフェース実装
//!
//! STM32のエンコーダモード（A/B 両エッジ計数 = 4逓倍）でカウントし、
//! ARR を機械角1回転のカウント数 - 1 に設定して周回させます。
//!
//! ## ハードウェア構成
//! - TIM3_CH1 (PB4, AF2): A相
//! - TIM3_CH2 (PA4, AF2): B相
//! - Z相は EXTI で別途受ける
//!
//! ## 周回検出
//! UPDATE 割り込みで DIR ビットを見て、オーバーフロー/アンダーフローを
//! [`WRAP`] に記録します。速度スキャンが [`QuadratureCounter::take_wrap`] で
//! 読み出してクリアします。

use core::sync::atomic::{AtomicU8, Ordering};

use ecat_servo::foc::Wrap;
use ecat_servo::hardware::QuadratureCounter;
use embassy_stm32::pac;

use crate::config;

/// 周回フラグ（0: なし、1: オーバーフロー、2: アンダーフロー）
pub static WRAP: AtomicU8 = AtomicU8::new(0);

const WRAP_NONE: u8 = 0;
const WRAP_OVERFLOW: u8 = 1;
const WRAP_UNDERFLOW: u8 = 2;

// TIM3 レジスタ（0x4000_0400）
const TIM3_CR1: usize = 0x4000_0400;
const TIM3_SR: usize = 0x4000_0410;
const TIM3_CNT: usize = 0x4000_0424;
const TIM3_PSC: usize = 0x4000_0428;
const TIM3_ARR: usize = 0x4000_042C;

/// CR1.DIR
const CR1_DIR: u32 = 1 << 4;

/// TIM3 エンコーダモードの初期化
///
/// # 引数
/// * `counts_per_rev` - 機械角1回転のカウント数（4逓倍後）
///
/// # Safety
/// PACを使用した直接的なレジスタ操作を含むため、unsafe
pub unsafe fn init_encoder_timer(counts_per_rev: u16) {
    let rcc = pac::RCC;
    let tim3 = pac::TIM3;
    let gpioa = pac::GPIOA;
    let gpiob = pac::GPIOB;

    // 1. クロック有効化
    rcc.ahb2enr().modify(|w| {
        w.set_gpioaen(true);
        w.set_gpioben(true);
    });
    rcc.apb1enr1().modify(|w| w.set_tim3en(true));

    // 2. GPIO設定（AF2、プルアップ）
    // PB4: TIM3_CH1
    gpiob.moder().modify(|w| w.set_moder(4, pac::gpio::vals::Moder::ALTERNATE));
    gpiob.afr(0).modify(|w| w.set_afr(4, 2));
    gpiob.pupdr().modify(|w| w.set_pupdr(4, pac::gpio::vals::Pupdr::PULL_UP));

    // PA4: TIM3_CH2
    gpioa.moder().modify(|w| w.set_moder(4, pac::gpio::vals::Moder::ALTERNATE));
    gpioa.afr(0).modify(|w| w.set_afr(4, 2));
    gpioa.pupdr().modify(|w| w.set_pupdr(4, pac::gpio::vals::Pupdr::PULL_UP));

    // 3. タイマー停止、PSC=0、ARR=1回転-1
    tim3.cr1().modify(|w| w.set_cen(false));
    core::ptr::write_volatile(TIM3_PSC as *mut u32, 0);
    core::ptr::write_volatile(TIM3_ARR as *mut u32, counts_per_rev.saturating_sub(1) as u32);

    // 4. CC1S=01, CC2S=01（TI1/TI2 をそのまま入力）、フィルタ
    tim3.ccmr_input(0).modify(|w| {
        w.set_ccs(0, pac::timer::vals::CcmrInputCcs::TI4);
        w.set_ccs(1, pac::timer::vals::CcmrInputCcs::TI4);
        w.0 |= (config::encoder::INPUT_FILTER as u32) << 4;
        w.0 |= (config::encoder::INPUT_FILTER as u32) << 12;
    });

    // 5. 極性は非反転（CC1P=CC2P=0）
    tim3.ccer().modify(|w| {
        w.0 &= !((1 << 1) | (1 << 5));
    });

    // 6. SMS=011: エンコーダモード3（TI1/TI2 両エッジ）
    tim3.smcr().modify(|w| {
        w.0 = (w.0 & !0b111) | 0b011;
    });

    // 7. UPDATE 割り込み（周回検出）
    tim3.dier().modify(|w| w.set_uie(true));
    cortex_m::peripheral::NVIC::unmask(pac::Interrupt::TIM3);
    let mut cp = cortex_m::Peripherals::steal();
    cp.NVIC.set_priority(pac::Interrupt::TIM3, 0x20);

    // 8. カウンタをリセットしてタイマー開始
    core::ptr::write_volatile(TIM3_CNT as *mut u32, 0);
    core::ptr::write_volatile(TIM3_SR as *mut u32, 0);
    tim3.cr1().modify(|w| {
        w.set_urs(pac::timer::vals::Urs::COUNTER_ONLY);
        w.set_cen(true);
    });
}

/// TIM3割り込みハンドラー（UPDATE）
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn TIM3() {
    let sr = core::ptr::read_volatile(TIM3_SR as *const u32);
    if sr & 1 != 0 {
        // UIF クリア（rc_w0）
        core::ptr::write_volatile(TIM3_SR as *mut u32, !1u32);
        let cr1 = core::ptr::read_volatile(TIM3_CR1 as *const u32);
        let wrap = if cr1 & CR1_DIR == 0 {
            WRAP_OVERFLOW
        } else {
            WRAP_UNDERFLOW
        };
        WRAP.store(wrap, Ordering::Relaxed);
    }
}

/// TIM3 カウンタの読み出し口
///
/// レジスタは [`init_encoder_timer`] で設定済みであること。
pub struct EncoderTimer {
    _private: (),
}

impl EncoderTimer {
    /// # Safety
    /// [`init_encoder_timer`] の後に1つだけ作ること
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl QuadratureCounter for EncoderTimer {
    fn count(&self) -> u16 {
        unsafe { core::ptr::read_volatile(TIM3_CNT as *const u32) as u16 }
    }

    fn counting_up(&self) -> bool {
        unsafe { core::ptr::read_volatile(TIM3_CR1 as *const u32) & CR1_DIR == 0 }
    }

    fn take_wrap(&mut self) -> Wrap {
        match WRAP.swap(WRAP_NONE, Ordering::Relaxed) {
            WRAP_OVERFLOW => Wrap::Overflow,
            WRAP_UNDERFLOW => Wrap::Underflow,
            _ => Wrap::None,
        }
    }
}
