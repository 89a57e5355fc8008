//! ハードウェア初期化モジュール
//!
//! クロック設定とキャリア割り込みの初期化を集約します。

use embassy_stm32::{pac, Config};

use crate::config;

/// RCCクロック設定を初期化
///
/// HSI → PLL（÷4 × 85 ÷ 2）で170MHz生成
pub fn create_clock_config() -> Config {
    let mut config = Config::default();
    {
        use embassy_stm32::rcc::mux::{Adcsel, ClockMux};
        use embassy_stm32::rcc::{Pll, PllMul, PllPreDiv, PllRDiv, PllSource, Sysclk};

        config.rcc.hsi = true;
        config.rcc.pll = Some(Pll {
            source: PllSource::HSI,
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL85,
            divp: None,
            divq: None,
            divr: Some(PllRDiv::DIV2),
        });
        config.rcc.sys = Sysclk::PLL1_R; // システムクロックをPLLに設定

        let mut clock_mux = ClockMux::default();
        clock_mux.adc12sel = Adcsel::SYS;
        config.rcc.mux = clock_mux;
    }
    config
}

/// TIM1 更新割り込み（キャリア谷）の初期化
///
/// 中央揃えモードでは山と谷の両方で更新イベントが出るため、
/// RCR=1 で谷のみに間引きます。
///
/// # Safety
/// PACを使用した直接レジスタ操作を含む。PWM の初期化後に呼ぶこと
pub unsafe fn init_carrier_interrupt() {
    let tim1 = pac::TIM1;

    tim1.rcr().write(|w| w.set_rep(1));
    tim1.egr().write(|w| w.set_ug(true));
    tim1.sr().modify(|w| w.set_uif(false));
    tim1.dier().modify(|w| w.set_uie(true));

    cortex_m::peripheral::NVIC::unmask(pac::Interrupt::TIM1_UP_TIM16);
    let mut cp = cortex_m::Peripherals::steal();
    cp.NVIC
        .set_priority(pac::Interrupt::TIM1_UP_TIM16, config::priority::CARRIER);
    info!("TIM1 carrier interrupt enabled");
}

/// キャリア割り込みのフラグクリア
#[inline(always)]
pub fn clear_carrier_flag() -> bool {
    let tim1 = pac::TIM1;
    if tim1.sr().read().uif() {
        tim1.sr().modify(|w| w.set_uif(false));
        true
    } else {
        false
    }
}
