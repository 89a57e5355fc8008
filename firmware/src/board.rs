//! スキャン処理から使うボード上のペリフェラル
//!
//! 相電流ADC、外部異常入力、状態表示LEDをハードウェアトレイトとして実装します。

use ecat_servo::foc::AdcSample;
use ecat_servo::hardware::{FaultInput, PhaseAdc, StatusIndicator};
use ecat_servo::OperationalState;
use embassy_stm32::{
    adc::{Adc, AnyAdcChannel},
    gpio::{Input, Output},
    peripherals,
};

/// 相電流・母線電圧の同時サンプル（キャリア割り込み内でブロッキング読み出し）
pub struct CurrentAdc {
    adc1: Adc<'static, peripherals::ADC1>,
    adc2: Adc<'static, peripherals::ADC2>,
    iu: AnyAdcChannel<peripherals::ADC1>,
    iv: AnyAdcChannel<peripherals::ADC1>,
    iw: AnyAdcChannel<peripherals::ADC2>,
    vdc: AnyAdcChannel<peripherals::ADC2>,
}

impl CurrentAdc {
    pub fn new(
        adc1: Adc<'static, peripherals::ADC1>,
        adc2: Adc<'static, peripherals::ADC2>,
        iu: AnyAdcChannel<peripherals::ADC1>,
        iv: AnyAdcChannel<peripherals::ADC1>,
        iw: AnyAdcChannel<peripherals::ADC2>,
        vdc: AnyAdcChannel<peripherals::ADC2>,
    ) -> Self {
        Self {
            adc1,
            adc2,
            iu,
            iv,
            iw,
            vdc,
        }
    }
}

impl PhaseAdc for CurrentAdc {
    fn sample(&mut self) -> AdcSample {
        AdcSample {
            iu: self.adc1.blocking_read(&mut self.iu) as i16,
            iv: self.adc1.blocking_read(&mut self.iv) as i16,
            iw: self.adc2.blocking_read(&mut self.iw) as i16,
            vdc: self.adc2.blocking_read(&mut self.vdc) as i16,
        }
    }
}

/// 外部異常入力（Low で異常）
///
/// 入力が一度 Low になると、[`FaultInput::clear_latch`] まで異常を保持します。
pub struct FaultPin {
    pin: Input<'static>,
    latched: bool,
}

impl FaultPin {
    pub fn new(pin: Input<'static>) -> Self {
        Self {
            pin,
            latched: false,
        }
    }
}

impl FaultInput for FaultPin {
    fn latched(&mut self) -> bool {
        if self.pin.is_low() {
            if !self.latched {
                warn!("External fault input asserted");
            }
            self.latched = true;
        }
        self.latched
    }

    fn source_active(&mut self) -> bool {
        self.pin.is_low()
    }

    fn clear_latch(&mut self) {
        self.latched = false;
    }
}

/// Run / Error 表示（Low で点灯）
pub struct StatusLeds {
    run: Output<'static>,
    error: Output<'static>,
}

impl StatusLeds {
    pub fn new(mut run: Output<'static>, mut error: Output<'static>) -> Self {
        run.set_high();
        error.set_high();
        Self { run, error }
    }
}

impl StatusIndicator for StatusLeds {
    fn show(&mut self, state: OperationalState) {
        match state {
            OperationalState::Run => {
                self.run.set_low();
                self.error.set_high();
            }
            OperationalState::Error => {
                self.run.set_high();
                self.error.set_low();
            }
            OperationalState::Stop | OperationalState::Unknown => {
                self.run.set_high();
                self.error.set_high();
            }
        }
    }
}
