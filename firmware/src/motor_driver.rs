//! モータードライバー抽象化レイヤー
//!
//! TIM1 の相補PWMを [`PowerStage`] としてスキャン処理に渡します。

use ecat_servo::foc::PhaseDuties;
use ecat_servo::hardware::PowerStage;
use embassy_stm32::{
    peripherals,
    timer::{complementary_pwm::ComplementaryPwm, Channel},
};

/// 3相インバータ（TIM1 CH1-3 + 相補出力）
pub struct MotorDriver {
    pwm: ComplementaryPwm<'static, peripherals::TIM1>,
    max_duty: u16,
    enabled: bool,
}

impl MotorDriver {
    /// 出力を遮断した状態で作成
    ///
    /// # 引数
    /// * `pwm` - PWMペリフェラル（TIM1、中央揃え）
    pub fn new(pwm: ComplementaryPwm<'static, peripherals::TIM1>) -> Self {
        let max_duty = pwm.get_max_duty() as u16;
        let mut driver = Self {
            pwm,
            max_duty,
            enabled: true,
        };
        driver.disable();
        driver
    }

    /// PWMの最大Duty値を取得
    pub fn max_duty(&self) -> u16 {
        self.max_duty
    }

    fn set_channels(&mut self, enable: bool) {
        for ch in [Channel::Ch1, Channel::Ch2, Channel::Ch3] {
            if enable {
                self.pwm.enable(ch);
            } else {
                self.pwm.disable(ch);
            }
        }
    }
}

impl PowerStage for MotorDriver {
    fn set_duties(&mut self, duties: PhaseDuties) {
        self.pwm.set_duty(Channel::Ch1, duties.u.min(self.max_duty).into());
        self.pwm.set_duty(Channel::Ch2, duties.v.min(self.max_duty).into());
        self.pwm.set_duty(Channel::Ch3, duties.w.min(self.max_duty).into());
    }

    fn enable(&mut self) {
        if self.enabled {
            return;
        }
        // 50% から出力開始
        let mid = self.max_duty / 2;
        self.set_duties(PhaseDuties {
            u: mid,
            v: mid,
            w: mid,
        });
        self.set_channels(true);
        self.enabled = true;
    }

    fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.set_channels(false);
        self.enabled = false;
    }
}
