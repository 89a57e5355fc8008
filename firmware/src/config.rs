//! ボード固有の設定
//!
//! ピン割り当てとペリフェラル設定の定数、およびスキャン処理に渡す
//! [`DriveConfig`] を提供します。
//!
//! | 機能 | ピン |
//! |------|------|
//! | PWM U/V/W (TIM1) | PE9/PE8, PE11/PE10, PE13/PE12 |
//! | Iu, Iv (ADC1) | PA0, PA1 |
//! | Iw, Vdc (ADC2) | PA6, PC1 |
//! | エンコーダ A/B (TIM3) | PB4, PA4 |
//! | エンコーダ Z (EXTI6) | PB6 |
//! | LAN9252 (SPI2) | SCK PB13, MISO PB14, MOSI PB15, CS PB12 |
//! | 外部異常入力 (Low で異常) | PC7 |
//! | LED Run / Error / 生存 (Low で点灯) | PC13 / PC14 / PC15 |

use ecat_servo::config::{DriveConfig, ReferenceMode, ScanTiming};

/// 指令値の解釈（マスター側の設定と合わせること）
pub const REFERENCE_MODE: ReferenceMode = ReferenceMode::Velocity;

/// TIM1 カウントクロック [kHz]（APB2 = 170MHz）
pub const PWM_TIMER_FREQ_KHZ: u32 = 170_000;

/// PWM設定
pub mod pwm {
    use embassy_stm32::time::Hertz;

    /// キャリア周波数（20kHz）
    pub const CARRIER_FREQUENCY: Hertz = Hertz(20_000);

    /// デッドタイム [ns]
    pub const DEAD_TIME_NS: u32 = 250;

    /// デッドタイム [timer cycles]（DTG 直接指定なので127以下）
    pub const DEAD_TIME_CYCLES: u16 =
        (super::PWM_TIMER_FREQ_KHZ * DEAD_TIME_NS / 1_000_000) as u16;
}

/// ADC設定
pub mod adc {
    use embassy_stm32::adc::SampleTime;

    /// キャリア割り込み内で4チャネル読むため短めに設定
    pub const SAMPLE_TIME: SampleTime = SampleTime::CYCLES24_5;
}

/// エンコーダ設定
pub mod encoder {
    /// TIM3 入力フィルタ（IC1F/IC2F）
    pub const INPUT_FILTER: u8 = 0b0011;
}

/// EtherCAT スレーブコントローラ設定
pub mod esc {
    use embassy_stm32::time::Hertz;

    /// SPI クロック
    pub const SPI_FREQUENCY: Hertz = Hertz(10_000_000);
}

/// NVIC 優先度（数値が小さいほど高優先）
pub mod priority {
    /// キャリア割り込み（TIM1 更新）
    pub const CARRIER: u8 = 0x10;
}

/// 生存表示の点滅周期 [ms]
pub const HEARTBEAT_MS: u64 = 500;

/// ボードに合わせたインバータ設定
pub const fn drive_config() -> DriveConfig {
    let mut config = DriveConfig::new();
    config.timing = ScanTiming {
        pwm_timer_freq_khz: PWM_TIMER_FREQ_KHZ,
        dead_time_ns: pwm::DEAD_TIME_NS,
        ..ScanTiming::new()
    };
    config.reference_mode = REFERENCE_MODE;
    config
}
