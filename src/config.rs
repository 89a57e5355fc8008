//! モーター制御とスキャン周期の設定パラメータ
//!
//! コンパイル時のデフォルト定数と、それらから構築されるパラメータ構造体を提供します。

use core::f32::consts::PI;

/// 巻線抵抗 [Ω]
pub const DEFAULT_MOTOR_R: f32 = 0.36;

/// 巻線インダクタンス [H]
pub const DEFAULT_MOTOR_L: f32 = 0.2e-3;

/// 誘起電圧定数（鎖交磁束）[V·s/rad]
pub const DEFAULT_MOTOR_PHI: f32 = 7.833e-3;

/// ロータ慣性モーメント [kg·m²]
pub const DEFAULT_MOTOR_J: f32 = 1.0e-5;

/// モーターの極数（8極 = 4極対）
pub const DEFAULT_POLE_NUM: u16 = 8;

/// 定格最大速度 [rad/s]（電気角）
pub const DEFAULT_MAX_SPEED: f32 = 2.0 * PI * 120.0;

/// 過速度判定の倍率（定格最大速度に対する比）
pub const OVERSPEED_RATIO: f32 = 1.2;

/// エンコーダの1回転あたりパルス数
pub const DEFAULT_ENC_PULSE: u16 = 1000;

/// 4逓倍カウント
pub const DEFAULT_ENC_MUL: u16 = 4;

/// Z相から電気角原点までの固定オフセット [count]
pub const DEFAULT_ENC_Z_OFFSET: u16 = 320;

/// 差分グリッチ判定のしきい値 [count]
pub const DEFAULT_DIFF_ERR_THRESH: i32 = 1000;

/// 正弦テーブル長（π/2 = 512）
pub const SIN_TABLE_LEN: u16 = 2048;

/// キャリア周波数 [Hz]
pub const DEFAULT_CARRIER_FREQ_HZ: u32 = 20_000;

/// デッドタイム [ns]
pub const DEFAULT_DEAD_TIME_NS: u32 = 250;

/// PWMタイマのカウントクロック [kHz]
pub const DEFAULT_PWM_TIMER_FREQ_KHZ: u32 = 100_000;

/// 速度制御(ASR)周期 [μs]
pub const DEFAULT_PERIOD_ASR_US: u32 = 1000;

/// シーケンス処理周期 [μs]
pub const DEFAULT_PERIOD_SEQ_US: u32 = 10_000;

/// 電流制御(ACR)の目標カットオフ [rad/s]
pub const DEFAULT_ACR_CUTOFF: f32 = 2.0 * PI * 1000.0;

/// 速度制御(ASR)の目標カットオフ [rad/s]
pub const DEFAULT_ASR_CUTOFF: f32 = 2.0 * PI * 20.0;

/// 相電流 ADC 変換係数 [A/LSB]
pub const DEFAULT_ADC_TO_CURRENT: f32 = -10.0 * 5.0 / 8192.0;

/// 母線電圧 ADC 変換係数 [V/LSB]
pub const DEFAULT_ADC_TO_VDC: f32 = 0.015_063_19;

/// 相電流 ADC のゼロ点コード
pub const DEFAULT_CURRENT_OFFSET_CODE: i16 = 2650;

/// 母線電圧 ADC のゼロ点コード
pub const DEFAULT_VDC_OFFSET_CODE: i16 = 0;

/// 電流オフセット移動平均のサンプル数
pub const CURRENT_OFFSET_WINDOW: usize = 64;

/// モーター電気定数
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorParams {
    /// 巻線抵抗 [Ω]
    pub resistance: f32,
    /// 巻線インダクタンス [H]
    pub inductance: f32,
    /// 鎖交磁束 [V·s/rad]
    pub flux_linkage: f32,
    /// 慣性モーメント [kg·m²]
    pub inertia: f32,
    /// 極対数
    pub pole_pairs: u16,
    /// 定格最大速度 [rad/s]（電気角）
    pub max_speed: f32,
}

impl MotorParams {
    pub const fn new() -> Self {
        Self {
            resistance: DEFAULT_MOTOR_R,
            inductance: DEFAULT_MOTOR_L,
            flux_linkage: DEFAULT_MOTOR_PHI,
            inertia: DEFAULT_MOTOR_J,
            pole_pairs: DEFAULT_POLE_NUM / 2,
            max_speed: DEFAULT_MAX_SPEED,
        }
    }

    /// 過速度判定レベル [rad/s]
    pub fn overspeed_level(&self) -> f32 {
        self.max_speed * OVERSPEED_RATIO
    }
}

impl Default for MotorParams {
    fn default() -> Self {
        Self::new()
    }
}

/// エンコーダ幾何パラメータ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EncoderParams {
    /// 機械角1回転あたりのカウント数（逓倍後）
    pub counts_per_rev: u16,
    /// 極対数
    pub pole_pairs: u16,
    /// Z相から電気角原点までのオフセット [count]
    pub z_offset: u16,
    /// グリッチ判定しきい値 [count]
    pub glitch_threshold: i32,
    /// 速度サンプリング周期 [μs]
    pub sample_period_us: u32,
}

impl EncoderParams {
    pub const fn new() -> Self {
        Self {
            counts_per_rev: DEFAULT_ENC_PULSE * DEFAULT_ENC_MUL,
            pole_pairs: DEFAULT_POLE_NUM / 2,
            z_offset: DEFAULT_ENC_Z_OFFSET,
            glitch_threshold: DEFAULT_DIFF_ERR_THRESH,
            sample_period_us: DEFAULT_PERIOD_ASR_US,
        }
    }

    /// 電気角1周期あたりのカウント数
    pub const fn counts_per_electrical_rev(&self) -> u16 {
        self.counts_per_rev / self.pole_pairs
    }
}

impl Default for EncoderParams {
    fn default() -> Self {
        Self::new()
    }
}

/// 各スキャンの周期設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanTiming {
    /// キャリア周波数 [Hz]
    pub carrier_freq_hz: u32,
    /// デッドタイム [ns]
    pub dead_time_ns: u32,
    /// PWMタイマクロック [kHz]
    pub pwm_timer_freq_khz: u32,
    /// 速度制御周期 [μs]
    pub speed_period_us: u32,
    /// シーケンス周期 [μs]
    pub sequence_period_us: u32,
}

impl ScanTiming {
    pub const fn new() -> Self {
        Self {
            carrier_freq_hz: DEFAULT_CARRIER_FREQ_HZ,
            dead_time_ns: DEFAULT_DEAD_TIME_NS,
            pwm_timer_freq_khz: DEFAULT_PWM_TIMER_FREQ_KHZ,
            speed_period_us: DEFAULT_PERIOD_ASR_US,
            sequence_period_us: DEFAULT_PERIOD_SEQ_US,
        }
    }

    /// キャリア周期 [s]
    pub fn carrier_period_s(&self) -> f32 {
        1.0 / self.carrier_freq_hz as f32
    }

    /// 速度制御周期 [s]
    pub fn speed_period_s(&self) -> f32 {
        self.speed_period_us as f32 * 1.0e-6
    }
}

impl Default for ScanTiming {
    fn default() -> Self {
        Self::new()
    }
}

/// 制御ループの極配置設定（カットオフと減衰係数）
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoopTuning {
    /// 目標カットオフ角周波数 [rad/s]
    pub cutoff: f32,
    /// 減衰係数
    pub damping: f32,
}

impl LoopTuning {
    pub const fn new(cutoff: f32, damping: f32) -> Self {
        Self { cutoff, damping }
    }

    /// 電流制御ループのデフォルト
    pub const fn current_loop() -> Self {
        Self::new(DEFAULT_ACR_CUTOFF, 1.0)
    }

    /// 速度制御ループのデフォルト
    pub const fn speed_loop() -> Self {
        Self::new(DEFAULT_ASR_CUTOFF, 1.0)
    }
}

/// 電流・電圧センシングの ADC 変換設定
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentSenseParams {
    pub current_gain: f32,
    pub current_offset_code: i16,
    pub vdc_gain: f32,
    pub vdc_offset_code: i16,
}

impl CurrentSenseParams {
    pub const fn new() -> Self {
        Self {
            current_gain: DEFAULT_ADC_TO_CURRENT,
            current_offset_code: DEFAULT_CURRENT_OFFSET_CODE,
            vdc_gain: DEFAULT_ADC_TO_VDC,
            vdc_offset_code: DEFAULT_VDC_OFFSET_CODE,
        }
    }
}

impl Default for CurrentSenseParams {
    fn default() -> Self {
        Self::new()
    }
}

/// 指令値フィールドの解釈
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReferenceMode {
    /// 機械角速度指令 [rad/s]（スレーブ側で速度制御）
    #[default]
    Velocity,
    /// q軸電流指令 [A]（速度制御はマスター側）
    Current,
}

/// インバータ全体の設定
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriveConfig {
    pub motor: MotorParams,
    pub encoder: EncoderParams,
    pub timing: ScanTiming,
    pub current_loop: LoopTuning,
    pub speed_loop: LoopTuning,
    pub sense: CurrentSenseParams,
    pub reference_mode: ReferenceMode,
}

impl DriveConfig {
    pub const fn new() -> Self {
        Self {
            motor: MotorParams::new(),
            encoder: EncoderParams::new(),
            timing: ScanTiming::new(),
            current_loop: LoopTuning::current_loop(),
            speed_loop: LoopTuning::speed_loop(),
            sense: CurrentSenseParams::new(),
            reference_mode: ReferenceMode::Velocity,
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self::new()
    }
}
