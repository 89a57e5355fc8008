//! 相電流・母線電圧のADC変換とゼロ点校正
//!
//! ゲートブロック中（Stop状態）に相電流ADCの移動平均を取り、
//! センサのゼロ点ずれを逐次補正します。

use crate::config::{CurrentSenseParams, CURRENT_OFFSET_WINDOW};

/// ADC生値（1キャリア周期分）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcSample {
    pub iu: i16,
    pub iv: i16,
    pub iw: i16,
    pub vdc: i16,
}

/// 三相電流 [A]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhaseCurrents {
    pub iu: f32,
    pub iv: f32,
    pub iw: f32,
}

/// 固定長の移動平均（FIFO）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovingAverage<const N: usize> {
    buffer: [i16; N],
    index: usize,
    sum: i32,
}

impl<const N: usize> MovingAverage<N> {
    pub const fn new() -> Self {
        Self {
            buffer: [0; N],
            index: 0,
            sum: 0,
        }
    }

    /// 新しい値を入れて平均値を返す（窓が埋まるまでは0で埋めた窓で平均）
    pub fn push(&mut self, value: i16) -> i16 {
        if N == 0 {
            return value;
        }
        self.sum += value as i32 - self.buffer[self.index] as i32;
        self.buffer[self.index] = value;
        self.index = (self.index + 1) % N;
        self.average()
    }

    pub fn average(&self) -> i16 {
        if N == 0 {
            return 0;
        }
        (self.sum / N as i32) as i16
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl<const N: usize> Default for MovingAverage<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// 電流センシング
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentSense {
    params: CurrentSenseParams,
    /// 直近の生値（ゼロ点コード差し引き後）
    raw: [i16; 3],
    averages: [MovingAverage<CURRENT_OFFSET_WINDOW>; 3],
    offsets: [i16; 3],
}

impl CurrentSense {
    pub const fn new(params: CurrentSenseParams) -> Self {
        Self {
            params,
            raw: [0; 3],
            averages: [
                MovingAverage::new(),
                MovingAverage::new(),
                MovingAverage::new(),
            ],
            offsets: [0; 3],
        }
    }

    /// ADC生値を物理量へ変換
    ///
    /// # 戻り値
    /// * `(PhaseCurrents, vdc)` - 三相電流 [A] と母線電圧 [V]
    pub fn convert(&mut self, sample: &AdcSample) -> (PhaseCurrents, f32) {
        let code = self.params.current_offset_code;
        self.raw = [
            sample.iu.wrapping_sub(code),
            sample.iv.wrapping_sub(code),
            sample.iw.wrapping_sub(code),
        ];

        let gain = self.params.current_gain;
        let currents = PhaseCurrents {
            iu: gain * (self.raw[0] as i32 - self.offsets[0] as i32) as f32,
            iv: gain * (self.raw[1] as i32 - self.offsets[1] as i32) as f32,
            iw: gain * (self.raw[2] as i32 - self.offsets[2] as i32) as f32,
        };
        let vdc = self.params.vdc_gain
            * (sample.vdc as i32 - self.params.vdc_offset_code as i32) as f32;
        (currents, vdc)
    }

    /// 直近の生値で移動平均オフセットを更新（ゲートブロック中のみ呼ぶこと）
    pub fn calibrate(&mut self) {
        for phase in 0..3 {
            self.offsets[phase] = self.averages[phase].push(self.raw[phase]);
        }
    }

    pub fn offsets(&self) -> [i16; 3] {
        self.offsets
    }
}
