//! インクリメンタルエンコーダによる位置・速度推定
//!
//! ハードウェアの4逓倍カウンタ（機械角1回転で周回）から以下を求めます。
//! - 電気角（正弦テーブルのインデックス）: キャリア周期ごと
//! - 機械角位置・電気角速度: 速度制御周期ごと
//!
//! Z相エッジで電気角原点と機械角原点を1回だけ取り込みます。
//! オーバーフロー/アンダーフローフラグで回転数を数え、
//! 誤ったフラグによる1周期分の跳びは差分の急変として検出して補正します。

use core::f32::consts::TAU;

use crate::config::{EncoderParams, SIN_TABLE_LEN};

/// 1回のサンプルで行うグリッチ補正の上限回数
pub const MAX_GLITCH_ITERATIONS: u8 = 8;

/// カウンタの周回フラグ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Wrap {
    #[default]
    None,
    Overflow,
    Underflow,
}

/// 速度制御周期ごとの推定結果
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpeedSample {
    /// 補正後の差分 [count/sample]
    pub delta: i32,
    /// 機械角位置 [count]（原点基準、多回転）
    pub position: i32,
    /// 電気角速度 [rad/s]
    pub omega_e: f32,
    /// このサンプルで行った補正回数
    pub corrections: u8,
}

/// Z相で取り込む原点オフセット
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    /// 電気角原点 [count]（電気角1周期内）
    pub electrical: u16,
    /// 機械角原点 [count]（逆転中は1周期分差し引いた値）
    pub mechanical: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EncoderEstimator {
    counts_per_rev: i32,
    counts_per_elec: u16,
    z_offset: u16,
    threshold: i32,
    /// 差分 → 電気角速度 の係数
    count_to_omega_e: f32,
    calibration: Option<Calibration>,
    prev_count: u16,
    prev_delta: i32,
    prev_position: i32,
    rotations: i32,
    last: SpeedSample,
    total_corrections: u32,
}

impl EncoderEstimator {
    pub fn new(params: &EncoderParams) -> Self {
        let counts_per_elec = params.counts_per_electrical_rev().max(1);
        let count_to_omega_e = TAU * 1.0e6
            / (params.sample_period_us.max(1) as f32 * counts_per_elec as f32);
        Self {
            counts_per_rev: params.counts_per_rev.max(1) as i32,
            counts_per_elec,
            z_offset: params.z_offset % counts_per_elec,
            threshold: params.glitch_threshold,
            count_to_omega_e,
            calibration: None,
            prev_count: 0,
            prev_delta: 0,
            prev_position: 0,
            rotations: 0,
            last: SpeedSample {
                delta: 0,
                position: 0,
                omega_e: 0.0,
                corrections: 0,
            },
            total_corrections: 0,
        }
    }

    /// Z相エッジ
    ///
    /// # 引数
    /// * `count` - エッジ時点のカウンタ値
    /// * `counting_up` - エッジ時点のカウント方向
    ///
    /// # 戻り値
    /// * `true` - 原点を取り込んだ（電源投入後の初回エッジ）
    /// * `false` - 取り込み済みのため無視した
    pub fn capture_index(&mut self, count: u16, counting_up: bool) -> bool {
        if self.calibration.is_some() {
            return false;
        }

        let electrical = count % self.counts_per_elec;
        let mechanical = if counting_up {
            count as i32
        } else {
            count as i32 - self.counts_per_rev
        };
        self.calibration = Some(Calibration {
            electrical,
            mechanical,
        });

        // 原点シフトで位置が跳ばないよう前回値も同じ基準へ移す
        self.prev_position -= mechanical;

        info!(
            "Encoder index captured: electrical={}, mechanical={}",
            electrical, mechanical
        );
        true
    }

    pub fn calibration(&self) -> Option<Calibration> {
        self.calibration
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    /// 電気角インデックス（キャリア周期ごと）
    ///
    /// `((count − 電気角原点 − Z相オフセット) mod 電気角周期)` を正弦テーブル長へスケーリング
    pub fn electrical_index(&self, count: u16) -> u16 {
        let period = self.counts_per_elec as u32;
        let origin = self
            .calibration
            .map(|c| c.electrical as u32)
            .unwrap_or(0);
        let within = count as u32 % period;
        let aligned = (within + period - origin) % period;
        let shifted = (aligned + period - self.z_offset as u32) % period;
        (shifted * SIN_TABLE_LEN as u32 / period) as u16
    }

    /// 位置・速度の更新（速度制御周期ごと）
    ///
    /// # 引数
    /// * `count` - 現在のカウンタ値
    /// * `wrap` - 前回サンプル以降に立った周回フラグ
    pub fn sample(&mut self, count: u16, wrap: Wrap) -> SpeedSample {
        let cpr = self.counts_per_rev;
        let raw = count as i32;
        let prev = self.prev_count as i32;

        let mut delta = match wrap {
            Wrap::Overflow => {
                self.rotations += 1;
                raw + cpr - prev
            }
            Wrap::Underflow => {
                self.rotations -= 1;
                raw - (prev + cpr)
            }
            Wrap::None => raw - prev,
        };

        let mut corrections = 0u8;

        // 差分の急変は誤フラグとみなして1周期ずつ戻す
        while delta - self.prev_delta > self.threshold && corrections < MAX_GLITCH_ITERATIONS {
            delta -= cpr;
            corrections += 1;
        }
        while delta - self.prev_delta < -self.threshold && corrections < MAX_GLITCH_ITERATIONS {
            delta += cpr;
            corrections += 1;
        }

        let mut position = self.position_from(raw);
        while position - self.prev_position > self.threshold && corrections < MAX_GLITCH_ITERATIONS
        {
            self.rotations -= 1;
            position = self.position_from(raw);
            corrections += 1;
        }
        while position - self.prev_position < -self.threshold && corrections < MAX_GLITCH_ITERATIONS
        {
            self.rotations += 1;
            position = self.position_from(raw);
            corrections += 1;
        }

        if corrections > 0 {
            self.total_corrections = self.total_corrections.saturating_add(corrections as u32);
            if corrections >= MAX_GLITCH_ITERATIONS {
                warn!(
                    "Encoder glitch correction capped: delta={}, position={}",
                    delta, position
                );
            } else {
                debug!("Encoder glitch corrected ({} steps)", corrections);
            }
        }

        self.prev_count = count;
        self.prev_delta = delta;
        self.prev_position = position;

        self.last = SpeedSample {
            delta,
            position,
            omega_e: self.count_to_omega_e * delta as f32,
            corrections,
        };
        self.last
    }

    fn position_from(&self, raw: i32) -> i32 {
        let origin = self.calibration.map(|c| c.mechanical).unwrap_or(0);
        self.rotations
            .wrapping_mul(self.counts_per_rev)
            .wrapping_add(raw)
            .wrapping_sub(origin)
    }

    /// 直近の推定結果
    pub fn last(&self) -> SpeedSample {
        self.last
    }

    /// 機械角位置 [rad]（多回転）
    pub fn mechanical_position(&self) -> f32 {
        self.last.position as f32 * TAU / self.counts_per_rev as f32
    }

    /// 電気角速度 [rad/s]
    pub fn omega_e(&self) -> f32 {
        self.last.omega_e
    }

    pub fn rotations(&self) -> i32 {
        self.rotations
    }

    pub fn total_corrections(&self) -> u32 {
        self.total_corrections
    }

    /// 差分 → 電気角速度 の係数 [rad/s per count/sample]
    pub fn count_to_omega_e(&self) -> f32 {
        self.count_to_omega_e
    }

    /// 速度推定の履歴を現在のカウンタ値へ合わせ直す（原点オフセットは保持）
    pub fn reset_motion(&mut self, count: u16) {
        self.prev_count = count;
        self.prev_delta = 0;
        self.prev_position = self.position_from(count as i32);
        self.last = SpeedSample {
            delta: 0,
            position: self.prev_position,
            omega_e: 0.0,
            corrections: 0,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn estimator() -> EncoderEstimator {
        EncoderEstimator::new(&EncoderParams::default())
    }

    /// 一定速度で回るカウンタ列を生成（周回フラグ付き）
    fn counter_sequence(start: i32, step: i32, len: usize) -> Vec<(u16, Wrap)> {
        let mut out = Vec::new();
        let mut absolute = start;
        for _ in 0..len {
            let before = absolute.div_euclid(4000);
            absolute += step;
            let after = absolute.div_euclid(4000);
            let wrap = if after > before {
                Wrap::Overflow
            } else if after < before {
                Wrap::Underflow
            } else {
                Wrap::None
            };
            out.push((absolute.rem_euclid(4000) as u16, wrap));
        }
        out
    }

    #[test]
    fn test_electrical_index_uncalibrated() {
        let enc = estimator();
        // (0 + 1000 - 320) % 1000 = 680 → 680 * 2048 / 1000
        assert_eq!(enc.electrical_index(0), 1392);
        assert_eq!(enc.electrical_index(320), 0);
        assert_eq!(enc.electrical_index(1320), 0);
        assert_eq!(enc.electrical_index(820), 1024);
    }

    #[test]
    fn test_electrical_index_after_calibration() {
        let mut enc = estimator();
        assert!(enc.capture_index(2150, true));
        // 電気角原点 150、Z相オフセット 320
        assert_eq!(enc.electrical_index(470), 0);
        assert_eq!(enc.electrical_index(1470), 0);
        assert_eq!(enc.electrical_index(970), 1024);
        assert!(enc.electrical_index(3999) < SIN_TABLE_LEN);
    }

    #[test]
    fn test_index_capture_is_one_shot() {
        let mut enc = estimator();
        assert!(enc.capture_index(100, true));
        assert!(!enc.capture_index(700, false));
        assert_eq!(
            enc.calibration(),
            Some(Calibration {
                electrical: 100,
                mechanical: 100
            })
        );
    }

    #[test]
    fn test_index_capture_counting_down() {
        let mut enc = estimator();
        assert!(enc.capture_index(3900, false));
        assert_eq!(enc.calibration().map(|c| c.mechanical), Some(3900 - 4000));
    }

    #[test]
    fn test_constant_speed_with_wraps() {
        let mut enc = estimator();
        let mut prev_position = 0;
        for (i, (count, wrap)) in counter_sequence(0, 150, 100).into_iter().enumerate() {
            let s = enc.sample(count, wrap);
            assert_eq!(s.delta, 150, "tick {}", i);
            assert_eq!(s.corrections, 0);
            assert_eq!(s.position - prev_position, 150);
            prev_position = s.position;
        }
        assert_eq!(enc.rotations(), 3);
    }

    #[test]
    fn test_reverse_with_underflow() {
        let mut enc = estimator();
        for (count, wrap) in counter_sequence(0, -90, 100) {
            let s = enc.sample(count, wrap);
            assert_eq!(s.delta, -90);
        }
        assert!(enc.rotations() < 0);
        assert_eq!(enc.last().position, -9000);
    }

    #[test]
    fn test_spurious_overflow_flag_is_corrected() {
        let mut enc = estimator();
        let mut sequence = counter_sequence(0, 40, 50);
        // 周回していないのにオーバーフローフラグが立つ
        sequence[20].1 = Wrap::Overflow;

        let mut prev_position = 0;
        for (count, wrap) in sequence {
            let s = enc.sample(count, wrap);
            assert!((s.delta - 40).abs() <= EncoderParams::default().glitch_threshold);
            assert_eq!(s.delta, 40);
            assert_eq!(s.position - prev_position, 40);
            prev_position = s.position;
        }
        assert!(enc.total_corrections() >= 2);
    }

    #[test]
    fn test_spurious_underflow_flag_is_corrected() {
        let mut enc = estimator();
        let mut sequence = counter_sequence(0, 25, 40);
        sequence[10].1 = Wrap::Underflow;
        for (count, wrap) in sequence {
            assert_eq!(enc.sample(count, wrap).delta, 25);
        }
    }

    #[test]
    fn test_reset_motion_resynchronises() {
        let mut enc = estimator();
        enc.reset_motion(1000);
        for (count, wrap) in counter_sequence(1000, 25, 20) {
            let s = enc.sample(count, wrap);
            assert_eq!(s.delta, 25);
            assert_eq!(s.corrections, 0);
        }
        assert_eq!(enc.last().position, 1500);
    }

    #[test]
    fn test_correction_is_capped() {
        let mut params = EncoderParams::default();
        params.glitch_threshold = -1;
        let mut enc = EncoderEstimator::new(&params);
        // しきい値が負だと補正条件が常に成立するが、上限で打ち切られる
        let s = enc.sample(10, Wrap::None);
        assert_eq!(s.corrections, MAX_GLITCH_ITERATIONS);
    }

    #[test]
    fn test_calibration_keeps_position_continuous() {
        let mut enc = estimator();
        let sequence = counter_sequence(0, 100, 30);
        for &(count, wrap) in &sequence[..10] {
            enc.sample(count, wrap);
        }
        let before = enc.last().position;
        // 1500カウントの原点シフトはしきい値を超えるが、跳びは生じない
        assert!(enc.capture_index(1500, true));
        let (count, wrap) = sequence[10];
        let s = enc.sample(count, wrap);
        assert_eq!(s.corrections, 0);
        assert_eq!(s.position, before - 1500 + 100);
    }

    #[test]
    fn test_omega_e_scaling() {
        let mut enc = estimator();
        let s = enc.sample(10, Wrap::None);
        // 2π·1e6 / (1000 · 1000) · 10
        assert!((s.omega_e - TAU * 0.01).abs() < 1e-5);
        assert!((enc.count_to_omega_e() - TAU / 1000.0).abs() < 1e-7);
    }
}
