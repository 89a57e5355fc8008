//! インバータ側ハードウェアの境界
//!
//! スキャン処理はこれらのトレイト越しにのみペリフェラルへアクセスします。
//! 実装はファームウェア（STM32G431）とシミュレータがそれぞれ提供します。

use crate::foc::{AdcSample, PhaseDuties, Wrap};
use crate::state_machine::OperationalState;

/// 三相ハーフブリッジ
pub trait PowerStage {
    /// 比較値を書き込む（キャリア周期ごと）
    fn set_duties(&mut self, duties: PhaseDuties);

    /// ゲート出力を許可
    fn enable(&mut self);

    /// ゲート出力を遮断（ゲートブロック）
    fn disable(&mut self);
}

/// 相電流・母線電圧 ADC
pub trait PhaseAdc {
    /// 1キャリア周期分の生コード
    fn sample(&mut self) -> AdcSample;
}

/// エンコーダモードのタイマカウンタ
pub trait QuadratureCounter {
    /// 現在のカウンタ値（機械角1回転で周回）
    fn count(&self) -> u16;

    /// アップカウント中なら `true`
    fn counting_up(&self) -> bool;

    /// 前回呼び出し以降の周回フラグを読み出してクリア
    fn take_wrap(&mut self) -> Wrap;
}

/// 外部異常入力
pub trait FaultInput {
    /// ラッチされた異常の有無
    fn latched(&mut self) -> bool;

    /// 異常要因が現在も有効か
    fn source_active(&mut self) -> bool;

    fn clear_latch(&mut self);
}

/// 状態表示（書き込み専用）
pub trait StatusIndicator {
    fn show(&mut self, state: OperationalState);
}

/// 表示器なし
impl StatusIndicator for () {
    fn show(&mut self, _state: OperationalState) {}
}
