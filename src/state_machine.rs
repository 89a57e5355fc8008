//! 運転状態管理
//!
//! 指令ビットと異常条件からイベントを決め、状態遷移表で運転状態を更新します。
//! Error 状態は遷移表では抜けられず、リセット要求かつ異常解消時のみ
//! [`OperatorStateMachine::try_reset`] で Stop へ戻ります。

use crate::protocol::{ControlCommand, StateReport};

/// 運転状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperationalState {
    /// 起動直後
    #[default]
    Unknown,
    Stop,
    Run,
    Error,
}

impl OperationalState {
    /// 通信フレームでの表現
    pub const fn report(&self) -> StateReport {
        match self {
            OperationalState::Unknown => StateReport::None,
            OperationalState::Stop => StateReport::Stop,
            OperationalState::Run => StateReport::Run,
            OperationalState::Error => StateReport::Error,
        }
    }
}

/// シーケンス周期ごとのイベント
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    #[default]
    None,
    Stop,
    Run,
    Error,
}

/// イベント判定の入力
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OperatorInputs {
    pub servo_on: bool,
    pub servo_off: bool,
    pub reset: bool,
    pub external_fault: bool,
}

impl OperatorInputs {
    /// 受信した制御コマンドから入力を作る
    ///
    /// # 引数
    /// * `command` - マスターからの制御コマンド
    /// * `bus_ok` - 通信が OP かつウォッチドッグ正常なら `true`（通信断はサーボオフ扱い）
    /// * `external_fault` - 外部異常入力のラッチ状態
    pub fn from_command(command: ControlCommand, bus_ok: bool, external_fault: bool) -> Self {
        Self {
            servo_on: bus_ok && command == ControlCommand::ServoOn,
            servo_off: !bus_ok || command == ControlCommand::ServoOff,
            reset: bus_ok && command == ControlCommand::ResetError,
            external_fault,
        }
    }
}

/// イベント判定（優先度 Error > Stop > Run > None）
///
/// # 引数
/// * `inputs` - 指令と外部異常
/// * `omega_e` - 電気角速度 [rad/s]
/// * `overspeed_level` - 過速度判定レベル [rad/s]
pub fn derive_event(inputs: &OperatorInputs, omega_e: f32, overspeed_level: f32) -> Event {
    let overspeed = omega_e.abs() > overspeed_level;
    if inputs.external_fault || overspeed {
        Event::Error
    } else if inputs.servo_off {
        Event::Stop
    } else if inputs.servo_on {
        Event::Run
    } else {
        Event::None
    }
}

/// 状態遷移
pub const fn transition(state: OperationalState, event: Event) -> OperationalState {
    use Event as E;
    use OperationalState as S;

    match (state, event) {
        (S::Unknown, E::Error) => S::Error,
        (S::Unknown, E::None | E::Stop | E::Run) => S::Stop,

        (S::Stop, E::None | E::Stop) => S::Stop,
        (S::Stop, E::Run) => S::Run,
        (S::Stop, E::Error) => S::Error,

        (S::Run, E::None | E::Run) => S::Run,
        (S::Run, E::Stop) => S::Stop,
        (S::Run, E::Error) => S::Error,

        (S::Error, _) => S::Error,
    }
}

/// 運転状態マシン
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OperatorStateMachine {
    state: OperationalState,
    overspeed_level: f32,
}

impl OperatorStateMachine {
    pub const fn new(overspeed_level: f32) -> Self {
        Self {
            state: OperationalState::Unknown,
            overspeed_level,
        }
    }

    pub fn state(&self) -> OperationalState {
        self.state
    }

    pub fn overspeed_level(&self) -> f32 {
        self.overspeed_level
    }

    /// 過速度判定
    pub fn is_overspeed(&self, omega_e: f32) -> bool {
        omega_e.abs() > self.overspeed_level
    }

    /// 1シーケンス周期分の更新
    ///
    /// # 戻り値
    /// 遷移後の状態
    pub fn step(&mut self, inputs: &OperatorInputs, omega_e: f32) -> OperationalState {
        let event = derive_event(inputs, omega_e, self.overspeed_level);
        let next = transition(self.state, event);
        if next != self.state {
            match next {
                OperationalState::Error => warn!(
                    "State {:?} -> Error (fault={}, omega_e={})",
                    self.state, inputs.external_fault, omega_e
                ),
                _ => info!("State {:?} -> {:?}", self.state, next),
            }
        }
        self.state = next;
        next
    }

    /// Error からの復帰
    ///
    /// # 引数
    /// * `reset_requested` - リセット指令の有無
    /// * `fault_cleared` - 異常要因が解消していれば `true`
    ///
    /// # 戻り値
    /// Stop へ復帰した場合 `true`
    pub fn try_reset(&mut self, reset_requested: bool, fault_cleared: bool) -> bool {
        if self.state != OperationalState::Error || !reset_requested || !fault_cleared {
            return false;
        }
        info!("Error reset: Error -> Stop");
        self.state = OperationalState::Stop;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OVERSPEED: f32 = 900.0;

    fn inputs(servo_on: bool, servo_off: bool, fault: bool) -> OperatorInputs {
        OperatorInputs {
            servo_on,
            servo_off,
            reset: false,
            external_fault: fault,
        }
    }

    fn machine_in(state: OperationalState) -> OperatorStateMachine {
        let mut sm = OperatorStateMachine::new(OVERSPEED);
        sm.state = state;
        sm
    }

    #[test]
    fn test_event_priority() {
        let all = inputs(true, true, true);
        assert_eq!(derive_event(&all, 0.0, OVERSPEED), Event::Error);
        assert_eq!(
            derive_event(&inputs(true, true, false), 0.0, OVERSPEED),
            Event::Stop
        );
        assert_eq!(
            derive_event(&inputs(true, false, false), 0.0, OVERSPEED),
            Event::Run
        );
        assert_eq!(
            derive_event(&inputs(false, false, false), 0.0, OVERSPEED),
            Event::None
        );
    }

    #[test]
    fn test_overspeed_is_fault_in_both_directions() {
        let on = inputs(true, false, false);
        assert_eq!(derive_event(&on, 901.0, OVERSPEED), Event::Error);
        assert_eq!(derive_event(&on, -901.0, OVERSPEED), Event::Error);
        assert_eq!(derive_event(&on, 899.0, OVERSPEED), Event::Run);
    }

    #[test]
    fn test_transition_table() {
        use Event as E;
        use OperationalState as S;

        let table = [
            (S::Stop, [S::Stop, S::Stop, S::Run, S::Error]),
            (S::Run, [S::Run, S::Stop, S::Run, S::Error]),
            (S::Error, [S::Error, S::Error, S::Error, S::Error]),
        ];
        for (state, expected) in table {
            for (event, next) in [E::None, E::Stop, E::Run, E::Error].into_iter().zip(expected) {
                assert_eq!(transition(state, event), next, "{:?} x {:?}", state, event);
            }
        }
    }

    #[test]
    fn test_unknown_settles() {
        assert_eq!(
            transition(OperationalState::Unknown, Event::Run),
            OperationalState::Stop
        );
        assert_eq!(
            transition(OperationalState::Unknown, Event::Error),
            OperationalState::Error
        );
    }

    #[test]
    fn test_stop_to_run() {
        let mut sm = machine_in(OperationalState::Stop);
        assert_eq!(sm.step(&inputs(true, false, false), 0.0), OperationalState::Run);
    }

    #[test]
    fn test_fault_wins_over_run_and_stop() {
        let mut sm = machine_in(OperationalState::Run);
        assert_eq!(sm.step(&inputs(true, true, true), 0.0), OperationalState::Error);
    }

    #[test]
    fn test_error_is_sticky() {
        let mut sm = machine_in(OperationalState::Error);
        assert_eq!(sm.step(&inputs(true, false, false), 0.0), OperationalState::Error);
        assert_eq!(sm.step(&inputs(false, true, false), 0.0), OperationalState::Error);
    }

    #[test]
    fn test_reset_requires_fault_cleared() {
        let mut sm = machine_in(OperationalState::Error);
        assert!(!sm.try_reset(true, false));
        assert_eq!(sm.state(), OperationalState::Error);
        assert!(!sm.try_reset(false, true));
        assert!(sm.try_reset(true, true));
        assert_eq!(sm.state(), OperationalState::Stop);
    }

    #[test]
    fn test_reset_ignored_outside_error() {
        let mut sm = machine_in(OperationalState::Run);
        assert!(!sm.try_reset(true, true));
        assert_eq!(sm.state(), OperationalState::Run);
    }

    #[test]
    fn test_inputs_from_command() {
        let on = OperatorInputs::from_command(ControlCommand::ServoOn, true, false);
        assert!(on.servo_on && !on.servo_off && !on.reset);

        // 通信断はサーボオフ
        let lost = OperatorInputs::from_command(ControlCommand::ServoOn, false, false);
        assert!(!lost.servo_on && lost.servo_off);

        let reset = OperatorInputs::from_command(ControlCommand::ResetError, true, true);
        assert!(reset.reset && reset.external_fault);
    }

    #[test]
    fn test_report_mapping() {
        assert_eq!(OperationalState::Unknown.report(), StateReport::None);
        assert_eq!(OperationalState::Run.report(), StateReport::Run);
        assert_eq!(OperationalState::Stop.report(), StateReport::Stop);
        assert_eq!(OperationalState::Error.report(), StateReport::Error);
    }
}
