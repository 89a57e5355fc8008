//! インバータ側の周期スキャン
//!
//! 優先度の高い順に3つの周期処理があります。
//! - キャリアスキャン: 電流検出、座標変換、電流制御、PWM出力
//! - 速度スキャン: エンコーダ速度推定、指令値生成、速度制御、フィードバック更新
//! - シーケンススキャン: 状態遷移、異常処理、電流オフセット校正
//!
//! 可変状態はすべて [`MotorContext`] にまとめ、各スキャンへ `&mut` で渡します。
//! 各フィールドを書き込むのは1つのスキャンだけです。
//!
//! | 書き込み元 | フィールド |
//! |---|---|
//! | キャリア | `current`、電流制御の積分器、`CurrentSense` の生値、`feedback.position` / `feedback.current` |
//! | 速度 | `speed`、速度制御の積分器、エンコーダの速度履歴、`feedback.velocity`、`command` / `bus_status`（送受信） |
//! | シーケンス | 運転状態、`CurrentSense` のオフセット、`feedback.state` |
//!
//! 積分器と指令値のクリアは運転状態で要求します。Run 以外の状態を見た
//! キャリア・速度スキャンが、それぞれ自分の持ち分を0に戻します。

use crate::bus::{EscError, EscInterface, FieldbusSlaveRuntime, SlaveStatus, SyncMode};
use crate::config::{DriveConfig, ReferenceMode};
use crate::foc::{
    clarke, decoupling, inverse_clarke, inverse_park, park, CurrentSense, DutyMapper,
    EncoderEstimator, PhaseCurrents, PhaseDuties, PiController, PiGains, SinTable,
};
use crate::hardware::{FaultInput, PhaseAdc, PowerStage, QuadratureCounter, StatusIndicator};
use crate::protocol::{MasterToSlave, SlaveToMaster};
use crate::state_machine::{OperationalState, OperatorInputs, OperatorStateMachine};

/// キャリアスキャンが書き込む電流制御の状態量
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentLoopState {
    pub id: f32,
    pub iq: f32,
    /// 出力電圧（Run 以外では0）
    pub vd: f32,
    pub vq: f32,
    /// 母線電圧 [V]
    pub vdc: f32,
    /// 電気角インデックス
    pub theta_index: u16,
    pub currents: PhaseCurrents,
}

/// 速度スキャンが書き込む指令値と速度
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpeedLoopState {
    /// 電気角速度 [rad/s]
    pub omega_e: f32,
    /// 電気角速度指令 [rad/s]
    pub omega_ref: f32,
    pub id_ref: f32,
    pub iq_ref: f32,
}

impl SpeedLoopState {
    fn clear_references(&mut self) {
        self.omega_ref = 0.0;
        self.id_ref = 0.0;
        self.iq_ref = 0.0;
    }
}

/// 座標変換・電流制御・速度制御・PWM変換
///
/// 電流制御器はキャリアスキャン、速度制御器は速度スキャンだけが更新します。
#[derive(Debug, Clone)]
pub struct FocPipeline {
    table: SinTable,
    acr_d: PiController,
    acr_q: PiController,
    asr: PiController,
    pwm: DutyMapper,
    inductance: f32,
    back_emf: f32,
    pole_pairs: f32,
    max_speed: f32,
    mode: ReferenceMode,
}

impl FocPipeline {
    pub fn new(config: &DriveConfig) -> Self {
        let acr_gains = PiGains::current_loop(&config.motor, &config.current_loop);
        let asr_gains = PiGains::speed_loop(&config.motor, &config.speed_loop);
        let acr_dt = config.timing.carrier_period_s();
        let asr_dt = config.timing.speed_period_s();

        info!(
            "ACR gains: Kp={}, Ki={} / ASR gains: Kp={}, Ki={}",
            acr_gains.kp, acr_gains.ki, asr_gains.kp, asr_gains.ki
        );

        Self {
            table: SinTable::new(),
            acr_d: PiController::new_ip(acr_gains, acr_dt),
            acr_q: PiController::new_ip(acr_gains, acr_dt),
            asr: PiController::new_ip(asr_gains, asr_dt),
            pwm: DutyMapper::from_timing(&config.timing),
            inductance: config.motor.inductance,
            back_emf: config.motor.flux_linkage,
            pole_pairs: config.motor.pole_pairs as f32,
            max_speed: config.motor.max_speed,
            mode: config.reference_mode,
        }
    }

    pub fn mode(&self) -> ReferenceMode {
        self.mode
    }

    pub fn table(&self) -> &SinTable {
        &self.table
    }

    pub fn duty_mapper(&self) -> &DutyMapper {
        &self.pwm
    }

    /// 三相電流 → dq電流
    pub fn measure(&self, currents: &PhaseCurrents, index: u16) -> (f32, f32) {
        let (alpha, beta) = clarke(currents.iu, currents.iv, currents.iw);
        park(alpha, beta, index, &self.table)
    }

    /// 電流制御1周期分
    ///
    /// 速度スキャンが決めた指令値と計測値から dq 電圧を求め、
    /// 非干渉補償を加えて逆変換し、各相の比較値を返します。
    pub fn regulate(&mut self, m: &mut CurrentLoopState, refs: &SpeedLoopState) -> PhaseDuties {
        let (vd_comp, vq_comp) =
            decoupling(m.id, m.iq, refs.omega_e, self.inductance, self.back_emf);
        m.vd = self.acr_d.update(refs.id_ref, m.id) + vd_comp;
        m.vq = self.acr_q.update(refs.iq_ref, m.iq) + vq_comp;

        let (alpha, beta) = inverse_park(m.vd, m.vq, m.theta_index, &self.table);
        let (u, v, w) = inverse_clarke(alpha, beta);
        self.pwm.duties(u, v, w, m.vdc)
    }

    /// 機械角速度指令 [rad/s] → 電気角速度指令（最大速度で制限）
    pub fn speed_reference(&self, mechanical: f32) -> f32 {
        let omega = self.pole_pairs * mechanical;
        if omega.is_nan() {
            return 0.0;
        }
        omega.clamp(-self.max_speed, self.max_speed)
    }

    /// 速度制御1周期分（q軸電流指令を返す）
    pub fn speed_step(&mut self, omega_ref: f32, omega_e: f32) -> f32 {
        self.asr.update(omega_ref, omega_e)
    }

    pub fn reset_current_loop(&mut self) {
        self.acr_d.reset();
        self.acr_q.reset();
    }

    pub fn reset_speed_loop(&mut self) {
        self.asr.reset();
    }

    pub fn acr_integrals(&self) -> (f32, f32) {
        (self.acr_d.integral(), self.acr_q.integral())
    }

    pub fn asr_integral(&self) -> f32 {
        self.asr.integral()
    }
}

/// 1軸分の可変状態
#[derive(Debug, Clone)]
pub struct MotorContext {
    pub current: CurrentLoopState,
    pub speed: SpeedLoopState,
    pub encoder: EncoderEstimator,
    pub current_sense: CurrentSense,
    pub pipeline: FocPipeline,
    pub state_machine: OperatorStateMachine,
    /// 最新の受信指令
    pub command: MasterToSlave,
    /// 次回送信するフィードバック
    pub feedback: SlaveToMaster,
    pub bus_status: SlaveStatus,
}

impl MotorContext {
    pub fn new(config: &DriveConfig) -> Self {
        Self {
            current: CurrentLoopState::default(),
            speed: SpeedLoopState::default(),
            encoder: EncoderEstimator::new(&config.encoder),
            current_sense: CurrentSense::new(config.sense),
            pipeline: FocPipeline::new(config),
            state_machine: OperatorStateMachine::new(config.motor.overspeed_level()),
            command: MasterToSlave::new(),
            feedback: SlaveToMaster::new(),
            bus_status: SlaveStatus::offline(),
        }
    }

    pub fn state(&self) -> OperationalState {
        self.state_machine.state()
    }
}

/// キャリアスキャン（キャリア谷ごと）
pub fn carrier_scan<A, Q, P>(ctx: &mut MotorContext, adc: &mut A, counter: &Q, power: &mut P)
where
    A: PhaseAdc,
    Q: QuadratureCounter,
    P: PowerStage,
{
    let index = ctx.encoder.electrical_index(counter.count());
    let (currents, vdc) = ctx.current_sense.convert(&adc.sample());
    let (id, iq) = ctx.pipeline.measure(&currents, index);

    let m = &mut ctx.current;
    m.theta_index = index;
    m.currents = currents;
    m.vdc = vdc;
    m.id = id;
    m.iq = iq;

    match ctx.state_machine.state() {
        OperationalState::Run => {
            let duties = ctx.pipeline.regulate(m, &ctx.speed);
            power.set_duties(duties);
        }
        OperationalState::Error => {
            power.disable();
            m.vd = 0.0;
            m.vq = 0.0;
            ctx.pipeline.reset_current_loop();
        }
        OperationalState::Stop | OperationalState::Unknown => {
            m.vd = 0.0;
            m.vq = 0.0;
            ctx.pipeline.reset_current_loop();
        }
    }

    ctx.feedback.position = ctx.encoder.last().position;
    ctx.feedback.current = m.iq;
}

/// 速度スキャン（速度制御周期ごと）
///
/// Run 中は受信指令から dq 電流指令を決める。
/// 速度指令モードでは速度制御器、電流指令モードでは指令値をそのまま q 軸へ。
/// 通信の送受信は呼び出し側で行う（[`bus_exchange`]）。
pub fn speed_scan<Q, P>(ctx: &mut MotorContext, counter: &mut Q, power: &mut P)
where
    Q: QuadratureCounter,
    P: PowerStage,
{
    let wrap = counter.take_wrap();
    let sample = ctx.encoder.sample(counter.count(), wrap);

    let state = ctx.state_machine.state();
    let s = &mut ctx.speed;
    s.omega_e = sample.omega_e;

    match (state, ctx.pipeline.mode()) {
        (OperationalState::Run, ReferenceMode::Velocity) => {
            s.omega_ref = ctx.pipeline.speed_reference(ctx.command.reference);
            s.id_ref = 0.0;
            s.iq_ref = ctx.pipeline.speed_step(s.omega_ref, s.omega_e);
        }
        (OperationalState::Run, ReferenceMode::Current) => {
            ctx.pipeline.reset_speed_loop();
            s.omega_ref = 0.0;
            s.id_ref = 0.0;
            s.iq_ref = if ctx.command.reference.is_nan() {
                0.0
            } else {
                ctx.command.reference
            };
        }
        _ => {
            ctx.pipeline.reset_speed_loop();
            s.clear_references();
        }
    }

    if state == OperationalState::Error {
        power.disable();
    }

    ctx.feedback.velocity = sample.delta;
}

/// シーケンススキャン（シーケンス周期ごと）
///
/// 異常リセット時は異常ラッチを解除して Stop へ戻すだけで、
/// 電流・速度制御の状態は Stop を見た各スキャンがクリアする。
pub fn sequence_scan<F, P, I>(ctx: &mut MotorContext, fault: &mut F, power: &mut P, indicator: &mut I)
where
    F: FaultInput,
    P: PowerStage,
    I: StatusIndicator,
{
    let bus_ok = ctx.bus_status.is_operational();
    let inputs = OperatorInputs::from_command(ctx.command.command, bus_ok, fault.latched());
    let omega_e = ctx.speed.omega_e;

    ctx.state_machine.step(&inputs, omega_e);

    if inputs.reset {
        let cleared = !fault.source_active() && !ctx.state_machine.is_overspeed(omega_e);
        if ctx.state_machine.try_reset(true, cleared) {
            fault.clear_latch();
        }
    }

    let state = ctx.state_machine.state();
    match state {
        OperationalState::Run => power.enable(),
        OperationalState::Error => power.disable(),
        OperationalState::Stop | OperationalState::Unknown => {
            power.disable();
            // ゲートブロック中のみゼロ点を追従
            ctx.current_sense.calibrate();
        }
    }

    ctx.feedback.state = state.report();
    indicator.show(state);
}

/// 1周期分のプロセスデータ交換結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusCycle<Err> {
    pub status: Result<SlaveStatus, EscError<Err>>,
    pub command: Option<MasterToSlave>,
}

impl<Err> BusCycle<Err> {
    /// 通信に失敗した周期は通信断
    pub fn link_status(&self) -> SlaveStatus {
        match &self.status {
            Ok(status) => *status,
            Err(_) => SlaveStatus::offline(),
        }
    }

    /// 速度スキャンの所有フィールドへ反映（受信なしなら前回指令を保持）
    pub fn apply(&self, ctx: &mut MotorContext) {
        ctx.bus_status = self.link_status();
        if let Some(command) = self.command {
            ctx.command = command;
        }
    }
}

/// フィードバックを書き込み、ESC と交換して指令を読み出す
///
/// 共有状態に触れないため、ファームウェアはロック外で呼ぶ。
pub fn exchange_process_data<E: EscInterface>(
    slave: &mut FieldbusSlaveRuntime<E>,
    feedback: &SlaveToMaster,
) -> BusCycle<E::Error> {
    slave.send(feedback);
    let status = slave.cyclic();
    BusCycle {
        status,
        command: slave.receive::<MasterToSlave>(),
    }
}

/// プロセスデータの送受信（速度スキャンの直後）
pub fn bus_exchange<E: EscInterface>(ctx: &mut MotorContext, slave: &mut FieldbusSlaveRuntime<E>) {
    exchange_process_data(slave, &ctx.feedback).apply(ctx);
}

/// インバータのペリフェラル一式
pub struct InverterPeripherals<P, A, Q, F, I> {
    pub power: P,
    pub adc: A,
    pub counter: Q,
    pub fault: F,
    pub indicator: I,
}

/// キャリア割り込み1回ごとに呼ぶ単一スレッド版ランタイム
///
/// 速度・シーケンススキャンはキャリア周期の分周で実行し、
/// 速度スキャンの直後に ESC との送受信を行います。
pub struct InverterRuntime<E, P, A, Q, F, I>
where
    E: EscInterface,
{
    ctx: MotorContext,
    slave: FieldbusSlaveRuntime<E>,
    hw: InverterPeripherals<P, A, Q, F, I>,
    speed_divider: u32,
    sequence_divider: u32,
    ticks: u32,
}

impl<E, P, A, Q, F, I> InverterRuntime<E, P, A, Q, F, I>
where
    E: EscInterface,
    P: PowerStage,
    A: PhaseAdc,
    Q: QuadratureCounter,
    F: FaultInput,
    I: StatusIndicator,
{
    pub fn new(config: &DriveConfig, esc: E, hw: InverterPeripherals<P, A, Q, F, I>) -> Self {
        let carrier = config.timing.carrier_freq_hz as u64;
        let divider = |period_us: u32| ((carrier * period_us as u64 / 1_000_000) as u32).max(1);

        let mut ctx = MotorContext::new(config);
        ctx.encoder.reset_motion(hw.counter.count());

        Self {
            ctx,
            slave: FieldbusSlaveRuntime::new(esc),
            hw,
            speed_divider: divider(config.timing.speed_period_us),
            sequence_divider: divider(config.timing.sequence_period_us),
            ticks: 0,
        }
    }

    /// ESC 初期化
    pub fn init(&mut self, sync: SyncMode) -> Result<u32, EscError<E::Error>> {
        self.slave.init(sync)
    }

    /// キャリア周期1回分
    pub fn carrier_tick(&mut self) {
        let hw = &mut self.hw;
        carrier_scan(&mut self.ctx, &mut hw.adc, &hw.counter, &mut hw.power);

        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % self.speed_divider == 0 {
            self.speed_tick();
        }
        if self.ticks % self.sequence_divider == 0 {
            self.sequence_tick();
        }
    }

    /// 速度スキャン + 通信
    pub fn speed_tick(&mut self) {
        speed_scan(&mut self.ctx, &mut self.hw.counter, &mut self.hw.power);
        bus_exchange(&mut self.ctx, &mut self.slave);
    }

    pub fn sequence_tick(&mut self) {
        let hw = &mut self.hw;
        sequence_scan(&mut self.ctx, &mut hw.fault, &mut hw.power, &mut hw.indicator);
    }

    /// Z相エッジ
    pub fn index_edge(&mut self) -> bool {
        let counter = &self.hw.counter;
        self.ctx
            .encoder
            .capture_index(counter.count(), counter.counting_up())
    }

    pub fn context(&self) -> &MotorContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut MotorContext {
        &mut self.ctx
    }

    pub fn slave(&self) -> &FieldbusSlaveRuntime<E> {
        &self.slave
    }

    pub fn slave_mut(&mut self) -> &mut FieldbusSlaveRuntime<E> {
        &mut self.slave
    }

    pub fn peripherals(&self) -> &InverterPeripherals<P, A, Q, F, I> {
        &self.hw
    }

    pub fn peripherals_mut(&mut self) -> &mut InverterPeripherals<P, A, Q, F, I> {
        &mut self.hw
    }

    /// キャリア周期単位の分周比 (速度, シーケンス)
    pub fn dividers(&self) -> (u32, u32) {
        (self.speed_divider, self.sequence_divider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{AlState, VirtualEsc};
    use crate::foc::{AdcSample, Wrap};
    use crate::protocol::{ControlCommand, ProcessData, StateReport};

    #[derive(Default)]
    struct MockPower {
        enabled: bool,
        duties: Option<PhaseDuties>,
        disable_calls: u32,
    }

    impl PowerStage for MockPower {
        fn set_duties(&mut self, duties: PhaseDuties) {
            self.duties = Some(duties);
        }

        fn enable(&mut self) {
            self.enabled = true;
        }

        fn disable(&mut self) {
            self.enabled = false;
            self.disable_calls += 1;
        }
    }

    struct MockAdc(AdcSample);

    impl PhaseAdc for MockAdc {
        fn sample(&mut self) -> AdcSample {
            self.0
        }
    }

    #[derive(Default)]
    struct MockCounter {
        count: u16,
        wrap: Wrap,
    }

    impl QuadratureCounter for MockCounter {
        fn count(&self) -> u16 {
            self.count
        }

        fn counting_up(&self) -> bool {
            true
        }

        fn take_wrap(&mut self) -> Wrap {
            core::mem::take(&mut self.wrap)
        }
    }

    #[derive(Default)]
    struct MockFault {
        latched: bool,
        active: bool,
    }

    impl FaultInput for MockFault {
        fn latched(&mut self) -> bool {
            self.latched
        }

        fn source_active(&mut self) -> bool {
            self.active
        }

        fn clear_latch(&mut self) {
            self.latched = false;
        }
    }

    /// 電流0・母線24V相当
    fn idle_adc() -> MockAdc {
        MockAdc(AdcSample {
            iu: 2650,
            iv: 2650,
            iw: 2650,
            vdc: 1593,
        })
    }

    fn online() -> SlaveStatus {
        SlaveStatus {
            al_status: AlState::Op as u8,
            watchdog_expired: false,
        }
    }

    fn context_in(state: OperationalState, mode: ReferenceMode) -> MotorContext {
        let config = DriveConfig {
            reference_mode: mode,
            ..DriveConfig::default()
        };
        let mut ctx = MotorContext::new(&config);
        ctx.bus_status = online();
        let mut fault = MockFault::default();
        let mut power = MockPower::default();
        // Unknown -> Stop
        sequence_scan(&mut ctx, &mut fault, &mut power, &mut ());
        if state == OperationalState::Run {
            ctx.command.command = ControlCommand::ServoOn;
            sequence_scan(&mut ctx, &mut fault, &mut power, &mut ());
        } else if state == OperationalState::Error {
            fault.latched = true;
            sequence_scan(&mut ctx, &mut fault, &mut power, &mut ());
        }
        assert_eq!(ctx.state(), state);
        ctx
    }

    #[test]
    fn test_sequence_moore_outputs() {
        let mut ctx = context_in(OperationalState::Stop, ReferenceMode::Velocity);
        let mut fault = MockFault::default();
        let mut power = MockPower::default();

        sequence_scan(&mut ctx, &mut fault, &mut power, &mut ());
        assert!(!power.enabled);
        assert_eq!(ctx.feedback.state, StateReport::Stop);

        ctx.command.command = ControlCommand::ServoOn;
        sequence_scan(&mut ctx, &mut fault, &mut power, &mut ());
        assert!(power.enabled);
        assert_eq!(ctx.feedback.state, StateReport::Run);

        fault.latched = true;
        fault.active = true;
        sequence_scan(&mut ctx, &mut fault, &mut power, &mut ());
        assert!(!power.enabled);
        assert_eq!(ctx.feedback.state, StateReport::Error);
    }

    #[test]
    fn test_lost_bus_stops_drive() {
        let mut ctx = context_in(OperationalState::Run, ReferenceMode::Velocity);
        let mut power = MockPower::default();
        ctx.bus_status = SlaveStatus::offline();
        sequence_scan(&mut ctx, &mut MockFault::default(), &mut power, &mut ());
        assert_eq!(ctx.state(), OperationalState::Stop);
        assert!(!power.enabled);
    }

    #[test]
    fn test_reset_escape_requires_cleared_source() {
        let mut ctx = context_in(OperationalState::Error, ReferenceMode::Velocity);
        let mut fault = MockFault {
            latched: true,
            active: true,
        };
        let mut power = MockPower::default();
        ctx.command.command = ControlCommand::ResetError;

        sequence_scan(&mut ctx, &mut fault, &mut power, &mut ());
        assert_eq!(ctx.state(), OperationalState::Error);
        assert!(fault.latched);

        fault.active = false;
        sequence_scan(&mut ctx, &mut fault, &mut power, &mut ());
        assert_eq!(ctx.state(), OperationalState::Stop);
        assert!(!fault.latched);
        assert_eq!(ctx.feedback.state, StateReport::Stop);
    }

    #[test]
    fn test_stop_holds_regulators_at_zero() {
        let mut ctx = context_in(OperationalState::Stop, ReferenceMode::Current);
        ctx.command.reference = 3.0;
        let mut power = MockPower::default();
        let mut counter = MockCounter::default();
        speed_scan(&mut ctx, &mut counter, &mut power);
        carrier_scan(&mut ctx, &mut idle_adc(), &counter, &mut power);
        assert_eq!(power.duties, None);
        assert_eq!(ctx.speed.iq_ref, 0.0);
        assert_eq!((ctx.current.vd, ctx.current.vq), (0.0, 0.0));
        assert_eq!(ctx.pipeline.acr_integrals(), (0.0, 0.0));
    }

    #[test]
    fn test_run_current_mode_drives_pwm() {
        let mut ctx = context_in(OperationalState::Run, ReferenceMode::Current);
        ctx.command.reference = 2.0;
        let mut power = MockPower::default();
        let mut counter = MockCounter::default();
        speed_scan(&mut ctx, &mut counter, &mut power);
        assert_eq!(ctx.speed.iq_ref, 2.0);
        assert_eq!(ctx.speed.id_ref, 0.0);

        carrier_scan(&mut ctx, &mut idle_adc(), &counter, &mut power);
        let (_, q_integral) = ctx.pipeline.acr_integrals();
        assert!(q_integral > 0.0);
        let duties = power.duties.expect("duties written in Run");
        let max = ctx.pipeline.duty_mapper().period() - 1;
        for duty in [duties.u, duties.v, duties.w] {
            assert!((1..=max).contains(&duty));
        }
    }

    #[test]
    fn test_current_mode_nan_reference_is_zero() {
        let mut ctx = context_in(OperationalState::Run, ReferenceMode::Current);
        ctx.command.reference = f32::NAN;
        let mut counter = MockCounter::default();
        speed_scan(&mut ctx, &mut counter, &mut MockPower::default());
        assert_eq!(ctx.speed.iq_ref, 0.0);
    }

    #[test]
    fn test_leaving_run_resets_integrators() {
        let mut ctx = context_in(OperationalState::Run, ReferenceMode::Current);
        ctx.command.reference = 2.0;
        let mut power = MockPower::default();
        let mut counter = MockCounter::default();
        speed_scan(&mut ctx, &mut counter, &mut power);
        for _ in 0..10 {
            carrier_scan(&mut ctx, &mut idle_adc(), &counter, &mut power);
        }
        assert!(ctx.pipeline.acr_integrals().1 > 0.0);

        ctx.command.command = ControlCommand::ServoOff;
        sequence_scan(&mut ctx, &mut MockFault::default(), &mut power, &mut ());
        // シーケンスは状態を変えるだけ
        assert!(ctx.pipeline.acr_integrals().1 > 0.0);
        assert_eq!(ctx.speed.iq_ref, 2.0);

        carrier_scan(&mut ctx, &mut idle_adc(), &counter, &mut power);
        assert_eq!(ctx.pipeline.acr_integrals(), (0.0, 0.0));
        speed_scan(&mut ctx, &mut counter, &mut power);
        assert_eq!(ctx.speed.iq_ref, 0.0);
    }

    #[test]
    fn test_speed_scan_velocity_mode() {
        let mut ctx = context_in(OperationalState::Run, ReferenceMode::Velocity);
        ctx.command.reference = 10.0;
        let mut counter = MockCounter {
            count: 5,
            wrap: Wrap::None,
        };
        let mut power = MockPower::default();
        speed_scan(&mut ctx, &mut counter, &mut power);

        // 4極対 × 10 rad/s
        assert!((ctx.speed.omega_ref - 40.0).abs() < 1e-4);
        assert!(ctx.speed.iq_ref > 0.0);
        assert_eq!(ctx.feedback.velocity, 5);
    }

    /// 速度・電流制御が動いている Run 中のコンテキスト
    fn running_context() -> (MotorContext, MockCounter) {
        let mut ctx = context_in(OperationalState::Run, ReferenceMode::Velocity);
        ctx.command.reference = 10.0;
        let mut counter = MockCounter {
            count: 5,
            wrap: Wrap::None,
        };
        let mut power = MockPower::default();
        speed_scan(&mut ctx, &mut counter, &mut power);
        carrier_scan(&mut ctx, &mut idle_adc(), &counter, &mut power);
        (ctx, counter)
    }

    #[test]
    fn test_carrier_scan_writes_only_its_fields() {
        let (mut ctx, mut counter) = running_context();
        counter.count = 40;
        let speed = ctx.speed;
        let asr = ctx.pipeline.asr_integral();
        let (velocity, state) = (ctx.feedback.velocity, ctx.feedback.state);
        let offsets = ctx.current_sense.offsets();

        carrier_scan(&mut ctx, &mut idle_adc(), &counter, &mut MockPower::default());

        assert_eq!(ctx.speed, speed);
        assert_eq!(ctx.pipeline.asr_integral(), asr);
        assert_eq!(ctx.feedback.velocity, velocity);
        assert_eq!(ctx.feedback.state, state);
        assert_eq!(ctx.current_sense.offsets(), offsets);
    }

    #[test]
    fn test_speed_scan_writes_only_its_fields() {
        let (mut ctx, mut counter) = running_context();
        counter.count = 40;
        let current = ctx.current;
        let acr = ctx.pipeline.acr_integrals();
        let (position, iq, state) = (ctx.feedback.position, ctx.feedback.current, ctx.feedback.state);

        speed_scan(&mut ctx, &mut counter, &mut MockPower::default());

        assert_eq!(ctx.current, current);
        assert_eq!(ctx.pipeline.acr_integrals(), acr);
        assert_eq!(ctx.feedback.position, position);
        assert_eq!(ctx.feedback.current, iq);
        assert_eq!(ctx.feedback.state, state);
    }

    #[test]
    fn test_sequence_scan_leaves_loop_state_to_the_scans() {
        let (mut ctx, _) = running_context();
        let current = ctx.current;
        let speed = ctx.speed;
        let acr = ctx.pipeline.acr_integrals();
        let asr = ctx.pipeline.asr_integral();
        let (position, velocity) = (ctx.feedback.position, ctx.feedback.velocity);

        // 異常 → リセットで Stop まで戻しても制御状態には触れない
        let mut fault = MockFault {
            latched: true,
            active: false,
        };
        let mut power = MockPower::default();
        sequence_scan(&mut ctx, &mut fault, &mut power, &mut ());
        assert_eq!(ctx.state(), OperationalState::Error);
        ctx.command.command = ControlCommand::ResetError;
        sequence_scan(&mut ctx, &mut fault, &mut power, &mut ());
        assert_eq!(ctx.state(), OperationalState::Stop);

        assert_eq!(ctx.current, current);
        assert_eq!(ctx.speed, speed);
        assert_eq!(ctx.pipeline.acr_integrals(), acr);
        assert_eq!(ctx.pipeline.asr_integral(), asr);
        assert_eq!(ctx.feedback.position, position);
        assert_eq!(ctx.feedback.velocity, velocity);
    }

    #[test]
    fn test_speed_reference_clamped() {
        let ctx = context_in(OperationalState::Stop, ReferenceMode::Velocity);
        let max = DriveConfig::default().motor.max_speed;
        assert_eq!(ctx.pipeline.speed_reference(1.0e6), max);
        assert_eq!(ctx.pipeline.speed_reference(-1.0e6), -max);
        assert_eq!(ctx.pipeline.speed_reference(f32::NAN), 0.0);
    }

    #[test]
    fn test_runtime_bus_exchange() {
        let mut esc = VirtualEsc::new();
        esc.set_al_state(AlState::Op);
        esc.set_watchdog_ok(true);
        let hw = InverterPeripherals {
            power: MockPower::default(),
            adc: idle_adc(),
            counter: MockCounter::default(),
            fault: MockFault::default(),
            indicator: (),
        };
        let mut runtime = InverterRuntime::new(&DriveConfig::default(), esc, hw);
        assert_eq!(runtime.dividers(), (20, 200));

        let command = MasterToSlave {
            reference: 1.5,
            command: ControlCommand::ServoOn,
        };
        command.encode(&mut runtime.slave_mut().esc_mut().outputs_mut()[..MasterToSlave::SIZE]);

        // Stop (200), Run (400), 送信 (420)
        for _ in 0..420 {
            runtime.carrier_tick();
        }
        assert_eq!(runtime.context().command, command);
        assert_eq!(runtime.context().state(), OperationalState::Run);

        let feedback =
            SlaveToMaster::decode(&runtime.slave().esc().inputs()[..SlaveToMaster::SIZE]);
        assert_eq!(feedback.map(|f| f.state), Some(StateReport::Run));
    }

    #[test]
    fn test_transport_fault_goes_offline_and_drops_command() {
        let mut esc = VirtualEsc::new();
        esc.set_al_state(AlState::Op);
        esc.set_watchdog_ok(true);
        let mut slave = FieldbusSlaveRuntime::new(esc);
        let mut ctx = context_in(OperationalState::Run, ReferenceMode::Velocity);

        let command = MasterToSlave {
            reference: 2.0,
            command: ControlCommand::ServoOn,
        };
        command.encode(&mut slave.esc_mut().outputs_mut()[..MasterToSlave::SIZE]);
        bus_exchange(&mut ctx, &mut slave);
        assert!(ctx.bus_status.is_operational());
        assert_eq!(ctx.command, command);

        slave.esc_mut().set_fault(true);
        let cycle = exchange_process_data(&mut slave, &ctx.feedback);
        assert!(cycle.status.is_err());
        cycle.apply(&mut ctx);
        assert!(!ctx.bus_status.is_operational());
        assert_eq!(ctx.command, MasterToSlave::new());
    }
}
