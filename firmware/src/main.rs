#![no_std]
#![no_main]

// fmt のマクロを後続モジュールで使うため先頭で宣言
mod fmt;

mod board;
mod config;
mod encoder_tim;
mod hardware;
mod lan9252;
mod motor_driver;
mod state;
mod tasks;

#[cfg(not(feature = "defmt"))]
use panic_halt as _;
#[cfg(feature = "defmt")]
use {defmt_rtt as _, panic_probe as _};

use ecat_servo::bus::{FieldbusSlaveRuntime, SyncMode};
use ecat_servo::hardware::QuadratureCounter;
use ecat_servo::scan::{InverterPeripherals, MotorContext};
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32::{
    adc::{Adc, AdcChannel},
    exti::ExtiInput,
    gpio::{Input, Level, Output, Pull, Speed},
    interrupt,
    interrupt::{InterruptExt, Priority},
    spi,
    timer::{
        complementary_pwm::{ComplementaryPwm, ComplementaryPwmPin},
        low_level::CountingMode,
        simple_pwm::PwmPin,
    },
};
use embassy_time::{Duration, Timer};

use board::{CurrentAdc, FaultPin, StatusLeds};
use encoder_tim::EncoderTimer;
use lan9252::Lan9252;
use motor_driver::MotorDriver;
use state::Inverter;
use tasks::{heartbeat_task, index_task, sequence_scan_task, speed_scan_task};

/// 速度スキャン用（シーケンスより高優先）
static EXECUTOR_SPEED: InterruptExecutor = InterruptExecutor::new();
/// シーケンススキャン用
static EXECUTOR_SEQUENCE: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn UART4() {
    EXECUTOR_SPEED.on_interrupt()
}

#[interrupt]
unsafe fn LPUART1() {
    EXECUTOR_SEQUENCE.on_interrupt()
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // ハードウェア初期化
    let clock_config = hardware::create_clock_config();
    let p = embassy_stm32::init(clock_config);

    info!("═══════════════════════════════════════════════════════════════════");
    info!("        EtherCAT Servo Inverter • STM32G431VB @ 170MHz");
    info!("═══════════════════════════════════════════════════════════════════");

    let drive = config::drive_config();
    info!(
        "Drive: pole pairs={}, encoder={} cpr, carrier={} Hz, mode={:?}",
        drive.motor.pole_pairs,
        drive.encoder.counts_per_rev,
        drive.timing.carrier_freq_hz,
        drive.reference_mode
    );

    // LED初期化（Low で点灯）
    let led_run = Output::new(p.PC13, Level::High, Speed::Low);
    let led_error = Output::new(p.PC14, Level::High, Speed::Low);
    let led_alive = Output::new(p.PC15, Level::High, Speed::Low);
    unwrap!(spawner.spawn(heartbeat_task(led_alive)));

    // PWM初期化（TIM1、3相相補PWM、中央揃え）
    let mut uvw_pwm = ComplementaryPwm::new(
        p.TIM1,
        Some(PwmPin::new(
            p.PE9,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        Some(ComplementaryPwmPin::new(
            p.PE8,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        Some(PwmPin::new(
            p.PE11,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        Some(ComplementaryPwmPin::new(
            p.PE10,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        Some(PwmPin::new(
            p.PE13,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        Some(ComplementaryPwmPin::new(
            p.PE12,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        None,
        None,
        config::pwm::CARRIER_FREQUENCY,
        CountingMode::CenterAlignedBothInterrupts,
    );
    uvw_pwm.set_dead_time(config::pwm::DEAD_TIME_CYCLES);
    let power = MotorDriver::new(uvw_pwm);
    info!("PWM max duty={}", power.max_duty());

    // ADC初期化（相電流 + 母線電圧）
    let mut adc1 = Adc::new(p.ADC1);
    adc1.set_sample_time(config::adc::SAMPLE_TIME);
    let mut adc2 = Adc::new(p.ADC2);
    adc2.set_sample_time(config::adc::SAMPLE_TIME);
    let adc = CurrentAdc::new(
        adc1,
        adc2,
        p.PA0.degrade_adc(),
        p.PA1.degrade_adc(),
        p.PA6.degrade_adc(),
        p.PC1.degrade_adc(),
    );

    // TIM3 エンコーダ初期化
    let counter = unsafe {
        encoder_tim::init_encoder_timer(drive.encoder.counts_per_rev);
        EncoderTimer::new()
    };
    info!("TIM3 encoder interface initialized");

    let fault = FaultPin::new(Input::new(p.PC7, Pull::Up));
    let indicator = StatusLeds::new(led_run, led_error);

    // LAN9252 初期化
    let mut spi_config = spi::Config::default();
    spi_config.frequency = config::esc::SPI_FREQUENCY;
    let esc_spi = spi::Spi::new_blocking(p.SPI2, p.PB13, p.PB15, p.PB14, spi_config);
    let esc_cs = Output::new(p.PB12, Level::High, Speed::VeryHigh);
    let mut esc = FieldbusSlaveRuntime::new(Lan9252::new(esc_spi, esc_cs));
    if let Err(e) = esc.init(SyncMode::DcSync) {
        error!("ESC initialization failed: {:?}", e);
        loop {
            Timer::after(Duration::from_secs(1)).await;
        }
    }

    // モーター状態を共有領域へ
    let mut ctx = MotorContext::new(&drive);
    ctx.encoder.reset_motion(counter.count());
    state::INVERTER.lock(|cell| {
        cell.replace(Some(Inverter {
            ctx,
            hw: InverterPeripherals {
                power,
                adc,
                counter,
                fault,
                indicator,
            },
        }));
    });

    // キャリア割り込み開始
    unsafe {
        hardware::init_carrier_interrupt();
    }

    // 速度スキャン（高優先）
    let speed_period = Duration::from_micros(drive.timing.speed_period_us as u64);
    interrupt::UART4.set_priority(Priority::P3);
    let speed_spawner = EXECUTOR_SPEED.start(interrupt::UART4);
    unwrap!(speed_spawner.spawn(speed_scan_task(esc, speed_period)));

    // シーケンススキャン
    let sequence_period = Duration::from_micros(drive.timing.sequence_period_us as u64);
    interrupt::LPUART1.set_priority(Priority::P5);
    let sequence_spawner = EXECUTOR_SEQUENCE.start(interrupt::LPUART1);
    unwrap!(sequence_spawner.spawn(sequence_scan_task(sequence_period)));

    // Z相入力
    let z_phase = ExtiInput::new(p.PB6, p.EXTI6, Pull::None);
    unwrap!(spawner.spawn(index_task(z_phase)));

    info!("Inverter runtime started");

    // メインループ（状態監視）
    loop {
        Timer::after(Duration::from_secs(1)).await;
        if let Some((op_state, calibrated)) =
            state::with_inverter(|inv| (inv.ctx.state(), inv.ctx.encoder.is_calibrated()))
        {
            debug!("state={:?}, index captured={}", op_state, calibrated);
        }
    }
}
