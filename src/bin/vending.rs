//! CoinVend firmware entry point
//!
//! Restores the machine record, starts one interrupt executor per task
//! priority and then spends thread mode feeding the watchdog. Anything that
//! keeps the CPU away from the load loop for too long resets the board.
//!
//! Priorities, highest first: UART0 RX, Clock, Console, UI, Poll.

#![no_std]
#![no_main]

use coinvend::channels::{CONSOLE_QUEUE, UI_QUEUE};
use coinvend::config::*;
use coinvend::hardware::{self, AdcSensor, BoardMachine, PanelPins, UartSink};
use coinvend::machine::Machine;
use coinvend::supervisor::{force_safe_pattern, show_watchdog_reset, AppSupervisor};
use cortex_m_rt::entry;
use defmt::*;
use defmt_rtt as _; // global logger
use embassy_executor::{InterruptExecutor, SpawnError};
use embassy_rp::adc::{self, Adc};
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::interrupt::{self, InterruptExt, Priority};
use embassy_rp::spi::Spi;
use embassy_rp::uart::Uart;
use embassy_rp::watchdog::{ResetReason, Watchdog};
use embassy_time::Duration;
use panic_halt as _;
use static_cell::StaticCell;

// ===================================================================
// Executors
// ===================================================================

static EXECUTOR_CLOCK: InterruptExecutor = InterruptExecutor::new();
static EXECUTOR_CONSOLE: InterruptExecutor = InterruptExecutor::new();
static EXECUTOR_UI: InterruptExecutor = InterruptExecutor::new();
static EXECUTOR_POLL: InterruptExecutor = InterruptExecutor::new();

static MACHINE: StaticCell<BoardMachine> = StaticCell::new();

#[interrupt]
unsafe fn SWI_IRQ_0() {
    EXECUTOR_CLOCK.on_interrupt()
}

#[interrupt]
unsafe fn SWI_IRQ_1() {
    EXECUTOR_CONSOLE.on_interrupt()
}

#[interrupt]
unsafe fn SWI_IRQ_2() {
    EXECUTOR_UI.on_interrupt()
}

#[interrupt]
unsafe fn SWI_IRQ_3() {
    EXECUTOR_POLL.on_interrupt()
}

#[interrupt]
fn UART0_IRQ() {
    hardware::drain_console_rx(&CONSOLE_QUEUE);
}

// ===================================================================
// Main Application Entry Point
// ===================================================================

#[entry]
fn main() -> ! {
    let p = embassy_rp::init(Default::default());

    let supervisor = AppSupervisor::new(&UI_QUEUE, &CONSOLE_QUEUE);
    supervisor.print_startup_banner();

    let mut leds = [
        Output::new(p.PIN_25, Level::Low),
        Output::new(p.PIN_20, Level::Low),
        Output::new(p.PIN_21, Level::Low),
    ];

    // A starved load loop shows up as every LED lit at boot; the fault LED
    // keeps it visible once the tasks take over the others
    let mut watchdog = Watchdog::new(p.WATCHDOG);
    let timed_out = matches!(watchdog.reset_reason(), Some(ResetReason::TimedOut));
    show_watchdog_reset(timed_out, &mut leds);
    let [heartbeat_led, mut idle_led, fault_led] = leds;
    let mut heartbeat_led = Some(heartbeat_led);

    // Persistent record
    let nvm_spi = Spi::new_blocking(
        p.SPI1,
        p.PIN_10,
        p.PIN_11,
        p.PIN_12,
        hardware::spi_config(NVM_SPI_FREQUENCY),
    );
    let mut eeprom = hardware::eeprom(nvm_spi, Output::new(p.PIN_13, Level::High));
    if let Err(e) = eeprom.initialize() {
        error!("EEPROM not responding: {}", e);
    }

    let machine: &'static BoardMachine = MACHINE.init(Machine::new(eeprom, &UI_QUEUE));
    if let Err(e) = embassy_futures::block_on(machine.restore()) {
        warn!("Running without a restored record: {}", e);
    }
    supervisor.print_init_success(&embassy_futures::block_on(machine.get()));

    // Customer screen
    let lcd_spi = Spi::new_blocking_txonly(
        p.SPI0,
        p.PIN_18,
        p.PIN_19,
        hardware::spi_config(DISPLAY_SPI_FREQUENCY),
    );
    let display = hardware::display(
        lcd_spi,
        Output::new(p.PIN_8, Level::High),
        Output::new(p.PIN_14, Level::Low),
        Output::new(p.PIN_15, Level::High),
    );
    let backlight = Output::new(p.PIN_17, Level::High);

    // Inputs
    let panel = PanelPins {
        cycle: Input::new(p.PIN_2, Pull::Up),
        add_credit: Input::new(p.PIN_3, Pull::Up),
        vend: Input::new(p.PIN_4, Pull::Up),
    };
    let sensor = AdcSensor::new(
        Adc::new_blocking(p.ADC, adc::Config::default()),
        adc::Channel::new_pin(p.PIN_26, Pull::None),
    );

    // Service console
    let uart = Uart::new_blocking(p.UART0, p.PIN_0, p.PIN_1, hardware::console_config());
    let console = UartSink::new(uart);

    if let Err(e) = start_tasks(machine, &mut heartbeat_led, console, display, backlight, panel, sensor) {
        error!("Task start failed: {}", e);
        let mut indicators = [Some(idle_led), Some(fault_led), heartbeat_led];
        force_safe_pattern(indicators.iter_mut().flatten());
        loop {
            cortex_m::asm::wfi();
        }
    }

    hardware::enable_console_rx_interrupt();
    info!("All tasks running");

    // Load loop: lowest priority, never yields
    watchdog.start(Duration::from_millis(WATCHDOG_TIMEOUT_MS));
    loop {
        watchdog.feed();
        idle_led.toggle();
    }
}

/// Start each executor at its priority and spawn its task.
///
/// UI and Poll share a level; the lower IRQ number (UI) is served first.
/// The clock goes last so the heartbeat LED stays with the caller for the
/// fault pattern if an earlier spawn fails.
fn start_tasks(
    machine: &'static BoardMachine,
    heartbeat_led: &mut Option<Output<'static>>,
    console: UartSink,
    display: hardware::BoardDisplay,
    backlight: Output<'static>,
    panel: PanelPins,
    sensor: AdcSensor,
) -> Result<(), SpawnError> {
    interrupt::SWI_IRQ_1.set_priority(Priority::P2);
    let spawner = EXECUTOR_CONSOLE.start(interrupt::SWI_IRQ_1);
    spawner.spawn(hardware::console_task(machine, console))?;

    interrupt::SWI_IRQ_2.set_priority(Priority::P3);
    let spawner = EXECUTOR_UI.start(interrupt::SWI_IRQ_2);
    spawner.spawn(hardware::ui_task(machine, display, backlight))?;

    interrupt::SWI_IRQ_3.set_priority(Priority::P3);
    let spawner = EXECUTOR_POLL.start(interrupt::SWI_IRQ_3);
    spawner.spawn(hardware::poll_task(panel, sensor))?;

    if let Some(led) = heartbeat_led.take() {
        interrupt::SWI_IRQ_0.set_priority(Priority::P1);
        let spawner = EXECUTOR_CLOCK.start(interrupt::SWI_IRQ_0);
        spawner.spawn(hardware::heartbeat_task(machine, led))?;
    }

    Ok(())
}
