//! Hardware abstraction and initialization
//!
//! Wires the Raspberry Pi Pico peripherals to the device-independent tasks:
//! concrete adapter types for the buttons, temperature sensor, console UART,
//! EEPROM and TFT, and the `embassy_executor` task wrappers the firmware
//! spawns.

use embassy_rp::adc::{self, Adc};
use embassy_rp::gpio::{Input, Output};
use embassy_rp::interrupt::{self, InterruptExt, Priority};
use embassy_rp::peripherals::{SPI0, SPI1};
use embassy_rp::spi::{self, Blocking, Spi};
use embassy_rp::uart::{self, Uart};
use embassy_time::Delay;
use embedded_hal_bus::spi::ExclusiveDevice;
use st7735_lcd::{Orientation, ST7735};

use crate::buttons::{Button, ButtonPanel, InputPoller, TemperatureSensor};
use crate::channels::{ConsoleQueue, CONSOLE_QUEUE, SERVICING_ACK, TEMPERATURE, UI_QUEUE};
use crate::config::*;
use crate::console::{ConsoleSink, ServiceConsole};
use crate::display::TftCharDisplay;
use crate::heartbeat::Heartbeat;
use crate::machine::Machine;
use crate::nvm::Eeprom;
use crate::supervisor::AppSupervisor;
use crate::ui::UiController;

// ===================================================================
// Board Types
// ===================================================================

pub type NvmSpi = ExclusiveDevice<Spi<'static, SPI1, Blocking>, Output<'static>, Delay>;
pub type BoardEeprom = Eeprom<NvmSpi, Delay>;
pub type BoardMachine = Machine<'static, BoardEeprom>;

pub type LcdSpi = ExclusiveDevice<Spi<'static, SPI0, Blocking>, Output<'static>, Delay>;
pub type Lcd = ST7735<LcdSpi, Output<'static>, Output<'static>>;
pub type BoardDisplay = TftCharDisplay<Lcd>;

/// SPI mode 0 at `frequency`
pub fn spi_config(frequency: u32) -> spi::Config {
    let mut config = spi::Config::default();
    config.frequency = frequency;
    config.phase = spi::Phase::CaptureOnFirstTransition;
    config.polarity = spi::Polarity::IdleLow;
    config
}

pub fn console_config() -> uart::Config {
    let mut config = uart::Config::default();
    config.baudrate = CONSOLE_BAUD;
    config
}

/// EEPROM on SPI1 with a dedicated chip select
pub fn eeprom(spi: Spi<'static, SPI1, Blocking>, cs: Output<'static>) -> BoardEeprom {
    let device = match ExclusiveDevice::new(spi, cs, Delay) {
        Ok(device) => device,
        Err(never) => match never {},
    };
    Eeprom::new(device, Delay)
}

/// ST7735 on SPI0, initialised in landscape and cleared
pub fn display(
    spi: Spi<'static, SPI0, Blocking>,
    cs: Output<'static>,
    dc: Output<'static>,
    rst: Output<'static>,
) -> BoardDisplay {
    let device = match ExclusiveDevice::new(spi, cs, Delay) {
        Ok(device) => device,
        Err(never) => match never {},
    };

    info!("Initializing display ({}x{})", DISPLAY_WIDTH, DISPLAY_HEIGHT);
    let mut lcd = ST7735::new(device, dc, rst, true, false, DISPLAY_WIDTH, DISPLAY_HEIGHT);
    if lcd.init(&mut Delay).is_err() {
        error!("Display init failed");
    }
    if lcd.set_orientation(&Orientation::Landscape).is_err() {
        warn!("Display orientation not applied");
    }

    TftCharDisplay::new(lcd)
}

// ===================================================================
// Device Adapters
// ===================================================================

/// Three active-low push buttons with pull-ups
pub struct PanelPins {
    pub cycle: Input<'static>,
    pub add_credit: Input<'static>,
    pub vend: Input<'static>,
}

impl ButtonPanel for PanelPins {
    fn is_low(&mut self, button: Button) -> bool {
        match button {
            Button::Cycle => self.cycle.is_low(),
            Button::AddCredit => self.add_credit.is_low(),
            Button::Vend => self.vend.is_low(),
        }
    }
}

/// Cabinet sensor on an ADC input
pub struct AdcSensor {
    adc: Adc<'static, adc::Blocking>,
    channel: adc::Channel<'static>,
}

impl AdcSensor {
    pub fn new(adc: Adc<'static, adc::Blocking>, channel: adc::Channel<'static>) -> Self {
        Self { adc, channel }
    }
}

impl TemperatureSensor for AdcSensor {
    // A failed conversion reads as code 0, well below the safe band
    fn read_code(&mut self) -> u16 {
        match self.adc.blocking_read(&mut self.channel) {
            Ok(code) => code,
            Err(_) => {
                warn!("ADC conversion failed");
                0
            }
        }
    }
}

/// Console transmitter. Reception is interrupt driven, see [`drain_console_rx`].
pub struct UartSink(Uart<'static, uart::Blocking>);

impl UartSink {
    pub fn new(uart: Uart<'static, uart::Blocking>) -> Self {
        Self(uart)
    }
}

impl ConsoleSink for UartSink {
    fn write_bytes(&mut self, bytes: &[u8]) {
        if self.0.blocking_write(bytes).is_err() {
            warn!("Console write failed");
        }
    }
}

// ===================================================================
// Console Receive Interrupt
// ===================================================================

/// Unmask the UART0 receive and receive-timeout interrupts at top priority
pub fn enable_console_rx_interrupt() {
    embassy_rp::pac::UART0.uartimsc().modify(|w| {
        w.set_rxim(true);
        w.set_rtim(true);
    });
    interrupt::UART0_IRQ.set_priority(Priority::P0);
    // SAFETY: the handler only touches the RX FIFO and the console mailbox
    unsafe { interrupt::UART0_IRQ.enable() };
}

/// Move every byte waiting in the UART0 RX FIFO into `queue`.
///
/// Called from the UART0 interrupt; never blocks.
pub fn drain_console_rx(queue: &ConsoleQueue) {
    let uart = embassy_rp::pac::UART0;
    while !uart.uartfr().read().rxfe() {
        let byte = uart.uartdr().read().data();
        queue.post(byte);
    }
}

// ===================================================================
// Tasks
// ===================================================================

/// Customer screen
#[embassy_executor::task]
pub async fn ui_task(machine: &'static BoardMachine, display: BoardDisplay, _backlight: Output<'static>) {
    UiController::new(machine, &UI_QUEUE, &SERVICING_ACK, display)
        .run()
        .await
}

/// Buttons and temperature
#[embassy_executor::task]
pub async fn poll_task(panel: PanelPins, sensor: AdcSensor) {
    InputPoller::new(panel, sensor, Delay, &UI_QUEUE, &TEMPERATURE)
        .run()
        .await
}

/// Technician menu on UART0
#[embassy_executor::task]
pub async fn console_task(machine: &'static BoardMachine, sink: UartSink) {
    ServiceConsole::new(
        machine,
        &UI_QUEUE,
        &SERVICING_ACK,
        &CONSOLE_QUEUE,
        &TEMPERATURE,
        sink,
        Delay,
    )
    .run()
    .await
}

/// Clock and heartbeat LED
#[embassy_executor::task]
pub async fn heartbeat_task(machine: &'static BoardMachine, led: Output<'static>) {
    let supervisor = AppSupervisor::new(&UI_QUEUE, &CONSOLE_QUEUE);
    Heartbeat::new(machine, supervisor, led, Delay).run().await
}
