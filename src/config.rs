//! Hardware and machine configuration for CoinVend
//! RP2040-based coin-operated vending machine controller

use crate::types::{Celsius, Money};

// ===================================================================
// Drink Catalogue
// ===================================================================

pub const SLOT_COUNT: usize = 4; // Number of drink slots
pub const SLOT_NAMES: [&str; SLOT_COUNT] = ["BEER", "MILK", "ICET", "COKE"];

// ===================================================================
// Money Limits
// ===================================================================

pub const QUARTER: Money = Money::from_cents(25); // Value of one coin
pub const MAX_CREDIT: Money = Money::from_cents(500); // Customer credit ceiling
pub const MAX_PRICE: Money = Money::from_cents(500); // Highest price a technician may set
pub const MAX_STOCK_DELTA: u16 = 99; // Largest single restock

// ===================================================================
// Task Timing
// ===================================================================

pub const POLL_PERIOD_MS: u32 = 100; // Input poll period
pub const IDLE_THRESHOLD_TICKS: u16 = (3000 / POLL_PERIOD_MS) as u16; // 3s without input
pub const VEND_IDLE_HEAD_START_TICKS: u16 = (1000 / POLL_PERIOD_MS) as u16; // vend screens stay 2s
pub const HOLD_REPEAT_TICKS: u16 = (250 / POLL_PERIOD_MS) as u16; // held button repeat delay

pub const TICK_PERIOD_MS: u32 = 100; // Clock task period
pub const LIVENESS_TOGGLE_TICKS: u32 = 1000 / 2 / TICK_PERIOD_MS; // heartbeat LED toggles at 2Hz
pub const STATUS_REPORT_TICKS: u32 = 60_000 / TICK_PERIOD_MS; // status log once a minute

pub const SERVICE_GOODBYE_MS: u32 = 1000; // Pause on leaving the service console

// ===================================================================
// Queues
// ===================================================================

pub const UI_QUEUE_DEPTH: usize = 4; // UI symbols in flight
pub const CONSOLE_QUEUE_DEPTH: usize = 16; // Received console bytes in flight
pub const LINE_CAPACITY: usize = 7; // Printable characters per console command

// ===================================================================
// Temperature
// ===================================================================

pub const ADC_FULL_SCALE: i32 = 4095; // 12-bit RP2040 ADC
pub const SENSOR_MILLI_C_AT_ZERO: i32 = -7_000; // Sensor output at code 0
pub const SENSOR_MILLI_C_SPAN: i32 = 27_000; // -7C .. +20C over full scale
pub const TEMPERATURE_MIN: Celsius = Celsius::from_bits(0); // 0C
pub const TEMPERATURE_MAX: Celsius = Celsius::from_bits(8 << 16); // 8C

// ===================================================================
// Serial EEPROM (25LC256)
// ===================================================================

pub const NVM_SIZE: u32 = 0x8000; // 32 KiB
pub const NVM_PAGE_SIZE: u16 = 64; // Write page size
pub const NVM_BUSY_POLL_LIMIT: u32 = 200; // Status polls before giving up
pub const NVM_BUSY_POLL_INTERVAL_US: u32 = 50; // 200 x 50us = twice the 5ms write cycle
pub const NVM_SPI_FREQUENCY: u32 = 2_000_000; // 2MHz SPI clock

// ===================================================================
// Display
// ===================================================================

pub const LCD_COLUMNS: usize = 16; // Character cells per line
pub const LCD_ROWS: usize = 2; // Character lines
pub const DISPLAY_SPI_FREQUENCY: u32 = 10_000_000; // 10MHz SPI clock
pub const DISPLAY_WIDTH: u32 = 160; // ST7735 landscape width
pub const DISPLAY_HEIGHT: u32 = 128; // ST7735 landscape height

// ===================================================================
// Service Console
// ===================================================================

pub const CONSOLE_BAUD: u32 = 115_200;

// ===================================================================
// GPIO Pin Assignments - Raspberry Pi Pico
// ===================================================================

// Push buttons (active low, internal pull-ups)
pub const BTN_CYCLE_PIN: u8 = 2;
pub const BTN_ADD_CREDIT_PIN: u8 = 3;
pub const BTN_VEND_PIN: u8 = 4;

// Console UART0
pub const UART_TX_PIN: u8 = 0;
pub const UART_RX_PIN: u8 = 1;

// Serial EEPROM on SPI1
pub const NVM_SCK_PIN: u8 = 10;
pub const NVM_MOSI_PIN: u8 = 11;
pub const NVM_MISO_PIN: u8 = 12;
pub const NVM_CS_PIN: u8 = 13;

// Display on SPI0
pub const SPI_SCK_PIN: u8 = 18;
pub const SPI_MOSI_PIN: u8 = 19;
pub const DISPLAY_CS_PIN: u8 = 8;
pub const DISPLAY_DC_PIN: u8 = 14;
pub const DISPLAY_RST_PIN: u8 = 15;
pub const DISPLAY_BL_PIN: u8 = 17;

// Temperature sensor on ADC0
pub const TEMPERATURE_ADC_PIN: u8 = 26;

// Status LEDs
pub const LED_HEARTBEAT_PIN: u8 = 25; // Built-in LED on Pico
pub const LED_IDLE_PIN: u8 = 20; // Toggled by the load loop
pub const LED_FAULT_PIN: u8 = 21; // Fault indication

// Watchdog
pub const WATCHDOG_TIMEOUT_MS: u64 = 1_000;
