//! CoinVend - Coin-operated vending machine controller for RP2040
//!
//! Firmware library for a four-slot refrigerated drink vending machine
//! using the Embassy async framework.
//!
//! ## Tasks
//! - **Clock**: advances elapsed time, blinks the heartbeat LED
//! - **Console**: VT100 technician menu on UART0
//! - **UI**: customer screen state machine on a 16x2 character grid
//! - **Poll**: push buttons and cabinet temperature
//!
//! ## Architecture
//! - **Shared state**: one async mutex around the machine state, mutated
//!   only through a closed set of operations
//! - **Persistence**: changed cells are written to a 25LC256 SPI EEPROM
//! - **Channels**: bounded, non-blocking mailboxes between tasks
//! - **Host testable**: everything outside [`hardware`] is generic over
//!   `embedded-hal` traits and builds without the `rp2040` feature

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod buttons;
pub mod channels;
pub mod config;
pub mod console;
pub mod display;
pub mod heartbeat;
pub mod machine;
pub mod nvm;
pub mod supervisor;
pub mod types;
pub mod ui;

#[cfg(feature = "rp2040")]
pub mod hardware;
