//! Inter-task communication channels
//!
//! This module defines all the Embassy channels and shared cells used for
//! communication between the tasks of the CoinVend application.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_sync::signal::Signal;
use portable_atomic::{AtomicU32, Ordering};

use crate::config::{CONSOLE_QUEUE_DEPTH, UI_QUEUE_DEPTH};
use crate::types::{Celsius, UiSymbol};

// ===================================================================
// Mailbox
// ===================================================================

/// Bounded FIFO that never blocks the sender.
///
/// When full, the newest item is dropped and counted.
pub struct Mailbox<T, const N: usize> {
    channel: Channel<CriticalSectionRawMutex, T, N>,
    dropped: AtomicU32,
}

impl<T, const N: usize> Mailbox<T, N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Queue `item`, returning false if it was dropped
    pub fn post(&self, item: T) -> bool {
        match self.channel.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("Mailbox full, dropped item ({} total)", total);
                false
            }
        }
    }

    /// Wait for the oldest item
    pub async fn receive(&self) -> T {
        self.channel.receive().await
    }

    pub fn try_receive(&self) -> Option<T> {
        self.channel.try_receive().ok()
    }

    /// Number of items dropped since boot
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }
}

impl<T, const N: usize> Default for Mailbox<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Transition requests for the UI controller
pub type UiQueue = Mailbox<UiSymbol, UI_QUEUE_DEPTH>;

/// Bytes received on the service console UART
pub type ConsoleQueue = Mailbox<u8, CONSOLE_QUEUE_DEPTH>;

/// Raised by the UI once the servicing screen is up
pub type ServicingAck = Signal<CriticalSectionRawMutex, ()>;

/// UI symbol mailbox, posted by the poll task, console and shared machine
pub static UI_QUEUE: UiQueue = Mailbox::new();

/// Console byte mailbox, posted by the UART receive interrupt
pub static CONSOLE_QUEUE: ConsoleQueue = Mailbox::new();

/// Servicing acknowledgement from the UI to the console
pub static SERVICING_ACK: ServicingAck = Signal::new();

// ===================================================================
// Temperature Cell
// ===================================================================

/// Latest temperature reading, shared between the poll task and the console
pub struct TemperatureCell {
    inner: BlockingMutex<CriticalSectionRawMutex, Cell<Option<Celsius>>>,
}

impl TemperatureCell {
    pub const fn new() -> Self {
        Self {
            inner: BlockingMutex::new(Cell::new(None)),
        }
    }

    pub fn publish(&self, reading: Celsius) {
        self.inner.lock(|cell| cell.set(Some(reading)));
    }

    /// `None` until the first sample has been taken
    pub fn latest(&self) -> Option<Celsius> {
        self.inner.lock(Cell::get)
    }
}

impl Default for TemperatureCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Temperature reading shared by the poll task
pub static TEMPERATURE: TemperatureCell = TemperatureCell::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_drops_newest_when_full() {
        let mailbox: Mailbox<u8, 2> = Mailbox::new();
        assert!(mailbox.post(1));
        assert!(mailbox.post(2));
        assert!(!mailbox.post(3));
        assert!(!mailbox.post(4));
        assert_eq!(mailbox.dropped(), 2);

        assert_eq!(mailbox.try_receive(), Some(1));
        assert_eq!(mailbox.try_receive(), Some(2));
        assert_eq!(mailbox.try_receive(), None);
    }

    #[test]
    fn mailbox_receives_in_order() {
        let mailbox: Mailbox<UiSymbol, 4> = Mailbox::new();
        mailbox.post(UiSymbol::Cycle);
        mailbox.post(UiSymbol::ShowCredit);

        embassy_futures::block_on(async {
            assert_eq!(mailbox.receive().await, UiSymbol::Cycle);
            assert_eq!(mailbox.receive().await, UiSymbol::ShowCredit);
        });
        assert!(mailbox.is_empty());
    }

    #[test]
    fn temperature_cell_keeps_latest() {
        let cell = TemperatureCell::new();
        assert_eq!(cell.latest(), None);
        cell.publish(Celsius::from_num(4));
        cell.publish(Celsius::from_num(5));
        assert_eq!(cell.latest(), Some(Celsius::from_num(5)));
    }
}
