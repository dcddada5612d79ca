//! Common types and data structures used across the CoinVend application
//!
//! This module contains the vending machine data model shared by the
//! shared-state owner, the tasks and the persistence layer.

use core::fmt;
use core::ops::{Add, Sub};

use crate::config::{MAX_CREDIT, SLOT_COUNT, SLOT_NAMES};

/// Temperature in degrees Celsius
pub type Celsius = fixed::types::I16F16;

// ===================================================================
// Money
// ===================================================================

/// Fixed-point currency, counted in cents
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(u32);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: u32) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> u32 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub fn saturating_sub(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0))
    }

    /// Parse a dollar amount such as `2.50`, `2.5`, `2` or `.75`.
    ///
    /// At most two fractional digits are accepted; anything else,
    /// including an empty string or a lone `.`, is rejected.
    pub fn parse(text: &str) -> Option<Money> {
        let (whole, frac) = match text.split_once('.') {
            Some((whole, frac)) => (whole, Some(frac)),
            None => (text, None),
        };

        if whole.is_empty() && frac.map_or(true, str::is_empty) {
            return None;
        }

        let mut cents: u32 = 0;
        for digit in whole.bytes() {
            if !digit.is_ascii_digit() {
                return None;
            }
            cents = cents.checked_mul(10)?.checked_add(u32::from(digit - b'0'))?;
        }
        cents = cents.checked_mul(100)?;

        if let Some(frac) = frac {
            if frac.len() > 2 {
                return None;
            }
            let mut scale = 10;
            for digit in frac.bytes() {
                if !digit.is_ascii_digit() {
                    return None;
                }
                cents = cents.checked_add(u32::from(digit - b'0') * scale)?;
                scale /= 10;
            }
        }

        Some(Money(cents))
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Money {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}.{}{}", self.0 / 100, (self.0 % 100) / 10, self.0 % 10)
    }
}

// ===================================================================
// Drink Slots and Machine State
// ===================================================================

/// One drink type loaded in the machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DrinkSlot {
    /// Short label shown on the LCD and console
    pub name: &'static str,
    /// Unit price
    pub price: Money,
    /// Bottles left
    pub stock: u16,
}

impl DrinkSlot {
    pub const fn empty(name: &'static str) -> Self {
        Self {
            name,
            price: Money::ZERO,
            stock: 0,
        }
    }

    /// First letter of the name, used as the console key for this slot
    pub fn key(&self) -> char {
        self.name.chars().next().unwrap_or('?')
    }
}

/// Why a credit insertion was refused
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CreditOverflow;

/// Why a sale was refused
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VendRefusal {
    NoSuchSlot,
    InsufficientCredit,
    OutOfStock,
}

/// Everything the vending machine knows about itself
///
/// Owned by [`crate::machine::Machine`]; tasks only ever see copies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MachineState {
    pub slots: [DrinkSlot; SLOT_COUNT],
    /// Revenue collected from sales
    pub balance: Money,
    /// Money inserted by the current customer
    pub credit: Money,
    /// Time since power-up, advanced by the clock task
    pub elapsed_ms: u64,
    /// `elapsed_ms` at the last successful sale
    pub last_transaction_ms: Option<u64>,
    /// A technician is using the service console
    pub servicing: bool,
}

impl MachineState {
    /// Factory state: every slot empty and unpriced, no money held
    pub const fn new() -> Self {
        let mut slots = [DrinkSlot::empty(""); SLOT_COUNT];
        let mut i = 0;
        while i < SLOT_COUNT {
            slots[i] = DrinkSlot::empty(SLOT_NAMES[i]);
            i += 1;
        }

        Self {
            slots,
            balance: Money::ZERO,
            credit: Money::ZERO,
            elapsed_ms: 0,
            last_transaction_ms: None,
            servicing: false,
        }
    }

    /// Add inserted money, refusing anything that would pass the ceiling
    pub fn add_credit(&mut self, amount: Money) -> Result<(), CreditOverflow> {
        match self.credit.checked_add(amount) {
            Some(credit) if credit <= MAX_CREDIT => {
                self.credit = credit;
                Ok(())
            }
            _ => Err(CreditOverflow),
        }
    }

    /// Sell one bottle from `slot`, returning its price.
    ///
    /// Leaves the state untouched on refusal.
    pub fn sell(&mut self, slot: usize) -> Result<Money, VendRefusal> {
        let drink = self.slots.get_mut(slot).ok_or(VendRefusal::NoSuchSlot)?;

        if self.credit < drink.price {
            return Err(VendRefusal::InsufficientCredit);
        }
        if drink.stock == 0 {
            return Err(VendRefusal::OutOfStock);
        }

        drink.stock -= 1;
        self.balance = self.balance + drink.price;
        self.credit = self.credit - drink.price;
        Ok(drink.price)
    }

    /// Milliseconds since the last sale, if there has been one
    pub fn since_last_transaction_ms(&self) -> Option<u64> {
        self.last_transaction_ms
            .map(|at| self.elapsed_ms.saturating_sub(at))
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::new()
    }
}

// ===================================================================
// UI Symbols
// ===================================================================

/// Transition requests consumed by the UI controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UiSymbol {
    Idle,
    ShowSelection,
    ShowCredit,
    Cycle,
    AddQuarter,
    ClearCredit,
    MaxCredit,
    TryVend,
    VendSuccess,
    VendFail,
    TemperatureFault,
    Servicing,
    /// The serial EEPROM stopped answering
    StorageFault,
}

/// Application version information
pub struct AppVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl AppVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self { major, minor, patch }
    }
}

/// Current application version
pub const APP_VERSION: AppVersion = AppVersion::new(0, 1, 0);
