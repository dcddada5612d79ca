//! Shared machine state
//!
//! One [`Machine`] owns the authoritative [`MachineState`] and the
//! persistent store behind a single async mutex. Tasks read whole copies
//! with [`Machine::get`] and change it only through the closed set of
//! [`Operation`]s, so every mutation is atomic with respect to the others.
//! Symbols that an operation produces are posted while the lock is held.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;

use crate::channels::UiQueue;
use crate::config::{MAX_CREDIT, SLOT_COUNT};
use crate::nvm::{CellStore, NvmError};
use crate::types::{MachineState, Money, UiSymbol, VendRefusal};

/// Every mutation the tasks may request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Operation {
    SetServicing(bool),
    ClearCredit,
    /// Insert money; posts `MaxCredit` when it would pass the ceiling
    AddCredit(Money),
    /// Posts `VendSuccess` or `VendFail`
    SellDrink(usize),
    RecordTransactionTime,
    AdvanceTime(u32),
    EmptyBalance,
    SetPrice { slot: usize, price: Money },
    AddStock { slot: usize, count: u16 },
}

// ===================================================================
// Persistent Record Layout
// ===================================================================

/// Cells in the persisted record: balance, credit, then price and stock per slot
pub const RECORD_CELLS: usize = 2 + 2 * SLOT_COUNT;

const CELL_BALANCE: usize = 0;
const CELL_CREDIT: usize = 1;
const ERASED_CELL: u16 = 0xFFFF;
/// Largest amount a money cell holds; one below the erased pattern
const MONEY_CELL_MAX: u16 = ERASED_CELL - 1;

/// Byte address of record cell `index`
pub const fn cell_address(index: usize) -> u16 {
    (index * 2) as u16
}

const fn price_cell(slot: usize) -> usize {
    2 + slot * 2
}

const fn stock_cell(slot: usize) -> usize {
    3 + slot * 2
}

fn money_to_cell(amount: Money) -> u16 {
    u16::try_from(amount.cents()).map_or(MONEY_CELL_MAX, |cents| cents.min(MONEY_CELL_MAX))
}

fn encode(state: &MachineState) -> [u16; RECORD_CELLS] {
    let mut cells = [0u16; RECORD_CELLS];
    cells[CELL_BALANCE] = money_to_cell(state.balance);
    cells[CELL_CREDIT] = money_to_cell(state.credit);
    for (slot, drink) in state.slots.iter().enumerate() {
        cells[price_cell(slot)] = money_to_cell(drink.price);
        cells[stock_cell(slot)] = drink.stock;
    }
    cells
}

/// Load cells into `state`. Erased cells keep the value already there.
fn decode(cells: &[u16; RECORD_CELLS], state: &mut MachineState) {
    let restored = |index: usize| Some(cells[index]).filter(|cell| *cell != ERASED_CELL);

    if let Some(balance) = restored(CELL_BALANCE) {
        state.balance = Money::from_cents(u32::from(balance));
    }
    if let Some(credit) = restored(CELL_CREDIT) {
        let credit = Money::from_cents(u32::from(credit));
        if credit <= MAX_CREDIT {
            state.credit = credit;
        } else {
            warn!("Discarding stored credit {} above the maximum", credit);
        }
    }
    for (slot, drink) in state.slots.iter_mut().enumerate() {
        if let Some(price) = restored(price_cell(slot)) {
            drink.price = Money::from_cents(u32::from(price));
        }
        if let Some(stock) = restored(stock_cell(slot)) {
            drink.stock = stock;
        }
    }
}

// ===================================================================
// Machine
// ===================================================================

struct Inner<S> {
    state: MachineState,
    store: S,
    /// Last value known to be on the device, per cell
    shadow: [Option<u16>; RECORD_CELLS],
    /// First store error; latched until reboot
    fault: Option<NvmError>,
}

pub struct Machine<'a, S> {
    inner: Mutex<CriticalSectionRawMutex, Inner<S>>,
    ui: &'a UiQueue,
}

impl<'a, S: CellStore> Machine<'a, S> {
    /// Factory state backed by `store`, reporting to `ui`
    pub fn new(store: S, ui: &'a UiQueue) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: MachineState::new(),
                store,
                shadow: [None; RECORD_CELLS],
                fault: None,
            }),
            ui,
        }
    }

    /// Copy of the whole state
    pub async fn get(&self) -> MachineState {
        self.inner.lock().await.state
    }

    pub async fn apply(&self, operation: Operation) {
        let mut inner = self.inner.lock().await;
        let state = &mut inner.state;

        match operation {
            Operation::SetServicing(on) => state.servicing = on,
            Operation::ClearCredit => state.credit = Money::ZERO,
            Operation::AddCredit(amount) => {
                if state.add_credit(amount).is_err() {
                    debug!("Credit ceiling reached at {}", state.credit);
                    self.ui.post(UiSymbol::MaxCredit);
                }
            }
            Operation::SellDrink(slot) => match state.sell(slot) {
                Ok(price) => {
                    info!("Sold slot {} for {}", slot, price);
                    self.ui.post(UiSymbol::VendSuccess);
                }
                Err(VendRefusal::NoSuchSlot) => warn!("Sale requested for unknown slot {}", slot),
                Err(_) => {
                    debug!("Sale refused for slot {}", slot);
                    self.ui.post(UiSymbol::VendFail);
                }
            },
            Operation::RecordTransactionTime => {
                state.last_transaction_ms = Some(state.elapsed_ms);
            }
            Operation::AdvanceTime(ms) => {
                state.elapsed_ms = state.elapsed_ms.saturating_add(u64::from(ms));
            }
            Operation::EmptyBalance => {
                info!("Balance {} emptied", state.balance);
                state.balance = Money::ZERO;
            }
            Operation::SetPrice { slot, price } => match state.slots.get_mut(slot) {
                Some(drink) => drink.price = price,
                None => warn!("Price change for unknown slot {}", slot),
            },
            Operation::AddStock { slot, count } => match state.slots.get_mut(slot) {
                Some(drink) => drink.stock = drink.stock.saturating_add(count),
                None => warn!("Restock for unknown slot {}", slot),
            },
        }
    }

    /// Store error seen by [`persist`](Self::persist) or [`restore`](Self::restore), if any
    pub async fn storage_fault(&self) -> Option<NvmError> {
        self.inner.lock().await.fault
    }

    /// Write the record, skipping cells that already hold the current value.
    ///
    /// The first store error posts `StorageFault` and latches. From then on
    /// the store is left alone and the latched error is returned.
    pub async fn persist(&self) -> Result<(), NvmError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if let Some(fault) = inner.fault {
            return Err(fault);
        }
        let cells = encode(&inner.state);

        for (index, value) in cells.iter().enumerate() {
            if inner.shadow[index] == Some(*value) {
                continue;
            }
            let address = cell_address(index);
            if let Err(e) = inner.store.write_cell(address, *value) {
                error!("Persist failed at cell {=u16}: {}", address, e);
                inner.fault = Some(e);
                self.ui.post(UiSymbol::StorageFault);
                return Err(e);
            }
            inner.shadow[index] = Some(*value);
        }
        Ok(())
    }

    /// Load the record from the store.
    ///
    /// Erased cells keep the factory value.
    pub async fn restore(&self) -> Result<(), NvmError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let mut cells = [0u16; RECORD_CELLS];
        for (index, cell) in cells.iter_mut().enumerate() {
            match inner.store.read_cell(cell_address(index)) {
                Ok(value) => *cell = value,
                Err(e) => {
                    error!("Restore failed at cell {=u16}: {}", cell_address(index), e);
                    inner.fault = Some(e);
                    self.ui.post(UiSymbol::StorageFault);
                    return Err(e);
                }
            }
        }

        if cells.iter().all(|cell| *cell == ERASED_CELL) {
            info!("Blank record, starting from factory state");
        } else {
            decode(&cells, &mut inner.state);
            info!("Record restored: balance {}, credit {}", inner.state.balance, inner.state.credit);
        }
        for (shadow, cell) in inner.shadow.iter_mut().zip(cells) {
            *shadow = Some(cell);
        }
        Ok(())
    }

    /// Take the store back, dropping the state
    pub fn into_store(self) -> S {
        self.inner.into_inner().store
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use super::*;
    use crate::config::{NVM_BUSY_POLL_INTERVAL_US, NVM_BUSY_POLL_LIMIT, QUARTER};
    use crate::nvm::fake::{FakeEeprom, NoopDelay};
    use crate::nvm::Eeprom;

    type TestStore = Eeprom<FakeEeprom, NoopDelay>;

    fn store() -> TestStore {
        Eeprom::new(FakeEeprom::new(), NoopDelay::default())
    }

    fn drain(ui: &UiQueue) -> std::vec::Vec<UiSymbol> {
        core::iter::from_fn(|| ui.try_receive()).collect()
    }

    #[test]
    fn twenty_quarters_fill_credit_then_overflow_is_reported() {
        let ui = UiQueue::new();
        let machine = Machine::new(store(), &ui);

        block_on(async {
            for _ in 0..20 {
                machine.apply(Operation::AddCredit(QUARTER)).await;
            }
            assert_eq!(machine.get().await.credit, MAX_CREDIT);
            assert!(drain(&ui).is_empty());

            machine.apply(Operation::AddCredit(QUARTER)).await;
            assert_eq!(machine.get().await.credit, MAX_CREDIT);
            assert_eq!(drain(&ui), [UiSymbol::MaxCredit]);
        });
    }

    #[test]
    fn sale_posts_outcome() {
        let ui = UiQueue::new();
        let machine = Machine::new(store(), &ui);

        block_on(async {
            machine.apply(Operation::SetPrice { slot: 0, price: Money::from_cents(150) }).await;
            machine.apply(Operation::AddStock { slot: 0, count: 1 }).await;
            for _ in 0..8 {
                machine.apply(Operation::AddCredit(QUARTER)).await;
            }

            machine.apply(Operation::SellDrink(0)).await;
            let state = machine.get().await;
            assert_eq!(state.slots[0].stock, 0);
            assert_eq!(state.balance, Money::from_cents(150));
            assert_eq!(state.credit, Money::from_cents(50));

            machine.apply(Operation::SellDrink(0)).await;
            assert_eq!(machine.get().await, state);
            assert_eq!(drain(&ui), [UiSymbol::VendSuccess, UiSymbol::VendFail]);
        });
    }

    #[test]
    fn unknown_slots_are_ignored() {
        let ui = UiQueue::new();
        let machine = Machine::new(store(), &ui);

        block_on(async {
            let before = machine.get().await;
            machine.apply(Operation::SellDrink(SLOT_COUNT)).await;
            machine.apply(Operation::SetPrice { slot: 9, price: QUARTER }).await;
            machine.apply(Operation::AddStock { slot: 9, count: 5 }).await;
            assert_eq!(machine.get().await, before);
            assert!(drain(&ui).is_empty());
        });
    }

    #[test]
    fn time_and_transactions_are_tracked() {
        let ui = UiQueue::new();
        let machine = Machine::new(store(), &ui);

        block_on(async {
            machine.apply(Operation::AdvanceTime(100)).await;
            machine.apply(Operation::AdvanceTime(100)).await;
            machine.apply(Operation::RecordTransactionTime).await;
            machine.apply(Operation::AdvanceTime(500)).await;

            let state = machine.get().await;
            assert_eq!(state.elapsed_ms, 700);
            assert_eq!(state.since_last_transaction_ms(), Some(500));
        });
    }

    #[test]
    fn persist_then_restore_round_trips() {
        let ui = UiQueue::new();
        let machine = Machine::new(store(), &ui);

        let written = block_on(async {
            machine.apply(Operation::SetPrice { slot: 2, price: Money::from_cents(275) }).await;
            machine.apply(Operation::AddStock { slot: 2, count: 12 }).await;
            machine.apply(Operation::AddCredit(QUARTER)).await;
            machine.persist().await.unwrap();
            machine.get().await
        });

        let restored = Machine::new(machine.into_store(), &ui);
        block_on(async {
            restored.restore().await.unwrap();
            let state = restored.get().await;
            assert_eq!(state.slots, written.slots);
            assert_eq!(state.balance, written.balance);
            assert_eq!(state.credit, written.credit);
        });
    }

    #[test]
    fn record_cells_are_msb_first_at_even_addresses() {
        let ui = UiQueue::new();
        let machine = Machine::new(store(), &ui);

        block_on(async {
            machine.apply(Operation::SetPrice { slot: 1, price: Money::from_cents(0x0123) }).await;
            machine.apply(Operation::AddStock { slot: 1, count: 7 }).await;
            machine.persist().await.unwrap();
        });

        let (chip, _) = machine.into_store().release();
        assert_eq!(&chip.memory[8..12], &[0x01, 0x23, 0x00, 0x07]);
    }

    #[test]
    fn persist_only_rewrites_changed_cells() {
        let ui = UiQueue::new();
        let machine = Machine::new(store(), &ui);

        block_on(async {
            machine.persist().await.unwrap();
            machine.persist().await.unwrap();
            machine.apply(Operation::AddCredit(QUARTER)).await;
            machine.persist().await.unwrap();
        });

        let (chip, _) = machine.into_store().release();
        assert_eq!(chip.writes(), RECORD_CELLS + 1);
    }

    #[test]
    fn blank_device_keeps_factory_state() {
        let ui = UiQueue::new();
        let machine = Machine::new(store(), &ui);

        block_on(async {
            machine.restore().await.unwrap();
            assert_eq!(machine.get().await, MachineState::new());
        });
    }

    #[test]
    fn oversized_credit_is_discarded_on_restore() {
        let mut chip = FakeEeprom::new();
        chip.memory[0..4].copy_from_slice(&[0x00, 0x64, 0x03, 0xE8]);
        let ui = UiQueue::new();
        let machine = Machine::new(Eeprom::new(chip, NoopDelay::default()), &ui);

        block_on(async {
            machine.restore().await.unwrap();
            let state = machine.get().await;
            assert_eq!(state.balance, Money::from_cents(100));
            assert_eq!(state.credit, Money::ZERO);
        });
    }

    #[test]
    fn money_saturates_below_the_erased_pattern() {
        let ui = UiQueue::new();
        let machine = Machine::new(store(), &ui);

        block_on(async {
            machine.apply(Operation::SetPrice { slot: 0, price: Money::from_cents(70_000) }).await;
            machine.persist().await.unwrap();
        });

        let (chip, _) = machine.into_store().release();
        assert_eq!(&chip.memory[4..6], &[0xFF, 0xFE]);
    }

    /// Fill `slot` with `stock` at `price`, then sell it `sales` times with exact change
    async fn sell_out(machine: &Machine<'_, TestStore>, slot: usize, price: Money, stock: u16, sales: u32) {
        machine.apply(Operation::SetPrice { slot, price }).await;
        machine.apply(Operation::AddStock { slot, count: stock }).await;
        for _ in 0..sales {
            for _ in 0..price.cents() / QUARTER.cents() {
                machine.apply(Operation::AddCredit(QUARTER)).await;
            }
            machine.apply(Operation::SellDrink(slot)).await;
        }
    }

    #[test]
    fn revenue_past_the_cell_limit_survives_reboot() {
        let ui = UiQueue::new();
        let machine = Machine::new(store(), &ui);

        let before = block_on(async {
            sell_out(&machine, 0, MAX_CREDIT, 198, 132).await;
            machine.persist().await.unwrap();
            machine.get().await
        });
        assert_eq!(before.balance, Money::from_cents(66_000));
        drain(&ui);

        let rebooted = Machine::new(machine.into_store(), &ui);
        block_on(async {
            rebooted.restore().await.unwrap();
            assert_eq!(rebooted.get().await.balance, Money::from_cents(65_534));
        });
    }

    #[test]
    fn boundary_records_round_trip() {
        // (balance, credit, price, stock)
        let cases: [(u32, u32, u32, u16); 6] = [
            (0, 0, 0, 0),
            (65_534, 500, 500, 255),
            (65_533, 25, 25, 1),
            (100, 475, 500, 255),
            (1, 0, 475, 254),
            (65_534, 0, 0, 0),
        ];

        for (balance, credit, price, stock) in cases {
            let mut state = MachineState::new();
            state.balance = Money::from_cents(balance);
            state.credit = Money::from_cents(credit);
            for drink in state.slots.iter_mut() {
                drink.price = Money::from_cents(price);
                drink.stock = stock;
            }

            let ui = UiQueue::new();
            let machine = Machine::new(store(), &ui);
            block_on(async {
                machine.inner.lock().await.state = state;
                machine.persist().await.unwrap();
            });

            let rebooted = Machine::new(machine.into_store(), &ui);
            block_on(async {
                rebooted.restore().await.unwrap();
                let restored = rebooted.get().await;
                assert_eq!(restored.balance, state.balance, "balance {}", balance);
                assert_eq!(restored.credit, state.credit, "credit {}", credit);
                assert_eq!(restored.slots, state.slots, "price {} stock {}", price, stock);
            });
        }
    }

    #[test]
    fn store_failure_posts_storage_fault() {
        let mut chip = FakeEeprom::new();
        chip.stuck = true;
        let ui = UiQueue::new();
        let machine = Machine::new(Eeprom::new(chip, NoopDelay::default()), &ui);

        block_on(async {
            assert_eq!(machine.restore().await, Err(NvmError::Busy));
            assert_eq!(machine.storage_fault().await, Some(NvmError::Busy));
        });
        assert_eq!(drain(&ui), [UiSymbol::StorageFault]);
    }

    #[test]
    fn storage_fault_latches_and_stops_touching_the_device() {
        let mut chip = FakeEeprom::new();
        chip.stuck = true;
        let ui = UiQueue::new();
        let machine = Machine::new(Eeprom::new(chip, NoopDelay::default()), &ui);

        block_on(async {
            assert_eq!(machine.persist().await, Err(NvmError::Busy));
            for _ in 0..8 {
                machine.apply(Operation::AddCredit(QUARTER)).await;
                assert_eq!(machine.persist().await, Err(NvmError::Busy));
            }
        });
        assert_eq!(drain(&ui), [UiSymbol::StorageFault]);

        let (chip, delay) = machine.into_store().release();
        let polls = chip.log.iter().filter(|t| t.first() == Some(&crate::nvm::CMD_RDSR)).count();
        assert_eq!(polls, NVM_BUSY_POLL_LIMIT as usize);
        assert_eq!(
            delay.waited_ns,
            u64::from(NVM_BUSY_POLL_LIMIT) * u64::from(NVM_BUSY_POLL_INTERVAL_US) * 1_000
        );
    }
}
