//! Customer-facing screen state machine
//!
//! Consumes [`UiSymbol`]s from the UI mailbox and renders the 16x2 customer
//! screen. Selling, credit and transaction bookkeeping go through the
//! shared [`Machine`]; the outcome of a sale comes back later as a symbol.

use crate::channels::{ServicingAck, UiQueue};
use crate::config::{QUARTER, SLOT_COUNT};
use crate::display::{show_line, show_screen, CharDisplay};
use crate::machine::{Machine, Operation};
use crate::nvm::CellStore;
use crate::types::{MachineState, UiSymbol};

pub struct UiController<'a, S, D> {
    machine: &'a Machine<'a, S>,
    ui: &'a UiQueue,
    ack: &'a ServicingAck,
    display: D,
    selection: usize,
    vend_failed: bool,
    storage_fault: bool,
}

impl<'a, S, D> UiController<'a, S, D>
where
    S: CellStore,
    D: CharDisplay,
{
    pub fn new(machine: &'a Machine<'a, S>, ui: &'a UiQueue, ack: &'a ServicingAck, display: D) -> Self {
        Self {
            machine,
            ui,
            ack,
            display,
            selection: 0,
            vend_failed: false,
            storage_fault: false,
        }
    }

    /// Slot currently offered to the customer
    pub fn selection(&self) -> usize {
        self.selection
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub async fn run(&mut self) -> ! {
        info!("UI task started");
        self.ui.post(UiSymbol::Idle);
        loop {
            let symbol = self.ui.receive().await;
            self.handle(symbol).await;
        }
    }

    /// Process one symbol, then save the record
    pub async fn handle(&mut self, symbol: UiSymbol) {
        let snapshot = self.machine.get().await;
        let symbol = if snapshot.servicing {
            UiSymbol::Servicing
        } else if self.storage_fault {
            UiSymbol::StorageFault
        } else {
            symbol
        };
        debug!("UI symbol {}", symbol);

        match symbol {
            UiSymbol::Idle => self.show_idle(),
            UiSymbol::ShowSelection => {
                self.show_selection(&snapshot);
                self.show_credit(&snapshot);
            }
            UiSymbol::ShowCredit => self.show_credit(&snapshot),
            UiSymbol::Cycle => {
                self.selection = (self.selection + 1) % SLOT_COUNT;
                self.show_selection(&snapshot);
                self.show_credit(&snapshot);
            }
            UiSymbol::AddQuarter => {
                self.machine.apply(Operation::AddCredit(QUARTER)).await;
                let snapshot = self.machine.get().await;
                if self.vend_failed {
                    self.vend_failed = false;
                    self.show_idle();
                }
                self.show_credit(&snapshot);
            }
            UiSymbol::ClearCredit => {
                self.machine.apply(Operation::ClearCredit).await;
                let snapshot = self.machine.get().await;
                self.show_idle();
                self.show_credit(&snapshot);
            }
            UiSymbol::MaxCredit => {
                show_line(&mut self.display, 0, format_args!("MAX CREDIT!"));
                self.show_credit(&snapshot);
            }
            UiSymbol::TryVend => {
                self.machine.apply(Operation::SellDrink(self.selection)).await;
            }
            UiSymbol::VendSuccess => {
                let drink = snapshot.slots[self.selection];
                show_screen(
                    &mut self.display,
                    format_args!("VENDING {} ...", drink.name),
                    format_args!("RETURN: {}$", snapshot.credit),
                );
                self.machine.apply(Operation::ClearCredit).await;
                self.machine.apply(Operation::RecordTransactionTime).await;
            }
            UiSymbol::VendFail => {
                self.vend_failed = true;
                let drink = snapshot.slots[self.selection];
                if drink.stock != 0 {
                    show_screen(
                        &mut self.display,
                        format_args!("MISSING CREDIT:"),
                        format_args!("INSERT: {}$", drink.price.saturating_sub(snapshot.credit)),
                    );
                } else {
                    show_screen(
                        &mut self.display,
                        format_args!("SORRY... {}", drink.name),
                        format_args!("OUT OF STOCK!"),
                    );
                }
            }
            UiSymbol::TemperatureFault => self.show_out_of_order("TEMPERATURE FAIL"),
            UiSymbol::Servicing => {
                self.show_out_of_order("TECH SERVICING");
                self.ack.signal(());
            }
            UiSymbol::StorageFault => {
                if !self.storage_fault {
                    error!("Storage fault, customer screen locked");
                }
                self.storage_fault = true;
                self.show_out_of_order("STORAGE FAIL");
            }
        }

        if !self.storage_fault && self.machine.persist().await.is_err() {
            self.storage_fault = true;
        }
    }

    fn show_idle(&mut self) {
        show_screen(
            &mut self.display,
            format_args!("SELECT ITEM..."),
            format_args!("PRESS S0++"),
        );
    }

    fn show_selection(&mut self, state: &MachineState) {
        let drink = state.slots[self.selection];
        show_line(&mut self.display, 0, format_args!("{} COST: {}$", drink.name, drink.price));
    }

    fn show_credit(&mut self, state: &MachineState) {
        show_line(&mut self.display, 1, format_args!("CREDIT: {}$", state.credit));
    }

    fn show_out_of_order(&mut self, reason: &str) {
        show_screen(
            &mut self.display,
            format_args!("OUT OF ORDER -"),
            format_args!("{}", reason),
        );
    }
}
