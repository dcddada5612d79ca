//! Technician service console
//!
//! A VT100 menu on the console UART. The first byte received while dormant
//! puts the machine into servicing and takes over the customer screen while
//! the technician reprices or restocks slots and empties the cash balance.
//! Input is line based and `\r` commits.

use core::fmt::{self, Write};

use embedded_hal_async::delay::DelayNs;
use heapless::String;

use crate::channels::{ConsoleQueue, ServicingAck, TemperatureCell, UiQueue};
use crate::config::{LINE_CAPACITY, MAX_PRICE, MAX_STOCK_DELTA, SERVICE_GOODBYE_MS, SLOT_COUNT, SLOT_NAMES};
use crate::machine::{Machine, Operation};
use crate::nvm::CellStore;
use crate::types::{Celsius, DrinkSlot, Money, UiSymbol};

const KEY_BACKSPACE: u8 = 0x08;
const KEY_DELETE: u8 = 0x7F;
const KEY_ENTER: u8 = b'\r';

// Screen layout
const INPUT_COL: u16 = 10;
const INPUT_ROW: u16 = 22;
const MSG_COL: u16 = 48;
const MENU_KEY_COL: u16 = 5;
const MENU_TEXT_COL: u16 = 12;
const MENU_FIRST_ROW: u16 = 10;

const HOME_MENU: [(char, &str); 9] = [
    ('P', "Stock Price Mode"),
    ('L', "Stock Load Mode"),
    ('S', "Display Stock Level & Price"),
    ('T', "Display Fridge Temperature"),
    ('D', "Display Last Transaction Time"),
    ('B', "Display Current Balance"),
    ('E', "Empty Cash Balance"),
    ('R', "Refresh Menu"),
    ('K', "Exit Servicing"),
];

// ===================================================================
// Terminal
// ===================================================================

/// Byte sink for the console UART transmitter
pub trait ConsoleSink {
    fn write_bytes(&mut self, bytes: &[u8]);
}

struct SinkWriter<'w, W>(&'w mut W);

impl<W: ConsoleSink> Write for SinkWriter<'_, W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_bytes(s.as_bytes());
        Ok(())
    }
}

/// VT100 cursor addressing over a [`ConsoleSink`]
pub struct Terminal<W> {
    sink: W,
}

impl<W: ConsoleSink> Terminal<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    /// Write `args` starting at column `x`, row `y`
    pub fn put_at(&mut self, x: u16, y: u16, args: fmt::Arguments<'_>) {
        let _ = write!(SinkWriter(&mut self.sink), "\x1b[{};{}H{}", y, x, args);
    }

    pub fn clear(&mut self) {
        self.sink.write_bytes(b"\x1b[2J");
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut W {
        &mut self.sink
    }
}

// ===================================================================
// Input Line
// ===================================================================

/// Characters typed since the last commit
#[derive(Default)]
pub struct LineBuffer(String<LINE_CAPACITY>);

impl LineBuffer {
    /// Append an accepted character, false when full or not accepted
    pub fn push(&mut self, byte: u8) -> bool {
        if !(byte.is_ascii_alphanumeric() || byte == b'.') {
            return false;
        }
        self.0.push(char::from(byte)).is_ok()
    }

    pub fn pop(&mut self) -> Option<char> {
        self.0.pop()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Hand over the line, leaving it empty
    pub fn take(&mut self) -> String<LINE_CAPACITY> {
        core::mem::take(&mut self.0)
    }
}

// ===================================================================
// Command Parsing
// ===================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Home,
    SetPrice,
    SetStock,
}

/// Input that names no slot or carries an unusable value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidCommand;

/// Slot whose key letter starts `input`, ignoring case
fn slot_for(input: &str, slots: &[DrinkSlot]) -> Result<usize, InvalidCommand> {
    let key = input.chars().next().ok_or(InvalidCommand)?;
    slots
        .iter()
        .position(|slot| slot.key().eq_ignore_ascii_case(&key))
        .ok_or(InvalidCommand)
}

/// `<key><price>`, e.g. `b2.50`
pub fn parse_price_edit(input: &str, slots: &[DrinkSlot]) -> Result<(usize, Money), InvalidCommand> {
    let slot = slot_for(input, slots)?;
    let price = input.get(1..).and_then(Money::parse).ok_or(InvalidCommand)?;
    if price.is_zero() || price > MAX_PRICE {
        return Err(InvalidCommand);
    }
    Ok((slot, price))
}

/// `<key><count>`, e.g. `m24`
pub fn parse_stock_edit(input: &str, slots: &[DrinkSlot]) -> Result<(usize, u16), InvalidCommand> {
    let slot = slot_for(input, slots)?;
    let digits = input.get(1..).ok_or(InvalidCommand)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(InvalidCommand);
    }
    let count: u16 = digits.parse().map_err(|_| InvalidCommand)?;
    if count == 0 || count > MAX_STOCK_DELTA {
        return Err(InvalidCommand);
    }
    Ok((slot, count))
}

/// `+04.2` style, one decimal and an explicit sign
struct SignedTenths(Celsius);

impl fmt::Display for SignedTenths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tenths: i32 = (self.0 * 10).round().to_num();
        let sign = if tenths < 0 { '-' } else { '+' };
        let tenths = tenths.unsigned_abs();
        write!(f, "{}{:02}.{}", sign, tenths / 10, tenths % 10)
    }
}

// ===================================================================
// Console
// ===================================================================

pub struct ServiceConsole<'a, S, W, D> {
    machine: &'a Machine<'a, S>,
    ui: &'a UiQueue,
    ack: &'a ServicingAck,
    rx: &'a ConsoleQueue,
    temperature: &'a TemperatureCell,
    term: Terminal<W>,
    delay: D,
    line: LineBuffer,
    mode: Mode,
    rendered_mode: Option<Mode>,
    active: bool,
}

impl<'a, S, W, D> ServiceConsole<'a, S, W, D>
where
    S: CellStore,
    W: ConsoleSink,
    D: DelayNs,
{
    pub fn new(
        machine: &'a Machine<'a, S>,
        ui: &'a UiQueue,
        ack: &'a ServicingAck,
        rx: &'a ConsoleQueue,
        temperature: &'a TemperatureCell,
        sink: W,
        delay: D,
    ) -> Self {
        Self {
            machine,
            ui,
            ack,
            rx,
            temperature,
            term: Terminal::new(sink),
            delay,
            line: LineBuffer::default(),
            mode: Mode::Home,
            rendered_mode: None,
            active: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn line(&self) -> &str {
        self.line.as_str()
    }

    pub fn terminal(&self) -> &Terminal<W> {
        &self.term
    }

    pub fn terminal_mut(&mut self) -> &mut Terminal<W> {
        &mut self.term
    }

    pub async fn run(&mut self) -> ! {
        info!("Service console task started");
        loop {
            self.step().await;
        }
    }

    /// Wait for one received byte and act on it
    pub async fn step(&mut self) {
        let byte = self.rx.receive().await;
        self.handle_byte(byte).await;
    }

    pub async fn handle_byte(&mut self, byte: u8) {
        if !self.active {
            self.activate().await;
        } else {
            match byte {
                KEY_ENTER => self.commit().await,
                KEY_BACKSPACE => {
                    if self.line.pop().is_some() {
                        let col = INPUT_COL + self.line.len() as u16;
                        self.term.put_at(col, INPUT_ROW, format_args!(" "));
                    }
                }
                KEY_DELETE => {
                    self.line.clear();
                    self.term.put_at(INPUT_COL, INPUT_ROW, format_args!("{:1$}", "", LINE_CAPACITY));
                }
                other => {
                    self.line.push(other);
                }
            }
        }

        if self.active {
            let echo = self.line.as_str();
            self.term.put_at(INPUT_COL, INPUT_ROW, format_args!("{:<1$}", echo, LINE_CAPACITY));
        }

        // A failure latches in the machine and locks the customer screen
        let _ = self.machine.persist().await;
    }

    async fn activate(&mut self) {
        info!("Service console activated");
        self.ack.reset();
        self.machine.apply(Operation::SetServicing(true)).await;
        self.ui.post(UiSymbol::Servicing);
        self.ack.wait().await;

        self.active = true;
        self.mode = Mode::Home;
        self.rendered_mode = None;
        self.line.clear();
        self.term.clear();
        self.draw_frame();
        self.render_menu();
    }

    async fn commit(&mut self) {
        let input = self.line.take();
        let command = input.chars().next().map(|c| c.to_ascii_uppercase());

        match command {
            Some('H') if self.mode != Mode::Home => self.mode = Mode::Home,
            Some('R') => {
                self.rendered_mode = None;
                self.term.clear();
                self.draw_frame();
            }
            _ => match self.mode {
                Mode::Home => self.home_command(command).await,
                Mode::SetPrice => self.price_edit(&input).await,
                Mode::SetStock => self.stock_edit(&input).await,
            },
        }

        if self.active && self.rendered_mode != Some(self.mode) {
            self.render_menu();
        }
    }

    async fn home_command(&mut self, command: Option<char>) {
        match command {
            Some('P') => self.mode = Mode::SetPrice,
            Some('L') => self.mode = Mode::SetStock,
            Some('S') => {
                let state = self.machine.get().await;
                self.clear_messages();
                self.heading(56, "Stock & Price");
                for (row, drink) in (MENU_FIRST_ROW..).zip(state.slots.iter()) {
                    self.term.put_at(
                        52,
                        row,
                        format_args!("{}: {} units @ {}$", drink.name, drink.stock, drink.price),
                    );
                }
            }
            Some('T') => {
                self.clear_messages();
                self.heading(54, "Fridge Temperature");
                match self.temperature.latest() {
                    Some(reading) => self
                        .term
                        .put_at(52, 13, format_args!("{} Degrees Celsius", SignedTenths(reading))),
                    None => self.term.put_at(52, 13, format_args!("No reading yet")),
                }
            }
            Some('D') => {
                let state = self.machine.get().await;
                self.clear_messages();
                self.heading(53, "Last Transaction Time");
                match state.since_last_transaction_ms() {
                    Some(ms) => {
                        let tenths = ms / 100;
                        self.term
                            .put_at(55, 13, format_args!("{}.{} seconds ago", tenths / 10, tenths % 10));
                    }
                    None => self.term.put_at(MSG_COL, 13, format_args!("No transactions have occurred!")),
                }
            }
            Some('B') => {
                let state = self.machine.get().await;
                self.clear_messages();
                self.heading(56, "Current Balance");
                self.term.put_at(52, 12, format_args!("Machine Balance: {}$", state.balance));
                self.term.put_at(52, 13, format_args!("Customer Credit: {}$", state.credit));
            }
            Some('E') => self.empty_balance().await,
            Some('K') => self.exit().await,
            _ => {}
        }
    }

    async fn empty_balance(&mut self) {
        let state = self.machine.get().await;
        self.clear_messages();
        self.heading(54, "Empty Cash Balance");
        self.term.put_at(52, 10, format_args!("Machine Balance: {}$", state.balance));

        if state.balance.is_zero() {
            self.term.put_at(54, 14, format_args!("No cash in machine!"));
            return;
        }

        self.term.put_at(MSG_COL, 12, format_args!("Unload cash balance from"));
        self.term.put_at(MSG_COL, 13, format_args!("machine. When finished, press"));
        self.term.put_at(MSG_COL, 14, format_args!("any key to continue."));
        self.rx.receive().await;

        self.machine.apply(Operation::EmptyBalance).await;
        let state = self.machine.get().await;
        self.term.put_at(MSG_COL, 17, format_args!("Balance Reset: {}$", state.balance));
    }

    async fn exit(&mut self) {
        info!("Service console closed");
        self.clear_messages();
        self.term.put_at(59, 12, format_args!("Goodbye!"));
        self.delay.delay_ms(SERVICE_GOODBYE_MS).await;
        self.term.clear();
        self.term.put_at(0, 0, format_args!(""));

        self.machine.apply(Operation::SetServicing(false)).await;
        self.active = false;
        self.mode = Mode::Home;
        self.rendered_mode = None;
        self.line.clear();
        self.ui.post(UiSymbol::Idle);
    }

    async fn price_edit(&mut self, input: &str) {
        if input.is_empty() {
            return;
        }
        self.clear_results();

        let state = self.machine.get().await;
        let (slot, price) = match parse_price_edit(input, &state.slots) {
            Ok(edit) => edit,
            Err(InvalidCommand) => {
                self.invalid(input, "price above 0 up to a maximum", "of 5 dollars", "Ex: a2.50");
                return;
            }
        };

        let drink = state.slots[slot];
        self.term.put_at(MSG_COL, 11, format_args!("Current {} price: {}$", drink.name, drink.price));
        self.term.put_at(MSG_COL, 12, format_args!("New {} price: {}$", drink.name, price));
        if self.confirm("price").await {
            self.machine.apply(Operation::SetPrice { slot, price }).await;
            let drink = self.machine.get().await.slots[slot];
            info!("{} price set to {}", drink.name, drink.price);
            self.term.put_at(MSG_COL, 18, format_args!("{} price updated: {}$", drink.name, drink.price));
        } else {
            self.term.put_at(MSG_COL, 18, format_args!("{} price unchanged: {}$", drink.name, drink.price));
        }
    }

    async fn stock_edit(&mut self, input: &str) {
        if input.is_empty() {
            return;
        }
        self.clear_results();

        let state = self.machine.get().await;
        let (slot, count) = match parse_stock_edit(input, &state.slots) {
            Ok(edit) => edit,
            Err(InvalidCommand) => {
                self.invalid(input, "stock above 0 up to a maximum", "of 99 units", "Ex: a50");
                return;
            }
        };

        let drink = state.slots[slot];
        self.term.put_at(MSG_COL, 11, format_args!("Current {} stock: {} units", drink.name, drink.stock));
        self.term.put_at(
            MSG_COL,
            12,
            format_args!("New {} stock: {} units", drink.name, drink.stock.saturating_add(count)),
        );
        if self.confirm("stock").await {
            self.machine.apply(Operation::AddStock { slot, count }).await;
            let drink = self.machine.get().await.slots[slot];
            info!("{} restocked to {}", drink.name, drink.stock);
            self.term.put_at(MSG_COL, 18, format_args!("{} stock updated: {} units", drink.name, drink.stock));
        } else {
            self.term.put_at(MSG_COL, 18, format_args!("{} stock unchanged: {} units", drink.name, drink.stock));
        }
    }

    /// Ask for Y, consuming exactly one received byte
    async fn confirm(&mut self, what: &str) -> bool {
        self.term.put_at(MSG_COL, 14, format_args!("Press Y to confirm new {}", what));
        self.term.put_at(MSG_COL, 15, format_args!("Press any other key to ignore"));
        self.term.put_at(MSG_COL, 16, format_args!("changes"));
        self.term.put_at(MSG_COL, 18, format_args!(""));
        matches!(self.rx.receive().await, b'Y' | b'y')
    }

    fn invalid(&mut self, input: &str, limit: &str, maximum: &str, example: &str) {
        debug!("Invalid console command");
        self.term.put_at(MSG_COL, 11, format_args!("Invalid command!: {}", input));
        self.term.put_at(MSG_COL, 13, format_args!("Please enter a valid KEY and"));
        self.term.put_at(MSG_COL, 14, format_args!("{}", limit));
        self.term.put_at(MSG_COL, 15, format_args!("{}", maximum));
        self.term.put_at(MSG_COL, 17, format_args!("{}", example));
    }

    // ===============================================================
    // Screen Drawing
    // ===============================================================

    fn heading(&mut self, col: u16, title: &str) {
        self.term.put_at(col, 7, format_args!("{}", title));
        self.term.put_at(col, 8, format_args!("{:-<1$}", "", title.len()));
    }

    fn clear_messages(&mut self) {
        for row in 7..19 {
            self.term.put_at(MSG_COL, row, format_args!("{:31}", ""));
        }
    }

    fn clear_results(&mut self) {
        for row in 11..19 {
            self.term.put_at(MSG_COL, row, format_args!("{:30}", ""));
        }
    }

    fn draw_frame(&mut self) {
        for row in [0, 5, 20, 24] {
            self.term.put_at(0, row, format_args!("{:*<80}", ""));
        }
        self.term.put_at(0, 8, format_args!("{:_<44}", ""));
        for row in 0..24 {
            self.term.put_at(0, row, format_args!("*"));
            if (6..20).contains(&row) {
                self.term.put_at(9, row, format_args!("|"));
                self.term.put_at(45, row, format_args!("|"));
            }
            self.term.put_at(80, row, format_args!("*"));
        }
    }

    fn render_menu(&mut self) {
        self.term.put_at(3, 3, format_args!("CoinVend Vending Machine Service Console"));
        self.term.put_at(4, 7, format_args!("KEY"));
        for row in MENU_FIRST_ROW..19 {
            self.term.put_at(4, row, format_args!("   "));
            self.term.put_at(MENU_TEXT_COL, row, format_args!("{:31}", ""));
        }
        self.clear_messages();

        match self.mode {
            Mode::Home => {
                self.term.put_at(17, 7, format_args!("Operation (Home Menu) "));
                self.term.put_at(59, 12, format_args!("Welcome!"));
                for (row, (key, text)) in (MENU_FIRST_ROW..).zip(HOME_MENU) {
                    self.term.put_at(MENU_KEY_COL, row, format_args!("{}", key));
                    self.term.put_at(MENU_TEXT_COL, row, format_args!("{}", text));
                }
            }
            Mode::SetPrice => {
                self.term.put_at(17, 7, format_args!("Operation (Price Menu)"));
                self.slot_menu("Change", "Price");
                self.term.put_at(MSG_COL, 7, format_args!("Enter KEY followed by price in"));
                self.term.put_at(MSG_COL, 8, format_args!("dollars (0.00) to change price"));
                self.term.put_at(MSG_COL, 9, format_args!("{:-<30}", ""));
            }
            Mode::SetStock => {
                self.term.put_at(17, 7, format_args!("Operation (Stock Menu)"));
                self.slot_menu("Add", "Stock");
                self.term.put_at(MSG_COL, 7, format_args!("Enter KEY followed by 2 digit"));
                self.term.put_at(MSG_COL, 8, format_args!("value (00-99) to add stock"));
                self.term.put_at(MSG_COL, 9, format_args!("{:-<29}", ""));
            }
        }

        self.term.put_at(3, INPUT_ROW, format_args!("INPUT: "));
        self.rendered_mode = Some(self.mode);
    }

    fn slot_menu(&mut self, verb: &str, noun: &str) {
        for (row, name) in (MENU_FIRST_ROW..).zip(SLOT_NAMES) {
            let key = name.chars().next().unwrap_or('?');
            self.term.put_at(MENU_KEY_COL, row, format_args!("{}", key));
            self.term.put_at(MENU_TEXT_COL, row, format_args!("{} {} {}", verb, name, noun));
        }
        let row = MENU_FIRST_ROW + SLOT_COUNT as u16 + 1;
        self.term.put_at(MENU_KEY_COL, row, format_args!("R"));
        self.term.put_at(MENU_TEXT_COL, row, format_args!("Refresh Menu"));
        self.term.put_at(MENU_KEY_COL, row + 1, format_args!("H"));
        self.term.put_at(MENU_TEXT_COL, row + 1, format_args!("Exit to Home Menu"));
    }
}
