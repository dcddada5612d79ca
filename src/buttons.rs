//! Push button and temperature polling
//!
//! Samples the three customer buttons and the cabinet temperature every
//! poll period and turns them into UI symbols. Held buttons repeat, the
//! vend button fires once on release, and a quiet panel sends the UI back
//! to idle after a few seconds.

use embedded_hal_async::delay::DelayNs;

use crate::channels::{TemperatureCell, UiQueue};
use crate::config::*;
use crate::types::{Celsius, UiSymbol};

// ===================================================================
// Collaborators
// ===================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Button {
    Cycle,
    AddCredit,
    Vend,
}

/// Active-low button inputs
pub trait ButtonPanel {
    /// True while `button` is held down
    fn is_low(&mut self, button: Button) -> bool;
}

/// Raw cabinet temperature sensor
pub trait TemperatureSensor {
    /// 12-bit ADC code
    fn read_code(&mut self) -> u16;
}

/// Linear sensor transfer function, -7C at code 0 to +20C at full scale
pub fn code_to_celsius(code: u16) -> Celsius {
    let code = i32::from(code).min(ADC_FULL_SCALE);
    let milli = SENSOR_MILLI_C_AT_ZERO + code * SENSOR_MILLI_C_SPAN / ADC_FULL_SCALE;
    Celsius::from_num(milli) / 1000
}

pub fn temperature_ok(temperature: Celsius) -> bool {
    (TEMPERATURE_MIN..=TEMPERATURE_MAX).contains(&temperature)
}

// ===================================================================
// Poll State Machine
// ===================================================================

/// One reading of every input
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub temperature: Celsius,
    pub cycle: bool,
    pub add_credit: bool,
    pub vend: bool,
}

impl Sample {
    pub fn take<P: ButtonPanel, T: TemperatureSensor>(panel: &mut P, sensor: &mut T) -> Self {
        Self {
            temperature: code_to_celsius(sensor.read_code()),
            cycle: panel.is_low(Button::Cycle),
            add_credit: panel.is_low(Button::AddCredit),
            vend: panel.is_low(Button::Vend),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollAction {
    None,
    Emit(UiSymbol),
    /// Vend pressed; `TryVend` goes out once it is released
    AwaitVendRelease,
}

pub struct PollState {
    idle_ticks: u16,
    cycle_hold: u16,
    credit_hold: u16,
}

impl PollState {
    pub const fn new() -> Self {
        Self {
            idle_ticks: 0,
            cycle_hold: 0,
            credit_hold: 0,
        }
    }

    /// Decide what one sample means. Inputs are checked in priority order.
    pub fn tick(&mut self, sample: &Sample) -> PollAction {
        if !temperature_ok(sample.temperature) {
            self.idle_ticks = IDLE_THRESHOLD_TICKS;
            return PollAction::Emit(UiSymbol::TemperatureFault);
        }

        if sample.cycle {
            self.idle_ticks = 0;
            return Self::repeat(&mut self.cycle_hold, UiSymbol::Cycle);
        }

        if sample.add_credit {
            self.idle_ticks = 0;
            return Self::repeat(&mut self.credit_hold, UiSymbol::AddQuarter);
        }

        if sample.vend {
            return PollAction::AwaitVendRelease;
        }

        self.cycle_hold = 0;
        self.credit_hold = 0;
        self.idle_ticks = self.idle_ticks.saturating_add(1);
        if self.idle_ticks >= IDLE_THRESHOLD_TICKS {
            self.idle_ticks = 0;
            return PollAction::Emit(UiSymbol::Idle);
        }
        PollAction::None
    }

    /// The vend button came back up
    pub fn vend_released(&mut self) -> UiSymbol {
        self.idle_ticks = VEND_IDLE_HEAD_START_TICKS;
        UiSymbol::TryVend
    }

    // Fires on press, then every HOLD_REPEAT_TICKS + 1 ticks while held
    fn repeat(hold: &mut u16, symbol: UiSymbol) -> PollAction {
        if *hold == 0 {
            *hold = 1;
            return PollAction::Emit(symbol);
        }
        if *hold >= HOLD_REPEAT_TICKS {
            *hold = 0;
        } else {
            *hold += 1;
        }
        PollAction::None
    }
}

impl Default for PollState {
    fn default() -> Self {
        Self::new()
    }
}

// ===================================================================
// Poll Task
// ===================================================================

pub struct InputPoller<'a, P, T, D> {
    panel: P,
    sensor: T,
    delay: D,
    ui: &'a UiQueue,
    temperature: &'a TemperatureCell,
    state: PollState,
}

impl<'a, P, T, D> InputPoller<'a, P, T, D>
where
    P: ButtonPanel,
    T: TemperatureSensor,
    D: DelayNs,
{
    pub fn new(panel: P, sensor: T, delay: D, ui: &'a UiQueue, temperature: &'a TemperatureCell) -> Self {
        Self {
            panel,
            sensor,
            delay,
            ui,
            temperature,
            state: PollState::new(),
        }
    }

    /// Wait one period, then sample and act
    pub async fn poll_once(&mut self) {
        self.delay.delay_ms(POLL_PERIOD_MS).await;

        let sample = Sample::take(&mut self.panel, &mut self.sensor);
        self.temperature.publish(sample.temperature);

        match self.state.tick(&sample) {
            PollAction::None => {}
            PollAction::Emit(symbol) => {
                self.ui.post(symbol);
            }
            PollAction::AwaitVendRelease => {
                while self.panel.is_low(Button::Vend) {
                    self.delay.delay_ms(POLL_PERIOD_MS).await;
                }
                self.ui.post(self.state.vend_released());
            }
        }
    }

    pub async fn run(&mut self) -> ! {
        info!("Input poll task started");
        loop {
            self.poll_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use embassy_futures::block_on;

    use super::*;
    use crate::nvm::fake::NoopDelay;

    const FROZEN: u16 = 0; // -7C
    const COOL: u16 = 1700; // about 4.2C

    fn quiet() -> Sample {
        Sample {
            temperature: code_to_celsius(COOL),
            cycle: false,
            add_credit: false,
            vend: false,
        }
    }

    fn run(state: &mut PollState, samples: impl IntoIterator<Item = Sample>) -> Vec<PollAction> {
        samples.into_iter().map(|s| state.tick(&s)).collect()
    }

    #[test]
    fn sensor_transfer_function() {
        assert_eq!(code_to_celsius(0), Celsius::from_num(-7));
        assert_eq!(code_to_celsius(4095), Celsius::from_num(20));
        assert!(temperature_ok(code_to_celsius(COOL)));
        assert!(!temperature_ok(code_to_celsius(FROZEN)));
        assert!(!temperature_ok(code_to_celsius(4095)));
    }

    #[test]
    fn quiet_panel_goes_idle_every_threshold() {
        let mut state = PollState::new();
        let actions = run(&mut state, core::iter::repeat(quiet()).take(90));
        let idle_at: Vec<usize> = actions
            .iter()
            .enumerate()
            .filter(|(_, a)| **a == PollAction::Emit(UiSymbol::Idle))
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(idle_at, [30, 60, 90]);
    }

    #[test]
    fn any_press_restarts_the_idle_count() {
        for press in [Sample { cycle: true, ..quiet() }, Sample { add_credit: true, ..quiet() }] {
            let mut state = PollState::new();
            let idle = PollAction::Emit(UiSymbol::Idle);

            assert!(!run(&mut state, core::iter::repeat(quiet()).take(20)).contains(&idle));
            assert_ne!(state.tick(&press), idle);
            assert!(!run(&mut state, core::iter::repeat(quiet()).take(29)).contains(&idle));
            assert_eq!(state.tick(&quiet()), idle);
        }
    }

    #[test]
    fn held_cycle_repeats() {
        let mut state = PollState::new();
        let held = Sample { cycle: true, ..quiet() };
        let actions = run(&mut state, core::iter::repeat(held).take(7));
        let emit = PollAction::Emit(UiSymbol::Cycle);
        assert_eq!(
            actions,
            [emit, PollAction::None, PollAction::None, emit, PollAction::None, PollAction::None, emit]
        );
    }

    #[test]
    fn release_rearms_hold() {
        let mut state = PollState::new();
        let held = Sample { add_credit: true, ..quiet() };
        let actions = run(&mut state, [held, quiet(), held]);
        let emit = PollAction::Emit(UiSymbol::AddQuarter);
        assert_eq!(actions, [emit, PollAction::None, emit]);
    }

    #[test]
    fn temperature_fault_wins_and_recovers_to_idle() {
        let mut state = PollState::new();
        let frozen = Sample {
            temperature: code_to_celsius(FROZEN),
            cycle: true,
            ..quiet()
        };
        let actions = run(&mut state, [frozen, frozen, quiet()]);
        let fault = PollAction::Emit(UiSymbol::TemperatureFault);
        assert_eq!(actions, [fault, fault, PollAction::Emit(UiSymbol::Idle)]);
    }

    #[test]
    fn vend_gives_idle_head_start() {
        let mut state = PollState::new();
        let vend = Sample { vend: true, ..quiet() };
        assert_eq!(state.tick(&vend), PollAction::AwaitVendRelease);
        assert_eq!(state.vend_released(), UiSymbol::TryVend);

        let actions = run(&mut state, core::iter::repeat(quiet()).take(20));
        assert_eq!(actions.last(), Some(&PollAction::Emit(UiSymbol::Idle)));
        assert!(actions[..19].iter().all(|a| *a == PollAction::None));
    }

    /// Vend stays down for a number of reads
    struct Panel {
        vend_reads: u32,
    }

    impl ButtonPanel for Panel {
        fn is_low(&mut self, button: Button) -> bool {
            if button != Button::Vend || self.vend_reads == 0 {
                return false;
            }
            self.vend_reads -= 1;
            true
        }
    }

    struct Sensor(u16);

    impl TemperatureSensor for Sensor {
        fn read_code(&mut self) -> u16 {
            self.0
        }
    }

    #[test]
    fn vend_fires_once_after_release() {
        let ui = UiQueue::new();
        let cell = TemperatureCell::new();
        let mut poller = InputPoller::new(Panel { vend_reads: 4 }, Sensor(COOL), NoopDelay::default(), &ui, &cell);

        block_on(poller.poll_once());
        assert_eq!(ui.try_receive(), Some(UiSymbol::TryVend));
        assert_eq!(ui.try_receive(), None);
        assert_eq!(cell.latest(), Some(code_to_celsius(COOL)));

        // 1 period before sampling, then 3 more while held
        assert_eq!(poller.delay.waited_ns, 4 * u64::from(POLL_PERIOD_MS) * 1_000_000);
    }
}
