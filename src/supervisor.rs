//! Application supervisor and monitoring
//!
//! Startup banner, the periodic status line and the fatal fault pattern.

use embedded_hal::digital::OutputPin;

use crate::channels::{ConsoleQueue, UiQueue};
use crate::config;
use crate::types::{MachineState, Money, APP_VERSION};

/// Snapshot logged by [`AppSupervisor::print_status`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusReport {
    pub uptime_seconds: u64,
    pub balance: Money,
    pub credit: Money,
    pub servicing: bool,
    pub ui_dropped: u32,
    pub console_dropped: u32,
}

/// Application supervisor responsible for monitoring and lifecycle management
pub struct AppSupervisor<'a> {
    ui: &'a UiQueue,
    console: &'a ConsoleQueue,
    reports: u32,
}

impl<'a> AppSupervisor<'a> {
    pub fn new(ui: &'a UiQueue, console: &'a ConsoleQueue) -> Self {
        Self { ui, console, reports: 0 }
    }

    /// Print application startup banner with board information
    pub fn print_startup_banner(&self) {
        info!("========================================");
        info!(
            "CoinVend v{}.{}.{}",
            APP_VERSION.major,
            APP_VERSION.minor,
            APP_VERSION.patch
        );
        info!("Coin-operated vending machine controller");
        info!("========================================");
        info!("Hardware: RP2040 (Raspberry Pi Pico)");
        info!("Slots: {}", config::SLOT_COUNT);
        info!(
            "Buttons: cycle=GP{} credit=GP{} vend=GP{}",
            config::BTN_CYCLE_PIN,
            config::BTN_ADD_CREDIT_PIN,
            config::BTN_VEND_PIN
        );
        info!(
            "EEPROM: SPI1 CS=GP{} @ {}Hz",
            config::NVM_CS_PIN,
            config::NVM_SPI_FREQUENCY
        );
        info!("Console: UART0 @ {} baud", config::CONSOLE_BAUD);
        info!("========================================");
    }

    /// Print successful initialization message
    pub fn print_init_success(&self, state: &MachineState) {
        info!("CoinVend initialized successfully");
        info!(
            "Restored balance {} credit {}",
            state.balance,
            state.credit
        );
        info!("Waiting for customers...");
    }

    pub fn status(&self, state: &MachineState) -> StatusReport {
        StatusReport {
            uptime_seconds: state.elapsed_ms / 1000,
            balance: state.balance,
            credit: state.credit,
            servicing: state.servicing,
            ui_dropped: self.ui.dropped(),
            console_dropped: self.console.dropped(),
        }
    }

    /// Print current application status
    pub fn print_status(&mut self, state: &MachineState) -> StatusReport {
        let report = self.status(state);
        self.reports += 1;

        let minutes = report.uptime_seconds / 60;
        let hours = minutes / 60;
        if hours > 0 {
            info!("Status: Uptime {}h{}m", hours, minutes % 60);
        } else {
            info!("Status: Uptime {}m", minutes);
        }
        info!(
            "Status: balance={} credit={} servicing={}",
            report.balance,
            report.credit,
            report.servicing
        );
        if report.ui_dropped > 0 || report.console_dropped > 0 {
            warn!(
                "Status: dropped {} UI symbols, {} console bytes",
                report.ui_dropped,
                report.console_dropped
            );
        }

        report
    }

    /// Status lines printed since boot
    pub fn reports(&self) -> u32 {
        self.reports
    }
}

/// Drive every indicator to the fault pattern (all on)
pub fn force_safe_pattern<'p, P: OutputPin + 'p>(outputs: impl IntoIterator<Item = &'p mut P>) {
    error!("Entering fault state");
    light_all(outputs);
}

/// Light every indicator at boot if the watchdog caused the last reset.
///
/// Returns `timed_out` so the caller can log or count it.
pub fn show_watchdog_reset<'p, P: OutputPin + 'p>(
    timed_out: bool,
    outputs: impl IntoIterator<Item = &'p mut P>,
) -> bool {
    if timed_out {
        warn!("Restarted by the watchdog");
        light_all(outputs);
    }
    timed_out
}

fn light_all<'p, P: OutputPin + 'p>(outputs: impl IntoIterator<Item = &'p mut P>) {
    for output in outputs {
        let _ = output.set_high();
    }
}

#[cfg(test)]
mod tests {
    use core::convert::Infallible;

    use embedded_hal::digital::ErrorType;

    use super::*;
    use crate::config::QUARTER;

    #[test]
    fn status_reports_uptime_money_and_drops() {
        let ui = UiQueue::new();
        let console = ConsoleQueue::new();
        for byte in 0..20u8 {
            console.post(byte);
        }

        let mut supervisor = AppSupervisor::new(&ui, &console);
        let mut state = MachineState::new();
        state.elapsed_ms = 3_723_400;
        state.credit = QUARTER;

        let report = supervisor.print_status(&state);
        assert_eq!(report.uptime_seconds, 3723);
        assert_eq!(report.credit, QUARTER);
        assert_eq!(report.ui_dropped, 0);
        assert_eq!(report.console_dropped, 4);
        assert_eq!(supervisor.reports(), 1);
    }

    struct Led(bool);

    impl ErrorType for Led {
        type Error = Infallible;
    }

    impl OutputPin for Led {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0 = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0 = true;
            Ok(())
        }
    }

    #[test]
    fn fault_pattern_lights_everything() {
        let mut leds = [Led(false), Led(true), Led(false)];
        force_safe_pattern(&mut leds);
        assert!(leds.iter().all(|led| led.0));
    }

    #[test]
    fn watchdog_reset_lights_everything() {
        let mut leds = [Led(false), Led(false), Led(false)];
        assert!(show_watchdog_reset(true, &mut leds));
        assert!(leds.iter().all(|led| led.0));
    }

    #[test]
    fn clean_boot_leaves_indicators_alone() {
        let mut leds = [Led(false), Led(true), Led(false)];
        assert!(!show_watchdog_reset(false, &mut leds));
        assert_eq!(leds.map(|led| led.0), [false, true, false]);
    }

    #[test]
    fn fault_pattern_reaches_optional_outputs() {
        let mut leds = [Some(Led(false)), None, Some(Led(false))];
        force_safe_pattern(leds.iter_mut().flatten());
        assert!(leds.iter().flatten().all(|led| led.0));
    }
}
