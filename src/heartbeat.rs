//! Elapsed-time clock and liveness LED
//!
//! Advances the machine clock by one period per tick, blinks the heartbeat
//! LED and hands the supervisor a snapshot for the periodic status line.

use embedded_hal::digital::StatefulOutputPin;
use embedded_hal_async::delay::DelayNs;

use crate::config::{LIVENESS_TOGGLE_TICKS, STATUS_REPORT_TICKS, TICK_PERIOD_MS};
use crate::machine::{Machine, Operation};
use crate::nvm::CellStore;
use crate::supervisor::AppSupervisor;

pub struct Heartbeat<'a, S, L, D> {
    machine: &'a Machine<'a, S>,
    supervisor: AppSupervisor<'a>,
    led: L,
    delay: D,
    ticks: u32,
}

impl<'a, S, L, D> Heartbeat<'a, S, L, D>
where
    S: CellStore,
    L: StatefulOutputPin,
    D: DelayNs,
{
    pub fn new(machine: &'a Machine<'a, S>, supervisor: AppSupervisor<'a>, led: L, delay: D) -> Self {
        Self {
            machine,
            supervisor,
            led,
            delay,
            ticks: 0,
        }
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn led(&mut self) -> &mut L {
        &mut self.led
    }

    pub fn supervisor(&self) -> &AppSupervisor<'a> {
        &self.supervisor
    }

    /// Wait one period, then advance the clock
    pub async fn tick_once(&mut self) {
        self.delay.delay_ms(TICK_PERIOD_MS).await;
        self.machine.apply(Operation::AdvanceTime(TICK_PERIOD_MS)).await;
        self.ticks = self.ticks.wrapping_add(1);

        if self.ticks % LIVENESS_TOGGLE_TICKS == 0 {
            let _ = self.led.toggle();
        }

        if self.ticks % STATUS_REPORT_TICKS == 0 {
            let state = self.machine.get().await;
            self.supervisor.print_status(&state);
        }
    }

    pub async fn run(&mut self) -> ! {
        info!("Heartbeat task started");
        loop {
            self.tick_once().await;
        }
    }
}
