//! Simulated pump and valve controller.
//!
//! Implements [`ActuatorPort`] without hardware: every operation is
//! logged, optionally delayed by a reactor timer to mimic transfer time,
//! and recorded. A fault can be injected for the next operation.

use core::cell::{Cell, RefCell};
use core::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::info;

use crate::app::events::PumpOp;
use crate::app::ports::ActuatorPort;
use crate::error::ActuatorError;
use crate::well::WellId;

struct SimState {
    history: Vec<(WellId, PumpOp)>,
    fault: Option<ActuatorError>,
}

pub struct SimulatedPump {
    /// Simulated duration of every operation.
    delay: Duration,
    state: Mutex<CriticalSectionRawMutex, RefCell<SimState>>,
    busy: Mutex<CriticalSectionRawMutex, Cell<usize>>,
}

impl Default for SimulatedPump {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl SimulatedPump {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: Mutex::new(RefCell::new(SimState {
                history: Vec::new(),
                fault: None,
            })),
            busy: Mutex::new(Cell::new(0)),
        }
    }

    /// Fail the next operation with `error`.
    pub fn inject_fault(&self, error: ActuatorError) {
        self.state.lock(|s| s.borrow_mut().fault = Some(error));
    }

    /// Completed operations, oldest first.
    pub fn history(&self) -> Vec<(WellId, PumpOp)> {
        self.state.lock(|s| s.borrow().history.clone())
    }

    /// Operations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.busy.lock(Cell::get)
    }

    async fn run(&self, well: &WellId, op: PumpOp) -> Result<(), ActuatorError> {
        if let Some(e) = self.state.lock(|s| s.borrow_mut().fault.take()) {
            info!("SIM | {} {:?} failed: {}", well, op, e);
            return Err(e);
        }
        self.busy.lock(|b| b.set(b.get() + 1));
        if !self.delay.is_zero() {
            async_io_mini::Timer::after(self.delay).await;
        }
        self.busy.lock(|b| b.set(b.get() - 1));
        info!("SIM | {} {:?} done", well, op);
        self.state
            .lock(|s| s.borrow_mut().history.push((well.clone(), op)));
        Ok(())
    }
}

impl ActuatorPort for SimulatedPump {
    async fn dispense(&self, well: &WellId, volume_ul: f64) -> Result<(), ActuatorError> {
        self.run(well, PumpOp::Dispense(volume_ul)).await
    }

    async fn aspirate(&self, well: &WellId, volume_ul: f64) -> Result<(), ActuatorError> {
        self.run(well, PumpOp::Aspirate(volume_ul)).await
    }

    async fn pull(&self, well: &WellId, count: u8) -> Result<(), ActuatorError> {
        self.run(well, PumpOp::Pull(count)).await
    }

    async fn plunge(&self, well: &WellId, count: u8) -> Result<(), ActuatorError> {
        self.run(well, PumpOp::Plunge(count)).await
    }
}
