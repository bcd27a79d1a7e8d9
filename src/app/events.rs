//! Outbound application events.
//!
//! The [`AppService`](super::service::AppService) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log to the console, append to the
//! per-well volume log, publish on a bus, etc.

use crate::control::{Action, Note, VolumeLogRecord};
use crate::error::{Error, RejectReason};
use crate::vision::{Side, VolumeEstimate};
use crate::well::WellId;

/// A pump operation that completed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PumpOp {
    Dispense(f64),
    Aspirate(f64),
    Pull(u8),
    Plunge(u8),
}

/// Structured events emitted by the application core.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A well was registered (`replaced` when it overwrote one).
    Registered { well: WellId, side: Side, replaced: bool },

    /// A standalone estimate finished.
    Estimated { side: Side, estimate: VolumeEstimate },

    /// A frame failed the quality gate.
    Rejected { well: Option<WellId>, reason: RejectReason },

    /// An observation made while deciding.
    Noted { well: WellId, note: Note },

    /// A feedback decision was committed.
    Decided { well: WellId, side: Side, action: Action },

    /// Audit row of a feedback cycle.
    VolumeLogged(VolumeLogRecord),

    /// A pump operation completed and was booked.
    Pumped { well: WellId, op: PumpOp },

    /// A well needs a human.
    Alert { well: WellId, text: String },

    /// A pump operation was refused or failed.
    ActuationFailed { well: WellId, error: Error },

    /// A replenishment cycle completed.
    Replenished { well: WellId, iteration: u32 },

    /// The retry tally was cleared by hand.
    TallyCleared { well: WellId, previous: u32 },

    /// A verification capture was requested.
    FollowUpScheduled { well: WellId, side: Side, delay_secs: u32 },
}
