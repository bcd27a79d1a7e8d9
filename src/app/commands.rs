//! Inbound commands to the application service.
//!
//! These represent actions requested by the outside world (the request
//! stream, the scheduler, the CLI) that the
//! [`AppService`](super::service::AppService) interprets and acts upon.

use image::RgbImage;

use crate::vision::Side;
use crate::well::{WellId, WellSpec};

/// Where a feedback volume comes from.
#[derive(Debug, Clone)]
pub enum FeedbackInput {
    /// A volume already estimated upstream (uL).
    Volume(f64),
    /// A frame to run through the estimator.
    Image(RgbImage),
}

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone)]
pub enum AppCommand {
    /// Create or overwrite a well.
    Register { well: WellId, spec: WellSpec },

    /// Estimate a volume without touching any well.
    Estimate { side: Side, image: RgbImage },

    /// Run one feedback cycle on a fresh reading.
    Feedback {
        well: WellId,
        image_ref: String,
        input: FeedbackInput,
    },

    /// Run one replenishment cycle.
    Feed { well: WellId },

    /// Manual pump operations.
    Dispense { well: WellId, volume_ul: f64 },
    Aspirate { well: WellId, volume_ul: f64 },
    Pull { well: WellId, count: i64 },
    Plunge { well: WellId, count: i64 },

    /// Human acknowledgement of an escalated well.
    ClearTally { well: WellId },

    /// Read back a well's state.
    Status { well: WellId },
}

impl AppCommand {
    /// Target well, if the command has one.
    pub fn well(&self) -> Option<&WellId> {
        match self {
            Self::Register { well, .. }
            | Self::Feedback { well, .. }
            | Self::Feed { well }
            | Self::Dispense { well, .. }
            | Self::Aspirate { well, .. }
            | Self::Pull { well, .. }
            | Self::Plunge { well, .. }
            | Self::ClearTally { well }
            | Self::Status { well } => Some(well),
            Self::Estimate { .. } => None,
        }
    }
}
