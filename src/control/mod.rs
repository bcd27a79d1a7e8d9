//! Control logic: feedback decisions, replenishment planning and pump
//! limit checks.

pub mod feedback;
pub mod replenish;

pub use feedback::{Action, Decision, FeedbackController, Note, Reading, VolumeLogRecord};
pub use replenish::ReplenishPlan;

use crate::config::PumpLimits;
use crate::error::BoundsError;

impl PumpLimits {
    /// Volumes must be finite and in `0..=max`.
    pub fn check_dispense(&self, volume_ul: f64) -> Result<(), BoundsError> {
        if in_range(volume_ul, self.max_dispense_ul) {
            Ok(())
        } else {
            Err(BoundsError::Dispense {
                volume_ul,
                max_ul: self.max_dispense_ul,
            })
        }
    }

    pub fn check_aspirate(&self, volume_ul: f64) -> Result<(), BoundsError> {
        if in_range(volume_ul, self.max_aspirate_ul) {
            Ok(())
        } else {
            Err(BoundsError::Aspirate {
                volume_ul,
                max_ul: self.max_aspirate_ul,
            })
        }
    }

    /// Returns the count narrowed to `u8`.
    pub fn check_pull(&self, count: i64) -> Result<u8, BoundsError> {
        self.narrow_count(count).ok_or(BoundsError::Pull {
            count,
            max: self.max_count,
        })
    }

    pub fn check_plunge(&self, count: i64) -> Result<u8, BoundsError> {
        self.narrow_count(count).ok_or(BoundsError::Plunge {
            count,
            max: self.max_count,
        })
    }

    fn narrow_count(&self, count: i64) -> Option<u8> {
        u8::try_from(count).ok().filter(|c| *c <= self.max_count)
    }
}

fn in_range(volume_ul: f64, max_ul: f64) -> bool {
    volume_ul.is_finite() && (0.0..=max_ul).contains(&volume_ul)
}
