//! Replenishment cycle plan: aspirate the spent media, settle, dispense
//! fresh media.

use std::time::Duration;

use crate::config::ReplenishConfig;
use crate::well::WellSpec;

/// Pump steps of one replenishment cycle, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplenishPlan {
    /// Aspirations, each at most one syringe load.
    pub aspirate_chunks_ul: Vec<f64>,
    /// Settling time between the last aspiration and the dispense.
    pub pause: Duration,
    pub dispense_ul: f64,
}

impl ReplenishPlan {
    pub fn for_well(spec: &WellSpec, cfg: &ReplenishConfig) -> Self {
        Self {
            aspirate_chunks_ul: split_aspiration(spec.out_volume_ul, cfg.chunk_ul),
            pause: Duration::from_secs(u64::from(cfg.pause_secs)),
            dispense_ul: spec.in_volume_ul,
        }
    }

    pub fn total_aspirated_ul(&self) -> f64 {
        self.aspirate_chunks_ul.iter().sum()
    }
}

/// Full chunks while more than one chunk remains, then the remainder.
/// Zero or negative volumes produce no steps.
pub fn split_aspiration(volume_ul: f64, chunk_ul: f64) -> Vec<f64> {
    if volume_ul <= 0.0 || chunk_ul <= 0.0 {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut remaining = volume_ul;
    while remaining > chunk_ul {
        chunks.push(chunk_ul);
        remaining -= chunk_ul;
    }
    if remaining > 0.0 {
        chunks.push(remaining);
    }
    chunks
}
