//! Well identity, registration parameters and mutable control state.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::config::WellDefaults;
use crate::error::Error;
use crate::vision::Side;

/// Maximum identifier length in bytes.
pub const MAX_WELL_ID_LEN: usize = 32;

// ───────────────────────────────────────────────────────────────
// WellId
// ───────────────────────────────────────────────────────────────

/// Registry key of a well (the chip identifier).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WellId(heapless::String<MAX_WELL_ID_LEN>);

impl WellId {
    /// Non-empty, at most [`MAX_WELL_ID_LEN`] bytes, no path separators.
    pub fn new(raw: &str) -> Result<Self, Error> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.contains(['/', '\\']) {
            return Err(Error::InvalidIdentifier);
        }
        let mut s = heapless::String::new();
        s.push_str(trimmed).map_err(|()| Error::InvalidIdentifier)?;
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for WellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for WellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WellId({:?})", self.as_str())
    }
}

impl TryFrom<String> for WellId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<WellId> for String {
    fn from(id: WellId) -> Self {
        id.as_str().to_owned()
    }
}

// ───────────────────────────────────────────────────────────────
// WellSpec
// ───────────────────────────────────────────────────────────────

/// Registration parameters of a well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellSpec {
    /// Which tube in the frame the estimator reads.
    pub side: Side,
    /// Volume dispensed per replenishment cycle (uL).
    pub in_volume_ul: f64,
    /// Volume aspirated per replenishment cycle (uL).
    pub out_volume_ul: f64,
    /// Media reservoir name.
    pub media: String,
}

impl WellSpec {
    pub fn with_defaults(side: Side, defaults: &WellDefaults) -> Self {
        Self {
            side,
            in_volume_ul: defaults.in_volume_ul,
            out_volume_ul: defaults.out_volume_ul,
            media: defaults.media.clone(),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// WellState
// ───────────────────────────────────────────────────────────────

/// Feedback-loop state of one well.
///
/// `expected_*` only ever grow. `accumulated_volume_ul` only ever grows.
/// `reservoir_offset_ul` is fixed on the first feedback cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WellState {
    /// Total volume dispensed into the well (uL).
    pub expected_in_volume_ul: f64,
    /// Total volume aspirated from the well (uL).
    pub expected_out_volume_ul: f64,
    /// Last raw reservoir estimate (uL).
    pub reservoir_volume_ul: f64,
    /// Bias fixed on the first feedback cycle (uL).
    pub reservoir_offset_ul: f64,
    /// Volume carried over from swapped reservoirs (uL).
    pub accumulated_volume_ul: f64,
    /// Consecutive corrective cycles since the last success.
    pub retry_tally: u32,
    /// Completed replenishment cycles.
    pub iteration: u32,
}

impl WellState {
    /// Book a completed dispense.
    pub fn record_dispense(&mut self, volume_ul: f64) {
        self.expected_in_volume_ul += volume_ul;
    }

    /// Book a completed aspiration.
    pub fn record_aspirate(&mut self, volume_ul: f64) {
        self.expected_out_volume_ul += volume_ul;
    }

    /// Whether the well has escalated past the retry ladder.
    pub fn is_stuck(&self, alert_after: u32) -> bool {
        self.retry_tally >= alert_after
    }
}

// ───────────────────────────────────────────────────────────────
// Well
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Well {
    pub id: WellId,
    pub spec: WellSpec,
    pub state: WellState,
}

impl Well {
    pub fn new(id: WellId, spec: WellSpec) -> Self {
        Self {
            id,
            spec,
            state: WellState::default(),
        }
    }
}
