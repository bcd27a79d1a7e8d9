//! Feedback decision engine.
//!
//! Compares a fresh volume reading against what the pumps should have
//! moved and picks one corrective action:
//!
//! ```text
//!                 adjusted = raw − offset + accumulated
//!                 error    = expected_in − adjusted
//!
//!  iteration < 1 ──▶ fix offset, no action
//!
//!         exp − band          exp          exp + band
//!  ───────────┼────────────────┼────────────────┼───────────
//!    too low  │         within band             │  too high
//!             │         tally = 0, None         │  Dispense(min(adj − exp, cap))
//!   tally < 5 : Aspirate(round(error))          │  tally = 0
//!   tally < 7 : Pull(tally)
//!   otherwise : Alert
//!   (tally += 1 on every rung)
//! ```
//!
//! [`FeedbackController::decide`] is pure: it never touches the input
//! state and returns the successor state inside the [`Decision`].

use serde::{Deserialize, Serialize};

use crate::config::FeedbackConfig;
use crate::vision::Side;
use crate::well::{WellId, WellState};

// ───────────────────────────────────────────────────────────────
// Types
// ───────────────────────────────────────────────────────────────

/// Corrective action chosen for one reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    None,
    Aspirate {
        #[serde(rename = "volume_uL")]
        volume_ul: f64,
    },
    Dispense {
        #[serde(rename = "volume_uL")]
        volume_ul: f64,
    },
    Pull { count: u32 },
    Alert { text: String },
}

impl Action {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Whether a verification capture should follow this action.
    pub fn wants_follow_up(&self) -> bool {
        matches!(self, Self::Aspirate { .. } | Self::Pull { .. })
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Aspirate { .. } => "ASPIRATE",
            Self::Dispense { .. } => "DISPENSE",
            Self::Pull { .. } => "PULL",
            Self::Alert { .. } => "ALERT",
        }
    }
}

/// Informational observations made while deciding. They never change
/// the chosen action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "note", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Note {
    /// The reservoir reading dropped by more than the swap threshold.
    ReservoirSwapped { previous_ul: f64, accumulated_ul: f64 },
    /// The raw reading is above the high-volume warning level.
    HighVolume { volume_ul: f64 },
    /// First cycle: the offset was fixed.
    OffsetCalibrated { offset_ul: f64 },
}

/// A non-rejected volume reading.
#[derive(Debug, Clone, Copy)]
pub struct Reading<'a> {
    pub side: Side,
    pub volume_ul: f64,
    pub image_ref: &'a str,
    pub timestamp_secs: u64,
}

/// One audit row per feedback cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeLogRecord {
    pub timestamp_secs: u64,
    pub well: WellId,
    pub iteration: u32,
    pub expected_in_ul: f64,
    pub expected_out_ul: f64,
    pub raw_volume_ul: f64,
    pub offset_ul: f64,
    pub accumulated_ul: f64,
    pub adjusted_ul: f64,
    pub error_ul: f64,
    /// Tally the decision was taken on.
    pub retry_tally: u32,
    pub action: Action,
    pub image_ref: String,
    pub side: Side,
}

/// Output of [`FeedbackController::decide`].
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: Action,
    pub notes: Vec<Note>,
    /// Successor state; the caller commits it.
    pub state: WellState,
    pub record: VolumeLogRecord,
}

// ───────────────────────────────────────────────────────────────
// Controller
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct FeedbackController {
    config: FeedbackConfig,
}

impl FeedbackController {
    pub fn new(config: FeedbackConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    /// Decide on one reading.
    pub fn decide(&self, well: &WellId, state: &WellState, reading: &Reading<'_>) -> Decision {
        let cfg = &self.config;
        let raw = reading.volume_ul;
        let mut next = *state;
        let mut notes = Vec::new();

        if state.reservoir_volume_ul > raw + cfg.swap_threshold_ul {
            next.accumulated_volume_ul += state.reservoir_volume_ul;
            notes.push(Note::ReservoirSwapped {
                previous_ul: state.reservoir_volume_ul,
                accumulated_ul: next.accumulated_volume_ul,
            });
        }

        if raw > cfg.high_volume_warn_ul {
            notes.push(Note::HighVolume { volume_ul: raw });
        }

        let expected = state.expected_in_volume_ul;
        let mut adjusted = raw - next.reservoir_offset_ul + next.accumulated_volume_ul;
        let mut error = expected - adjusted;

        let action = if state.iteration < 1 {
            next.reservoir_offset_ul = (raw - expected).max(0.0);
            notes.push(Note::OffsetCalibrated {
                offset_ul: next.reservoir_offset_ul,
            });
            adjusted = raw - next.reservoir_offset_ul + next.accumulated_volume_ul;
            error = expected - adjusted;
            Action::None
        } else if (adjusted - expected).abs() < cfg.deadband_ul {
            next.retry_tally = 0;
            Action::None
        } else if adjusted < expected - cfg.deadband_ul {
            let tally = state.retry_tally;
            next.retry_tally = tally.saturating_add(1);
            if tally < cfg.aspirate_attempts {
                Action::Aspirate {
                    volume_ul: error.round(),
                }
            } else if tally < cfg.pull_attempts {
                Action::Pull { count: tally }
            } else {
                Action::Alert {
                    text: format!(
                        "HELP! {well} is stuck. Expectation {expected:.1} uL, estimation {adjusted:.1} uL"
                    ),
                }
            }
        } else if adjusted > expected + cfg.deadband_ul {
            next.retry_tally = 0;
            Action::Dispense {
                volume_ul: (adjusted - expected).min(cfg.dispense_cap_ul),
            }
        } else {
            // Exactly on the band edge.
            Action::None
        };

        next.reservoir_volume_ul = raw;

        let record = VolumeLogRecord {
            timestamp_secs: reading.timestamp_secs,
            well: well.clone(),
            iteration: state.iteration,
            expected_in_ul: state.expected_in_volume_ul,
            expected_out_ul: state.expected_out_volume_ul,
            raw_volume_ul: raw,
            offset_ul: next.reservoir_offset_ul,
            accumulated_ul: next.accumulated_volume_ul,
            adjusted_ul: adjusted,
            error_ul: error,
            retry_tally: state.retry_tally,
            action: action.clone(),
            image_ref: reading.image_ref.to_owned(),
            side: reading.side,
        };

        Decision {
            action,
            notes,
            state: next,
            record,
        }
    }
}
