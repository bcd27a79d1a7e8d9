//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing one line per application event to
//! the `log` facade. A bus publisher or uploader would implement the
//! same trait.

use log::{info, warn};

use crate::app::events::{AppEvent, PumpOp};
use crate::app::ports::EventSink;
use crate::control::{Action, Note};
use crate::vision::VolumeEstimate;

/// Adapter that logs every [`AppEvent`] to the console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&self, event: &AppEvent) {
        match event {
            AppEvent::Registered {
                well,
                side,
                replaced,
            } => {
                info!(
                    "WELL | {} side={} {}",
                    well,
                    side,
                    if *replaced { "replaced" } else { "created" }
                );
            }
            AppEvent::Estimated { side, estimate } => match estimate {
                VolumeEstimate::Measured { area, volume_ul } => {
                    info!("ESTIMATE | side={} area={}px volume={:.1}uL", side, area, volume_ul);
                }
                VolumeEstimate::Rejected { reason } => {
                    info!("ESTIMATE | side={} rejected: {}", side, reason);
                }
            },
            AppEvent::Rejected { well, reason } => match well {
                Some(w) => warn!("REJECT | {} {}", w, reason),
                None => warn!("REJECT | {}", reason),
            },
            AppEvent::Noted { well, note } => match note {
                Note::ReservoirSwapped {
                    previous_ul,
                    accumulated_ul,
                } => info!(
                    "NOTE | {} reservoir swapped (previous {:.1}uL, accumulated {:.1}uL)",
                    well, previous_ul, accumulated_ul
                ),
                Note::HighVolume { volume_ul } => {
                    warn!("NOTE | {} high volume {:.1}uL", well, volume_ul)
                }
                Note::OffsetCalibrated { offset_ul } => {
                    info!("NOTE | {} offset fixed at {:.1}uL", well, offset_ul)
                }
            },
            AppEvent::Decided { well, side, action } => match action {
                Action::None => info!("FEEDBACK | {} side={} within band", well, side),
                Action::Aspirate { volume_ul } => {
                    info!("FEEDBACK | {} side={} ASPIRATE {:.0}uL", well, side, volume_ul)
                }
                Action::Dispense { volume_ul } => {
                    info!("FEEDBACK | {} side={} DISPENSE {:.0}uL", well, side, volume_ul)
                }
                Action::Pull { count } => info!("FEEDBACK | {} side={} PULL x{}", well, side, count),
                Action::Alert { .. } => info!("FEEDBACK | {} side={} ALERT", well, side),
            },
            AppEvent::VolumeLogged(r) => {
                info!(
                    "FEEDBACK | {} it={} raw={:.1} off={:.1} acc={:.1} adj={:.1} err={:.1} tally={} img={}",
                    r.well,
                    r.iteration,
                    r.raw_volume_ul,
                    r.offset_ul,
                    r.accumulated_ul,
                    r.adjusted_ul,
                    r.error_ul,
                    r.retry_tally,
                    r.image_ref
                );
            }
            AppEvent::Pumped { well, op } => match op {
                PumpOp::Dispense(v) => info!("ACTION | {} dispensed {:.0}uL", well, v),
                PumpOp::Aspirate(v) => info!("ACTION | {} aspirated {:.0}uL", well, v),
                PumpOp::Pull(n) => info!("ACTION | {} pulled x{}", well, n),
                PumpOp::Plunge(n) => info!("ACTION | {} plunged x{}", well, n),
            },
            AppEvent::Alert { well, text } => {
                warn!("ALERT | {} {}", well, text);
            }
            AppEvent::ActuationFailed { well, error } => {
                warn!("FAULT | {} {}", well, error);
            }
            AppEvent::Replenished { well, iteration } => {
                info!("FEED | {} cycle {} complete", well, iteration);
            }
            AppEvent::TallyCleared { well, previous } => {
                info!("CLEAR | {} retry tally {} -> 0", well, previous);
            }
            AppEvent::FollowUpScheduled {
                well,
                side,
                delay_secs,
            } => {
                info!("FOLLOW-UP | {} side={} capture in {}s", well, side, delay_secs);
            }
        }
    }
}
