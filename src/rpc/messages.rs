//! Request and response payloads.
//!
//! Requests are JSON objects tagged by `"COMMAND"`. Identifiers and
//! numbers are accepted either as JSON numbers or as strings, since
//! upstream devices send both:
//!
//! ```text
//! {"COMMAND":"WELL","CHIP_ID":12345,"INDEX":"RIGHT","IN_VOL_UL":300}
//! {"COMMAND":"FEEDBACK","CHIP_ID":"12345","VOL":"312.5","IMAGE":"a.jpg"}
//! {"COMMAND":"PULL","CHIP_ID":12345,"NUM":5}
//! ```
//!
//! Decisions answer with the action payload
//! (`{"action":"ASPIRATE","volume_uL":..,"well_id":..,"side":..}`);
//! everything else answers with a `"status"` envelope so a failure is
//! never mistaken for `NONE`.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::app::commands::{AppCommand, FeedbackInput};
use crate::app::ports::ImageSourcePort;
use crate::app::service::Reply;
use crate::config::WellDefaults;
use crate::control::Action;
use crate::error::{DecodeError, Error, RejectReason};
use crate::registry::Registration;
use crate::vision::{Side, VolumeEstimate};
use crate::well::{WellId, WellSpec, WellState};

// ═══════════════════════════════════════════════════════════════
//  Requests
// ═══════════════════════════════════════════════════════════════

/// A decoded request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Ping,
    Well {
        well: WellId,
        side: Side,
        in_volume_ul: Option<f64>,
        out_volume_ul: Option<f64>,
        media: Option<String>,
    },
    /// The well is optional and only echoed back.
    Estimate {
        well: Option<WellId>,
        side: Side,
        image_ref: String,
    },
    /// Either a ready volume (`VOL`) or an image to estimate (`IMAGE`).
    Feedback {
        well: WellId,
        volume_ul: Option<f64>,
        image_ref: Option<String>,
    },
    Feed {
        well: WellId,
    },
    Dispense {
        well: WellId,
        volume_ul: f64,
    },
    Aspirate {
        well: WellId,
        volume_ul: f64,
    },
    Pull {
        well: WellId,
        count: i64,
    },
    Plunge {
        well: WellId,
        count: i64,
    },
    Clear {
        well: WellId,
    },
    Status {
        well: WellId,
    },
}

impl Request {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Well { .. } => "WELL",
            Self::Estimate { .. } => "ESTIMATE",
            Self::Feedback { .. } => "FEEDBACK",
            Self::Feed { .. } => "FEED",
            Self::Dispense { .. } => "DISPENSE",
            Self::Aspirate { .. } => "ASPIRATE",
            Self::Pull { .. } => "PULL",
            Self::Plunge { .. } => "PLUNGE",
            Self::Clear { .. } => "CLEAR",
            Self::Status { .. } => "STATUS",
        }
    }

    pub fn well(&self) -> Option<&WellId> {
        match self {
            Self::Ping => None,
            Self::Estimate { well, .. } => well.as_ref(),
            Self::Well { well, .. }
            | Self::Feedback { well, .. }
            | Self::Feed { well }
            | Self::Dispense { well, .. }
            | Self::Aspirate { well, .. }
            | Self::Pull { well, .. }
            | Self::Plunge { well, .. }
            | Self::Clear { well }
            | Self::Status { well } => Some(well),
        }
    }

    /// Translate into a service command, loading any referenced image.
    ///
    /// Returns `Ok(None)` for requests answered without the service.
    pub fn into_command(
        self,
        defaults: &WellDefaults,
        images: &impl ImageSourcePort,
    ) -> Result<Option<AppCommand>, Error> {
        let cmd = match self {
            Self::Ping => return Ok(None),
            Self::Well {
                well,
                side,
                in_volume_ul,
                out_volume_ul,
                media,
            } => {
                let mut spec = WellSpec::with_defaults(side, defaults);
                if let Some(v) = in_volume_ul {
                    spec.in_volume_ul = v;
                }
                if let Some(v) = out_volume_ul {
                    spec.out_volume_ul = v;
                }
                if let Some(m) = media {
                    spec.media = m;
                }
                AppCommand::Register { well, spec }
            }
            Self::Estimate { side, image_ref, .. } => AppCommand::Estimate {
                side,
                image: images.load(&image_ref)?,
            },
            Self::Feedback {
                well,
                volume_ul,
                image_ref,
            } => {
                let image_ref = image_ref.unwrap_or_default();
                let input = match volume_ul {
                    Some(v) => FeedbackInput::Volume(v),
                    None if !image_ref.is_empty() => FeedbackInput::Image(images.load(&image_ref)?),
                    None => return Err(DecodeError::MissingField("VOL").into()),
                };
                AppCommand::Feedback {
                    well,
                    image_ref,
                    input,
                }
            }
            Self::Feed { well } => AppCommand::Feed { well },
            Self::Dispense { well, volume_ul } => AppCommand::Dispense { well, volume_ul },
            Self::Aspirate { well, volume_ul } => AppCommand::Aspirate { well, volume_ul },
            Self::Pull { well, count } => AppCommand::Pull { well, count },
            Self::Plunge { well, count } => AppCommand::Plunge { well, count },
            Self::Clear { well } => AppCommand::ClearTally { well },
            Self::Status { well } => AppCommand::Status { well },
        };
        Ok(Some(cmd))
    }
}

/// Decode one frame into a [`Request`].
///
/// The command tag may carry the legacy `-REQUEST` suffix.
pub fn decode_request(frame: &[u8]) -> Result<Request, Error> {
    let value: Value =
        serde_json::from_slice(frame).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(DecodeError::Malformed("expected a JSON object".into()).into());
    };
    let command = obj
        .get("COMMAND")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingField("COMMAND"))?;
    let command = command.strip_suffix("-REQUEST").unwrap_or(command);

    let req = match command.to_ascii_uppercase().as_str() {
        "PING" => Request::Ping,
        "WELL" => Request::Well {
            well: well_id(&obj)?,
            side: side(&obj)?,
            in_volume_ul: opt_number(&obj, "IN_VOL_UL")?,
            out_volume_ul: opt_number(&obj, "OUT_VOL_UL")?,
            media: opt_text(&obj, "MEDIA"),
        },
        "ESTIMATE" => Request::Estimate {
            well: opt_text(&obj, "CHIP_ID").map(|raw| WellId::new(&raw)).transpose()?,
            side: side(&obj)?,
            image_ref: opt_text(&obj, "IMAGE").ok_or(DecodeError::MissingField("IMAGE"))?,
        },
        "FEEDBACK" => Request::Feedback {
            well: well_id(&obj)?,
            volume_ul: opt_number(&obj, "VOL")?,
            image_ref: opt_text(&obj, "IMAGE"),
        },
        "FEED" => Request::Feed { well: well_id(&obj)? },
        "DISPENSE" => Request::Dispense {
            well: well_id(&obj)?,
            volume_ul: number(&obj, "VOL")?,
        },
        "ASPIRATE" => Request::Aspirate {
            well: well_id(&obj)?,
            volume_ul: number(&obj, "VOL")?,
        },
        "PULL" => Request::Pull {
            well: well_id(&obj)?,
            count: integer(&obj, "NUM")?,
        },
        "PLUNGE" => Request::Plunge {
            well: well_id(&obj)?,
            count: integer(&obj, "NUM")?,
        },
        "CLEAR" => Request::Clear { well: well_id(&obj)? },
        "STATUS" => Request::Status { well: well_id(&obj)? },
        _ => return Err(DecodeError::UnknownCommand.into()),
    };
    Ok(req)
}

// ── Field helpers ─────────────────────────────────────────────

fn well_id(obj: &Map<String, Value>) -> Result<WellId, Error> {
    let raw = opt_text(obj, "CHIP_ID").ok_or(DecodeError::MissingField("CHIP_ID"))?;
    WellId::new(&raw)
}

fn side(obj: &Map<String, Value>) -> Result<Side, Error> {
    let raw = opt_text(obj, "INDEX").ok_or(DecodeError::MissingField("INDEX"))?;
    raw.parse()
        .map_err(|()| DecodeError::Malformed(format!("INDEX must be LEFT or RIGHT, got '{raw}'")).into())
}

/// Strings as-is, numbers rendered; anything else is absent.
fn opt_text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn opt_number(obj: &Map<String, Value>, key: &'static str) -> Result<Option<f64>, Error> {
    let parsed = match obj.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| DecodeError::Malformed(format!("{key} is not a number")).into())
}

fn number(obj: &Map<String, Value>, key: &'static str) -> Result<f64, Error> {
    opt_number(obj, key)?.ok_or_else(|| DecodeError::MissingField(key).into())
}

fn integer(obj: &Map<String, Value>, key: &'static str) -> Result<i64, Error> {
    let v = number(obj, key)?;
    if v.fract() != 0.0 || !v.is_finite() || v.abs() > i64::MAX as f64 {
        return Err(DecodeError::Malformed(format!("{key} must be an integer")).into());
    }
    Ok(v as i64)
}

// ═══════════════════════════════════════════════════════════════
//  Responses
// ═══════════════════════════════════════════════════════════════

/// Outcome class of a non-decision response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    Rejected,
    OutOfBounds,
    MissingIdentifier,
    Error,
}

/// Action payload of a feedback decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionPayload {
    #[serde(flatten)]
    pub action: Action,
    /// Present on pump actions only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub well_id: Option<WellId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
}

/// Everything that is not a decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub well_id: Option<WellId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<u32>,
    #[serde(rename = "volume_uL", skip_serializing_if = "Option::is_none")]
    pub volume_ul: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<WellState>,
}

impl Envelope {
    pub fn new(status: Status, command: Option<&'static str>, well_id: Option<WellId>) -> Self {
        Self {
            status,
            command,
            well_id,
            detail: None,
            reason: None,
            area: None,
            volume_ul: None,
            side: None,
            state: None,
        }
    }

    fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A response line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Decision(DecisionPayload),
    Envelope(Envelope),
}

impl Response {
    /// Map a service outcome to its wire form.
    pub fn from_outcome(
        command: &'static str,
        well: Option<WellId>,
        outcome: Result<Reply, Error>,
    ) -> Self {
        match outcome {
            Ok(reply) => Self::from_reply(command, well, reply),
            Err(e) => Self::from_error(Some(command), well, &e),
        }
    }

    pub fn pong() -> Self {
        Self::Envelope(Envelope::new(Status::Ok, Some("PING"), None).detail("PONG"))
    }

    fn from_reply(command: &'static str, well: Option<WellId>, reply: Reply) -> Self {
        let ok = Envelope::new(Status::Ok, Some(command), well);
        match reply {
            Reply::Decision { well, side, action } => {
                let addressed = matches!(
                    action,
                    Action::Aspirate { .. } | Action::Dispense { .. } | Action::Pull { .. }
                );
                Self::Decision(DecisionPayload {
                    action,
                    well_id: addressed.then_some(well),
                    side: addressed.then_some(side),
                })
            }
            Reply::Registered(r) => Self::Envelope(ok.detail(match r {
                Registration::Created => "created",
                Registration::Replaced => "replaced",
            })),
            Reply::Estimate(VolumeEstimate::Measured { area, volume_ul }) => Self::Envelope(Envelope {
                area: Some(area),
                volume_ul: Some(volume_ul),
                ..ok
            }),
            Reply::Estimate(VolumeEstimate::Rejected { reason }) => Self::Envelope(Envelope {
                status: Status::Rejected,
                reason: Some(reason),
                ..ok
            }),
            Reply::Done => Self::Envelope(ok),
            Reply::Status(w) => Self::Envelope(Envelope {
                side: Some(w.spec.side),
                state: Some(w.state),
                ..ok
            }),
        }
    }

    /// Map an error to its envelope. `command` is `None` when the frame
    /// never decoded far enough to name one.
    pub fn from_error(command: Option<&'static str>, well: Option<WellId>, error: &Error) -> Self {
        let status = match error {
            Error::Rejected(_) => Status::Rejected,
            Error::OutOfBounds(_) => Status::OutOfBounds,
            Error::MissingIdentifier(_) | Error::Decode(DecodeError::MissingField("CHIP_ID")) => {
                Status::MissingIdentifier
            }
            _ => Status::Error,
        };
        let mut env = Envelope::new(status, command, well).detail(error.to_string());
        if let Error::Rejected(reason) = error {
            env.reason = Some(*reason);
        }
        Self::Envelope(env)
    }

    pub fn to_json(&self) -> String {
        // Every field is a plain number, string or map with string keys.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"status":"ERROR"}"#.to_owned())
    }
}

/// Outbound capture request for the camera collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureRequest {
    #[serde(rename = "COMMAND")]
    pub command: &'static str,
    #[serde(rename = "CHIP_ID")]
    pub well: WellId,
    #[serde(rename = "INDEX")]
    pub side: Side,
}

impl CaptureRequest {
    pub fn new(well: WellId, side: Side) -> Self {
        Self {
            command: "PICTURE-REQUEST",
            well,
            side,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
