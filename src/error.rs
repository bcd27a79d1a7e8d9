//! Unified error types for the well controller.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! service's response mapping uniform. Sub-enums carry the detail each
//! layer needs to report back to the caller.

use core::fmt;

use crate::well::WellId;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The image failed a quality gate; no new information.
    Rejected(RejectReason),
    /// A volume or count is outside the declared pump limits.
    OutOfBounds(BoundsError),
    /// The well identifier is not registered.
    MissingIdentifier(WellId),
    /// The well identifier is empty or too long.
    InvalidIdentifier,
    /// The estimator could not run on the supplied image.
    Estimate(EstimateError),
    /// The calibration fit cannot proceed.
    Fit(FitError),
    /// An actuator command failed.
    Actuator(ActuatorError),
    /// Configuration is invalid.
    Config(&'static str),
    /// An inbound payload could not be decoded.
    Decode(DecodeError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(e) => write!(f, "image rejected: {e}"),
            Self::OutOfBounds(e) => write!(f, "out of bounds: {e}"),
            Self::MissingIdentifier(id) => write!(f, "unknown well '{id}'"),
            Self::InvalidIdentifier => write!(f, "invalid well identifier"),
            Self::Estimate(e) => write!(f, "estimate: {e}"),
            Self::Fit(e) => write!(f, "calibration fit: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Decode(e) => write!(f, "decode: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Image rejection
// ---------------------------------------------------------------------------

/// Why the quality gate refused an image.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RejectReason {
    /// Laplacian variance below the blur threshold.
    Blurry { sharpness: f64 },
    /// Reference patch is lit in every channel (panel on).
    PanelLit { mean_rgb: [f64; 3] },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blurry { sharpness } => write!(f, "too blurry (sharpness {sharpness:.1})"),
            Self::PanelLit { mean_rgb } => write!(
                f,
                "panel lit (patch mean R={:.0} G={:.0} B={:.0})",
                mean_rgb[0], mean_rgb[1], mean_rgb[2]
            ),
        }
    }
}

impl From<RejectReason> for Error {
    fn from(e: RejectReason) -> Self {
        Self::Rejected(e)
    }
}

// ---------------------------------------------------------------------------
// Pump limit violations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundsError {
    Dispense { volume_ul: f64, max_ul: f64 },
    Aspirate { volume_ul: f64, max_ul: f64 },
    Pull { count: i64, max: u8 },
    Plunge { count: i64, max: u8 },
}

impl fmt::Display for BoundsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dispense { volume_ul, max_ul } => {
                write!(f, "dispense {volume_ul} uL outside 0..={max_ul} uL")
            }
            Self::Aspirate { volume_ul, max_ul } => {
                write!(f, "aspirate {volume_ul} uL outside 0..={max_ul} uL")
            }
            Self::Pull { count, max } => write!(f, "pull count {count} outside 0..={max}"),
            Self::Plunge { count, max } => write!(f, "plunge count {count} outside 0..={max}"),
        }
    }
}

impl From<BoundsError> for Error {
    fn from(e: BoundsError) -> Self {
        Self::OutOfBounds(e)
    }
}

// ---------------------------------------------------------------------------
// Estimator input errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateError {
    /// A configured region does not fit inside the image.
    ImageTooSmall {
        width: u32,
        height: u32,
        region: &'static str,
    },
    /// A configured region has zero area.
    EmptyRegion(&'static str),
}

impl fmt::Display for EstimateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImageTooSmall {
                width,
                height,
                region,
            } => write!(f, "{region} does not fit a {width}x{height} image"),
            Self::EmptyRegion(region) => write!(f, "{region} is empty"),
        }
    }
}

impl From<EstimateError> for Error {
    fn from(e: EstimateError) -> Self {
        Self::Estimate(e)
    }
}

// ---------------------------------------------------------------------------
// Calibration fit errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum FitError {
    /// No labeled sample sits exactly on the cone volume. Fatal.
    MissingBreakpoint { cone_vol_ul: f64 },
    /// A file name matched none of the volume-label patterns.
    UnlabeledImage(String),
    /// A regime has too few samples for a cubic.
    InsufficientSamples { regime: Regime, count: usize },
    /// The least-squares system could not be solved.
    Singular(Regime),
    /// The fitted curve failed its post-fit checks.
    Defective(Vec<CurveDefect>),
    /// The estimator rejected a calibration image geometry.
    Estimate(EstimateError),
}

impl fmt::Display for FitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBreakpoint { cone_vol_ul } => {
                write!(f, "no sample labeled exactly {cone_vol_ul} uL")
            }
            Self::UnlabeledImage(name) => write!(f, "no volume label in '{name}'"),
            Self::InsufficientSamples { regime, count } => {
                write!(f, "{regime} regime has {count} samples, need at least 4")
            }
            Self::Singular(regime) => write!(f, "{regime} least-squares system is singular"),
            Self::Defective(defects) => {
                write!(f, "curve failed validation:")?;
                for d in defects {
                    write!(f, " [{d}]")?;
                }
                Ok(())
            }
            Self::Estimate(e) => write!(f, "{e}"),
        }
    }
}

impl From<FitError> for Error {
    fn from(e: FitError) -> Self {
        Self::Fit(e)
    }
}

impl From<EstimateError> for FitError {
    fn from(e: EstimateError) -> Self {
        Self::Estimate(e)
    }
}

/// Which side of the breakpoint a polynomial serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Regime {
    Cone,
    Cylinder,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cone => write!(f, "cone"),
            Self::Cylinder => write!(f, "cylinder"),
        }
    }
}

/// A post-fit consistency failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CurveDefect {
    /// The two polynomials disagree at the breakpoint.
    Discontinuous { gap_ul: f64 },
    /// Volume decreases with area somewhere inside a regime's domain.
    NonMonotonic { regime: Regime, area: f64, slope: f64 },
}

impl fmt::Display for CurveDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discontinuous { gap_ul } => write!(f, "breakpoint gap {gap_ul:.3} uL"),
            Self::NonMonotonic {
                regime,
                area,
                slope,
            } => write!(f, "{regime} slope {slope:.4} at area {area:.0}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// The pump did not acknowledge completion.
    NoAcknowledge,
    /// A valve could not be switched to the requested port.
    ValveFault,
    /// The actuator link is down.
    Disconnected,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAcknowledge => write!(f, "pump did not acknowledge"),
            Self::ValveFault => write!(f, "valve fault"),
            Self::Disconnected => write!(f, "actuator disconnected"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Payload decode errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame is not valid UTF-8 JSON.
    Malformed(String),
    /// The frame is valid JSON but not a known request.
    UnknownCommand,
    /// A required field is absent.
    MissingField(&'static str),
    /// A referenced image could not be read.
    Image(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "malformed payload: {msg}"),
            Self::UnknownCommand => write!(f, "unknown command"),
            Self::MissingField(name) => write!(f, "missing field {name}"),
            Self::Image(msg) => write!(f, "image unreadable: {msg}"),
        }
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
