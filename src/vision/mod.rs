//! Camera-side volume estimation.
//!
//! ```text
//!  RgbImage ──▶ quality gate ──▶ crop(side) ──▶ segment ──▶ area ──▶ curve ──▶ uL
//!                   │
//!                   └──▶ Rejected (blurry / panel lit)
//! ```
//!
//! Everything here is deterministic and free of hidden state; the only
//! input besides the image is the [`EstimatorConfig`](crate::config::EstimatorConfig)
//! geometry and the [`CalibrationCurve`](crate::calibration::CalibrationCurve).

pub mod estimator;
pub mod hsv;
pub mod quality;
pub mod segment;

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EstimateError;

pub use estimator::{VolumeEstimate, VolumeEstimator};

/// Which tube of the camera frame is being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Left, Side::Right];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("left") {
            Ok(Self::Left)
        } else if s.eq_ignore_ascii_case("right") {
            Ok(Self::Right)
        } else {
            Err(())
        }
    }
}

/// Half-open pixel rectangle: rows `row_start..row_end`, columns
/// `col_start..col_end`, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub row_start: u32,
    pub row_end: u32,
    pub col_start: u32,
    pub col_end: u32,
}

impl CropRect {
    pub const fn new(row_start: u32, row_end: u32, col_start: u32, col_end: u32) -> Self {
        Self {
            row_start,
            row_end,
            col_start,
            col_end,
        }
    }

    pub fn height(&self) -> u32 {
        self.row_end.saturating_sub(self.row_start)
    }

    pub fn width(&self) -> u32 {
        self.col_end.saturating_sub(self.col_start)
    }

    pub fn is_empty(&self) -> bool {
        self.height() == 0 || self.width() == 0
    }

    /// Confirm the rectangle is non-empty and lies inside a
    /// `width` x `height` image.
    pub fn check_fits(
        &self,
        width: u32,
        height: u32,
        region: &'static str,
    ) -> Result<(), EstimateError> {
        if self.is_empty() {
            return Err(EstimateError::EmptyRegion(region));
        }
        if self.row_end > height || self.col_end > width {
            return Err(EstimateError::ImageTooSmall {
                width,
                height,
                region,
            });
        }
        Ok(())
    }
}
