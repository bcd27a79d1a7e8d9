//! Area → volume calibration.
//!
//! A tube is a cone below `cone_vol` and a cylinder above it, so the
//! mapping from segmented pixel area to volume is two cubics joined at the
//! breakpoint `ref_area` (the area measured at exactly `cone_vol`):
//!
//! ```text
//!  volume
//!    │                         ╱ cylinder: c·a³ + d·a² + e·a + f
//!    │                      ╱
//!    │                   ╱
//!    │              ..•  ◀── (ref_area, cone_vol)
//!    │         ..··
//!    │   ..··          cone: g·a³ + h·a² + i·a + j
//!    └──────────────────────────────── area
//! ```
//!
//! The curve is rig-specific data: it is loaded, versioned and replaced
//! per physical rig, never compiled in beyond the reference default.

pub mod fit;
pub mod label;
pub mod report;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{CurveDefect, Regime};

pub use fit::{CalibrationFitter, FittedCalibration, LabeledSample};

/// Layout version of a persisted [`CalibrationCurve`].
pub const CURVE_FORMAT_VERSION: u16 = 1;

/// Rig identifier of the built-in reference curve.
pub const REFERENCE_RIG: &str = "reference";

// ───────────────────────────────────────────────────────────────
// Cubic
// ───────────────────────────────────────────────────────────────

/// `a3·x³ + a2·x² + a1·x + a0`, coefficients highest degree first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cubic(pub [f64; 4]);

impl Cubic {
    pub const fn new(a3: f64, a2: f64, a1: f64, a0: f64) -> Self {
        Self([a3, a2, a1, a0])
    }

    pub fn eval(&self, x: f64) -> f64 {
        let [a3, a2, a1, a0] = self.0;
        ((a3 * x + a2) * x + a1) * x + a0
    }

    /// First derivative at `x`.
    pub fn slope(&self, x: f64) -> f64 {
        let [a3, a2, a1, _] = self.0;
        (3.0 * a3 * x + 2.0 * a2) * x + a1
    }

    /// Constant term.
    pub fn constant(&self) -> f64 {
        self.0[3]
    }

    /// Smallest slope on `[lo, hi]` and where it occurs.
    ///
    /// The derivative is a quadratic, so its minimum over a closed
    /// interval is at an endpoint or at the vertex.
    pub fn min_slope(&self, lo: f64, hi: f64) -> (f64, f64) {
        let [a3, a2, _, _] = self.0;
        let mut candidates = vec![lo, hi];
        if a3 != 0.0 {
            let vertex = -a2 / (3.0 * a3);
            if vertex > lo && vertex < hi {
                candidates.push(vertex);
            }
        }
        candidates
            .into_iter()
            .map(|x| (x, self.slope(x)))
            .fold((lo, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
    }
}

// ───────────────────────────────────────────────────────────────
// CalibrationCurve
// ───────────────────────────────────────────────────────────────

/// Piecewise cubic area → volume mapping for one rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCurve {
    /// Physical rig the coefficients were fitted on.
    pub rig_id: String,
    pub format_version: u16,
    /// Area (px) measured at `cone_vol_ul`; regime breakpoint.
    pub ref_area: u32,
    /// Volume of the conical tip (uL).
    pub cone_vol_ul: f64,
    /// `[g, h, i, j]`, used below `ref_area`.
    pub cone: Cubic,
    /// `[c, d, e, f]`, used at and above `ref_area`.
    pub cylinder: Cubic,
}

impl Default for CalibrationCurve {
    fn default() -> Self {
        Self::reference()
    }
}

impl CalibrationCurve {
    /// Coefficients fitted on the reference rig.
    pub fn reference() -> Self {
        Self {
            rig_id: REFERENCE_RIG.into(),
            format_version: CURVE_FORMAT_VERSION,
            ref_area: 4380,
            cone_vol_ul: 1500.0,
            cone: Cubic::new(
                5.594097852070963e-09,
                1.9955446895130637e-05,
                0.15330954704304375,
                0.9581548453421256,
            ),
            cylinder: Cubic::new(
                2.0508853508601078e-11,
                7.701084013461749e-07,
                0.6203205589679506,
                -1217.8468504658977,
            ),
        }
    }

    pub fn regime(&self, area: u32) -> Regime {
        if area < self.ref_area {
            Regime::Cone
        } else {
            Regime::Cylinder
        }
    }

    pub fn polynomial(&self, regime: Regime) -> &Cubic {
        match regime {
            Regime::Cone => &self.cone,
            Regime::Cylinder => &self.cylinder,
        }
    }

    /// Evaluate the regime polynomial for `area` without clamping.
    pub fn raw_volume(&self, area: u32) -> f64 {
        self.polynomial(self.regime(area)).eval(f64::from(area))
    }

    /// Volume in uL for a segmented area.
    ///
    /// Negative results, and results exactly equal to the cone constant
    /// `j` (the empty-tube reading), are reported as zero.
    pub fn volume_for_area(&self, area: u32) -> f64 {
        let v = self.raw_volume(area);
        if v < 0.0 {
            return 0.0;
        }
        if v == self.cone.constant() {
            if area != 0 {
                // Only an empty tube is expected to land on j exactly.
                debug!("curve '{}': area {} evaluates to j, clamped to 0", self.rig_id, area);
            }
            return 0.0;
        }
        v
    }

    /// Cone minus cylinder at the breakpoint.
    pub fn breakpoint_gap(&self) -> f64 {
        let x = f64::from(self.ref_area);
        self.cone.eval(x) - self.cylinder.eval(x)
    }

    /// Persisted layout order: `[g, h, i, j, c, d, e, f]`.
    pub fn coefficients(&self) -> [f64; 8] {
        let [g, h, i, j] = self.cone.0;
        let [c, d, e, f] = self.cylinder.0;
        [g, h, i, j, c, d, e, f]
    }

    /// Post-fit consistency checks over the given sample domain.
    ///
    /// Returns every defect found; an empty vector means the curve is
    /// continuous at the breakpoint within `tolerance_ul` and
    /// non-decreasing across both regimes.
    pub fn validate(&self, domain: &CurveDomain, tolerance_ul: f64) -> Vec<CurveDefect> {
        let mut defects = Vec::new();

        let gap = self.breakpoint_gap();
        if gap.abs() > tolerance_ul {
            defects.push(CurveDefect::Discontinuous { gap_ul: gap });
        }

        for (regime, (lo, hi)) in [(Regime::Cone, domain.cone), (Regime::Cylinder, domain.cylinder)] {
            if hi < lo {
                continue;
            }
            let (area, slope) = self.polynomial(regime).min_slope(lo, hi);
            if slope < 0.0 {
                defects.push(CurveDefect::NonMonotonic {
                    regime,
                    area,
                    slope,
                });
            }
        }
        defects
    }
}

/// Closed area intervals each regime is expected to serve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveDomain {
    pub cone: (f64, f64),
    pub cylinder: (f64, f64),
}

impl CurveDomain {
    /// `[0, ref_area]` for the cone, `[ref_area, max_area]` for the
    /// cylinder. Used when no fit samples are at hand.
    pub fn nominal(curve: &CalibrationCurve, max_area: u32) -> Self {
        let r = f64::from(curve.ref_area);
        Self {
            cone: (0.0, r),
            cylinder: (r, f64::from(max_area.max(curve.ref_area))),
        }
    }
}
