//! Offline calibration fit.
//!
//! ```text
//!  labeled images ──▶ segment (both sides) ──▶ (area, volume) samples
//!                                                  │
//!                  ┌───────────────────────────────┴──────────────┐
//!                  ▼                                              ▼
//!   cone bucket: volume <= cone_vol (+ origin)    cylinder bucket: volume >= cone_vol
//!                  │                                              │
//!                  └──────────── cubic least squares ─────────────┘
//!                                     │
//!                                     ▼
//!                              CalibrationCurve
//! ```
//!
//! Samples labeled exactly `cone_vol` belong to both buckets and fix
//! `ref_area`. Without one the fit stops: a curve whose breakpoint is
//! unknown cannot be made continuous.
//!
//! By default each cubic is constrained through the breakpoint sample
//! `(ref_area, cone_vol)` so the two regimes meet exactly. The
//! unconstrained mode is an ordinary least-squares cubic per bucket.
//! Abscissae are scaled to `[0, 1]` before solving and the coefficients
//! rescaled afterwards.

use image::RgbImage;
use log::{info, warn};
use nalgebra::{DMatrix, DVector};

use crate::config::{CalibrationConfig, EstimatorConfig};
use crate::error::{FitError, Regime};
use crate::vision::Side;
use crate::vision::estimator::measure_area;

use super::label::volume_from_label;
use super::{CURVE_FORMAT_VERSION, CalibrationCurve, Cubic, CurveDomain};

/// Labels within this distance of `cone_vol` count as the breakpoint.
const BREAKPOINT_EPS_UL: f64 = 1e-6;

/// Minimum samples per bucket for a cubic.
const MIN_SAMPLES: usize = 4;

/// One `(area, volume)` observation.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSample {
    pub name: String,
    pub side: Side,
    pub area: u32,
    pub volume_ul: f64,
}

/// A fitted curve together with the sample domain it was fitted on.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedCalibration {
    pub curve: CalibrationCurve,
    pub domain: CurveDomain,
    pub cone_samples: usize,
    pub cylinder_samples: usize,
    pub breakpoint_samples: usize,
}

impl FittedCalibration {
    /// Continuity and monotonicity checks over the fitted domain.
    pub fn validate(&self, tolerance_ul: f64) -> Vec<crate::error::CurveDefect> {
        self.curve.validate(&self.domain, tolerance_ul)
    }

    /// Accept the curve only if it passes [`validate`](Self::validate).
    pub fn into_validated(self, tolerance_ul: f64) -> Result<CalibrationCurve, FitError> {
        let defects = self.validate(tolerance_ul);
        if defects.is_empty() {
            Ok(self.curve)
        } else {
            Err(FitError::Defective(defects))
        }
    }
}

pub struct CalibrationFitter {
    config: CalibrationConfig,
    rig_id: String,
}

impl CalibrationFitter {
    pub fn new(config: CalibrationConfig, rig_id: impl Into<String>) -> Self {
        Self {
            config,
            rig_id: rig_id.into(),
        }
    }

    /// Segment both sides of a labeled image into two samples.
    pub fn measure(
        &self,
        estimator: &EstimatorConfig,
        name: &str,
        img: &RgbImage,
    ) -> Result<Vec<LabeledSample>, FitError> {
        let volume_ul = volume_from_label(name)?;
        Side::ALL
            .iter()
            .map(|&side| {
                let seg = measure_area(img, side, estimator)?;
                Ok(LabeledSample {
                    name: name.to_owned(),
                    side,
                    area: seg.area,
                    volume_ul,
                })
            })
            .collect()
    }

    /// Segment and fit a whole labeled image set.
    pub fn fit_images<'a, I>(
        &self,
        estimator: &EstimatorConfig,
        images: I,
    ) -> Result<FittedCalibration, FitError>
    where
        I: IntoIterator<Item = (&'a str, &'a RgbImage)>,
    {
        let mut samples = Vec::new();
        for (name, img) in images {
            samples.extend(self.measure(estimator, name, img)?);
        }
        self.fit(&samples)
    }

    /// Fit both regimes from precomputed samples.
    pub fn fit(&self, samples: &[LabeledSample]) -> Result<FittedCalibration, FitError> {
        let cone_vol = self.config.cone_vol_ul;

        let mut cone: Vec<(f64, f64)> = Vec::new();
        let mut cylinder: Vec<(f64, f64)> = Vec::new();
        let mut boundary: Vec<u32> = Vec::new();

        if self.config.anchor_origin {
            cone.push((0.0, 0.0));
        }

        for s in samples {
            let point = (f64::from(s.area), s.volume_ul);
            if (s.volume_ul - cone_vol).abs() <= BREAKPOINT_EPS_UL {
                boundary.push(s.area);
                cone.push((point.0, cone_vol));
                cylinder.push((point.0, cone_vol));
            } else if s.volume_ul < cone_vol {
                cone.push(point);
            } else {
                cylinder.push(point);
            }
        }

        if boundary.is_empty() {
            return Err(FitError::MissingBreakpoint { cone_vol_ul: cone_vol });
        }

        let ref_area = mean_rounded(&boundary);
        if boundary.iter().any(|&a| a != ref_area) {
            warn!(
                "calibration: {} breakpoint samples disagree ({:?}), using mean {}",
                boundary.len(),
                boundary,
                ref_area
            );
        }

        let pin = self
            .config
            .pin_breakpoint
            .then_some((f64::from(ref_area), cone_vol));

        let cone_poly = fit_cubic(&cone, pin, Regime::Cone)?;
        let cylinder_poly = fit_cubic(&cylinder, pin, Regime::Cylinder)?;

        let domain = CurveDomain {
            cone: span(&cone),
            cylinder: span(&cylinder),
        };

        let curve = CalibrationCurve {
            rig_id: self.rig_id.clone(),
            format_version: CURVE_FORMAT_VERSION,
            ref_area,
            cone_vol_ul: cone_vol,
            cone: cone_poly,
            cylinder: cylinder_poly,
        };

        info!(
            "calibration: rig '{}' ref_area={} cone={:?} cylinder={:?} (samples {}/{})",
            curve.rig_id,
            ref_area,
            curve.cone.0,
            curve.cylinder.0,
            cone.len(),
            cylinder.len()
        );

        Ok(FittedCalibration {
            curve,
            domain,
            cone_samples: cone.len(),
            cylinder_samples: cylinder.len(),
            breakpoint_samples: boundary.len(),
        })
    }
}

fn mean_rounded(values: &[u32]) -> u32 {
    let sum: u64 = values.iter().map(|&v| u64::from(v)).sum();
    (sum as f64 / values.len() as f64).round() as u32
}

fn span(points: &[(f64, f64)]) -> (f64, f64) {
    points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(x, _)| {
            (lo.min(x), hi.max(x))
        })
}

// ───────────────────────────────────────────────────────────────
// Least squares
// ───────────────────────────────────────────────────────────────

/// Cubic least-squares fit, optionally constrained through `pin`.
///
/// With a pin `(x0, y0)` the model is `y0 + Σ b_k (t^k - t0^k)`, which
/// passes through the pin for any `b`; only `b1..b3` are solved for.
fn fit_cubic(points: &[(f64, f64)], pin: Option<(f64, f64)>, regime: Regime) -> Result<Cubic, FitError> {
    if points.len() < MIN_SAMPLES {
        return Err(FitError::InsufficientSamples {
            regime,
            count: points.len(),
        });
    }

    let scale = points
        .iter()
        .map(|&(x, _)| x.abs())
        .chain(pin.map(|(x0, _)| x0.abs()))
        .fold(0.0, f64::max);
    let scale = if scale > 0.0 { scale } else { 1.0 };

    let n = points.len();
    // Coefficients of the scaled polynomial, lowest degree first.
    let scaled: [f64; 4] = match pin {
        None => {
            let a = DMatrix::from_fn(n, 4, |r, c| (points[r].0 / scale).powi(c as i32));
            let b = DVector::from_iterator(n, points.iter().map(|&(_, y)| y));
            let sol = solve(a, b, regime)?;
            [sol[0], sol[1], sol[2], sol[3]]
        }
        Some((x0, y0)) => {
            let t0 = x0 / scale;
            let a = DMatrix::from_fn(n, 3, |r, c| {
                let k = c as i32 + 1;
                (points[r].0 / scale).powi(k) - t0.powi(k)
            });
            let b = DVector::from_iterator(n, points.iter().map(|&(_, y)| y - y0));
            let sol = solve(a, b, regime)?;
            let b0 = y0 - sol[0] * t0 - sol[1] * t0.powi(2) - sol[2] * t0.powi(3);
            [b0, sol[0], sol[1], sol[2]]
        }
    };

    Ok(Cubic::new(
        scaled[3] / scale.powi(3),
        scaled[2] / scale.powi(2),
        scaled[1] / scale,
        scaled[0],
    ))
}

fn solve(a: DMatrix<f64>, b: DVector<f64>, regime: Regime) -> Result<DVector<f64>, FitError> {
    let cols = a.ncols();
    let svd = a.svd(true, true);
    let largest = svd.singular_values.max();
    if largest <= 0.0 || svd.rank(largest * 1e-10) < cols {
        return Err(FitError::Singular(regime));
    }
    svd.solve(&b, largest * 1e-12)
        .map_err(|_| FitError::Singular(regime))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(area: u32, volume_ul: f64) -> LabeledSample {
        LabeledSample {
            name: format!("s-{volume_ul}"),
            side: Side::Left,
            area,
            volume_ul,
        }
    }

    /// Samples from a known continuous piecewise curve.
    fn synthetic(pin_area: u32) -> Vec<LabeledSample> {
        let truth = CalibrationCurve::reference();
        let mut out = Vec::new();
        for area in [500u32, 1200, 2000, 2800, 3600] {
            out.push(sample(area, truth.cone.eval(f64::from(area))));
        }
        out.push(sample(pin_area, 1500.0));
        for area in [5000u32, 6500, 8000, 9500, 11000] {
            out.push(sample(area, truth.cylinder.eval(f64::from(area)) + 9.69));
        }
        out
    }

    fn fitter(pin: bool) -> CalibrationFitter {
        CalibrationFitter::new(
            CalibrationConfig {
                pin_breakpoint: pin,
                ..CalibrationConfig::default()
            },
            "bench",
        )
    }

    #[test]
    fn missing_breakpoint_is_fatal() {
        let samples: Vec<_> = synthetic(4380)
            .into_iter()
            .filter(|s| s.volume_ul != 1500.0)
            .collect();
        assert_eq!(
            fitter(true).fit(&samples),
            Err(FitError::MissingBreakpoint { cone_vol_ul: 1500.0 })
        );
    }

    #[test]
    fn pinned_fit_is_continuous_at_breakpoint() {
        let fitted = fitter(true).fit(&synthetic(4380)).unwrap();
        let curve = &fitted.curve;
        assert_eq!(curve.ref_area, 4380);
        assert_eq!(curve.rig_id, "bench");
        assert!(curve.breakpoint_gap().abs() < 1e-6, "gap {}", curve.breakpoint_gap());
        assert!((curve.cone.eval(4380.0) - 1500.0).abs() < 1e-6);
        assert!(fitted.validate(1e-3).is_empty(), "{:?}", fitted.validate(1e-3));
    }

    #[test]
    fn boundary_sample_counts_in_both_buckets() {
        let fitted = fitter(true).fit(&synthetic(4380)).unwrap();
        // origin + 5 cone + boundary ; boundary + 5 cylinder
        assert_eq!(fitted.cone_samples, 7);
        assert_eq!(fitted.cylinder_samples, 6);
        assert_eq!(fitted.breakpoint_samples, 1);
        assert_eq!(fitted.domain.cone, (0.0, 4380.0));
        assert_eq!(fitted.domain.cylinder, (4380.0, 11000.0));
    }

    #[test]
    fn unpinned_fit_recovers_exact_cubic() {
        // One cubic through the origin and (4000, 1500) feeds every cone sample.
        let p = Cubic::new(2.0e-9, 1.0e-5, 0.303, 0.0);
        assert!((p.eval(4000.0) - 1500.0).abs() < 1e-6);
        let mut samples: Vec<_> = [400u32, 900, 1700, 2600, 3300]
            .iter()
            .map(|&a| sample(a, p.eval(f64::from(a))))
            .collect();
        samples.push(sample(4000, 1500.0));
        for a in [5000u32, 6000, 7000, 8000] {
            samples.push(sample(a, 1500.0 + 0.5 * f64::from(a - 4000)));
        }
        let fitted = fitter(false).fit(&samples).unwrap();
        for a in [0.0, 400.0, 1700.0, 3300.0, 4000.0] {
            let err = (fitted.curve.cone.eval(a) - p.eval(a)).abs();
            assert!(err < 1e-6, "area {a} err {err}");
        }
        let cyl = fitted.curve.cylinder;
        for a in [4000.0, 6000.0, 8000.0] {
            assert!((cyl.eval(a) - (1500.0 + 0.5 * (a - 4000.0))).abs() < 1e-6);
        }
    }

    #[test]
    fn multiple_breakpoint_samples_average() {
        let mut samples = synthetic(4370);
        samples.push(sample(4391, 1500.0));
        let fitted = fitter(true).fit(&samples).unwrap();
        assert_eq!(fitted.curve.ref_area, 4381);
        assert_eq!(fitted.breakpoint_samples, 2);
    }

    #[test]
    fn too_few_cylinder_samples() {
        let samples: Vec<_> = synthetic(4380)
            .into_iter()
            .filter(|s| s.area < 6000)
            .collect();
        assert_eq!(
            fitter(true).fit(&samples),
            Err(FitError::InsufficientSamples {
                regime: Regime::Cylinder,
                count: 2
            })
        );
    }

    #[test]
    fn degenerate_areas_are_singular() {
        let mut samples = synthetic(4380);
        samples.retain(|s| s.volume_ul <= 1500.0);
        for v in [2000.0, 2500.0, 3000.0, 3500.0] {
            samples.push(sample(4380, v));
        }
        assert_eq!(
            fitter(true).fit(&samples),
            Err(FitError::Singular(Regime::Cylinder))
        );
    }

    #[test]
    fn defective_curve_refused() {
        let mut fitted = fitter(true).fit(&synthetic(4380)).unwrap();
        fitted.curve.cylinder = Cubic::new(0.0, 0.0, -0.5, 3690.0);
        match fitted.into_validated(1.0) {
            Err(FitError::Defective(d)) => assert!(!d.is_empty()),
            other => panic!("expected Defective, got {other:?}"),
        }
    }
}
