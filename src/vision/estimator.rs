//! Image → volume estimator.

use image::RgbImage;
use image::imageops::crop_imm;
use log::debug;
use serde::Serialize;

use crate::calibration::CalibrationCurve;
use crate::config::EstimatorConfig;
use crate::error::{EstimateError, RejectReason};

use super::quality::{self, QualityReport};
use super::segment::{Segmentation, segment};
use super::{CropRect, Side};

/// Result of one estimation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeEstimate {
    /// The frame passed the quality gate.
    Measured {
        area: u32,
        #[serde(rename = "volume_uL")]
        volume_ul: f64,
    },
    /// The frame carries no usable information.
    Rejected { reason: RejectReason },
}

impl VolumeEstimate {
    pub fn volume_ul(&self) -> Option<f64> {
        match self {
            Self::Measured { volume_ul, .. } => Some(*volume_ul),
            Self::Rejected { .. } => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Crop rectangle for `side`.
pub fn crop_for(side: Side, cfg: &EstimatorConfig) -> &CropRect {
    match side {
        Side::Left => &cfg.left_crop,
        Side::Right => &cfg.right_crop,
    }
}

/// Crop and segment one side without the quality gate.
///
/// The calibration fit uses this directly; its images are taken under
/// controlled conditions.
pub fn measure_area(
    img: &RgbImage,
    side: Side,
    cfg: &EstimatorConfig,
) -> Result<Segmentation, EstimateError> {
    let rect = crop_for(side, cfg);
    let (w, h) = img.dimensions();
    rect.check_fits(w, h, side_region(side))?;

    let crop = crop_imm(img, rect.col_start, rect.row_start, rect.width(), rect.height()).to_image();
    Ok(segment(&crop, cfg))
}

fn side_region(side: Side) -> &'static str {
    match side {
        Side::Left => "LEFT crop",
        Side::Right => "RIGHT crop",
    }
}

/// Deterministic estimator bound to one rig's geometry and curve.
#[derive(Debug, Clone)]
pub struct VolumeEstimator {
    config: EstimatorConfig,
    curve: CalibrationCurve,
}

impl VolumeEstimator {
    pub fn new(config: EstimatorConfig, curve: CalibrationCurve) -> Self {
        Self { config, curve }
    }

    pub fn curve(&self) -> &CalibrationCurve {
        &self.curve
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Swap in a re-fitted curve.
    pub fn set_curve(&mut self, curve: CalibrationCurve) {
        self.curve = curve;
    }

    /// Run the quality gate only.
    pub fn inspect(&self, img: &RgbImage) -> Result<QualityReport, EstimateError> {
        quality::inspect(img, &self.config)
    }

    /// Estimate the fluid volume of `side`.
    ///
    /// Geometry is validated before any pixel work: a crop or patch that
    /// does not fit the frame is an error, never a panic. A frame that
    /// fails the quality gate yields [`VolumeEstimate::Rejected`] and is
    /// not segmented.
    pub fn estimate(&self, img: &RgbImage, side: Side) -> Result<VolumeEstimate, EstimateError> {
        let (w, h) = img.dimensions();
        crop_for(side, &self.config).check_fits(w, h, side_region(side))?;

        let report = self.inspect(img)?;
        if let Some(reason) = report.rejection {
            debug!("estimate {side}: rejected ({reason})");
            return Ok(VolumeEstimate::Rejected { reason });
        }

        let seg = measure_area(img, side, &self.config)?;
        let volume_ul = self.curve.volume_for_area(seg.area);
        debug!(
            "estimate {side}: sharpness={:.1} meniscus_row={} area={} volume={:.1}uL",
            report.sharpness, seg.meniscus_row, seg.area, volume_ul
        );
        Ok(VolumeEstimate::Measured {
            area: seg.area,
            volume_ul,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::calibration::Cubic;
    use crate::error::Regime;
    use image::Rgb;

    fn linear_curve(ref_area: u32) -> CalibrationCurve {
        CalibrationCurve {
            ref_area,
            cone: Cubic::new(0.0, 0.0, 2.0, 0.0),
            cylinder: Cubic::new(0.0, 0.0, 3.0, -f64::from(ref_area)),
            ..CalibrationCurve::reference()
        }
    }

    #[test]
    fn measured_frame_maps_area_through_curve() {
        let est = VolumeEstimator::new(config(), linear_curve(10_000));
        let img = frame(30, 10);
        let left = est.estimate(&img, Side::Left).unwrap();
        let right = est.estimate(&img, Side::Right).unwrap();
        assert_eq!(
            left,
            VolumeEstimate::Measured {
                area: expected_area(30),
                volume_ul: 2.0 * f64::from(expected_area(30)),
            }
        );
        assert_eq!(right.volume_ul(), Some(2.0 * f64::from(expected_area(10))));
    }

    #[test]
    fn cone_below_and_cylinder_at_breakpoint() {
        let img = frame(30, 30);
        let area = expected_area(30);

        let below = VolumeEstimator::new(config(), linear_curve(area + 1));
        assert_eq!(below.curve().regime(area), Regime::Cone);
        assert_eq!(below.estimate(&img, Side::Left).unwrap().volume_ul(), Some(2.0 * f64::from(area)));

        let at = VolumeEstimator::new(config(), linear_curve(area));
        assert_eq!(at.curve().regime(area), Regime::Cylinder);
        assert_eq!(at.estimate(&img, Side::Left).unwrap().volume_ul(), Some(2.0 * f64::from(area)));
    }

    #[test]
    fn blurry_frame_is_rejected_without_segmentation() {
        let est = VolumeEstimator::new(config(), linear_curve(100));
        let img = RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([10, 10, 10]));
        let out = est.estimate(&img, Side::Left).unwrap();
        assert!(matches!(
            out,
            VolumeEstimate::Rejected {
                reason: RejectReason::Blurry { .. }
            }
        ));
        assert_eq!(out.volume_ul(), None);
    }

    #[test]
    fn lit_panel_is_rejected() {
        let est = VolumeEstimator::new(config(), linear_curve(100));
        let mut img = frame(20, 20);
        let p = config().reference_patch;
        for y in p.row_start..p.row_end {
            for x in p.col_start..p.col_end {
                img.put_pixel(x, y, Rgb([220, 40, 40]));
            }
        }
        let out = est.estimate(&img, Side::Right).unwrap();
        assert!(matches!(
            out,
            VolumeEstimate::Rejected {
                reason: RejectReason::PanelLit { .. }
            }
        ));
    }

    #[test]
    fn undersized_frame_is_an_error() {
        let est = VolumeEstimator::new(EstimatorConfig::default(), CalibrationCurve::reference());
        let img = frame(20, 20);
        assert_eq!(
            est.estimate(&img, Side::Left),
            Err(EstimateError::ImageTooSmall {
                width: WIDTH,
                height: HEIGHT,
                region: "LEFT crop"
            })
        );
    }

    #[test]
    fn measure_area_reads_only_its_side() {
        let img = frame(50, 5);
        let left = measure_area(&img, Side::Left, &config()).unwrap();
        let right = measure_area(&img, Side::Right, &config()).unwrap();
        assert_eq!(left.meniscus_row, 50);
        assert_eq!(right.meniscus_row, 5);
        assert_eq!(left.area, expected_area(50));
        assert_eq!(right.area, expected_area(5));
    }
}
