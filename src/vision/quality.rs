//! Image quality gate.
//!
//! Two checks run on the full frame before any segmentation:
//!
//! - **Sharpness**: variance of the 3x3 Laplacian response over every
//!   channel of every pixel (borders reflected without repeating the
//!   edge pixel). Below the blur threshold the frame is refused.
//! - **Panel lit**: mean RGB of a reference patch that sits in shadow
//!   while the illumination panel is off. If every channel exceeds the
//!   threshold the panel was on during capture and the colours are
//!   unusable.

use image::RgbImage;

use crate::config::EstimatorConfig;
use crate::error::{EstimateError, RejectReason};

use super::CropRect;

/// Measurements taken by the gate, plus its verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityReport {
    pub sharpness: f64,
    pub patch_mean_rgb: [f64; 3],
    pub rejection: Option<RejectReason>,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Run both checks. Blur is reported ahead of a lit panel when both fail.
pub fn inspect(img: &RgbImage, cfg: &EstimatorConfig) -> Result<QualityReport, EstimateError> {
    let (w, h) = img.dimensions();
    cfg.reference_patch.check_fits(w, h, "reference patch")?;

    let sharpness = laplacian_variance(img);
    let patch_mean_rgb = patch_mean(img, &cfg.reference_patch);

    let rejection = if sharpness < cfg.blur_threshold {
        Some(RejectReason::Blurry { sharpness })
    } else if patch_mean_rgb.iter().all(|&c| c > cfg.panel_lit_threshold) {
        Some(RejectReason::PanelLit {
            mean_rgb: patch_mean_rgb,
        })
    } else {
        None
    };

    Ok(QualityReport {
        sharpness,
        patch_mean_rgb,
        rejection,
    })
}

/// Population variance of the Laplacian `[0 1 0; 1 -4 1; 0 1 0]` applied
/// to each channel independently.
pub fn laplacian_variance(img: &RgbImage) -> f64 {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }
    let (wi, hi) = (i64::from(w), i64::from(h));

    let sample = |x: i64, y: i64, c: usize| -> f64 {
        let px = img.get_pixel(reflect101(x, wi), reflect101(y, hi));
        f64::from(px.0[c])
    };

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for y in 0..hi {
        for x in 0..wi {
            for c in 0..3 {
                let lap = sample(x, y - 1, c)
                    + sample(x - 1, y, c)
                    + sample(x + 1, y, c)
                    + sample(x, y + 1, c)
                    - 4.0 * sample(x, y, c);
                sum += lap;
                sum_sq += lap * lap;
            }
        }
    }

    let n = (u64::from(w) * u64::from(h) * 3) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

/// Mirror an out-of-range index back into `0..n` without repeating the
/// border sample: `-1 -> 1`, `n -> n - 2`.
fn reflect101(i: i64, n: i64) -> u32 {
    if n == 1 {
        return 0;
    }
    let r = if i < 0 {
        -i
    } else if i >= n {
        2 * n - 2 - i
    } else {
        i
    };
    r.clamp(0, n - 1) as u32
}

/// Mean of each channel over the rectangle. The caller guarantees the
/// rectangle fits the image and is non-empty.
pub fn patch_mean(img: &RgbImage, rect: &CropRect) -> [f64; 3] {
    let mut acc = [0.0f64; 3];
    for y in rect.row_start..rect.row_end {
        for x in rect.col_start..rect.col_end {
            let px = img.get_pixel(x, y);
            for (a, &v) in acc.iter_mut().zip(px.0.iter()) {
                *a += f64::from(v);
            }
        }
    }
    let n = f64::from(rect.width() * rect.height());
    acc.map(|a| a / n)
}
