//! Fluid segmentation of a cropped tube image.
//!
//! Three binary masks (0 / 255) are combined:
//!
//! ```text
//!  hue mask      : hue in band AND saturation >= min, then dilated
//!  height mask   : every row at or below the meniscus height
//!  meniscus mask : rows just above the meniscus whose value is in range
//!
//!  final = hue | height | meniscus        area = count(final == 255)
//! ```
//!
//! The meniscus height comes from row sums of the 8-bit HSV planes: the
//! most saturated row marks the fluid top, and the darkest row near it
//! marks the meniscus band. Their midpoint (rounded half to even) is the
//! height.

use image::{GrayImage, Luma, RgbImage};

use crate::config::EstimatorConfig;

use super::hsv::{SvPlanes, hue_saturation};

const WHITE: Luma<u8> = Luma([255]);

/// Intermediate and final products of one segmentation run.
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Row index of the detected meniscus within the crop.
    pub meniscus_row: u32,
    /// Union of all masks.
    pub mask: GrayImage,
    /// White pixel count of `mask`.
    pub area: u32,
}

/// Segment a cropped tube image.
pub fn segment(crop: &RgbImage, cfg: &EstimatorConfig) -> Segmentation {
    let planes = SvPlanes::from_rgb(crop);

    let hue = dilate(
        &hue_mask(crop, cfg.hue_min_deg, cfg.hue_max_deg, cfg.saturation_min),
        cfg.dilate_kernel,
    );
    let meniscus_row = meniscus_height(&planes, cfg.meniscus_window);
    let below = height_mask(crop.width(), crop.height(), meniscus_row);
    let band = refinement_mask(
        &planes,
        meniscus_row,
        cfg.refine_band,
        cfg.refine_value_min,
        cfg.refine_value_max,
    );

    let mask = union(&[&hue, &below, &band]);
    let area = count_white(&mask);
    Segmentation {
        meniscus_row,
        mask,
        area,
    }
}

/// Pixels whose hue lies in `[hue_min, hue_max]` degrees and whose
/// saturation is at least `sat_min`.
pub fn hue_mask(img: &RgbImage, hue_min: f64, hue_max: f64, sat_min: f64) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let [r, g, b] = img.get_pixel(x, y).0;
        let (h, s) = hue_saturation(r, g, b);
        if h >= hue_min && h <= hue_max && s >= sat_min {
            WHITE
        } else {
            Luma([0])
        }
    })
}

/// Grey-level dilation with a `k` x `k` square of ones anchored at
/// `(k / 2, k / 2)`. Samples outside the image are ignored.
pub fn dilate(mask: &GrayImage, k: u32) -> GrayImage {
    let (w, h) = mask.dimensions();
    let k = i64::from(k.max(1));
    let anchor = k / 2;
    let (wi, hi) = (i64::from(w), i64::from(h));

    GrayImage::from_fn(w, h, |x, y| {
        let mut best = 0u8;
        for dy in -anchor..(k - anchor) {
            let sy = i64::from(y) + dy;
            if sy < 0 || sy >= hi {
                continue;
            }
            for dx in -anchor..(k - anchor) {
                let sx = i64::from(x) + dx;
                if sx < 0 || sx >= wi {
                    continue;
                }
                best = best.max(mask.get_pixel(sx as u32, sy as u32).0[0]);
            }
        }
        Luma([best])
    })
}

/// Row of the meniscus: midpoint of the most saturated row and the
/// darkest row within `window` rows of it. Ties pick the first row.
pub fn meniscus_height(planes: &SvPlanes, window: u32) -> u32 {
    let sat = planes.saturation_row_sums();
    let val = planes.value_row_sums();
    if sat.is_empty() {
        return 0;
    }

    let peak = first_argmax(&sat);
    let window = window as usize;
    let lower = peak.saturating_sub(window);
    let upper = (peak + window + 1).min(val.len());
    let darkest = lower + first_argmin(&val[lower..upper]);

    ((peak + darkest) as f64 / 2.0).round_ties_even() as u32
}

fn first_argmax(xs: &[u64]) -> usize {
    let mut best = 0;
    for (i, &v) in xs.iter().enumerate() {
        if v > xs[best] {
            best = i;
        }
    }
    best
}

fn first_argmin(xs: &[u64]) -> usize {
    let mut best = 0;
    for (i, &v) in xs.iter().enumerate() {
        if v < xs[best] {
            best = i;
        }
    }
    best
}

/// Rows `>= height` are fluid.
pub fn height_mask(width: u32, height: u32, meniscus_row: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |_, y| {
        if y >= meniscus_row { WHITE } else { Luma([0]) }
    })
}

/// Within the `band` rows directly above the meniscus, pixels whose
/// 8-bit value lies in `[v_min, v_max]`.
pub fn refinement_mask(
    planes: &SvPlanes,
    meniscus_row: u32,
    band: u32,
    v_min: u8,
    v_max: u8,
) -> GrayImage {
    let start = meniscus_row.saturating_sub(band);
    let end = meniscus_row.min(planes.height());
    GrayImage::from_fn(planes.width(), planes.height(), |x, y| {
        if y >= start && y < end && (v_min..=v_max).contains(&planes.value(x, y)) {
            WHITE
        } else {
            Luma([0])
        }
    })
}

/// Pixelwise OR of equally sized masks.
pub fn union(masks: &[&GrayImage]) -> GrayImage {
    let Some(first) = masks.first() else {
        return GrayImage::new(0, 0);
    };
    let mut out = (*first).clone();
    for m in &masks[1..] {
        for (o, p) in out.pixels_mut().zip(m.pixels()) {
            if p.0[0] > 0 {
                *o = WHITE;
            }
        }
    }
    for o in out.pixels_mut() {
        if o.0[0] > 0 {
            *o = WHITE;
        }
    }
    out
}

pub fn count_white(mask: &GrayImage) -> u32 {
    mask.pixels().filter(|p| p.0[0] == 255).count() as u32
}
