//! RGB to HSV conversions used by the segmentation masks.
//!
//! Two flavours are needed. The hue classifier works on normalised
//! floats (hue in degrees, saturation in 0..1); the meniscus search and
//! the refinement mask work on the 8-bit saturation and value planes.

use image::RgbImage;

/// Float HSV of one pixel: `(hue_deg, saturation)`. Hue is in `0..360`
/// and is 0 for achromatic pixels.
pub fn hue_saturation(r: u8, g: u8, b: u8) -> (f64, f64) {
    let r = f64::from(r) / 255.0;
    let g = f64::from(g) / 255.0;
    let b = f64::from(b) / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let sat = if max > 0.0 { delta / max } else { 0.0 };
    if delta == 0.0 {
        return (0.0, sat);
    }

    let mut hue = if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if hue < 0.0 {
        hue += 360.0;
    }
    (hue, sat)
}

/// 8-bit saturation and value of one pixel.
pub fn saturation_value_u8(r: u8, g: u8, b: u8) -> (u8, u8) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max == 0 {
        return (0, 0);
    }
    let sat = (255.0 * f64::from(max - min) / f64::from(max)).round() as u8;
    (sat, max)
}

/// Saturation and value planes of an image, row-major.
#[derive(Debug, Clone)]
pub struct SvPlanes {
    width: u32,
    height: u32,
    sat: Vec<u8>,
    val: Vec<u8>,
}

impl SvPlanes {
    pub fn from_rgb(img: &RgbImage) -> Self {
        let (width, height) = img.dimensions();
        let n = (width * height) as usize;
        let mut sat = Vec::with_capacity(n);
        let mut val = Vec::with_capacity(n);
        for px in img.pixels() {
            let [r, g, b] = px.0;
            let (s, v) = saturation_value_u8(r, g, b);
            sat.push(s);
            val.push(v);
        }
        Self {
            width,
            height,
            sat,
            val,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn value(&self, x: u32, y: u32) -> u8 {
        self.val[(y * self.width + x) as usize]
    }

    /// Per-row sums of the saturation plane.
    pub fn saturation_row_sums(&self) -> Vec<u64> {
        row_sums(&self.sat, self.width, self.height)
    }

    /// Per-row sums of the value plane.
    pub fn value_row_sums(&self) -> Vec<u64> {
        row_sums(&self.val, self.width, self.height)
    }
}

fn row_sums(plane: &[u8], width: u32, height: u32) -> Vec<u64> {
    if width == 0 {
        return vec![0; height as usize];
    }
    plane
        .chunks_exact(width as usize)
        .map(|row| row.iter().map(|&v| u64::from(v)).sum())
        .collect()
}
