//! Image files on disk.
//!
//! [`FileImageSource`] resolves request image references against a root
//! directory. [`list_images`] enumerates a labeled set for fitting and
//! evaluation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::app::ports::ImageSourcePort;
use crate::error::{DecodeError, Error};

const EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Loads images relative to `root`; absolute references are used as-is.
pub struct FileImageSource {
    root: PathBuf,
}

impl FileImageSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, image_ref: &str) -> PathBuf {
        self.root.join(image_ref)
    }
}

impl ImageSourcePort for FileImageSource {
    fn load(&self, image_ref: &str) -> Result<RgbImage, Error> {
        load_rgb(&self.resolve(image_ref))
    }
}

/// Decode any supported file into 8-bit RGB.
pub fn load_rgb(path: &Path) -> Result<RgbImage, Error> {
    let img = image::open(path)
        .map_err(|e| DecodeError::Image(format!("{}: {}", path.display(), e)))?;
    Ok(img.to_rgb8())
}

/// Image files directly inside `dir`, sorted by name.
pub fn list_images(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)));
        if path.is_file() && is_image {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
