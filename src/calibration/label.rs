//! Ground-truth volume labels embedded in calibration file names.
//!
//! Patterns are tried in order, first match wins:
//!
//! | Pattern          | Example              | Unit |
//! |------------------|----------------------|------|
//! | `-<float>.j`     | `tube-1.5.jpg`       | mL   |
//! | `-<float>mL`     | `tube-0.75mL_a.png`  | mL   |
//! | `-<int>-0.jpg`   | `tube-1500-0.jpg`    | uL   |
//! | `-<int>.j`       | `tube-300.jpeg`      | uL   |
//!
//! Millilitre labels are converted to microlitres. The third pattern must
//! precede the fourth, which would otherwise read `-0.j` from
//! `tube-1500-0.jpg`.

use std::sync::LazyLock;

use regex_lite::Regex;

use crate::error::FitError;

struct LabelPattern {
    regex: Regex,
    to_ul: f64,
}

static PATTERNS: LazyLock<Vec<LabelPattern>> = LazyLock::new(|| {
    [
        (r"-(\d+\.\d+).j", 1000.0),
        (r"-(\d+\.\d+)mL", 1000.0),
        (r"-(\d+)-0.jpg", 1.0),
        (r"-(\d+).j", 1.0),
    ]
    .into_iter()
    .filter_map(|(pattern, to_ul)| Regex::new(pattern).ok().map(|regex| LabelPattern { regex, to_ul }))
    .collect()
});

/// Volume in uL encoded in `name`, if any pattern matches with a finite
/// number.
pub fn parse_volume_label(name: &str) -> Option<f64> {
    PATTERNS.iter().find_map(|p| {
        let caps = p.regex.captures(name)?;
        let number: f64 = caps.get(1)?.as_str().parse().ok()?;
        Some(number * p.to_ul).filter(|v| v.is_finite())
    })
}

/// Like [`parse_volume_label`] but reports unlabeled names.
pub fn volume_from_label(name: &str) -> Result<f64, FitError> {
    parse_volume_label(name).ok_or_else(|| FitError::UnlabeledImage(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millilitre_decimal_before_extension() {
        assert_eq!(parse_volume_label("run3-1.5.jpg"), Some(1500.0));
        assert_eq!(parse_volume_label("run3-0.25.jpeg"), Some(250.0));
    }

    #[test]
    fn millilitre_suffix() {
        assert_eq!(parse_volume_label("cal-2.0mL_left.png"), Some(2000.0));
    }

    #[test]
    fn microlitre_with_zero_suffix_wins_over_plain_integer() {
        assert_eq!(parse_volume_label("cal-1500-0.jpg"), Some(1500.0));
    }

    #[test]
    fn microlitre_plain_integer() {
        assert_eq!(parse_volume_label("2024_06_01-300.jpg"), Some(300.0));
    }

    #[test]
    fn overflowing_number_is_not_a_label() {
        let name = format!("cal-{}.jpg", "9".repeat(400));
        assert_eq!(parse_volume_label(&name), None);
    }

    #[test]
    fn unlabeled_names() {
        assert_eq!(parse_volume_label("snapshot.png"), None);
        assert_eq!(
            volume_from_label("snapshot.png"),
            Err(FitError::UnlabeledImage("snapshot.png".into()))
        );
    }
}
