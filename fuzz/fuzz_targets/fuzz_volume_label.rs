//! Fuzz target: `parse_volume_label`
//!
//! Any file name either carries no label or a finite, non-negative
//! volume.
//!
//! cargo fuzz run fuzz_volume_label

#![no_main]

use libfuzzer_sys::fuzz_target;
use wellkeeper::calibration::label::parse_volume_label;

fuzz_target!(|name: &str| {
    if let Some(v) = parse_volume_label(name) {
        assert!(v.is_finite() && v >= 0.0, "{name:?} -> {v}");
    }
});
