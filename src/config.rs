//! System configuration parameters
//!
//! All tunable parameters for the well controller. The defaults reproduce
//! the reference imaging rig and pump hardware; a deployment overrides
//! them from a JSON file or from the storage port.
//!
//! The calibration curve is not part of this struct. It is rig-specific
//! data with its own versioned persistence (see [`crate::calibration`]).

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::vision::CropRect;

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Imaging geometry and segmentation thresholds.
    pub estimator: EstimatorConfig,
    /// Offline curve fitting parameters.
    pub calibration: CalibrationConfig,
    /// Feedback decision thresholds.
    pub feedback: FeedbackConfig,
    /// Hard limits of the pump hardware.
    pub limits: PumpLimits,
    /// Scheduled maintenance (aspirate, pause, dispense).
    pub replenish: ReplenishConfig,
    /// Follow-up image captures and periodic feeds.
    pub follow_up: FollowUpConfig,
    /// Values applied when a registration omits them.
    pub well_defaults: WellDefaults,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            calibration: CalibrationConfig::default(),
            feedback: FeedbackConfig::default(),
            limits: PumpLimits::default(),
            replenish: ReplenishConfig::default(),
            follow_up: FollowUpConfig::default(),
            well_defaults: WellDefaults::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Tube crop for the LEFT side.
    pub left_crop: CropRect,
    /// Tube crop for the RIGHT side.
    pub right_crop: CropRect,
    /// Patch that must stay dark while the panel is off.
    pub reference_patch: CropRect,
    /// Per-channel mean above which the patch counts as lit.
    pub panel_lit_threshold: f64,
    /// Minimum Laplacian variance of the full image.
    pub blur_threshold: f64,
    /// Fluid hue band, degrees on 0..360.
    pub hue_min_deg: f64,
    pub hue_max_deg: f64,
    /// Minimum saturation on 0..1 for a fluid pixel.
    pub saturation_min: f64,
    /// Side of the square dilation kernel.
    pub dilate_kernel: u32,
    /// Rows searched either side of the saturation peak.
    pub meniscus_window: u32,
    /// Rows above the meniscus scanned by the refinement mask.
    pub refine_band: u32,
    /// Inclusive 8-bit value range reclassified as meniscus.
    pub refine_value_min: u8,
    pub refine_value_max: u8,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            // Reference rig; frames must be at least 1470 wide and 1630 tall
            left_crop: CropRect::new(210, 1275, 1135, 1155),
            right_crop: CropRect::new(210, 1275, 1450, 1470),
            reference_patch: CropRect::new(1600, 1630, 650, 700),
            panel_lit_threshold: 20.0,
            blur_threshold: 50.0,

            // 90..174 on the 0..179 scale
            hue_min_deg: 90.0 * 360.0 / 179.0,
            hue_max_deg: 174.0 * 360.0 / 179.0,
            saturation_min: 15.0 / 255.0,
            dilate_kernel: 4,

            meniscus_window: 12,
            refine_band: 20,
            refine_value_min: 30,
            refine_value_max: 130,
        }
    }
}

// ---------------------------------------------------------------------------
// Calibration fit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Physical volume of the conical tip; the regime breakpoint.
    pub cone_vol_ul: f64,
    /// Seed the cone regime with the (0 px, 0 uL) sample.
    pub anchor_origin: bool,
    /// Constrain both cubics through the breakpoint sample.
    pub pin_breakpoint: bool,
    /// Largest tolerated gap between the regimes at the breakpoint.
    pub continuity_tolerance_ul: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            cone_vol_ul: 1500.0,
            anchor_origin: true,
            pin_breakpoint: true,
            continuity_tolerance_ul: 15.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Feedback decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Accepted deviation from the expected volume.
    pub deadband_ul: f64,
    /// Drop between readings that marks a replaced reservoir.
    pub swap_threshold_ul: f64,
    /// Raw readings above this raise a warning note.
    pub high_volume_warn_ul: f64,
    /// Tally below which a low well is corrected by aspiration.
    pub aspirate_attempts: u32,
    /// Tally below which a low well is pulled; Alert from here on.
    pub pull_attempts: u32,
    /// Largest corrective dispense per cycle.
    pub dispense_cap_ul: f64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            deadband_ul: 150.0,
            swap_threshold_ul: 2000.0,
            high_volume_warn_ul: 13000.0,
            aspirate_attempts: 5,
            pull_attempts: 7,
            dispense_cap_ul: 200.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Pump limits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpLimits {
    pub max_dispense_ul: f64,
    pub max_aspirate_ul: f64,
    /// Upper bound on pull and plunge repetitions.
    pub max_count: u8,
}

impl Default for PumpLimits {
    fn default() -> Self {
        Self {
            max_dispense_ul: 5000.0,  // 5 mL
            max_aspirate_ul: 10000.0, // 10 mL
            max_count: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// Replenishment and scheduling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplenishConfig {
    /// Largest single aspiration the syringe accepts.
    pub chunk_ul: f64,
    /// Settling time between aspirate and dispense.
    pub pause_secs: u32,
}

impl Default for ReplenishConfig {
    fn default() -> Self {
        Self {
            chunk_ul: 1000.0,
            pause_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowUpConfig {
    /// Delay before the verification capture after a correction.
    pub capture_delay_secs: u32,
    /// Scheduler tick period.
    pub tick_ms: u32,
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            capture_delay_secs: 60,
            tick_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WellDefaults {
    pub in_volume_ul: f64,
    pub out_volume_ul: f64,
    pub media: String,
}

impl Default for WellDefaults {
    fn default() -> Self {
        Self {
            in_volume_ul: 300.0,
            out_volume_ul: 3000.0,
            media: "Ry5".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl SystemConfig {
    /// Reject values that would make the pipeline or the controller
    /// inconsistent. Values are never clamped.
    pub fn validate(&self) -> Result<(), Error> {
        let est = &self.estimator;
        if est.left_crop.is_empty() || est.right_crop.is_empty() {
            return Err(Error::Config("crop rectangles must be non-empty"));
        }
        if est.reference_patch.is_empty() {
            return Err(Error::Config("reference patch must be non-empty"));
        }
        if !(0.0..=360.0).contains(&est.hue_min_deg)
            || !(0.0..=360.0).contains(&est.hue_max_deg)
            || est.hue_min_deg > est.hue_max_deg
        {
            return Err(Error::Config("hue band must satisfy 0 <= min <= max <= 360"));
        }
        if !(0.0..=1.0).contains(&est.saturation_min) {
            return Err(Error::Config("saturation_min must be 0.0-1.0"));
        }
        if est.dilate_kernel == 0 {
            return Err(Error::Config("dilate_kernel must be at least 1"));
        }
        if est.refine_value_min > est.refine_value_max {
            return Err(Error::Config("refine value range is inverted"));
        }
        if !est.blur_threshold.is_finite() || est.blur_threshold < 0.0 {
            return Err(Error::Config("blur_threshold must be non-negative"));
        }

        if self.calibration.cone_vol_ul <= 0.0 {
            return Err(Error::Config("cone_vol_ul must be positive"));
        }
        if self.calibration.continuity_tolerance_ul < 0.0 {
            return Err(Error::Config("continuity_tolerance_ul must be non-negative"));
        }

        let fb = &self.feedback;
        if !fb.deadband_ul.is_finite() || fb.deadband_ul <= 0.0 {
            return Err(Error::Config("deadband_ul must be positive"));
        }
        if !fb.swap_threshold_ul.is_finite() || fb.swap_threshold_ul <= 0.0 {
            return Err(Error::Config("swap_threshold_ul must be positive"));
        }
        if fb.aspirate_attempts > fb.pull_attempts {
            return Err(Error::Config("aspirate_attempts must not exceed pull_attempts"));
        }
        if fb.dispense_cap_ul <= 0.0 || fb.dispense_cap_ul > self.limits.max_dispense_ul {
            return Err(Error::Config("dispense_cap_ul must be within the dispense limit"));
        }
        // The last pull rung issues `pull_attempts - 1` pulls.
        if fb.pull_attempts.saturating_sub(1) > u32::from(self.limits.max_count) {
            return Err(Error::Config("pull_attempts exceeds the pump count limit"));
        }

        if self.limits.max_dispense_ul <= 0.0 || self.limits.max_aspirate_ul <= 0.0 {
            return Err(Error::Config("pump limits must be positive"));
        }
        if self.replenish.chunk_ul <= 0.0 || self.replenish.chunk_ul > self.limits.max_aspirate_ul {
            return Err(Error::Config("chunk_ul must be within the aspirate limit"));
        }
        if self.follow_up.tick_ms == 0 {
            return Err(Error::Config("tick_ms must be positive"));
        }
        if self.well_defaults.in_volume_ul < 0.0 || self.well_defaults.out_volume_ul < 0.0 {
            return Err(Error::Config("default well volumes must be non-negative"));
        }
        Ok(())
    }
}
