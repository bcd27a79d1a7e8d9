//! Mock adapters for integration tests.
//!
//! Records every actuator call, event and follow-up request so tests can
//! assert on the full history without a fluidics rig.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use image::RgbImage;
use wellkeeper::app::events::{AppEvent, PumpOp};
use wellkeeper::app::ports::{ActuatorPort, ClockPort, EventSink, FollowUpPort, ImageSourcePort};
use wellkeeper::error::{ActuatorError, DecodeError, Error};
use wellkeeper::vision::Side;
use wellkeeper::well::WellId;

// ── RecordingActuator ─────────────────────────────────────────

#[derive(Default)]
pub struct RecordingActuator {
    pub calls: RefCell<Vec<(WellId, PumpOp)>>,
    fail_next: Cell<Option<ActuatorError>>,
}

#[allow(dead_code)]
impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call with `error`; it is not recorded.
    pub fn fail_next(&self, error: ActuatorError) {
        self.fail_next.set(Some(error));
    }

    pub fn ops(&self) -> Vec<PumpOp> {
        self.calls.borrow().iter().map(|(_, op)| *op).collect()
    }

    fn record(&self, well: &WellId, op: PumpOp) -> Result<(), ActuatorError> {
        if let Some(e) = self.fail_next.take() {
            return Err(e);
        }
        self.calls.borrow_mut().push((well.clone(), op));
        Ok(())
    }
}

impl ActuatorPort for RecordingActuator {
    async fn dispense(&self, well: &WellId, volume_ul: f64) -> Result<(), ActuatorError> {
        self.record(well, PumpOp::Dispense(volume_ul))
    }

    async fn aspirate(&self, well: &WellId, volume_ul: f64) -> Result<(), ActuatorError> {
        self.record(well, PumpOp::Aspirate(volume_ul))
    }

    async fn pull(&self, well: &WellId, count: u8) -> Result<(), ActuatorError> {
        self.record(well, PumpOp::Pull(count))
    }

    async fn plunge(&self, well: &WellId, count: u8) -> Result<(), ActuatorError> {
        self.record(well, PumpOp::Plunge(count))
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: RefCell<Vec<AppEvent>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &AppEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

// ── FixedClock ────────────────────────────────────────────────

pub struct FixedClock(pub u64);

impl ClockPort for FixedClock {
    fn now_secs(&self) -> u64 {
        self.0
    }
}

// ── RecordingFollowUps ────────────────────────────────────────

#[derive(Default)]
pub struct RecordingFollowUps {
    pub requests: RefCell<Vec<(WellId, Side, u32)>>,
}

impl FollowUpPort for RecordingFollowUps {
    fn schedule_capture(&self, well: &WellId, side: Side, delay_secs: u32) {
        self.requests.borrow_mut().push((well.clone(), side, delay_secs));
    }
}

// ── StaticImages ──────────────────────────────────────────────

/// In-memory image store keyed by reference.
#[derive(Default)]
pub struct StaticImages {
    pub images: HashMap<String, RgbImage>,
}

#[allow(dead_code)]
impl StaticImages {
    pub fn with(mut self, name: &str, img: RgbImage) -> Self {
        self.images.insert(name.to_owned(), img);
        self
    }
}

impl ImageSourcePort for StaticImages {
    fn load(&self, image_ref: &str) -> Result<RgbImage, Error> {
        self.images
            .get(image_ref)
            .cloned()
            .ok_or_else(|| DecodeError::Image(format!("{image_ref}: not found")).into())
    }
}

/// A featureless frame large enough for the reference crops. It has no
/// edges, so the quality gate refuses it as blurry.
#[allow(dead_code)]
pub fn blank_frame() -> RgbImage {
    RgbImage::from_pixel(1480, 1640, image::Rgb([200, 200, 200]))
}
