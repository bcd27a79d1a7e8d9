//! Port traits — the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ AppService (domain)
//! ```
//!
//! Driven adapters (pumps, event sinks, clocks, storage) implement these
//! traits. The [`AppService`](super::service::AppService) consumes them via
//! generics, so the domain core never touches hardware directly.
//!
//! Ports used from concurrent per-well operations take `&self`; adapters
//! that keep state use interior mutability.

use crate::config::SystemConfig;
use crate::error::ActuatorError;
use crate::vision::Side;
use crate::well::WellId;

// ───────────────────────────────────────────────────────────────
// Actuator port (driven adapter: domain → pumps and valves)
// ───────────────────────────────────────────────────────────────

/// Pump and valve controller of the fluidics rig.
///
/// Every call resolves once the hardware acknowledges completion. A
/// transfer that has started is never cancelled.
#[allow(async_fn_in_trait)]
pub trait ActuatorPort {
    /// Inject `volume_ul` into the well.
    async fn dispense(&self, well: &WellId, volume_ul: f64) -> Result<(), ActuatorError>;

    /// Extract `volume_ul` from the well.
    async fn aspirate(&self, well: &WellId, volume_ul: f64) -> Result<(), ActuatorError>;

    /// Draw the well contents back and forth `count` times (unclogs the outlet).
    async fn pull(&self, well: &WellId, count: u8) -> Result<(), ActuatorError>;

    /// Push the well contents `count` times.
    async fn plunge(&self, well: &WellId, count: u8) -> Result<(), ActuatorError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / upload)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go (console log,
/// per-well volume log, message bus, etc.).
pub trait EventSink {
    fn emit(&self, event: &super::events::AppEvent);
}

/// Fan-out to two sinks.
impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn emit(&self, event: &super::events::AppEvent) {
        self.0.emit(event);
        self.1.emit(event);
    }
}

/// An absent sink drops events.
impl<T: EventSink> EventSink for Option<T> {
    fn emit(&self, event: &super::events::AppEvent) {
        if let Some(sink) = self {
            sink.emit(event);
        }
    }
}

impl<T: EventSink + ?Sized> EventSink for &T {
    fn emit(&self, event: &super::events::AppEvent) {
        (**self).emit(event);
    }
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Wall-clock source for log record timestamps.
pub trait ClockPort {
    /// Seconds since the Unix epoch.
    fn now_secs(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Follow-up port (domain → scheduler)
// ───────────────────────────────────────────────────────────────

/// Requests a verification capture after a delay.
///
/// Fire-and-forget: the domain never waits for the capture and a dropped
/// request only costs one verification cycle.
pub trait FollowUpPort {
    fn schedule_capture(&self, well: &WellId, side: Side, delay_secs: u32);
}

// ───────────────────────────────────────────────────────────────
// Image source port (driven adapter: image reference → pixels)
// ───────────────────────────────────────────────────────────────

/// Resolves an image reference carried by a request into pixels.
pub trait ImageSourcePort {
    fn load(&self, image_ref: &str) -> Result<image::RgbImage, crate::error::Error>;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// Implementations MUST validate config values before persisting.
/// Invalid values are rejected with [`ConfigError::ValidationFailed`],
/// never silently clamped.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`SystemConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ blob storage)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for configuration and calibration blobs.
///
/// Keys are namespaced to prevent collisions between subsystems. Write
/// operations MUST be atomic: no partial writes on power loss.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (decouples scheduler from capture dispatch)
// ───────────────────────────────────────────────────────────────

/// Callback trait that the scheduler invokes when a schedule fires.
///
/// This decouples the [`Scheduler`](crate::scheduler::Scheduler) from
/// whatever performs the capture or feed. The host loop implements it
/// by forwarding to the camera or the service; the scheduler itself
/// knows nothing about either.
pub trait SchedulerDelegate {
    /// Called when a schedule fires.
    ///
    /// * `well` / `side` — the target of the schedule.
    /// * `kind`  — periodic feed or one-shot capture.
    fn on_schedule_fired(&mut self, well: &WellId, side: Side, kind: ScheduleFiredKind);
}

/// Discriminant passed to [`SchedulerDelegate::on_schedule_fired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleFiredKind {
    /// A recurring feed schedule fired.
    Periodic,
    /// A one-shot verification capture fired (auto-removed after).
    OneShot,
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// No config found in storage (first run).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// The caller's buffer is smaller than the stored value.
    BufferTooSmall { needed: usize },
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::BufferTooSmall { needed } => write!(f, "buffer too small, need {} bytes", needed),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for StorageError {}
