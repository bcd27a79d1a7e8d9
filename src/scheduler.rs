//! Timer/scheduler engine.
//!
//! Runs beside the request stream. The service posts follow-up capture
//! requests into a bounded [`ScheduleInbox`]; the scheduler drains the
//! inbox on every tick and notifies a [`SchedulerDelegate`] when a
//! schedule fires. The host loop implements the delegate to request a
//! capture or start a feed.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Trigger Sources                          │
//! │                                                              │
//! │  ┌──────────────┐   ┌───────────────┐   ┌────────────────┐   │
//! │  │ AppService   │   │ Feed schedule │   │ Rejected frame │   │
//! │  │ (follow-up)  │   │ (periodic)    │   │ (retry)        │   │
//! │  └──────┬───────┘   └───────┬───────┘   └───────┬────────┘   │
//! │         │                   │                   │            │
//! │         ▼                   ▼                   ▼            │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │        ScheduleInbox (bounded, non-blocking send)      │  │
//! │  └───────────────────────┬────────────────────────────────┘  │
//! │                          ▼                                   │
//! │                  Scheduler::tick()                           │
//! │                          ▼                                   │
//! │                  SchedulerDelegate                           │
//! │          (capture request · AppCommand::Feed)                │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{info, warn};

use crate::app::ports::{FollowUpPort, ScheduleFiredKind, SchedulerDelegate};
use crate::vision::Side;
use crate::well::WellId;

// ═══════════════════════════════════════════════════════════════
//  Schedule types
// ═══════════════════════════════════════════════════════════════

/// A single schedule entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub well: WellId,
    pub side: Side,
    pub kind: ScheduleKind,
}

/// The type of schedule determines how and when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    /// Fire every `interval_secs` seconds (replenishment).
    Periodic { interval_secs: u32 },
    /// Fire once after `delay_secs`, then free the slot (capture).
    OneShot { delay_secs: u32 },
}

/// Requests accepted through the inbox.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleRequest {
    Add(Schedule),
    /// Drop every schedule of a well.
    Cancel(WellId),
}

// ═══════════════════════════════════════════════════════════════
//  Inbox
// ═══════════════════════════════════════════════════════════════

/// Inbox depth.
pub const INBOX_DEPTH: usize = 16;

/// Bounded queue between request producers and the scheduler.
pub struct ScheduleInbox {
    channel: Channel<CriticalSectionRawMutex, ScheduleRequest, INBOX_DEPTH>,
}

impl Default for ScheduleInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleInbox {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Queue a request. Returns `false` (and logs) when the inbox is full.
    pub fn post(&self, request: ScheduleRequest) -> bool {
        if self.channel.try_send(request).is_err() {
            warn!("Scheduler: inbox full, dropping request");
            return false;
        }
        true
    }

    pub fn try_take(&self) -> Option<ScheduleRequest> {
        self.channel.try_receive().ok()
    }
}

impl FollowUpPort for ScheduleInbox {
    fn schedule_capture(&self, well: &WellId, side: Side, delay_secs: u32) {
        self.post(ScheduleRequest::Add(Schedule {
            well: well.clone(),
            side,
            kind: ScheduleKind::OneShot { delay_secs },
        }));
    }
}

impl<T: FollowUpPort + ?Sized> FollowUpPort for &T {
    fn schedule_capture(&self, well: &WellId, side: Side, delay_secs: u32) {
        (**self).schedule_capture(well, side, delay_secs);
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// Maximum number of concurrent schedules (stack-allocated).
pub const MAX_SCHEDULES: usize = 32;

/// The scheduler engine.
///
/// Decoupled from capture and feed dispatch: when a schedule fires it
/// invokes the [`SchedulerDelegate`] callback and nothing else.
pub struct Scheduler {
    schedules: [Option<ScheduleEntry>; MAX_SCHEDULES],
    enabled: bool,
}

/// Internal bookkeeping for a live schedule.
#[derive(Debug, Clone)]
struct ScheduleEntry {
    schedule: Schedule,
    /// Ticks elapsed since the last fire (or since added).
    elapsed_ticks: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            schedules: [const { None }; MAX_SCHEDULES],
            enabled: true,
        }
    }

    /// Add a schedule. Returns the slot index, or `None` if full.
    ///
    /// A one-shot for a well that already has a pending one-shot
    /// replaces it, restarting the delay.
    pub fn add(&mut self, schedule: Schedule) -> Option<usize> {
        if matches!(schedule.kind, ScheduleKind::OneShot { .. }) {
            if let Some(i) = self.find(&schedule.well, |k| matches!(k, ScheduleKind::OneShot { .. })) {
                info!("Scheduler: restarted capture for '{}' at slot {}", schedule.well, i);
                self.schedules[i] = Some(ScheduleEntry {
                    schedule,
                    elapsed_ticks: 0,
                });
                return Some(i);
            }
        }
        for (i, slot) in self.schedules.iter_mut().enumerate() {
            if slot.is_none() {
                info!("Scheduler: added {:?} for '{}' at slot {}", schedule.kind, schedule.well, i);
                *slot = Some(ScheduleEntry {
                    schedule,
                    elapsed_ticks: 0,
                });
                return Some(i);
            }
        }
        warn!("Scheduler: all {} slots in use", MAX_SCHEDULES);
        None
    }

    /// Remove every schedule of `well`. Returns how many were removed.
    pub fn cancel(&mut self, well: &WellId) -> usize {
        let mut removed = 0;
        for slot in &mut self.schedules {
            if slot.as_ref().is_some_and(|e| &e.schedule.well == well) {
                *slot = None;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Scheduler: cancelled {} schedule(s) for '{}'", removed, well);
        }
        removed
    }

    /// Apply every queued request.
    pub fn drain(&mut self, inbox: &ScheduleInbox) {
        while let Some(request) = inbox.try_take() {
            match request {
                ScheduleRequest::Add(s) => {
                    self.add(s);
                }
                ScheduleRequest::Cancel(well) => {
                    self.cancel(&well);
                }
            }
        }
    }

    /// Enable or disable the entire scheduler.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Tick the scheduler. Call once per tick period.
    ///
    /// When a schedule fires, `delegate.on_schedule_fired()` is called
    /// with its target and fire kind.
    pub fn tick(&mut self, tick_secs: f32, delegate: &mut dyn SchedulerDelegate) {
        if !self.enabled {
            return;
        }

        for slot in &mut self.schedules {
            let Some(entry) = slot else { continue };
            entry.elapsed_ticks += 1;
            let elapsed_secs = entry.elapsed_ticks as f32 * tick_secs;

            match entry.schedule.kind {
                ScheduleKind::Periodic { interval_secs } => {
                    if elapsed_secs >= interval_secs as f32 {
                        info!(
                            "Scheduler: '{}' periodic fire (every {}s)",
                            entry.schedule.well, interval_secs
                        );
                        delegate.on_schedule_fired(
                            &entry.schedule.well,
                            entry.schedule.side,
                            ScheduleFiredKind::Periodic,
                        );
                        entry.elapsed_ticks = 0;
                    }
                }
                ScheduleKind::OneShot { delay_secs } => {
                    if elapsed_secs >= delay_secs as f32 {
                        info!(
                            "Scheduler: '{}' one-shot fired (after {}s)",
                            entry.schedule.well, delay_secs
                        );
                        delegate.on_schedule_fired(
                            &entry.schedule.well,
                            entry.schedule.side,
                            ScheduleFiredKind::OneShot,
                        );
                        *slot = None;
                    }
                }
            }
        }
    }

    /// Number of live schedules.
    pub fn active_count(&self) -> usize {
        self.schedules.iter().filter(|s| s.is_some()).count()
    }

    fn find(&self, well: &WellId, kind: impl Fn(&ScheduleKind) -> bool) -> Option<usize> {
        self.schedules.iter().position(|s| {
            s.as_ref()
                .is_some_and(|e| &e.schedule.well == well && kind(&e.schedule.kind))
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
