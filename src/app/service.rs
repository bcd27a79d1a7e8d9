//! Application service — the hexagonal core.
//!
//! [`AppService`] owns the estimator, the feedback controller and the
//! well registry. It exposes a clean, hardware-agnostic API.  All I/O
//! flows through port traits, making the entire service testable with
//! mock adapters.
//!
//! ```text
//!   AppCommand ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!                  │          AppService           │
//!  ActuatorPort ◀──│ Estimator · Feedback · Wells  │ ──▶ FollowUpPort
//!                  └──────────────────────────────┘
//! ```
//!
//! Each well is locked for the whole of an operation (decide plus the
//! actuation it triggers, or a full replenishment cycle). Operations on
//! different wells only share the registry lookup.

use log::{info, warn};

use crate::calibration::CalibrationCurve;
use crate::config::SystemConfig;
use crate::control::{Action, FeedbackController, ReplenishPlan, Reading};
use crate::error::{BoundsError, DecodeError, Error};
use crate::registry::{Registration, WellRegistry};
use crate::vision::{Side, VolumeEstimate, VolumeEstimator};
use crate::well::{Well, WellId, WellSpec};

use super::commands::{AppCommand, FeedbackInput};
use super::events::{AppEvent, PumpOp};
use super::ports::{ActuatorPort, ClockPort, EventSink, FollowUpPort};

/// Successful outcome of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Registered(Registration),
    Estimate(VolumeEstimate),
    Decision { well: WellId, side: Side, action: Action },
    /// A pump command, replenishment or tally clear completed.
    Done,
    Status(Well),
}

// ───────────────────────────────────────────────────────────────
// AppService
// ───────────────────────────────────────────────────────────────

/// The application service orchestrates all domain logic.
pub struct AppService<C, F> {
    config: SystemConfig,
    estimator: VolumeEstimator,
    controller: FeedbackController,
    registry: WellRegistry,
    clock: C,
    follow_ups: F,
}

impl<C: ClockPort, F: FollowUpPort> AppService<C, F> {
    /// Construct the service. The configuration is validated first.
    pub fn new(
        config: SystemConfig,
        curve: CalibrationCurve,
        clock: C,
        follow_ups: F,
    ) -> Result<Self, Error> {
        config.validate()?;
        info!(
            "AppService: curve '{}' v{} ref_area={}",
            curve.rig_id, curve.format_version, curve.ref_area
        );
        Ok(Self {
            estimator: VolumeEstimator::new(config.estimator.clone(), curve),
            controller: FeedbackController::new(config.feedback.clone()),
            registry: WellRegistry::new(),
            config,
            clock,
            follow_ups,
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn estimator(&self) -> &VolumeEstimator {
        &self.estimator
    }

    pub fn registry(&self) -> &WellRegistry {
        &self.registry
    }

    // ── Command handling ──────────────────────────────────────

    /// Process an external command (request stream, scheduler, CLI).
    pub async fn handle_command(
        &self,
        cmd: AppCommand,
        hw: &impl ActuatorPort,
        sink: &impl EventSink,
    ) -> Result<Reply, Error> {
        match cmd {
            AppCommand::Register { well, spec } => Ok(self.register(well, spec, sink)),
            AppCommand::Estimate { side, image } => {
                let estimate = self.estimator.estimate(&image, side)?;
                if let VolumeEstimate::Rejected { reason } = estimate {
                    sink.emit(&AppEvent::Rejected { well: None, reason });
                } else {
                    sink.emit(&AppEvent::Estimated { side, estimate });
                }
                Ok(Reply::Estimate(estimate))
            }
            AppCommand::Feedback {
                well,
                image_ref,
                input,
            } => self.feedback(&well, &image_ref, input, hw, sink).await,
            AppCommand::Feed { well } => self.feed(&well, hw, sink).await,
            AppCommand::Dispense { well, volume_ul } => {
                self.manual(&well, PumpOp::Dispense(volume_ul), hw, sink).await
            }
            AppCommand::Aspirate { well, volume_ul } => {
                self.manual(&well, PumpOp::Aspirate(volume_ul), hw, sink).await
            }
            AppCommand::Pull { well, count } => {
                self.registry.get(&well)?;
                let count = self.config.limits.check_pull(count)?;
                self.manual(&well, PumpOp::Pull(count), hw, sink).await
            }
            AppCommand::Plunge { well, count } => {
                self.registry.get(&well)?;
                let count = self.config.limits.check_plunge(count)?;
                self.manual(&well, PumpOp::Plunge(count), hw, sink).await
            }
            AppCommand::ClearTally { well } => self.clear_tally(&well, sink).await,
            AppCommand::Status { well } => Ok(Reply::Status(self.registry.snapshot(&well).await?)),
        }
    }

    fn register(&self, well: WellId, spec: WellSpec, sink: &impl EventSink) -> Reply {
        let side = spec.side;
        let outcome = self.registry.register(well.clone(), spec);
        sink.emit(&AppEvent::Registered {
            well,
            side,
            replaced: outcome == Registration::Replaced,
        });
        Reply::Registered(outcome)
    }

    /// One feedback cycle: read, decide, bounds-check, commit, actuate.
    async fn feedback(
        &self,
        id: &WellId,
        image_ref: &str,
        input: FeedbackInput,
        hw: &impl ActuatorPort,
        sink: &impl EventSink,
    ) -> Result<Reply, Error> {
        let handle = self.registry.get(id)?;
        let mut well = handle.lock().await;
        let side = well.spec.side;

        let volume_ul = match input {
            FeedbackInput::Volume(v) if v.is_finite() && v >= 0.0 => v,
            FeedbackInput::Volume(_) => {
                return Err(DecodeError::Malformed("volume must be finite and non-negative".into()).into());
            }
            FeedbackInput::Image(image) => match self.estimator.estimate(&image, side)? {
                VolumeEstimate::Measured { volume_ul, .. } => volume_ul,
                VolumeEstimate::Rejected { reason } => {
                    warn!("feedback {id}: frame rejected ({reason}), retrying capture");
                    sink.emit(&AppEvent::Rejected {
                        well: Some(id.clone()),
                        reason,
                    });
                    self.schedule_follow_up(id, side, sink);
                    return Err(Error::Rejected(reason));
                }
            },
        };

        let reading = Reading {
            side,
            volume_ul,
            image_ref,
            timestamp_secs: self.clock.now_secs(),
        };
        let decision = self.controller.decide(id, &well.state, &reading);
        // Out-of-range corrections are refused before anything is committed.
        let op = self
            .pump_op(&decision.action)
            .inspect_err(|e| self.refuse(id, Error::OutOfBounds(*e), sink))?;
        well.state = decision.state;

        for note in &decision.notes {
            sink.emit(&AppEvent::Noted {
                well: id.clone(),
                note: *note,
            });
        }
        sink.emit(&AppEvent::VolumeLogged(decision.record));
        sink.emit(&AppEvent::Decided {
            well: id.clone(),
            side,
            action: decision.action.clone(),
        });
        if let Action::Alert { text } = &decision.action {
            sink.emit(&AppEvent::Alert {
                well: id.clone(),
                text: text.clone(),
            });
        }

        if let Some(op) = op {
            self.actuate(&mut well, op, hw, sink).await?;
        }

        if decision.action.wants_follow_up() {
            self.schedule_follow_up(id, side, sink);
        }

        Ok(Reply::Decision {
            well: id.clone(),
            side,
            action: decision.action,
        })
    }

    /// Aspirate the spent media in chunks, settle, dispense fresh media.
    async fn feed(&self, id: &WellId, hw: &impl ActuatorPort, sink: &impl EventSink) -> Result<Reply, Error> {
        let handle = self.registry.get(id)?;
        let mut well = handle.lock().await;
        let plan = ReplenishPlan::for_well(&well.spec, &self.config.replenish);

        for &chunk in &plan.aspirate_chunks_ul {
            self.config.limits.check_aspirate(chunk)?;
        }
        self.config.limits.check_dispense(plan.dispense_ul)?;

        info!(
            "feed {id}: aspirate {:.0} uL in {} step(s), pause {}s, dispense {:.0} uL",
            plan.total_aspirated_ul(),
            plan.aspirate_chunks_ul.len(),
            plan.pause.as_secs(),
            plan.dispense_ul
        );

        for &chunk in &plan.aspirate_chunks_ul {
            self.actuate(&mut well, PumpOp::Aspirate(chunk), hw, sink).await?;
        }
        if !plan.pause.is_zero() {
            async_io_mini::Timer::after(plan.pause).await;
        }
        self.actuate(&mut well, PumpOp::Dispense(plan.dispense_ul), hw, sink)
            .await?;

        well.state.iteration += 1;
        sink.emit(&AppEvent::Replenished {
            well: id.clone(),
            iteration: well.state.iteration,
        });
        let side = well.spec.side;
        drop(well);

        self.schedule_follow_up(id, side, sink);
        Ok(Reply::Done)
    }

    /// Operator-requested pump command. Unknown wells and out-of-range
    /// values are refused before anything moves.
    async fn manual(
        &self,
        id: &WellId,
        op: PumpOp,
        hw: &impl ActuatorPort,
        sink: &impl EventSink,
    ) -> Result<Reply, Error> {
        let handle = self.registry.get(id)?;
        self.check(op)?;
        let mut well = handle.lock().await;
        self.actuate(&mut well, op, hw, sink).await?;
        Ok(Reply::Done)
    }

    async fn clear_tally(&self, id: &WellId, sink: &impl EventSink) -> Result<Reply, Error> {
        let handle = self.registry.get(id)?;
        let mut well = handle.lock().await;
        let previous = well.state.retry_tally;
        well.state.retry_tally = 0;
        info!("clear {id}: retry tally {previous} -> 0");
        sink.emit(&AppEvent::TallyCleared {
            well: id.clone(),
            previous,
        });
        Ok(Reply::Done)
    }

    // ── Internal ──────────────────────────────────────────────

    /// Pump operation carrying out `action`, bounds-checked.
    fn pump_op(&self, action: &Action) -> Result<Option<PumpOp>, BoundsError> {
        let op = match action {
            Action::None | Action::Alert { .. } => return Ok(None),
            Action::Aspirate { volume_ul } => PumpOp::Aspirate(*volume_ul),
            Action::Dispense { volume_ul } => PumpOp::Dispense(*volume_ul),
            Action::Pull { count } => PumpOp::Pull(self.config.limits.check_pull(i64::from(*count))?),
        };
        self.check(op)?;
        Ok(Some(op))
    }

    fn check(&self, op: PumpOp) -> Result<(), BoundsError> {
        let limits = &self.config.limits;
        match op {
            PumpOp::Dispense(v) => limits.check_dispense(v),
            PumpOp::Aspirate(v) => limits.check_aspirate(v),
            PumpOp::Pull(n) => limits.check_pull(i64::from(n)).map(|_| ()),
            PumpOp::Plunge(n) => limits.check_plunge(i64::from(n)).map(|_| ()),
        }
    }

    /// Run one pump operation and book it on success.
    async fn actuate(
        &self,
        well: &mut Well,
        op: PumpOp,
        hw: &impl ActuatorPort,
        sink: &impl EventSink,
    ) -> Result<(), Error> {
        let result = match op {
            PumpOp::Dispense(v) => hw.dispense(&well.id, v).await,
            PumpOp::Aspirate(v) => hw.aspirate(&well.id, v).await,
            PumpOp::Pull(n) => hw.pull(&well.id, n).await,
            PumpOp::Plunge(n) => hw.plunge(&well.id, n).await,
        };
        if let Err(e) = result {
            self.refuse(&well.id, Error::Actuator(e), sink);
            return Err(e.into());
        }

        match op {
            PumpOp::Dispense(v) => well.state.record_dispense(v),
            PumpOp::Aspirate(v) => well.state.record_aspirate(v),
            PumpOp::Pull(_) | PumpOp::Plunge(_) => {}
        }
        sink.emit(&AppEvent::Pumped {
            well: well.id.clone(),
            op,
        });
        Ok(())
    }

    fn refuse(&self, id: &WellId, error: Error, sink: &impl EventSink) {
        warn!("{id}: actuation refused: {error}");
        sink.emit(&AppEvent::ActuationFailed {
            well: id.clone(),
            error,
        });
    }

    fn schedule_follow_up(&self, id: &WellId, side: Side, sink: &impl EventSink) {
        let delay_secs = self.config.follow_up.capture_delay_secs;
        self.follow_ups.schedule_capture(id, side, delay_secs);
        sink.emit(&AppEvent::FollowUpScheduled {
            well: id.clone(),
            side,
            delay_secs,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActuatorError;
    use futures_lite::future::block_on;

    struct Clock;
    impl ClockPort for Clock {
        fn now_secs(&self) -> u64 {
            42
        }
    }

    struct NoFollowUps;
    impl FollowUpPort for NoFollowUps {
        fn schedule_capture(&self, _: &WellId, _: Side, _: u32) {}
    }

    struct NullSink;
    impl EventSink for NullSink {
        fn emit(&self, _: &AppEvent) {}
    }

    struct DeadPump;
    impl ActuatorPort for DeadPump {
        async fn dispense(&self, _: &WellId, _: f64) -> Result<(), ActuatorError> {
            Err(ActuatorError::NoAcknowledge)
        }
        async fn aspirate(&self, _: &WellId, _: f64) -> Result<(), ActuatorError> {
            Err(ActuatorError::NoAcknowledge)
        }
        async fn pull(&self, _: &WellId, _: u8) -> Result<(), ActuatorError> {
            Err(ActuatorError::Disconnected)
        }
        async fn plunge(&self, _: &WellId, _: u8) -> Result<(), ActuatorError> {
            Err(ActuatorError::Disconnected)
        }
    }

    fn service() -> AppService<Clock, NoFollowUps> {
        AppService::new(SystemConfig::default(), CalibrationCurve::reference(), Clock, NoFollowUps).unwrap()
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut cfg = SystemConfig::default();
        cfg.feedback.deadband_ul = 0.0;
        assert!(AppService::new(cfg, CalibrationCurve::reference(), Clock, NoFollowUps).is_err());
    }

    #[test]
    fn failed_dispense_is_not_booked() {
        let app = service();
        let id = WellId::new("W1").unwrap();
        block_on(async {
            app.handle_command(
                AppCommand::Register {
                    well: id.clone(),
                    spec: WellSpec::with_defaults(Side::Left, &app.config().well_defaults),
                },
                &DeadPump,
                &NullSink,
            )
            .await
            .unwrap();
            let err = app
                .handle_command(
                    AppCommand::Dispense {
                        well: id.clone(),
                        volume_ul: 100.0,
                    },
                    &DeadPump,
                    &NullSink,
                )
                .await
                .unwrap_err();
            assert_eq!(err, Error::Actuator(ActuatorError::NoAcknowledge));
            let well = app.registry().snapshot(&id).await.unwrap();
            assert_eq!(well.state.expected_in_volume_ul, 0.0);
        });
    }

    #[test]
    fn non_finite_feedback_volume_is_refused() {
        let app = service();
        let id = WellId::new("W1").unwrap();
        app.registry()
            .register(id.clone(), WellSpec::with_defaults(Side::Left, &app.config().well_defaults));
        let err = block_on(app.handle_command(
            AppCommand::Feedback {
                well: id,
                image_ref: "x".into(),
                input: FeedbackInput::Volume(f64::NAN),
            },
            &DeadPump,
            &NullSink,
        ))
        .unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::Malformed(_))));
    }
}
