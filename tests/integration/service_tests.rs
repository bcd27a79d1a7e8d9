//! Integration tests for the AppService → controller → actuator chain.
//!
//! Every test drives the service through `handle_command` exactly as the
//! request server does and checks what reached the pumps, the event
//! sink and the follow-up scheduler.

use futures_lite::future::block_on;

use super::mock_hw::{
    FixedClock, RecordingActuator, RecordingFollowUps, RecordingSink, blank_frame,
};

use wellkeeper::app::commands::{AppCommand, FeedbackInput};
use wellkeeper::app::events::{AppEvent, PumpOp};
use wellkeeper::app::service::{AppService, Reply};
use wellkeeper::calibration::CalibrationCurve;
use wellkeeper::config::SystemConfig;
use wellkeeper::control::Action;
use wellkeeper::error::{ActuatorError, BoundsError, Error};
use wellkeeper::registry::Registration;
use wellkeeper::vision::Side;
use wellkeeper::well::{Well, WellId, WellSpec};

const NOW: u64 = 1_700_000_000;

fn config() -> SystemConfig {
    let mut cfg = SystemConfig::default();
    cfg.replenish.pause_secs = 0;
    cfg
}

fn id(raw: &str) -> WellId {
    WellId::new(raw).unwrap()
}

struct Rig<'a> {
    app: AppService<FixedClock, &'a RecordingFollowUps>,
    hw: RecordingActuator,
    sink: RecordingSink,
}

impl<'a> Rig<'a> {
    fn new(follow_ups: &'a RecordingFollowUps) -> Self {
        Self {
            app: AppService::new(config(), CalibrationCurve::reference(), FixedClock(NOW), follow_ups)
                .unwrap(),
            hw: RecordingActuator::new(),
            sink: RecordingSink::new(),
        }
    }

    fn run(&self, cmd: AppCommand) -> Result<Reply, Error> {
        block_on(self.app.handle_command(cmd, &self.hw, &self.sink))
    }

    fn register(&self, well: &WellId, side: Side) -> Reply {
        let spec = WellSpec::with_defaults(side, &self.app.config().well_defaults);
        self.run(AppCommand::Register {
            well: well.clone(),
            spec,
        })
        .unwrap()
    }

    fn feedback(&self, well: &WellId, volume_ul: f64) -> Result<Reply, Error> {
        self.run(AppCommand::Feedback {
            well: well.clone(),
            image_ref: format!("{well}-{volume_ul}.jpg"),
            input: FeedbackInput::Volume(volume_ul),
        })
    }

    fn action(&self, well: &WellId, volume_ul: f64) -> Action {
        match self.feedback(well, volume_ul).unwrap() {
            Reply::Decision { action, .. } => action,
            other => panic!("expected a decision, got {other:?}"),
        }
    }

    fn well(&self, well: &WellId) -> Well {
        block_on(self.app.registry().snapshot(well)).unwrap()
    }

    /// Register and run one replenishment: the well then expects 300 uL,
    /// sits at iteration 1 and has no offset.
    fn settled(&self, well: &WellId) {
        self.register(well, Side::Right);
        self.run(AppCommand::Feed { well: well.clone() }).unwrap();
        self.hw.calls.borrow_mut().clear();
    }
}

// ── Registration ─────────────────────────────────────────────

#[test]
fn re_registration_replaces_the_well() {
    let follow_ups = RecordingFollowUps::default();
    let rig = Rig::new(&follow_ups);
    let w = id("12345");

    assert_eq!(rig.register(&w, Side::Left), Reply::Registered(Registration::Created));
    rig.run(AppCommand::Feed { well: w.clone() }).unwrap();
    assert_eq!(rig.well(&w).state.iteration, 1);

    assert_eq!(rig.register(&w, Side::Right), Reply::Registered(Registration::Replaced));
    let well = rig.well(&w);
    assert_eq!(well.spec.side, Side::Right);
    assert_eq!(well.state.iteration, 0);
    assert_eq!(well.state.expected_in_volume_ul, 0.0);
    assert_eq!(
        rig.sink
            .count(|e| matches!(e, AppEvent::Registered { replaced: true, .. })),
        1
    );
}

#[test]
fn unknown_well_is_refused_before_any_actuation() {
    let follow_ups = RecordingFollowUps::default();
    let rig = Rig::new(&follow_ups);
    let ghost = id("ghost");

    for cmd in [
        AppCommand::Dispense {
            well: ghost.clone(),
            volume_ul: 10.0,
        },
        AppCommand::Pull {
            well: ghost.clone(),
            count: 99,
        },
        AppCommand::Feed { well: ghost.clone() },
        AppCommand::Status { well: ghost.clone() },
    ] {
        assert_eq!(rig.run(cmd), Err(Error::MissingIdentifier(ghost.clone())));
    }
    assert!(rig.feedback(&ghost, 10.0).is_err());
    assert!(rig.hw.calls.borrow().is_empty());
}

// ── Replenishment ─────────────────────────────────────────────

#[test]
fn feed_aspirates_in_chunks_then_dispenses() {
    let follow_ups = RecordingFollowUps::default();
    let rig = Rig::new(&follow_ups);
    let w = id("W1");
    rig.register(&w, Side::Left);

    assert_eq!(rig.run(AppCommand::Feed { well: w.clone() }), Ok(Reply::Done));
    assert_eq!(
        rig.hw.ops(),
        vec![
            PumpOp::Aspirate(1000.0),
            PumpOp::Aspirate(1000.0),
            PumpOp::Aspirate(1000.0),
            PumpOp::Dispense(300.0),
        ]
    );
    let state = rig.well(&w).state;
    assert_eq!(state.expected_out_volume_ul, 3000.0);
    assert_eq!(state.expected_in_volume_ul, 300.0);
    assert_eq!(state.iteration, 1);
    assert_eq!(*follow_ups.requests.borrow(), vec![(w, Side::Left, 60)]);
}

#[test]
fn failed_step_aborts_the_feed_without_booking_it() {
    let follow_ups = RecordingFollowUps::default();
    let rig = Rig::new(&follow_ups);
    let w = id("W1");
    rig.register(&w, Side::Left);
    rig.hw.fail_next(ActuatorError::ValveFault);

    assert_eq!(
        rig.run(AppCommand::Feed { well: w.clone() }),
        Err(Error::Actuator(ActuatorError::ValveFault))
    );
    let state = rig.well(&w).state;
    assert_eq!(state.expected_out_volume_ul, 0.0);
    assert_eq!(state.iteration, 0);
    assert!(follow_ups.requests.borrow().is_empty());
    assert_eq!(
        rig.sink.count(|e| matches!(e, AppEvent::ActuationFailed { .. })),
        1
    );
}

// ── Feedback ─────────────────────────────────────────────────

#[test]
fn first_reading_only_fixes_the_offset() {
    let follow_ups = RecordingFollowUps::default();
    let rig = Rig::new(&follow_ups);
    let w = id("W1");
    rig.register(&w, Side::Right);

    assert_eq!(rig.action(&w, 420.0), Action::None);
    let state = rig.well(&w).state;
    assert_eq!(state.reservoir_offset_ul, 420.0);
    assert_eq!(state.reservoir_volume_ul, 420.0);
    assert!(rig.hw.calls.borrow().is_empty());
}

#[test]
fn corrections_are_actuated_and_booked() {
    let follow_ups = RecordingFollowUps::default();
    let rig = Rig::new(&follow_ups);
    let w = id("W1");
    rig.settled(&w);
    follow_ups.requests.borrow_mut().clear();

    // Inside the band.
    assert_eq!(rig.action(&w, 350.0), Action::None);
    assert!(rig.hw.calls.borrow().is_empty());

    // Low by 200.
    assert_eq!(rig.action(&w, 100.0), Action::Aspirate { volume_ul: 200.0 });
    assert_eq!(rig.well(&w).state.expected_out_volume_ul, 3200.0);
    assert_eq!(follow_ups.requests.borrow().len(), 1);

    // High by 700: capped.
    assert_eq!(rig.action(&w, 1000.0), Action::Dispense { volume_ul: 200.0 });
    let state = rig.well(&w).state;
    assert_eq!(state.expected_in_volume_ul, 500.0);
    assert_eq!(state.retry_tally, 0);

    assert_eq!(
        rig.hw.ops(),
        vec![PumpOp::Aspirate(200.0), PumpOp::Dispense(200.0)]
    );
    // Dispense does not ask for a verification capture.
    assert_eq!(follow_ups.requests.borrow().len(), 1);
}

#[test]
fn stuck_well_climbs_the_ladder_until_cleared() {
    let follow_ups = RecordingFollowUps::default();
    let rig = Rig::new(&follow_ups);
    let w = id("W1");
    rig.settled(&w);

    let actions: Vec<Action> = (0..8).map(|_| rig.action(&w, 0.0)).collect();
    for a in &actions[..5] {
        assert!(matches!(a, Action::Aspirate { .. }), "{a:?}");
    }
    assert_eq!(actions[5], Action::Pull { count: 5 });
    assert_eq!(actions[6], Action::Pull { count: 6 });
    assert!(matches!(&actions[7], Action::Alert { text } if text.contains("W1")));
    assert_eq!(rig.sink.count(|e| matches!(e, AppEvent::Alert { .. })), 1);

    let pulls: Vec<_> = rig
        .hw
        .ops()
        .into_iter()
        .filter(|op| matches!(op, PumpOp::Pull(_)))
        .collect();
    assert_eq!(pulls, vec![PumpOp::Pull(5), PumpOp::Pull(6)]);

    rig.run(AppCommand::ClearTally { well: w.clone() }).unwrap();
    assert_eq!(rig.well(&w).state.retry_tally, 0);
    assert!(matches!(rig.action(&w, 0.0), Action::Aspirate { .. }));
}

#[test]
fn failed_correction_is_not_booked() {
    let follow_ups = RecordingFollowUps::default();
    let rig = Rig::new(&follow_ups);
    let w = id("W1");
    rig.settled(&w);
    rig.hw.fail_next(ActuatorError::NoAcknowledge);

    assert_eq!(
        rig.feedback(&w, 100.0),
        Err(Error::Actuator(ActuatorError::NoAcknowledge))
    );
    let state = rig.well(&w).state;
    assert_eq!(state.expected_out_volume_ul, 3000.0);
    // The decision itself is committed.
    assert_eq!(state.retry_tally, 1);
    assert_eq!(rig.sink.count(|e| matches!(e, AppEvent::VolumeLogged(_))), 1);
}

#[test]
fn out_of_range_correction_commits_nothing() {
    let follow_ups = RecordingFollowUps::default();
    let rig = Rig::new(&follow_ups);
    let w = id("W1");
    rig.settled(&w);
    for _ in 0..3 {
        rig.run(AppCommand::Dispense {
            well: w.clone(),
            volume_ul: 4000.0,
        })
        .unwrap();
    }
    rig.hw.calls.borrow_mut().clear();
    let before = rig.well(&w);
    let requests = follow_ups.requests.borrow().len();

    // 12300 uL short of expectation: the aspirate exceeds the 10 mL limit.
    assert!(matches!(
        rig.feedback(&w, 0.0),
        Err(Error::OutOfBounds(BoundsError::Aspirate { .. }))
    ));
    assert_eq!(rig.well(&w), before);
    assert!(rig.hw.calls.borrow().is_empty());
    assert_eq!(rig.sink.count(|e| matches!(e, AppEvent::VolumeLogged(_))), 0);
    assert_eq!(rig.sink.count(|e| matches!(e, AppEvent::Decided { .. })), 0);
    assert_eq!(rig.sink.count(|e| matches!(e, AppEvent::ActuationFailed { .. })), 1);
    assert_eq!(follow_ups.requests.borrow().len(), requests);
}

#[test]
fn rejected_frame_leaves_the_well_untouched() {
    let follow_ups = RecordingFollowUps::default();
    let rig = Rig::new(&follow_ups);
    let w = id("W1");
    rig.settled(&w);
    follow_ups.requests.borrow_mut().clear();
    let before = rig.well(&w);

    let outcome = rig.run(AppCommand::Feedback {
        well: w.clone(),
        image_ref: "blank.jpg".into(),
        input: FeedbackInput::Image(blank_frame()),
    });

    assert!(matches!(outcome, Err(Error::Rejected(_))), "{outcome:?}");
    assert_eq!(rig.well(&w), before);
    assert!(rig.hw.calls.borrow().is_empty());
    assert_eq!(*follow_ups.requests.borrow(), vec![(w, Side::Right, 60)]);
    assert_eq!(rig.sink.count(|e| matches!(e, AppEvent::VolumeLogged(_))), 0);
}

#[test]
fn feedback_log_record_carries_the_reading() {
    let follow_ups = RecordingFollowUps::default();
    let rig = Rig::new(&follow_ups);
    let w = id("W1");
    rig.settled(&w);
    rig.action(&w, 100.0);

    let events = rig.sink.events.borrow();
    let record = events
        .iter()
        .find_map(|e| match e {
            AppEvent::VolumeLogged(r) => Some(r),
            _ => None,
        })
        .unwrap();
    assert_eq!(record.timestamp_secs, NOW);
    assert_eq!(record.well, w);
    assert_eq!(record.raw_volume_ul, 100.0);
    assert_eq!(record.error_ul, 200.0);
    assert_eq!(record.image_ref, "W1-100.jpg");
    assert_eq!(record.action, Action::Aspirate { volume_ul: 200.0 });
}

// ── Manual commands ──────────────────────────────────────────

#[test]
fn manual_commands_respect_pump_limits() {
    let follow_ups = RecordingFollowUps::default();
    let rig = Rig::new(&follow_ups);
    let w = id("W1");
    rig.register(&w, Side::Left);

    assert!(matches!(
        rig.run(AppCommand::Dispense {
            well: w.clone(),
            volume_ul: 6000.0,
        }),
        Err(Error::OutOfBounds(BoundsError::Dispense { .. }))
    ));
    assert!(matches!(
        rig.run(AppCommand::Pull {
            well: w.clone(),
            count: 16,
        }),
        Err(Error::OutOfBounds(_))
    ));
    assert!(matches!(
        rig.run(AppCommand::Plunge {
            well: w.clone(),
            count: -1,
        }),
        Err(Error::OutOfBounds(_))
    ));
    assert!(rig.hw.calls.borrow().is_empty());

    rig.run(AppCommand::Dispense {
        well: w.clone(),
        volume_ul: 250.0,
    })
    .unwrap();
    rig.run(AppCommand::Plunge {
        well: w.clone(),
        count: 3,
    })
    .unwrap();
    assert_eq!(rig.hw.ops(), vec![PumpOp::Dispense(250.0), PumpOp::Plunge(3)]);
    assert_eq!(rig.well(&w).state.expected_in_volume_ul, 250.0);
}

#[test]
fn status_reports_the_committed_state() {
    let follow_ups = RecordingFollowUps::default();
    let rig = Rig::new(&follow_ups);
    let w = id("W1");
    rig.settled(&w);

    match rig.run(AppCommand::Status { well: w.clone() }).unwrap() {
        Reply::Status(well) => {
            assert_eq!(well.id, w);
            assert_eq!(well.state.iteration, 1);
        }
        other => panic!("unexpected reply {other:?}"),
    }
}
