//! End-to-end tests: request lines in, response lines out.
//!
//! Covers the decode → command → service → response chain, the request
//! server over an in-memory stream, and the follow-up path from the
//! service through the inbox into the scheduler.

use std::io::Cursor;
use std::time::Duration;

use futures_lite::future::block_on;
use serde_json::Value;

use super::mock_hw::{FixedClock, RecordingActuator, RecordingSink, StaticImages, blank_frame};

use wellkeeper::app::events::PumpOp;
use wellkeeper::app::ports::{ScheduleFiredKind, SchedulerDelegate};
use wellkeeper::app::service::AppService;
use wellkeeper::calibration::CalibrationCurve;
use wellkeeper::config::SystemConfig;
use wellkeeper::rpc::io_task::{ServeOptions, serve};
use wellkeeper::rpc::messages::{Response, decode_request};
use wellkeeper::scheduler::{ScheduleInbox, ScheduleKind, ScheduleRequest, Scheduler};
use wellkeeper::vision::Side;
use wellkeeper::well::WellId;

fn config() -> SystemConfig {
    let mut cfg = SystemConfig::default();
    cfg.replenish.pause_secs = 0;
    cfg
}

fn service(inbox: &ScheduleInbox) -> AppService<FixedClock, &ScheduleInbox> {
    AppService::new(config(), CalibrationCurve::reference(), FixedClock(1_700_000_000), inbox).unwrap()
}

/// Decode, run and encode one request line, as a server worker does.
fn exchange(
    app: &AppService<FixedClock, &ScheduleInbox>,
    hw: &RecordingActuator,
    images: &StaticImages,
    line: &str,
) -> Value {
    let response = match decode_request(line.as_bytes()) {
        Err(e) => Response::from_error(None, None, &e),
        Ok(req) => {
            let name = req.name();
            let well = req.well().cloned();
            match req.into_command(&app.config().well_defaults, images) {
                Ok(None) => Response::pong(),
                Ok(Some(cmd)) => {
                    let outcome = block_on(app.handle_command(cmd, hw, &RecordingSink::new()));
                    Response::from_outcome(name, well, outcome)
                }
                Err(e) => Response::from_error(Some(name), well, &e),
            }
        }
    };
    serde_json::from_str(&response.to_json()).unwrap()
}

#[test]
fn decision_lines_carry_the_action_payload() {
    let inbox = ScheduleInbox::new();
    let app = service(&inbox);
    let hw = RecordingActuator::new();
    let images = StaticImages::default();

    let reg = exchange(&app, &hw, &images, r#"{"COMMAND":"WELL","CHIP_ID":12345,"INDEX":"right"}"#);
    assert_eq!(reg["status"], "OK");
    assert_eq!(reg["detail"], "created");
    assert_eq!(reg["well_id"], "12345");

    // First cycle fixes the offset: a bare NONE, no addressing.
    let first = exchange(&app, &hw, &images, r#"{"COMMAND":"FEEDBACK","CHIP_ID":"12345","VOL":"0"}"#);
    assert_eq!(first, serde_json::json!({ "action": "NONE" }));

    let feed = exchange(&app, &hw, &images, r#"{"COMMAND":"FEED-REQUEST","CHIP_ID":12345}"#);
    assert_eq!(feed["status"], "OK");
    assert_eq!(feed["command"], "FEED");

    let low = exchange(&app, &hw, &images, r#"{"COMMAND":"FEEDBACK","CHIP_ID":12345,"VOL":100}"#);
    assert_eq!(low["action"], "ASPIRATE");
    assert_eq!(low["volume_uL"], 200.0);
    assert_eq!(low["well_id"], "12345");
    assert_eq!(low["side"], "RIGHT");
    assert_eq!(hw.ops().last(), Some(&PumpOp::Aspirate(200.0)));
}

#[test]
fn failures_map_to_status_envelopes() {
    let inbox = ScheduleInbox::new();
    let app = service(&inbox);
    let hw = RecordingActuator::new();
    let images = StaticImages::default();
    exchange(&app, &hw, &images, r#"{"COMMAND":"WELL","CHIP_ID":"7","INDEX":"LEFT"}"#);

    let bounds = exchange(&app, &hw, &images, r#"{"COMMAND":"PULL","CHIP_ID":7,"NUM":99}"#);
    assert_eq!(bounds["status"], "OUT_OF_BOUNDS");
    assert_eq!(bounds["command"], "PULL");

    let unknown = exchange(&app, &hw, &images, r#"{"COMMAND":"DISPENSE","CHIP_ID":"8","VOL":5}"#);
    assert_eq!(unknown["status"], "MISSING_IDENTIFIER");
    assert_eq!(unknown["well_id"], "8");

    let anonymous = exchange(&app, &hw, &images, r#"{"COMMAND":"DISPENSE","VOL":5}"#);
    assert_eq!(anonymous["status"], "MISSING_IDENTIFIER");

    let garbage = exchange(&app, &hw, &images, "not json");
    assert_eq!(garbage["status"], "ERROR");
    assert!(garbage.get("command").is_none());

    let missing = exchange(&app, &hw, &images, r#"{"COMMAND":"ESTIMATE","INDEX":"LEFT","IMAGE":"gone.jpg"}"#);
    assert_eq!(missing["status"], "ERROR");
    assert_eq!(missing["command"], "ESTIMATE");

    assert!(hw.calls.borrow().is_empty());
}

#[test]
fn rejected_frame_answers_rejected_and_requests_a_capture() {
    let inbox = ScheduleInbox::new();
    let app = service(&inbox);
    let hw = RecordingActuator::new();
    let images = StaticImages::default().with("blank.jpg", blank_frame());
    exchange(&app, &hw, &images, r#"{"COMMAND":"WELL","CHIP_ID":"7","INDEX":"LEFT"}"#);

    let rejected = exchange(&app, &hw, &images, r#"{"COMMAND":"FEEDBACK","CHIP_ID":"7","IMAGE":"blank.jpg"}"#);
    assert_eq!(rejected["status"], "REJECTED");
    assert!(rejected.get("reason").is_some());

    match inbox.try_take() {
        Some(ScheduleRequest::Add(s)) => {
            assert_eq!(s.well.as_str(), "7");
            assert_eq!(s.side, Side::Left);
            assert_eq!(s.kind, ScheduleKind::OneShot { delay_secs: 60 });
        }
        other => panic!("expected a capture request, got {other:?}"),
    }
}

// ── Follow-up path ───────────────────────────────────────────

#[derive(Default)]
struct Fired(Vec<(WellId, Side, ScheduleFiredKind)>);

impl SchedulerDelegate for Fired {
    fn on_schedule_fired(&mut self, well: &WellId, side: Side, kind: ScheduleFiredKind) {
        self.0.push((well.clone(), side, kind));
    }
}

#[test]
fn follow_up_fires_once_after_its_delay() {
    let inbox = ScheduleInbox::new();
    let app = service(&inbox);
    let hw = RecordingActuator::new();
    let images = StaticImages::default();
    exchange(&app, &hw, &images, r#"{"COMMAND":"WELL","CHIP_ID":"7","INDEX":"RIGHT"}"#);
    exchange(&app, &hw, &images, r#"{"COMMAND":"FEED","CHIP_ID":"7"}"#);

    let mut scheduler = Scheduler::new();
    scheduler.drain(&inbox);
    assert_eq!(scheduler.active_count(), 1);

    let mut fired = Fired::default();
    for _ in 0..59 {
        scheduler.tick(1.0, &mut fired);
    }
    assert!(fired.0.is_empty());
    scheduler.tick(1.0, &mut fired);
    scheduler.tick(1.0, &mut fired);
    assert_eq!(
        fired.0,
        vec![(WellId::new("7").unwrap(), Side::Right, ScheduleFiredKind::OneShot)]
    );
    assert_eq!(scheduler.active_count(), 0);
}

// ── Request server ───────────────────────────────────────────

#[test]
fn serve_answers_every_line_then_returns() {
    let inbox = ScheduleInbox::new();
    let app = service(&inbox);
    let hw = RecordingActuator::new();
    let sink = RecordingSink::new();
    let images = StaticImages::default();
    let opts = ServeOptions {
        workers: 1,
        // Never fires during the test.
        tick: Duration::from_secs(3600),
        feed_interval_secs: Some(600),
    };

    let input = concat!(
        "{\"COMMAND\":\"PING\"}\n",
        "\r\n",
        "{\"COMMAND\":\"WELL\",\"CHIP_ID\":12345,\"INDEX\":\"RIGHT\"}\r\n",
        "{\"COMMAND\":\"FEED\",\"CHIP_ID\":12345}\n",
        "{\"COMMAND\":\"FEEDBACK\",\"CHIP_ID\":12345,\"VOL\":100}\n",
        "{\"COMMAND\":\"bogus\"}\n",
        "{\"COMMAND\":\"STATUS\",\"CHIP_ID\":12345}",
    );
    let mut output = Vec::new();
    serve(
        &app,
        &inbox,
        &hw,
        &sink,
        &images,
        Cursor::new(input.as_bytes().to_vec()),
        &mut output,
        &opts,
    )
    .unwrap();

    let lines: Vec<Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 6, "{lines:?}");
    assert_eq!(lines[0]["detail"], "PONG");
    assert_eq!(lines[1]["detail"], "created");
    assert_eq!(lines[2]["command"], "FEED");
    assert_eq!(lines[3]["action"], "ASPIRATE");
    assert_eq!(lines[4]["status"], "ERROR");
    assert_eq!(lines[5]["status"], "OK");
    assert_eq!(lines[5]["state"]["iteration"], 1);
    assert_eq!(lines[5]["state"]["expected_out_volume_ul"], 3200.0);

    // Registration (re)started the periodic feed.
    assert!(matches!(inbox.try_take(), Some(ScheduleRequest::Cancel(_))));
    assert!(matches!(
        inbox.try_take(),
        Some(ScheduleRequest::Add(s)) if s.kind == ScheduleKind::Periodic { interval_secs: 600 }
    ));
}

#[test]
fn serve_with_empty_input_writes_nothing() {
    let inbox = ScheduleInbox::new();
    let app = service(&inbox);
    let mut output = Vec::new();
    serve(
        &app,
        &inbox,
        &RecordingActuator::new(),
        &RecordingSink::new(),
        &StaticImages::default(),
        Cursor::new(Vec::new()),
        &mut output,
        &ServeOptions::default(),
    )
    .unwrap();
    assert!(output.is_empty());
}
