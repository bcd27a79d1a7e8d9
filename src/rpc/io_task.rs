//! Request server — reactor-driven request/response bridge.
//!
//! A dedicated reader thread blocks on the input and pushes decoded
//! lines into the request queue. On the calling thread an
//! `edge-executor` drives the async side, with `async-io-mini` timers
//! (no busy-spinning):
//!
//! 1. **Workers** (× N) — take a request, run it through the
//!    [`AppService`], queue the response. Requests for different wells
//!    proceed concurrently; requests for one well queue on its lock.
//! 2. **Writer** — truly async via `responses.receive().await`.
//! 3. **Ticker** — drains the follow-up inbox and ticks the
//!    [`Scheduler`] every `tick`; fired captures become
//!    `PICTURE-REQUEST` lines, fired feeds become scheduled commands.
//!
//! ```text
//!  ┌────────────────────────────────────────────────────────────┐
//!  │  Reader thread ── FrameDecoder ── Inbound ──┐              │
//!  │  ┌──────────────────────────────────────────┼───────────┐  │
//!  │  │  edge_executor::LocalExecutor            ▼           │  │
//!  │  │  ┌────────────┐  ┌──────────────┐  ┌─────────────┐   │  │
//!  │  │  │ Worker × N │  │ Write(async) │  │ Tick ⏱      │   │  │
//!  │  │  └────────────┘  └──────────────┘  └─────────────┘   │  │
//!  │  └──────────────────────────────────────────────────────┘  │
//!  └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Responses are written in completion order, not request order; each
//! carries its command and well identifier.

use core::time::Duration;
use std::io::{self, Read, Write};

use edge_executor::{LocalExecutor, Task};
use futures_lite::future::block_on;
use log::{info, warn};

use super::channels::{Inbound, Outbound, RequestQueue, ResponseQueue};
use super::codec::{Frame, FrameDecoder, MAX_FRAME_SIZE, encode_frame};
use super::messages::{CaptureRequest, Response, decode_request};
use crate::app::commands::AppCommand;
use crate::app::ports::{
    ActuatorPort, ClockPort, EventSink, FollowUpPort, ImageSourcePort, ScheduleFiredKind,
    SchedulerDelegate,
};
use crate::app::service::AppService;
use crate::error::DecodeError;
use crate::scheduler::{Schedule, ScheduleInbox, ScheduleKind, ScheduleRequest, Scheduler};
use crate::vision::Side;
use crate::well::WellId;

const READ_BUF_SIZE: usize = 1024;

/// Runtime knobs of [`serve`].
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Concurrent request workers.
    pub workers: usize,
    /// Scheduler tick period.
    pub tick: Duration,
    /// Replenish every registered well at this interval.
    pub feed_interval_secs: Option<u32>,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            tick: Duration::from_secs(1),
            feed_interval_secs: None,
        }
    }
}

/// Everything a worker needs, borrowed for the life of the server.
struct Ctx<'a, C, F, A, E, I> {
    service: &'a AppService<C, F>,
    hw: &'a A,
    sink: &'a E,
    images: &'a I,
    inbox: &'a ScheduleInbox,
    requests: &'a RequestQueue,
    responses: &'a ResponseQueue,
    opts: &'a ServeOptions,
}

/// Serve requests from `input` until it closes, writing responses to
/// `output`. Returns after every request read has been answered.
#[allow(clippy::too_many_arguments)]
pub fn serve<C, F, A, E, I, R, W>(
    service: &AppService<C, F>,
    inbox: &ScheduleInbox,
    hw: &A,
    sink: &E,
    images: &I,
    input: R,
    output: W,
    opts: &ServeOptions,
) -> io::Result<()>
where
    C: ClockPort,
    F: FollowUpPort,
    A: ActuatorPort,
    E: EventSink,
    I: ImageSourcePort,
    R: Read + Send,
    W: Write,
{
    let workers = opts.workers.max(1);
    let requests = RequestQueue::new();
    let responses = ResponseQueue::new();
    let ctx = Ctx {
        service,
        hw,
        sink,
        images,
        inbox,
        requests: &requests,
        responses: &responses,
        opts,
    };
    let executor: LocalExecutor<'_, 16> = LocalExecutor::new();

    std::thread::scope(|s| {
        let reader = s.spawn(|| read_loop(input, &requests, workers));

        let tasks: Vec<Task<()>> = (0..workers)
            .map(|i| executor.spawn(worker(i, &ctx)))
            .collect();
        let writer = executor.spawn(write_loop(output, &responses));
        executor.spawn(tick_loop(&ctx)).detach();

        info!("IO: serving with {} worker(s), tick {:?}", workers, opts.tick);

        let result = block_on(executor.run(async {
            for task in tasks {
                task.await;
            }
            responses.send(Outbound::Close).await;
            writer.await
        }));

        reader
            .join()
            .map_err(|_| io::Error::other("reader thread panicked"))?;
        info!("IO: input closed, server stopped");
        result
    })
}

// ── Reader thread ────────────────────────────────────────────

fn read_loop<R: Read>(mut input: R, requests: &RequestQueue, workers: usize) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("IO: read failed: {}", e);
                break;
            }
        };
        feed_bytes(&mut decoder, &buf[..n], requests);
    }
    // Terminate a final line that lacks its newline.
    feed_bytes(&mut decoder, b"\n", requests);

    for _ in 0..workers {
        block_on(requests.send(Inbound::Eof));
    }
}

fn feed_bytes(decoder: &mut FrameDecoder, mut data: &[u8], requests: &RequestQueue) {
    while !data.is_empty() {
        let (used, frame) = decoder.feed(data);
        let msg = match frame {
            Some(Frame::Line(line)) => {
                let mut frame = heapless::Vec::new();
                match frame.extend_from_slice(line) {
                    Ok(()) => Some(Inbound::Frame(frame)),
                    Err(()) => Some(Inbound::Oversized(line.len())),
                }
            }
            Some(Frame::Oversized { len }) => Some(Inbound::Oversized(len)),
            None => None,
        };
        data = &data[used..];
        if let Some(msg) = msg {
            block_on(requests.send(msg));
        }
    }
}

// ── Workers ──────────────────────────────────────────────────

async fn worker<C, F, A, E, I>(id: usize, ctx: &Ctx<'_, C, F, A, E, I>)
where
    C: ClockPort,
    F: FollowUpPort,
    A: ActuatorPort,
    E: EventSink,
    I: ImageSourcePort,
{
    loop {
        let response = match ctx.requests.receive().await {
            Inbound::Eof => break,
            Inbound::Oversized(len) => Response::from_error(
                None,
                None,
                &DecodeError::Malformed(format!("frame of {len} bytes exceeds {MAX_FRAME_SIZE}")).into(),
            ),
            Inbound::Frame(frame) => handle_frame(ctx, &frame).await,
            Inbound::Scheduled(cmd) => {
                let well = cmd.well().cloned();
                let outcome = ctx.service.handle_command(cmd, ctx.hw, ctx.sink).await;
                if let Err(e) = &outcome {
                    warn!("IO: scheduled feed failed: {}", e);
                }
                Response::from_outcome("FEED", well, outcome)
            }
        };
        ctx.responses.send(Outbound::Line(response.to_json())).await;
    }
    info!("IO: worker {} done", id);
}

async fn handle_frame<C, F, A, E, I>(ctx: &Ctx<'_, C, F, A, E, I>, frame: &[u8]) -> Response
where
    C: ClockPort,
    F: FollowUpPort,
    A: ActuatorPort,
    E: EventSink,
    I: ImageSourcePort,
{
    let request = match decode_request(frame) {
        Ok(r) => r,
        Err(e) => {
            warn!("IO: bad request: {}", e);
            return Response::from_error(None, None, &e);
        }
    };
    let name = request.name();
    let well = request.well().cloned();

    let cmd = match request.into_command(&ctx.service.config().well_defaults, ctx.images) {
        Ok(Some(cmd)) => cmd,
        Ok(None) => return Response::pong(),
        Err(e) => return Response::from_error(Some(name), well, &e),
    };
    let registering = matches!(cmd, AppCommand::Register { .. });

    let outcome = ctx.service.handle_command(cmd, ctx.hw, ctx.sink).await;

    if registering && outcome.is_ok() {
        if let (Some(well), Some(interval_secs)) = (&well, ctx.opts.feed_interval_secs) {
            schedule_feeds(ctx.inbox, well, interval_secs);
        }
    }
    Response::from_outcome(name, well, outcome)
}

/// (Re)start the periodic feed of a freshly registered well.
fn schedule_feeds(inbox: &ScheduleInbox, well: &WellId, interval_secs: u32) {
    inbox.post(ScheduleRequest::Cancel(well.clone()));
    inbox.post(ScheduleRequest::Add(Schedule {
        well: well.clone(),
        // Side is irrelevant to a feed.
        side: Side::Left,
        kind: ScheduleKind::Periodic { interval_secs },
    }));
}

// ── Writer ───────────────────────────────────────────────────

/// Write task — wakes when a worker queues a line. After a write error
/// the remaining lines are drained and dropped so workers never block.
async fn write_loop<W: Write>(mut output: W, responses: &ResponseQueue) -> io::Result<()> {
    let mut failure: Option<io::Error> = None;
    let mut buf = Vec::with_capacity(512);
    loop {
        let line = match responses.receive().await {
            Outbound::Close => break,
            Outbound::Line(line) => line,
        };
        if failure.is_some() {
            continue;
        }
        buf.clear();
        if encode_frame(line.as_bytes(), &mut buf).is_none() {
            warn!("IO: response of {} bytes not sent", line.len());
            continue;
        }
        if let Err(e) = output.write_all(&buf).and_then(|()| output.flush()) {
            warn!("IO: write failed: {}", e);
            failure = Some(e);
        }
    }
    match failure {
        Some(e) => Err(e),
        None => output.flush(),
    }
}

// ── Ticker ───────────────────────────────────────────────────

struct ServeDelegate<'a> {
    requests: &'a RequestQueue,
    responses: &'a ResponseQueue,
}

impl SchedulerDelegate for ServeDelegate<'_> {
    fn on_schedule_fired(&mut self, well: &WellId, side: Side, kind: ScheduleFiredKind) {
        match kind {
            ScheduleFiredKind::OneShot => {
                let req = CaptureRequest::new(well.clone(), side);
                match serde_json::to_string(&req) {
                    Ok(line) => {
                        if self.responses.try_send(Outbound::Line(line)).is_err() {
                            warn!("IO: response queue full, capture request for {} dropped", well);
                        }
                    }
                    Err(e) => warn!("IO: capture request for {}: {}", well, e),
                }
            }
            ScheduleFiredKind::Periodic => {
                let cmd = AppCommand::Feed { well: well.clone() };
                if self.requests.try_send(Inbound::Scheduled(cmd)).is_err() {
                    warn!("IO: request queue full, feed of {} skipped", well);
                }
            }
        }
    }
}

async fn tick_loop<C, F, A, E, I>(ctx: &Ctx<'_, C, F, A, E, I>) {
    let mut scheduler = Scheduler::new();
    let mut delegate = ServeDelegate {
        requests: ctx.requests,
        responses: ctx.responses,
    };
    let tick_secs = ctx.opts.tick.as_secs_f32();
    loop {
        async_io_mini::Timer::after(ctx.opts.tick).await;
        scheduler.drain(ctx.inbox);
        scheduler.tick(tick_secs, &mut delegate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_trailing_line_is_flushed_at_eof() {
        let requests = RequestQueue::new();
        read_loop(&b"{\"COMMAND\":\"PING\"}"[..], &requests, 1);
        assert!(matches!(requests.try_receive(), Ok(Inbound::Frame(f)) if f.as_slice() == b"{\"COMMAND\":\"PING\"}"));
        assert!(matches!(requests.try_receive(), Ok(Inbound::Eof)));
    }

    #[test]
    fn oversized_line_is_forwarded_as_such() {
        let requests = RequestQueue::new();
        let mut data = vec![b'x'; MAX_FRAME_SIZE + 1];
        data.push(b'\n');
        read_loop(&data[..], &requests, 2);
        assert!(matches!(requests.try_receive(), Ok(Inbound::Oversized(n)) if n == MAX_FRAME_SIZE + 1));
        assert!(matches!(requests.try_receive(), Ok(Inbound::Eof)));
        assert!(matches!(requests.try_receive(), Ok(Inbound::Eof)));
    }

    #[test]
    fn writer_drains_after_close() {
        let responses = ResponseQueue::new();
        responses.try_send(Outbound::Line("{\"a\":1}".into())).ok();
        responses.try_send(Outbound::Close).ok();
        let mut out = Vec::new();
        block_on(write_loop(&mut out, &responses)).unwrap();
        assert_eq!(out, b"{\"a\":1}\n");
    }
}
