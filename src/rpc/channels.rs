//! Inter-task queues of the request server.
//!
//! Uses `embassy-sync` bounded MPMC channels to bridge the blocking
//! reader thread, the worker tasks and the writer task. The queues are
//! owned by one [`serve`](super::io_task::serve) call.
//!
//! ```text
//! ┌─────────────┐  Inbound   ┌──────────────┐  Outbound  ┌─────────────┐
//! │ Reader      │──────────▶│  Workers     │──────────▶│  Writer     │
//! │ (thread)    │     ▲      │  (async × N) │     ▲      │  (async)    │
//! └─────────────┘     │      └──────────────┘     │      └─────────────┘
//!                     └──── Scheduler tick ───────┘
//!                        (feeds)       (capture requests)
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;

use super::codec::MAX_FRAME_SIZE;
use crate::app::commands::AppCommand;

/// Work for the worker tasks.
pub enum Inbound {
    /// One request line.
    Frame(Vec<u8, MAX_FRAME_SIZE>),
    /// A request line that was too long and was dropped.
    Oversized(usize),
    /// A command raised by the scheduler.
    Scheduled(AppCommand),
    /// Input closed; the receiving worker exits.
    Eof,
}

/// Lines for the writer task.
pub enum Outbound {
    Line(String),
    /// All workers are done; the writer flushes and exits.
    Close,
}

/// Channel depth for inbound work.
pub const CMD_DEPTH: usize = 8;

/// Channel depth for outbound lines.
pub const RESP_DEPTH: usize = 16;

pub type RequestQueue = Channel<CriticalSectionRawMutex, Inbound, CMD_DEPTH>;
pub type ResponseQueue = Channel<CriticalSectionRawMutex, Outbound, RESP_DEPTH>;
