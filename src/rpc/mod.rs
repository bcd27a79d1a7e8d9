//! Request stream subsystem.
//!
//! Newline-delimited JSON requests in, JSON responses out.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      RPC Stack                             │
//! │                                                            │
//! │  ┌──────────┐   ┌──────────┐   ┌───────────────────────┐   │
//! │  │  Reader  │──▶│  Codec   │──▶│  Messages → Workers   │   │
//! │  │ (thread) │   │ (lines)  │   │  → AppService         │   │
//! │  └──────────┘   └──────────┘   └───────────┬───────────┘   │
//! │                                            │               │
//! │  ┌──────────┐   ┌──────────┐               │               │
//! │  │  Writer  │◀──│ Response │◀──────────────┘               │
//! │  │ (async)  │   │ (JSON)   │                               │
//! │  └──────────┘   └──────────┘                               │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod channels;
pub mod codec;
pub mod io_task;
pub mod messages;
