//! Wellkeeper library.
//!
//! Camera-based fluid volume estimation, offline calibration fitting and
//! the per-well feedback loop that keeps culture wells at their expected
//! volume. Exposes every module for integration testing; the binary in
//! `main.rs` wires the adapters together.

#![deny(unused_must_use)]

pub mod app;
pub mod calibration;
pub mod config;
pub mod control;
pub mod error;
pub mod registry;
pub mod rpc;
pub mod scheduler;
pub mod vision;
pub mod well;

pub mod adapters;
