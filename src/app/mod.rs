//! Application core — domain orchestration, no direct I/O.
//!
//! Routes commands through the estimator, the feedback controller and
//! the well registry. All interaction with pumps, clocks, images and the
//! follow-up scheduler happens through **port traits** defined in
//! [`ports`], keeping this layer fully testable without real hardware.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
