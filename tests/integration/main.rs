//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises a subsystem against
//! mock adapters. Everything runs on the host with no rig attached.

mod mock_hw;
mod pipeline_tests;
mod service_tests;
