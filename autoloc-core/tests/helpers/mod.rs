//! Test Helper Utilities
//!
//! Shared utilities for autoloc-core integration tests:
//! - Network: synthetic stations and exact picks around a known hypocenter
//! - LogCapture: assertions on what the engine logged

#![allow(dead_code)]

pub mod log_capture;
pub mod network;

pub use log_capture::{capture_logs, LogCapture};
pub use network::{build_engine, test_config, Network, STRONG};
