//! # Autoloc Common Library
//!
//! Shared code for the autoloc workspace including:
//! - Engine configuration (TOML loading, defaults, validation)
//! - Error types
//! - Spherical geometry (distance, azimuth, gap)
//! - Epoch time helpers

pub mod config;
pub mod error;
pub mod geo;
pub mod time;

pub use config::AutolocConfig;
pub use error::{Error, Result};
pub use time::Time;
