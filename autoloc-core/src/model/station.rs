//! Station metadata

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared, immutable station
pub type StationRef = Arc<Station>;

/// A resolved seismic station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub net: String,
    pub code: String,
    pub lat: f64,
    pub lon: f64,
    /// Elevation in meters
    pub alt: f64,
    /// Maximum distance (degrees) at which this station may nucleate
    pub max_nuc_dist: f64,
    /// Maximum distance (degrees) at which this station may locate
    pub max_loc_dist: f64,
    /// Usage flag from the station configuration table
    pub enabled: bool,
}

impl Station {
    pub fn new(net: &str, code: &str, lat: f64, lon: f64, alt: f64) -> Self {
        Self {
            net: net.to_string(),
            code: code.to_string(),
            lat,
            lon,
            alt,
            max_nuc_dist: 180.0,
            max_loc_dist: 180.0,
            enabled: true,
        }
    }

    /// `NET.STA` key
    pub fn key(&self) -> String {
        station_key(&self.net, &self.code)
    }
}

/// `NET.STA` key for a code pair
pub fn station_key(net: &str, sta: &str) -> String {
    format!("{}.{}", net, sta)
}
