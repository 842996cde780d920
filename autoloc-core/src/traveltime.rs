//! Travel-time prediction interface
//!
//! The engine never computes travel times itself. A [`TravelTimeProvider`]
//! returns every phase for a source/receiver pair, ordered by time; the
//! helpers here pick the phases the engine asks for.

use serde::{Deserialize, Serialize};

/// One predicted phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelTime {
    pub phase: String,
    /// Travel time (s)
    pub time: f64,
    /// Horizontal slowness (s/deg)
    pub dtdd: f64,
    /// Depth derivative (s/km)
    pub dtdh: f64,
}

/// Source of predicted travel times
pub trait TravelTimeProvider: Send + Sync {
    /// All phases for a source at `(lat, lon, depth)` and a receiver at
    /// `(rlat, rlon, ralt)`, ordered by increasing travel time
    ///
    /// Depth in km, receiver elevation in meters.
    fn compute(
        &self,
        lat: f64,
        lon: f64,
        depth: f64,
        rlat: f64,
        rlon: f64,
        ralt: f64,
    ) -> Vec<TravelTime>;

    /// Phase names this provider can predict
    fn phases(&self) -> Vec<String>;

    /// Prediction for one named phase
    fn predict(
        &self,
        phase: &str,
        lat: f64,
        lon: f64,
        depth: f64,
        rlat: f64,
        rlon: f64,
        ralt: f64,
    ) -> Option<TravelTime> {
        self.compute(lat, lon, depth, rlat, rlon, ralt)
            .into_iter()
            .find(|tt| tt.phase == phase)
    }
}

/// First arrival of the list
pub fn first(tts: &[TravelTime]) -> Option<&TravelTime> {
    tts.first()
}

/// First phase whose name starts with `prefix`
pub fn first_with_prefix<'a>(tts: &'a [TravelTime], prefix: &str) -> Option<&'a TravelTime> {
    tts.iter().find(|tt| tt.phase.starts_with(prefix))
}

/// First P-type arrival
///
/// Below 114 degrees this is the first arrival. Beyond that the first
/// core phase (PK*) is used, since diffracted P is rarely picked there.
pub fn first_p(tts: &[TravelTime], delta: f64) -> Option<&TravelTime> {
    if delta < 114.0 {
        first(tts)
    } else {
        first_with_prefix(tts, "PK")
    }
}
