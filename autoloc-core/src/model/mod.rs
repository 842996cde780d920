//! Core data model: stations, picks, arrivals and origins
//!
//! Picks are shared as `Arc<Pick>` snapshots. An [`Arrival`] owns its
//! snapshot, so an origin stays valid after the pick has expired from the
//! pool. Origins refer to each other and to picks only by identifier.

pub mod arrival;
pub mod origin;
pub mod pick;
pub mod station;

pub use arrival::{Arrival, Exclusion};
pub use origin::{DepthType, Origin, OriginError, OriginId, OriginQuality};
pub use pick::{Amplitude, Pick, PickId, PickMode};
pub use station::{Station, StationRef};
