//! # Autoloc Core Library (autoloc-core)
//!
//! Real-time phase association and location engine.
//!
//! **Purpose:** Turn a stream of automatic phase picks and amplitudes into
//! located, scored and quality-controlled seismic origins, and publish them
//! as the solution improves.
//!
//! **Architecture:** A synchronous [`Engine`] owns all state (pick pool,
//! live origins, nucleation grid, publication bookkeeping). Travel times,
//! the hypocenter solver and station coordinates are injected through the
//! [`Collaborators`] traits; published origins leave through an
//! [`OriginSink`].

pub mod associator;
pub mod engine;
pub mod locator;
pub mod model;
pub mod nucleator;
pub mod pool;
pub mod reference;
pub mod score;
pub mod sink;
pub mod stations;
pub mod traveltime;

pub use autoloc_common::{AutolocConfig, Error, Result, Time};
pub use engine::{Collaborators, DepthRegion, Engine, EngineStats, PublicationState};
pub use locator::{DepthPolicy, HypocenterSolver};
pub use model::{Amplitude, Arrival, DepthType, Exclusion, Origin, OriginId, Pick, PickMode, Station};
pub use nucleator::{GridPoint, GridSpec};
pub use sink::{JsonLinesSink, NullSink, OriginRecord, OriginSink, VecSink};
pub use stations::{StationConfigTable, StationLocation, StationLocationFile, StationProvider};
pub use traveltime::{TravelTime, TravelTimeProvider};
