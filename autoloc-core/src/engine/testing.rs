//! Engine fixtures for unit tests
//!
//! Origins are built around a source at (0, 0) with picks whose times carry
//! the requested residual against the homogeneous reference model.

use super::core::{Collaborators, Engine};
use crate::locator::{Hypocenter, HypocenterSolver, LocateError, Observation, ObservationResult, Solution};
use crate::model::{Arrival, Origin, OriginError, Pick, Station};
use crate::reference::HomogeneousModel;
use crate::stations::{StationConfigTable, StationLocation, StationLocationFile};
use crate::traveltime::{self, TravelTimeProvider};
use autoloc_common::{geo, AutolocConfig, Time};
use std::sync::Arc;

pub const T0: Time = 1_000_000.0;
pub const DEPTH: f64 = 10.0;

/// Never converges
pub struct FailingSolver;

impl HypocenterSolver for FailingSolver {
    fn locate(&self, _: &[Observation], _: &Hypocenter, _: Option<f64>) -> Result<Solution, LocateError> {
        Err(LocateError::NoConvergence)
    }
}

/// Keeps the starting hypocenter and reports residuals against the
/// homogeneous model
pub struct StaticSolver {
    model: HomogeneousModel,
}

impl StaticSolver {
    pub fn new() -> Self {
        Self {
            model: HomogeneousModel::default(),
        }
    }
}

impl HypocenterSolver for StaticSolver {
    fn locate(
        &self,
        observations: &[Observation],
        initial: &Hypocenter,
        fixed_depth: Option<f64>,
    ) -> Result<Solution, LocateError> {
        let hypocenter = Hypocenter {
            depth: fixed_depth.unwrap_or(initial.depth),
            ..*initial
        };
        let results = observations
            .iter()
            .map(|o| {
                let (distance, azimuth, _) = geo::delazi(hypocenter.lat, hypocenter.lon, o.lat, o.lon);
                let tts = self
                    .model
                    .compute(hypocenter.lat, hypocenter.lon, hypocenter.depth, o.lat, o.lon, o.alt);
                let predicted = tts
                    .iter()
                    .find(|tt| tt.phase == o.phase)
                    .or_else(|| traveltime::first(&tts))
                    .map_or(0.0, |tt| tt.time);
                ObservationResult {
                    residual: o.time - hypocenter.time - predicted,
                    distance,
                    azimuth,
                }
            })
            .collect();
        Ok(Solution {
            hypocenter,
            error: OriginError::default(),
            results,
        })
    }
}

pub fn engine(config: AutolocConfig, solver: Arc<dyn HypocenterSolver>) -> Engine {
    let collaborators = Collaborators {
        travel_times: Arc::new(HomogeneousModel::default()),
        solver,
        stations: Arc::new(StationLocationFile::from_locations(Vec::<StationLocation>::new())),
    };
    let table = StationConfigTable::new(config.default_max_nuc_dist);
    Engine::new(config, collaborators, table, Vec::new()).unwrap()
}

/// Scored automatic pick at a station `delta` degrees from (0, 0)
pub fn pick_at(name: &str, delta: f64, azimuth: f64, time: Time) -> Pick {
    let (lat, lon) = geo::destination(0.0, 0.0, delta, azimuth);
    let mut pick = Pick::new(&format!("XX.{}.P", name), "XX", name, time).with_amplitudes(1000.0, 10.0);
    pick.station = Some(Arc::new(Station::new("XX", name, lat, lon, 0.0)));
    pick.normamp = 1.0;
    pick
}

/// P time from (0, 0) at `depth`
pub fn p_time(delta: f64, depth: f64) -> f64 {
    HomogeneousModel::default().p_time(delta, depth)
}

/// Defining P arrival observed `residual` seconds late at `delta` degrees
pub fn arrival(name: &str, delta: f64, azimuth: f64, residual: f64) -> Arrival {
    let pick = pick_at(name, delta, azimuth, T0 + p_time(delta, DEPTH) + residual);
    let mut arr = Arrival::new(Arc::new(pick), "P", residual);
    arr.distance = delta;
    arr.azimuth = azimuth;
    arr
}

/// Origin at (0, 0) with one arrival per `(delta, residual)`, spread in
/// azimuth
pub fn origin_with(arrivals: &[(f64, f64)]) -> Origin {
    let mut origin = Origin::new(0.0, 0.0, DEPTH, T0);
    let n = arrivals.len().max(1) as f64;
    for (i, &(delta, residual)) in arrivals.iter().enumerate() {
        let azimuth = 360.0 * i as f64 / n;
        origin.add(arrival(&format!("S{:02}", i + 1), delta, azimuth, residual));
    }
    origin
}
