//! Hypocenter location
//!
//! The least-squares inversion itself is delegated to a [`HypocenterSolver`].
//! [`Relocator`] turns an [`Origin`] into solver observations, applies the
//! depth policy and writes the solution back into a new origin, including
//! recomputed residuals, distances, azimuths and azimuthal gaps.

use crate::model::{DepthType, Origin, OriginError};
use autoloc_common::{geo, AutolocConfig, Time};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Location failures reported by a solver
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocateError {
    #[error("too few observations: have {have}, need {need}")]
    TooFewObservations { have: usize, need: usize },

    #[error("inversion did not converge")]
    NoConvergence,

    #[error("singular normal equations")]
    Singular,

    #[error("depth {0:.1} km outside the permitted range")]
    DepthOutOfRange(f64),

    #[error("non-finite solution")]
    NonFinite,
}

/// One arrival-time observation
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub lat: f64,
    pub lon: f64,
    /// Station elevation (m)
    pub alt: f64,
    pub time: Time,
    pub phase: String,
    /// 0 for observations that must not constrain the solution
    pub weight: f64,
}

/// Source position and time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hypocenter {
    pub lat: f64,
    pub lon: f64,
    /// Depth (km)
    pub depth: f64,
    pub time: Time,
}

impl Hypocenter {
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite() && self.depth.is_finite() && self.time.is_finite()
    }
}

/// Per-observation result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationResult {
    pub residual: f64,
    pub distance: f64,
    pub azimuth: f64,
}

/// Solver output
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub hypocenter: Hypocenter,
    pub error: OriginError,
    /// One entry per observation, weighted or not, in input order
    pub results: Vec<ObservationResult>,
}

/// Least-squares hypocenter solver
pub trait HypocenterSolver: Send + Sync {
    /// Locate from `observations`, starting at `initial`
    ///
    /// With `fixed_depth` set the depth is held at that value.
    fn locate(
        &self,
        observations: &[Observation],
        initial: &Hypocenter,
        fixed_depth: Option<f64>,
    ) -> Result<Solution, LocateError>;
}

/// Depth constraint for one relocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepthPolicy {
    /// Fixed at the origin depth for `Default` and `ManuallyFixed` origins,
    /// free otherwise
    Inherit,
    /// Free regardless of the depth type
    Free,
    Fixed(f64),
}

/// Origin-level wrapper around a [`HypocenterSolver`]
#[derive(Clone)]
pub struct Relocator {
    solver: Arc<dyn HypocenterSolver>,
    minimum_depth: f64,
    max_depth: f64,
}

impl Relocator {
    pub fn new(solver: Arc<dyn HypocenterSolver>, config: &AutolocConfig) -> Self {
        Self {
            solver,
            minimum_depth: config.minimum_depth,
            max_depth: config.max_depth,
        }
    }

    /// Relocate a copy of `origin`
    ///
    /// Returns `None` if the solver fails or produces an unusable
    /// hypocenter; the caller keeps its previous state.
    pub fn relocate(&self, origin: &Origin, policy: DepthPolicy) -> Option<Origin> {
        let fixed = match policy {
            DepthPolicy::Fixed(z) => Some(z),
            DepthPolicy::Free => None,
            DepthPolicy::Inherit if origin.depth_type.keeps_depth() => Some(origin.dep),
            DepthPolicy::Inherit => None,
        };

        let (observations, index) = observations(origin);
        let initial = Hypocenter {
            lat: origin.lat,
            lon: origin.lon,
            depth: fixed.unwrap_or(origin.dep),
            time: origin.time,
        };

        let mut solution = self.solve(origin, &observations, &initial, fixed)?;
        let mut depth_type = origin.depth_type;
        if fixed.is_none() && depth_type == DepthType::Minimum {
            depth_type = DepthType::Free;
        }

        if fixed.is_none()
            && solution.hypocenter.depth <= self.minimum_depth
            && origin.depth_type != DepthType::ManuallyFixed
        {
            debug!(origin = origin.id, depth = solution.hypocenter.depth, "Relocating at minimum depth");
            let retry = Hypocenter {
                depth: self.minimum_depth,
                ..solution.hypocenter
            };
            solution = self.solve(origin, &observations, &retry, Some(self.minimum_depth))?;
            depth_type = DepthType::Minimum;
        }

        let mut relo = origin.clone();
        relo.lat = solution.hypocenter.lat;
        relo.lon = geo::normalize_longitude(solution.hypocenter.lon);
        relo.dep = solution.hypocenter.depth;
        relo.time = solution.hypocenter.time;
        relo.depth_type = depth_type;
        relo.error = OriginError {
            sdepth: solution.error.sdepth * 1.8,
            stime: solution.error.stime * 1.8,
            ..solution.error
        };

        for (obs, &arr_index) in solution.results.iter().zip(index.iter()) {
            let arr = &mut relo.arrivals[arr_index];
            arr.residual = obs.residual;
            arr.distance = obs.distance;
            arr.azimuth = obs.azimuth;
            if arr.phase == "P" && arr.distance > 115.0 {
                arr.phase = "PKP".to_string();
            }
        }

        update_gaps(&mut relo);
        Some(relo)
    }

    fn solve(
        &self,
        origin: &Origin,
        observations: &[Observation],
        initial: &Hypocenter,
        fixed: Option<f64>,
    ) -> Option<Solution> {
        match self.solver.locate(observations, initial, fixed) {
            Ok(solution) => {
                let hypo = &solution.hypocenter;
                if !hypo.is_finite() {
                    debug!(origin = origin.id, "Relocation produced a non-finite hypocenter");
                    return None;
                }
                if hypo.depth > self.max_depth {
                    debug!(origin = origin.id, depth = hypo.depth, "Relocation exceeded maximum depth");
                    return None;
                }
                Some(solution)
            }
            Err(e) => {
                debug!(origin = origin.id, error = %e, "Relocation failed");
                None
            }
        }
    }
}

/// Observations for every arrival with a resolved station, plus the index of
/// the arrival each one came from
fn observations(origin: &Origin) -> (Vec<Observation>, Vec<usize>) {
    let mut obs = Vec::with_capacity(origin.arrivals.len());
    let mut index = Vec::with_capacity(origin.arrivals.len());
    for (i, arr) in origin.arrivals.iter().enumerate() {
        let Some(station) = &arr.pick.station else {
            continue;
        };
        obs.push(Observation {
            lat: station.lat,
            lon: station.lon,
            alt: station.alt,
            time: arr.pick.time,
            phase: arr.phase.clone(),
            weight: arr.weight(),
        });
        index.push(i);
    }
    (obs, index)
}

/// Recompute primary and secondary azimuthal gaps from the defining arrivals
pub fn update_gaps(origin: &mut Origin) {
    let (primary, secondary) = geo::azimuthal_gaps(&origin.defining_azimuths());
    origin.quality.azi_gap_primary = primary;
    origin.quality.azi_gap_secondary = secondary;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Arrival, Exclusion, Pick, Station};

    /// Returns a fixed hypocenter with depth `depth` when free
    struct FixedSolver {
        depth: f64,
    }

    impl HypocenterSolver for FixedSolver {
        fn locate(
            &self,
            observations: &[Observation],
            initial: &Hypocenter,
            fixed_depth: Option<f64>,
        ) -> Result<Solution, LocateError> {
            let hypocenter = Hypocenter {
                depth: fixed_depth.unwrap_or(self.depth),
                ..*initial
            };
            let results = observations
                .iter()
                .map(|o| {
                    let (distance, azimuth, _) = geo::delazi(initial.lat, initial.lon, o.lat, o.lon);
                    ObservationResult {
                        residual: 0.5,
                        distance,
                        azimuth,
                    }
                })
                .collect();
            Ok(Solution {
                hypocenter,
                error: OriginError {
                    sdepth: 1.0,
                    stime: 1.0,
                    ..OriginError::default()
                },
                results,
            })
        }
    }

    fn origin_with(lons: &[f64]) -> Origin {
        let mut origin = Origin::new(0.0, 0.0, 10.0, 1000.0);
        for (i, lon) in lons.iter().enumerate() {
            let code = format!("S{}", i);
            let mut pick = Pick::new(&format!("p{}", i), "XX", &code, 1100.0);
            pick.station = Some(Arc::new(Station::new("XX", &code, 0.0, *lon, 0.0)));
            origin.add(Arrival::new(Arc::new(pick), "P", 0.0));
        }
        origin
    }

    fn relocator(depth: f64) -> Relocator {
        Relocator::new(Arc::new(FixedSolver { depth }), &AutolocConfig::default())
    }

    #[test]
    fn test_shallow_solution_goes_to_minimum_depth() {
        let relo = relocator(1.0)
            .relocate(&origin_with(&[1.0, -1.0]), DepthPolicy::Free)
            .unwrap();
        assert_eq!(relo.dep, 5.0);
        assert_eq!(relo.depth_type, DepthType::Minimum);
    }

    #[test]
    fn test_default_depth_type_stays_fixed() {
        let mut origin = origin_with(&[1.0, -1.0]);
        origin.depth_type = DepthType::Default;
        let relo = relocator(33.0).relocate(&origin, DepthPolicy::Inherit).unwrap();
        assert_eq!(relo.dep, 10.0);
        assert_eq!(relo.depth_type, DepthType::Default);

        let freed = relocator(33.0).relocate(&origin, DepthPolicy::Free).unwrap();
        assert_eq!(freed.dep, 33.0);
    }

    #[test]
    fn test_too_deep_is_failure() {
        assert!(relocator(1500.0)
            .relocate(&origin_with(&[1.0]), DepthPolicy::Free)
            .is_none());
    }

    #[test]
    fn test_geometry_errors_and_far_p_renamed() {
        let mut origin = origin_with(&[2.0, 120.0, -90.0]);
        origin.arrivals[2].excluded = Exclusion::LargeResidual;
        let relo = relocator(20.0).relocate(&origin, DepthPolicy::Free).unwrap();

        assert!((relo.arrivals[0].distance - 2.0).abs() < 1e-6);
        assert_eq!(relo.arrivals[1].phase, "PKP");
        assert_eq!(relo.arrivals[0].residual, 0.5);
        assert!((relo.error.sdepth - 1.8).abs() < 1e-12);
        // the excluded arrival to the west does not close the gap
        assert!((relo.quality.azi_gap_primary - 360.0).abs() < 1e-9);
    }
}
