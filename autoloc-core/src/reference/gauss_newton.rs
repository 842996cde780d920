//! Damped Gauss-Newton (Levenberg-Marquardt) hypocenter inversion
//!
//! Unknowns are latitude, longitude, origin time and, unless fixed, depth.
//! Partial derivatives are taken numerically against the travel-time
//! provider, so any [`TravelTimeProvider`] can be used.

use crate::locator::{
    HypocenterSolver, Hypocenter, LocateError, Observation, ObservationResult, Solution,
};
use crate::model::OriginError;
use crate::traveltime::TravelTimeProvider;
use autoloc_common::geo;
use std::sync::Arc;

const LATLON_STEP: f64 = 0.01;
const DEPTH_STEP: f64 = 0.5;
const DAMPING_FLOOR: f64 = 1e-6;

/// Iterative least-squares solver over a travel-time provider
pub struct GaussNewtonSolver {
    ttt: Arc<dyn TravelTimeProvider>,
    max_iterations: usize,
}

impl GaussNewtonSolver {
    pub fn new(ttt: Arc<dyn TravelTimeProvider>) -> Self {
        Self {
            ttt,
            max_iterations: 60,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Predicted travel time of the observed phase, falling back to the
    /// first arrival when the model does not know that phase
    fn travel_time(&self, obs: &Observation, lat: f64, lon: f64, depth: f64) -> Option<f64> {
        let tts = self.ttt.compute(lat, lon, depth, obs.lat, obs.lon, obs.alt);
        tts.iter()
            .find(|tt| tt.phase == obs.phase)
            .or_else(|| tts.first())
            .map(|tt| tt.time)
    }

    fn residuals(&self, observations: &[Observation], x: &Params) -> Option<Vec<f64>> {
        observations
            .iter()
            .map(|obs| {
                self.travel_time(obs, x.lat, x.lon, x.depth)
                    .map(|tt| obs.time - x.time - tt)
            })
            .collect()
    }

    fn cost(observations: &[Observation], residuals: &[f64]) -> f64 {
        observations
            .iter()
            .zip(residuals)
            .map(|(o, r)| o.weight * r * r)
            .sum()
    }

    /// Rows of d(predicted arrival)/d(param) for every weighted observation
    fn jacobian(&self, observations: &[Observation], x: &Params, free_depth: bool) -> Option<Vec<Vec<f64>>> {
        let mut rows = Vec::with_capacity(observations.len());
        for obs in observations {
            let mut row = Vec::with_capacity(4);
            let dlat = (self.travel_time(obs, x.lat + LATLON_STEP, x.lon, x.depth)?
                - self.travel_time(obs, x.lat - LATLON_STEP, x.lon, x.depth)?)
                / (2.0 * LATLON_STEP);
            let dlon = (self.travel_time(obs, x.lat, x.lon + LATLON_STEP, x.depth)?
                - self.travel_time(obs, x.lat, x.lon - LATLON_STEP, x.depth)?)
                / (2.0 * LATLON_STEP);
            row.push(dlat);
            row.push(dlon);
            if free_depth {
                let lo = (x.depth - DEPTH_STEP).max(0.0);
                let hi = x.depth + DEPTH_STEP;
                let ddep = (self.travel_time(obs, x.lat, x.lon, hi)?
                    - self.travel_time(obs, x.lat, x.lon, lo)?)
                    / (hi - lo);
                row.push(ddep);
            }
            row.push(1.0);
            rows.push(row);
        }
        Some(rows)
    }
}

#[derive(Debug, Clone, Copy)]
struct Params {
    lat: f64,
    lon: f64,
    depth: f64,
    time: f64,
}

impl Params {
    fn step(&self, delta: &[f64], free_depth: bool) -> Params {
        let mut next = *self;
        next.lat = (self.lat + delta[0]).clamp(-90.0, 90.0);
        next.lon = geo::normalize_longitude(self.lon + delta[1]);
        if free_depth {
            next.depth = (self.depth + delta[2]).max(0.0);
            next.time = self.time + delta[3];
        } else {
            next.time = self.time + delta[2];
        }
        next
    }
}

impl HypocenterSolver for GaussNewtonSolver {
    fn locate(
        &self,
        observations: &[Observation],
        initial: &Hypocenter,
        fixed_depth: Option<f64>,
    ) -> Result<Solution, LocateError> {
        let used = observations.iter().filter(|o| o.weight > 0.0).count();
        if used < 2 {
            return Err(LocateError::TooFewObservations { have: used, need: 2 });
        }
        if !initial.is_finite() {
            return Err(LocateError::NonFinite);
        }

        let free_depth = fixed_depth.is_none();
        let m = if free_depth { 4 } else { 3 };
        let mut x = Params {
            lat: initial.lat,
            lon: initial.lon,
            depth: fixed_depth.unwrap_or(initial.depth).max(0.0),
            time: initial.time,
        };

        let mut res = self.residuals(observations, &x).ok_or(LocateError::NonFinite)?;
        let mut cost = Self::cost(observations, &res);
        if !cost.is_finite() {
            return Err(LocateError::NonFinite);
        }

        let mut lambda = 1e-3;
        let mut converged = false;
        for _ in 0..self.max_iterations {
            let jac = self
                .jacobian(observations, &x, free_depth)
                .ok_or(LocateError::NonFinite)?;
            let (normal, gradient) = normal_equations(observations, &jac, &res, m);

            let mut accepted = None;
            while lambda < 1e10 {
                let mut damped = normal.clone();
                for (i, row) in damped.iter_mut().enumerate() {
                    row[i] += lambda * normal[i][i].max(DAMPING_FLOOR);
                }
                let Some(delta) = solve_linear(damped, gradient.clone()) else {
                    lambda *= 10.0;
                    continue;
                };
                let trial = x.step(&delta, free_depth);
                if let Some(trial_res) = self.residuals(observations, &trial) {
                    let trial_cost = Self::cost(observations, &trial_res);
                    if trial_cost.is_finite() && trial_cost <= cost {
                        accepted = Some((trial, trial_res, trial_cost, delta));
                        break;
                    }
                }
                lambda *= 10.0;
            }

            let Some((trial, trial_res, trial_cost, delta)) = accepted else {
                // no downhill step left: at a minimum
                converged = true;
                break;
            };
            let improvement = cost - trial_cost;
            x = trial;
            res = trial_res;
            cost = trial_cost;
            lambda = (lambda / 10.0).max(1e-9);

            let small_step = delta[0].abs() < 1e-6
                && delta[1].abs() < 1e-6
                && delta[m - 1].abs() < 1e-4
                && (!free_depth || delta[2].abs() < 1e-4);
            if small_step || improvement < 1e-10 * (1.0 + cost) {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(LocateError::NoConvergence);
        }

        let hypocenter = Hypocenter {
            lat: x.lat,
            lon: x.lon,
            depth: x.depth,
            time: x.time,
        };
        if !hypocenter.is_finite() {
            return Err(LocateError::NonFinite);
        }

        let error = self.uncertainties(observations, &x, free_depth, cost, used)?;
        let results = observations
            .iter()
            .zip(res)
            .map(|(obs, residual)| {
                let (distance, azimuth, _) = geo::delazi(x.lat, x.lon, obs.lat, obs.lon);
                ObservationResult {
                    residual,
                    distance,
                    azimuth,
                }
            })
            .collect();

        Ok(Solution {
            hypocenter,
            error,
            results,
        })
    }
}

impl GaussNewtonSolver {
    /// Standard errors from the inverse normal matrix scaled by the
    /// residual variance. Underdetermined solutions report zero for depth
    /// and time.
    fn uncertainties(
        &self,
        observations: &[Observation],
        x: &Params,
        free_depth: bool,
        cost: f64,
        used: usize,
    ) -> Result<OriginError, LocateError> {
        let m = if free_depth { 4 } else { 3 };
        if used <= m {
            return Ok(OriginError::default());
        }
        let jac = self
            .jacobian(observations, x, free_depth)
            .ok_or(LocateError::NonFinite)?;
        let res = vec![0.0; observations.len()];
        let (normal, _) = normal_equations(observations, &jac, &res, m);
        let Some(inv) = invert(normal) else {
            return Ok(OriginError::default());
        };
        let s2 = cost / (used - m) as f64;
        let sd = |i: usize| (s2 * inv[i][i]).max(0.0).sqrt();
        Ok(OriginError {
            slat: geo::deg2km(sd(0)),
            slon: geo::deg2km(sd(1)) * x.lat.to_radians().cos(),
            sdepth: if free_depth { sd(2) } else { 0.0 },
            stime: sd(m - 1),
        })
    }
}

/// `JᵀWJ` and `JᵀWr`
fn normal_equations(
    observations: &[Observation],
    jac: &[Vec<f64>],
    res: &[f64],
    m: usize,
) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut normal = vec![vec![0.0; m]; m];
    let mut gradient = vec![0.0; m];
    for ((obs, row), r) in observations.iter().zip(jac).zip(res) {
        if obs.weight <= 0.0 {
            continue;
        }
        for i in 0..m {
            gradient[i] += obs.weight * row[i] * r;
            for k in 0..m {
                normal[i][k] += obs.weight * row[i] * row[k];
            }
        }
    }
    (normal, gradient)
}

/// Gaussian elimination with partial pivoting
fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &k| a[i][col].abs().total_cmp(&a[k][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let f = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let s: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - s) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

fn invert(a: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let mut columns = Vec::with_capacity(n);
    for i in 0..n {
        let mut e = vec![0.0; n];
        e[i] = 1.0;
        columns.push(solve_linear(a.clone(), e)?);
    }
    // columns[j][i] is element (i, j) of the inverse
    Some(
        (0..n)
            .map(|i| (0..n).map(|j| columns[j][i]).collect())
            .collect(),
    )
}
