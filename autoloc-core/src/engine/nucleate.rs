//! Nucleation of new origins
//!
//! **Responsibilities:**
//! - Running the grid search for a pick and choosing among its candidates
//! - Merging a candidate into an equivalent live origin
//! - XXL fast path: preliminary origins from a few large-amplitude picks

use super::core::Engine;
use crate::locator::DepthPolicy;
use crate::model::{Arrival, DepthType, Origin, Pick};
use autoloc_common::geo;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Live origins within this many seconds may absorb a new candidate
const EQUIVALENT_WINDOW: f64 = 1500.0;

/// Shared picks that make two origins equivalent
const MIN_COMMON_PICKS: usize = 3;

impl Engine {
    /// Feed a pick to the grid search
    ///
    /// Returns the new origin, or an existing origin improved by merging
    /// the new one into it. The result has passed the filter.
    pub(super) fn try_nucleate(&mut self, pick: &Arc<Pick>) -> Option<Origin> {
        self.stats.nucleator_calls += 1;
        let candidates = self.nucleator.feed(pick);
        debug!(pick = %pick.id, "{} candidate origins", candidates.len());

        let max_rms = 3.0 * self.config.max_rms;
        let mut best: Option<Origin> = None;
        for candidate in candidates {
            if candidate.rms() > max_rms {
                debug!(pick = %pick.id, rms = candidate.rms(), "Candidate rejected (rms)");
                continue;
            }
            if best.as_ref().map_or(true, |b| candidate.score > b.score) {
                best = Some(candidate);
            }
        }
        let mut origin = best?;
        origin.id = self.new_origin_id();
        origin.sort_arrivals();

        let Some(equivalent) = self.best_equivalent_origin(&origin).cloned() else {
            if !self.passed_filter(&mut origin) {
                return None;
            }
            info!(pick = %pick.id, "Nucleated {}", origin.one_liner());
            self.stats.nucleated_origins += 1;
            return Some(origin);
        };

        debug!(origin = origin.id, equivalent = equivalent.id, "Merging into equivalent origin");
        let mut merged = self.merge(&equivalent, &origin);
        let score = self.update_score(&mut merged);
        let rms = merged.rms();
        if !changed(equivalent.rms(), rms) && !changed(equivalent.score, score) {
            debug!(origin = equivalent.id, "Merge changed nothing");
            return None;
        }
        if !self.passed_filter(&mut merged) {
            return None;
        }
        self.stats.nucleated_origins += 1;
        Some(merged)
    }

    /// Live origin sharing the most picks with `origin`, at least three
    fn best_equivalent_origin(&self, origin: &Origin) -> Option<&Origin> {
        let mut best: Option<(&Origin, usize)> = None;
        for other in self.origins.values() {
            if other.imported || other.id == origin.id {
                continue;
            }
            if (other.time - origin.time).abs() > EQUIVALENT_WINDOW {
                continue;
            }
            let common = origin.common_pick_count(other);
            if common < MIN_COMMON_PICKS {
                continue;
            }
            if best.map_or(true, |(_, n)| common > n) {
                best = Some((other, common));
            }
        }
        best.map(|(o, _)| o)
    }

    /// Preliminary origin from XXL picks at nearby stations
    ///
    /// Tries multiples of the default depth up to `xxl.max_depth`, keeping
    /// the first fixed-depth solution with all stations within
    /// `xxl.max_sta_dist` and an acceptable RMS.
    pub(super) fn xxl_preliminary_origin(&mut self, new_pick: &Arc<Pick>) -> Option<Origin> {
        if !new_pick.xxl {
            return None;
        }
        let station = new_pick.station.clone()?;
        let xxl = &self.config.xxl;
        let max_dt = 10.0 + 13.7 * xxl.max_sta_dist;

        let mut picks: Vec<Arc<Pick>> = vec![new_pick.clone()];
        let mut stations: HashSet<String> = HashSet::from([new_pick.station_key()]);
        for pick in self.pool.iter() {
            if !pick.xxl || pick.is_ignored() || pick.same_station(new_pick) {
                continue;
            }
            let Some(other) = &pick.station else {
                continue;
            };
            if (new_pick.time - pick.time).abs() > max_dt {
                continue;
            }
            let (dx, _, _) = geo::delazi(station.lat, station.lon, other.lat, other.lon);
            if dx > xxl.max_sta_dist {
                continue;
            }
            if pick.is_manual() && !self.config.use_manual_picks && !self.config.use_manual_origins {
                continue;
            }
            if !stations.insert(pick.station_key()) {
                continue;
            }
            picks.push(pick.clone());
        }

        debug!(pick = %new_pick.id, "{} XXL picks", picks.len());
        if picks.len() < xxl.min_phase_count {
            return None;
        }

        let earliest = picks
            .iter()
            .min_by(|a, b| a.time.total_cmp(&b.time))?
            .clone();
        let earliest_station = earliest.station.clone()?;
        let lat = earliest_station.lat + 0.03;
        let lon = earliest_station.lon + 0.03;
        let time = earliest.time - 0.05;

        let mut trial_depths = Vec::new();
        let mut dep = self.config.default_depth;
        while dep <= xxl.max_depth {
            trial_depths.push(dep);
            if self.config.default_depth_stickiness > 0.9 {
                break;
            }
            dep += self.config.default_depth;
        }
        if trial_depths.is_empty() {
            trial_depths.push(self.config.default_depth);
        }

        let max_sta_dist = xxl.max_sta_dist;
        for dep in trial_depths {
            let mut trial = Origin::new(lat, lon, dep, time);
            for pick in &picks {
                trial.add(Arrival::new(pick.clone(), "P", 0.0));
            }
            trial.update_geometry();

            debug!(pick = %new_pick.id, depth = dep, "Trying XXL origin");
            let Some(relo) = self.relocate(&trial, DepthPolicy::Fixed(dep)) else {
                debug!(pick = %new_pick.id, depth = dep, "XXL relocation failed");
                continue;
            };
            if relo.arrivals.iter().any(|a| a.distance > max_sta_dist) || relo.rms() > self.config.max_rms {
                continue;
            }

            let mut origin = relo;
            origin.preliminary = true;
            origin.depth_type = if self.config.default_depth_stickiness > 0.9 {
                DepthType::Default
            } else {
                DepthType::ManuallyFixed
            };
            info!(pick = %new_pick.id, "Relocated XXL alert {}", origin.one_liner());

            if self.config.default_depth_stickiness < 0.9 && self.depth_is_resolvable(&mut origin) {
                self.relocate_in_place(&mut origin, DepthPolicy::Free);
            }

            origin.id = self.new_origin_id();
            origin.sort_arrivals();
            return Some(origin);
        }
        None
    }

    /// Best-scoring live origin sharing at least three picks with `origin`
    pub(super) fn xxl_equivalent_origin(&self, origin: &Origin) -> Option<&Origin> {
        self.origins
            .values()
            .filter(|other| other.id != origin.id)
            .filter(|other| origin.common_pick_count(other) >= MIN_COMMON_PICKS)
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

/// Relative change of at least 1e-7
fn changed(before: f64, after: f64) -> bool {
    let scale = before.abs().max(after.abs());
    if scale == 0.0 {
        return false;
    }
    (after - before).abs() / scale >= 1e-7
}
