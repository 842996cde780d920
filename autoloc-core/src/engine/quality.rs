//! Origin quality control
//!
//! **Responsibilities:**
//! - Rework loop run on every candidate before it is stored
//! - Residual trimming and outlier removal
//! - Distance-based exclusions (farthest stations, core phases)
//! - Fake-origin test and the filters applied before store and publication

use super::core::Engine;
use crate::locator::DepthPolicy;
use crate::model::{Arrival, DepthType, Exclusion, Origin, PickId};
use crate::traveltime::{self, TravelTime};
use autoloc_common::geo;
use tracing::{debug, info, warn};

/// Defining phases from which an excessive RMS is worked on
const RMS_CHECK_MIN_PHASES: usize = 20;

/// Above this many defining phases, the largest residual is simply dropped
const RMS_ENHANCE_MAX_PHASES: usize = 50;

/// Below this many defining phases, rework tries to enhance the score
const ENHANCE_MAX_PHASES: usize = 30;

/// Minimum score gain of one leave-one-out exclusion
const ENHANCE_MIN_GAIN: f64 = 0.2;

impl Engine {
    /// Quality-control loop for a candidate origin
    ///
    /// Returns false if the origin has fewer than `min_phase_count`
    /// defining phases before or after the rework.
    pub(super) fn rework(&mut self, origin: &mut Origin) -> bool {
        if origin.defining_count() < self.config.min_phase_count {
            return false;
        }

        let policy = self.apply_depth_policy(origin);

        if origin.defining_count() < ENHANCE_MAX_PHASES {
            self.enhance_score(origin, 0);
        }

        self.trim_residuals(origin, policy);
        self.exclude_beyond_max_distance(origin, policy);
        self.ensure_acceptable_rms(origin, policy);

        if self.add_more_picks(origin) {
            debug!(origin = origin.id, "Picks added from pool");
        }

        self.trim_residuals(origin, policy);
        self.exclude_distant_stations(origin, policy);
        self.exclude_pkp(origin, policy);

        if origin.dep != self.config.default_depth && origin.depth_type == DepthType::Default {
            origin.depth_type = DepthType::Free;
        }

        origin.defining_count() >= self.config.min_phase_count
    }

    /// Try to raise the score of a young origin
    ///
    /// With enough XXL arrivals, picks earlier than the earliest XXL pick
    /// are excluded. Then up to `enhance_score_max_loops` leave-one-out
    /// passes run (further limited by `max_loops` if non-zero).
    pub(super) fn enhance_score(&self, origin: &mut Origin, max_loops: usize) -> bool {
        let young = (origin.defining_count() as f64) < 1.5 * self.config.min_phase_count as f64;
        if young && self.exclude_before_xxl(origin) {
            return true;
        }

        let mut passes = self.config.enhance_score_max_loops;
        if max_loops > 0 {
            passes = passes.min(max_loops);
        }

        let mut improved = false;
        for _ in 0..passes {
            let current = self.update_score(origin);
            let candidates: Vec<PickId> = origin
                .arrivals
                .iter()
                .filter(|a| !a.is_excluded())
                .map(|a| a.pick.id.clone())
                .collect();

            let mut best: Option<(PickId, f64)> = None;
            for id in candidates {
                let mut copy = origin.clone();
                let Some(i) = copy.find_arrival(&id) else {
                    continue;
                };
                copy.arrivals[i].excluded = Exclusion::ManuallyExcluded;
                let relo = self
                    .relocate(&copy, DepthPolicy::Free)
                    .or_else(|| self.relocate(&copy, DepthPolicy::Fixed(origin.dep)));
                let Some(mut relo) = relo else {
                    continue;
                };
                let score = self.update_score(&mut relo);
                if score > best.as_ref().map_or(current, |b| b.1) {
                    best = Some((id, score));
                }
            }

            let Some((id, best_score)) = best else {
                break;
            };
            if best_score < current + ENHANCE_MIN_GAIN {
                break;
            }

            let mut copy = origin.clone();
            if let Some(i) = copy.find_arrival(&id) {
                copy.arrivals[i].excluded = Exclusion::LargeResidual;
            }
            let relo = self
                .relocate(&copy, DepthPolicy::Free)
                .or_else(|| self.relocate(&copy, DepthPolicy::Fixed(origin.dep)));
            let Some(relo) = relo else {
                break;
            };
            origin.update_from(&relo);
            debug!(origin = origin.id, pick = %id, "Excluded to enhance score: {}", origin.one_liner());
            improved = true;
        }
        improved
    }

    /// Keep only XXL picks and later ones, starting at the earliest XXL
    /// station
    fn exclude_before_xxl(&self, origin: &mut Origin) -> bool {
        let xxl: Vec<&Arrival> = origin.arrivals.iter().filter(|a| a.pick.xxl).collect();
        if xxl.is_empty() || xxl.len() < self.config.xxl.min_phase_count {
            return false;
        }
        let Some(earliest) = xxl
            .iter()
            .min_by(|a, b| a.pick.time.total_cmp(&b.pick.time))
            .map(|a| a.pick.clone())
        else {
            return false;
        };
        let Some(station) = earliest.station.clone() else {
            return false;
        };

        let mut copy = origin.clone();
        let excluded = copy.exclude_where(Exclusion::ManuallyExcluded, |a| {
            !a.pick.xxl && a.pick.time < earliest.time
        });
        if excluded == 0 {
            return false;
        }

        copy.depth_type = DepthType::Free;
        copy.lat = station.lat;
        copy.lon = station.lon;
        let policy = if self.config.default_depth_stickiness > 0.9 {
            DepthPolicy::Fixed(self.config.default_depth)
        } else {
            DepthPolicy::Free
        };
        match self.relocate(&copy, policy) {
            Some(relo) => {
                origin.update_from(&relo);
                info!(" XXL {}", origin.one_liner());
                true
            }
            None => false,
        }
    }

    /// Bring the RMS of a well-constrained origin below `max_rms`
    pub(super) fn ensure_acceptable_rms(&self, origin: &mut Origin, policy: DepthPolicy) {
        if origin.defining_count() < RMS_CHECK_MIN_PHASES || origin.rms() <= self.config.max_rms {
            return;
        }

        while origin.rms() > self.config.max_rms {
            let defining = origin.defining_count();
            if defining < RMS_CHECK_MIN_PHASES {
                break;
            }

            if defining < RMS_ENHANCE_MAX_PHASES {
                if !self.enhance_score(origin, 1) {
                    break;
                }
                continue;
            }

            let Some(worst) = origin
                .arrivals
                .iter()
                .filter(|a| !a.is_excluded())
                .max_by(|a, b| a.residual.abs().total_cmp(&b.residual.abs()))
                .map(|a| a.pick.id.clone())
            else {
                break;
            };
            let mut copy = origin.clone();
            if let Some(i) = copy.find_arrival(&worst) {
                copy.arrivals[i].excluded = Exclusion::LargeResidual;
            }
            let Some(relo) = self.relocate(&copy, policy) else {
                warn!(origin = origin.id, "Relocation failed while reducing rms");
                break;
            };
            origin.update_from(&relo);
        }
    }

    /// Exclude large residuals, re-include good ones, drop hopeless ones
    ///
    /// Positive residuals count 1.5 times. Afterwards no arrival has a
    /// residual beyond `max_residual_keep`, even if the origin falls below
    /// `min_phase_count` or relocation fails.
    pub(super) fn trim_residuals(&mut self, origin: &mut Origin, policy: DepthPolicy) -> bool {
        let mut count = 0;

        while origin.defining_count() >= self.config.min_phase_count {
            let Some((id, worst)) = origin
                .arrivals
                .iter()
                .filter(|a| !a.is_excluded())
                .map(|a| {
                    let mut normalized = a.residual / self.config.max_residual_use;
                    if normalized > 0.0 {
                        normalized *= 1.5;
                    }
                    (a.pick.id.clone(), normalized.abs())
                })
                .max_by(|a, b| a.1.total_cmp(&b.1))
            else {
                break;
            };
            if worst < 1.0 {
                break;
            }

            let mut copy = origin.clone();
            if let Some(i) = copy.find_arrival(&id) {
                copy.arrivals[i].excluded = Exclusion::LargeResidual;
            }
            let Some(relo) = self.relocate(&copy, policy) else {
                break;
            };
            origin.update_from(&relo);
            debug!(" TRM {} exc {}", origin.one_liner(), id);
            count += 1;
        }

        loop {
            let Some((id, best)) = origin
                .arrivals
                .iter()
                .filter(|a| a.excluded == Exclusion::LargeResidual)
                .map(|a| (a.pick.id.clone(), a.residual.abs()))
                .min_by(|a, b| a.1.total_cmp(&b.1))
            else {
                break;
            };
            if best > 2.0 * self.config.good_rms {
                break;
            }

            let mut copy = origin.clone();
            if let Some(i) = copy.find_arrival(&id) {
                copy.arrivals[i].excluded = Exclusion::NotExcluded;
            }
            let Some(relo) = self.relocate(&copy, policy) else {
                break;
            };
            origin.update_from(&relo);
            debug!(" TRM {} inc {}", origin.one_liner(), id);
            count += 1;
        }

        // Bounded regardless of how many defining phases remain
        let keep = self.config.max_residual_keep;
        loop {
            let beyond = origin.exclude_where(Exclusion::LargeResidual, |a| {
                !a.is_excluded() && a.residual.abs() > keep
            });
            if beyond == 0 {
                break;
            }
            debug!(origin = origin.id, "Excluded {} arrivals beyond {:.1} s", beyond, keep);
            count += beyond;
            let Some(relo) = self.relocate(origin, policy) else {
                break;
            };
            origin.update_from(&relo);
        }

        self.remove_worst_outliers(origin);
        count > 0
    }

    /// Erase excluded arrivals beyond `max_residual_keep`
    ///
    /// Their picks are released if they were associated with this origin.
    pub(super) fn remove_worst_outliers(&mut self, origin: &mut Origin) -> usize {
        let keep = self.config.max_residual_keep;
        let removed: Vec<PickId> = origin
            .arrivals
            .iter()
            .filter(|a| a.is_excluded() && a.residual.abs() > keep)
            .map(|a| a.pick.id.clone())
            .collect();
        if removed.is_empty() {
            return 0;
        }

        origin
            .arrivals
            .retain(|a| !(a.is_excluded() && a.residual.abs() > keep));
        for id in &removed {
            if self.pool.associated_origin(id) == Some(origin.id) {
                self.pool.clear_association(id);
            }
            debug!(origin = origin.id, pick = %id, "Removed outlier");
        }
        removed.len()
    }

    /// Drop the farthest defining stations beyond `max_sta_dist` while
    /// enough phases remain
    fn exclude_beyond_max_distance(&self, origin: &mut Origin, policy: DepthPolicy) {
        while origin.defining_phase_count(0.0, self.config.max_sta_dist) > self.config.min_phase_count {
            let Some((id, distance)) = origin
                .arrivals
                .iter()
                .filter(|a| !a.is_excluded())
                .map(|a| (a.pick.id.clone(), a.distance))
                .max_by(|a, b| a.1.total_cmp(&b.1))
            else {
                break;
            };
            if distance < self.config.max_sta_dist {
                break;
            }

            let mut copy = origin.clone();
            if let Some(i) = copy.find_arrival(&id) {
                copy.arrivals[i].excluded = Exclusion::StationDistance;
            }
            let Some(relo) = self.relocate(&copy, policy) else {
                warn!(origin = origin.id, "Relocation failed while excluding far stations");
                break;
            };
            origin.update_from(&relo);
        }
    }

    /// Exclude stations far beyond the bulk of the network
    ///
    /// The cutoff starts at the distance of the `max(2, n/10)`-th farthest
    /// station within 110 degrees and grows until a jump by a factor of four.
    pub(super) fn exclude_distant_stations(&self, origin: &mut Origin, policy: DepthPolicy) -> bool {
        let mut distances: Vec<f64> = origin
            .arrivals
            .iter()
            .filter(|a| !a.is_excluded() || a.excluded == Exclusion::StationDistance)
            .filter(|a| a.distance <= 110.0)
            .map(|a| a.distance)
            .collect();
        if distances.len() < 4 {
            return false;
        }
        distances.sort_by(|a, b| a.total_cmp(b));

        let n = distances.len();
        let nx = ((0.1 * n as f64) as usize).max(2);
        let mut max_distance = distances[n - nx];
        for &d in &distances[n - nx + 1..] {
            if d > 4.0 * max_distance {
                break;
            }
            max_distance = d;
        }

        let mut copy = origin.clone();
        let excluded = copy.exclude_where(Exclusion::StationDistance, |a| {
            !a.is_excluded() && a.distance > max_distance
        });
        if excluded == 0 {
            return false;
        }
        debug!(origin = origin.id, max_distance, "Excluded {} distant stations", excluded);

        match self.relocate(&copy, policy) {
            Some(relo) => {
                origin.update_from(&relo);
                true
            }
            None => false,
        }
    }

    /// Take late P/PKP beyond 105 degrees out of a well-recorded origin
    pub(super) fn exclude_pkp(&self, origin: &mut Origin, policy: DepthPolicy) -> bool {
        if origin.defining_phase_count(0.0, 105.0) < self.config.min_sta_count_ignore_pkp {
            return false;
        }

        let time = origin.time;
        let mut copy = origin.clone();
        let excluded = copy.exclude_where(Exclusion::UnusedPhase, |a| {
            !a.is_excluded() && a.distance >= 105.0 && a.is_p_or_pkp() && a.pick.time - time > 960.0
        });
        if excluded == 0 {
            return false;
        }

        match self.relocate(&copy, policy) {
            Some(relo) => {
                origin.update_from(&relo);
                true
            }
            None => {
                warn!(origin = origin.id, "Relocation failed after excluding PKP");
                false
            }
        }
    }

    /// Fraction of the defining arrivals explained by an earlier, larger
    /// origin
    ///
    /// Arrivals shared with that origin, or fitting one of its secondary
    /// phases better than their own residual, are marked
    /// `DeterioratesSolution`. Returns the maximum over all candidate
    /// origins.
    pub(super) fn test_fake(&self, origin: &mut Origin) -> f64 {
        if origin.imported || origin.score > 80.0 {
            return 0.0;
        }

        let mut max_probability: f64 = 0.0;
        for other in self.origins.values() {
            if other.id == origin.id {
                continue;
            }
            if other.time < origin.time - 1800.0 || other.time > origin.time + 600.0 {
                continue;
            }
            let defining = origin.defining_count();
            if defining == 0 || other.defining_count() < 2 * defining {
                continue;
            }

            let mut count = 0;
            for arr in origin.arrivals.iter_mut() {
                if other.has_pick(&arr.pick.id) {
                    arr.excluded = Exclusion::DeterioratesSolution;
                    debug!(origin = origin.id, other = other.id, pick = %arr.pick.id, "Doubly associated pick");
                    count += 1;
                    continue;
                }

                let Some(station) = arr.pick.station.clone() else {
                    continue;
                };
                let (delta, _, _) = geo::delazi(other.lat, other.lon, station.lat, station.lon);
                let tts = self
                    .ttt
                    .compute(other.lat, other.lon, other.dep, station.lat, station.lon, 0.0);
                if let Some((phase, dt)) = secondary_phase_fit(arr, other, delta, &tts) {
                    if dt.abs() < arr.residual.abs() {
                        arr.excluded = Exclusion::DeterioratesSolution;
                    }
                    debug!(
                        origin = origin.id,
                        other = other.id,
                        station = %station.code,
                        "Possible {} of other origin, dt={:.1}",
                        phase,
                        dt
                    );
                    count += 1;
                }
            }

            let probability = count as f64 / defining as f64;
            max_probability = max_probability.max(probability);
        }
        max_probability
    }

    /// Non-preliminary origins need `min_phase_count` defining phases
    pub(super) fn passed_final_check(&self, origin: &Origin) -> bool {
        origin.preliminary || origin.defining_count() >= self.config.min_phase_count
    }

    /// Gate before an origin is stored
    pub(super) fn passed_filter(&self, origin: &mut Origin) -> bool {
        let fake = self.test_fake(origin);
        if fake > self.config.max_allowed_fake_probability {
            info!(origin = origin.id, probability = fake, "Origin is probably fake");
            return false;
        }
        if !self.passed_final_check(origin) {
            debug!(origin = origin.id, "Origin failed final check");
            return false;
        }
        ensure_consistent_arrivals(origin);
        true
    }

    /// Gate before an origin is published
    pub(super) fn publishable(&self, origin: &Origin) -> bool {
        let reason = if origin.quality.azi_gap_secondary > self.config.max_azi_gap_secondary {
            format!(
                "secondary gap {:.0} > {:.0}",
                origin.quality.azi_gap_secondary, self.config.max_azi_gap_secondary
            )
        } else if origin.score < self.config.min_score {
            format!("score {:.1} < {:.1}", origin.score, self.config.min_score)
        } else if origin.rms() > self.config.max_rms {
            format!("rms {:.2} > {:.2}", origin.rms(), self.config.max_rms)
        } else if origin.dep > self.config.max_depth {
            format!("depth {:.1} > {:.1}", origin.dep, self.config.max_depth)
        } else {
            return true;
        };
        info!(origin = origin.id, "Origin not sent ({})", reason);
        false
    }
}

/// Recompute distances and azimuths from the hypocenter, then sort
pub(super) fn ensure_consistent_arrivals(origin: &mut Origin) {
    origin.update_geometry();
    origin.sort_arrivals();
}

/// Secondary phase of `other` that explains the arrival, with its time
/// difference
fn secondary_phase_fit(
    arr: &Arrival,
    other: &Origin,
    delta: f64,
    tts: &[TravelTime],
) -> Option<(&'static str, f64)> {
    let xxl = arr.pick.xxl;
    let deep = delta > 25.0 && other.dep > 60.0;
    let checks: [(&'static str, bool, f64, f64); 7] = [
        ("PP", delta > 30.0 && !xxl && arr.score < 1.0, -20.0, 30.0),
        ("PKP", delta > 100.0 && !xxl, -20.0, 50.0),
        ("SKP", delta > 120.0 && delta < 142.0 && !xxl, -20.0, 50.0),
        ("PKKP", delta > 100.0 && delta < 130.0 && !xxl, -20.0, 50.0),
        ("pP", deep, -20.0, 30.0),
        ("sP", deep, -20.0, 30.0),
        ("S", delta < 110.0 && !xxl && arr.score < 1.0, -20.0, 30.0),
    ];

    for (phase, applies, low, high) in checks {
        if !applies {
            continue;
        }
        let Some(tt) = traveltime::first_with_prefix(tts, phase) else {
            continue;
        };
        let dt = arr.pick.time - (other.time + tt.time);
        if dt > low && dt < high {
            return Some((phase, dt));
        }
    }
    None
}
