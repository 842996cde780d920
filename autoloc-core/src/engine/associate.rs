//! Association of picks to live origins
//!
//! **Responsibilities:**
//! - Choosing the best origin for a new pick
//! - Binding one pick to one origin copy with relocation
//! - Sweeping the pool for picks a reworked origin explains

use super::core::Engine;
use crate::locator::DepthPolicy;
use crate::model::arrival::{is_p_family, is_pkp_family};
use crate::model::{Arrival, Exclusion, Origin, Pick};
use crate::traveltime;
use autoloc_common::geo;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl Engine {
    /// Best origin copy with `pick` associated, if any
    ///
    /// Imported origins take the pick passively and win outright. Among the
    /// others the copy with the most defining phases that passes the
    /// filter is returned.
    pub(super) fn try_associate(&self, pick: &Arc<Pick>) -> Option<Origin> {
        let associations = self.associator.find_matching_origins(pick, self.origins.values());
        if associations.is_empty() {
            return None;
        }
        debug!(pick = %pick.id, "{} matching origins", associations.len());

        let mut result: Option<Origin> = None;
        for asso in &associations {
            let Some(live) = self.origins.get(&asso.origin_id) else {
                continue;
            };
            if !live.imported {
                continue;
            }
            let mut origin = live.clone();
            if !self.associate(&mut origin, pick, &asso.phase) {
                continue;
            }
            info!(
                pick = %pick.id,
                origin = origin.id,
                phase = %asso.phase,
                "Associated pick to imported origin"
            );
            result = Some(origin);
        }
        if result.is_some() {
            return result;
        }

        let mut best_count = 0;
        for asso in &associations {
            if asso.affinity < self.config.min_pick_affinity {
                continue;
            }
            let Some(live) = self.origins.get(&asso.origin_id) else {
                continue;
            };
            if live.imported {
                continue;
            }
            let mut origin = live.clone();
            if asso.phase == "P" || asso.phase == "PKP" {
                if !self.associate(&mut origin, pick, &asso.phase) {
                    continue;
                }
            } else {
                let mut arr = Arrival::new(pick.clone(), &asso.phase, asso.residual).with_affinity(asso.affinity);
                arr.distance = asso.distance;
                arr.azimuth = asso.azimuth;
                arr.excluded = Exclusion::UnusedPhase;
                origin.add(arr);
            }

            let weight = origin
                .find_arrival(&pick.id)
                .map(|i| origin.arrivals[i].weight())
                .unwrap_or(0.0);
            info!(
                pick = %pick.id,
                origin = origin.id,
                phase = %asso.phase,
                affinity = asso.affinity,
                distance = asso.distance,
                weight,
                "Associated pick"
            );

            if !self.passed_filter(&mut origin) {
                continue;
            }
            let count = origin.defining_count();
            if count > best_count {
                best_count = count;
                result = Some(origin);
            }
        }
        result
    }

    /// Add `pick` to `origin` as `phase` (P or PKP) and relocate
    ///
    /// Returns false if the pick cannot be associated; `origin` is then
    /// unchanged. On success the pick is present in `origin`, though
    /// possibly excluded. The score never decreases.
    pub(super) fn associate(&self, origin: &mut Origin, pick: &Arc<Pick>, phase: &str) -> bool {
        let dt = pick.time - origin.time;
        if !(-10.0..=1300.0).contains(&dt) {
            return false;
        }
        if phase == "PKP" && dt < 1000.0 {
            return false;
        }
        if origin.has_pick(&pick.id) {
            return false;
        }
        if phase != "P" && phase != "PKP" {
            warn!(pick = %pick.id, phase, "Only P and PKP can be associated");
            return false;
        }
        let Some(station) = &pick.station else {
            return false;
        };

        let (delta, az, _) = geo::delazi(origin.lat, origin.lon, station.lat, station.lon);
        if delta > self.config.max_sta_dist {
            return false;
        }
        let tts = self
            .ttt
            .compute(origin.lat, origin.lon, origin.dep, station.lat, station.lon, 0.0);
        let Some(tt) = traveltime::first_p(&tts, delta) else {
            return false;
        };

        let mut arr = Arrival::new(pick.clone(), phase, dt - tt.time);
        arr.distance = delta;
        arr.azimuth = az;
        if !self.residual_ok(&arr, 0.9, 1.3) {
            return false;
        }

        let min_phase_count =
            self.config.min_phase_count as f64 + (delta - station.max_nuc_dist) * self.config.dist_slope;
        if (origin.phase_count() as f64) < min_phase_count && !(phase == "PKP" && self.config.aggressive_pkp) {
            arr.excluded = Exclusion::TemporarilyExcluded;
        }
        if origin.imported {
            arr.excluded = Exclusion::UnusedPhase;
        }
        if delta > 105.0 && origin.defining_phase_count(0.0, 105.0) > self.config.min_sta_count_ignore_pkp {
            arr.excluded = Exclusion::UnusedPhase;
        } else if delta > 105.0 && delta < 125.0 {
            debug!(origin = origin.id, pick = %pick.id, "Excluding pick at 105 < delta < 125");
            arr.excluded = Exclusion::UnusedPhase;
        }

        let mut copy = origin.clone();
        let original_score = self.update_score(&mut copy);
        let original_rms = copy.rms();
        copy.add(arr.clone());

        if origin.imported {
            origin.update_from(&copy);
            return true;
        }

        let mut relo = None;
        if arr.excluded != Exclusion::UnusedPhase {
            let policy = if self.config.default_depth_stickiness > 0.9 {
                DepthPolicy::Fixed(self.config.default_depth)
            } else if origin.depth_type == crate::model::DepthType::ManuallyFixed {
                DepthPolicy::Fixed(origin.dep)
            } else {
                DepthPolicy::Free
            };

            let mut first = self.relocate(&copy, policy);
            if first.is_none() {
                if policy != DepthPolicy::Free {
                    return false;
                }
                first = self.relocate(&copy, DepthPolicy::Fixed(origin.dep));
            }
            let Some(mut first) = first else {
                return false;
            };

            let score2 = self.update_score(&mut first);
            let rms2 = first.rms();
            let rms_margin = 3.0 / (10.0 + copy.arrivals.len() as f64).sqrt();
            relo = if score2 < original_score || rms2 > original_rms + rms_margin {
                debug!(
                    origin = origin.id,
                    pick = %pick.id,
                    score = original_score,
                    score2,
                    rms = original_rms,
                    rms2,
                    "No improvement from association"
                );
                if let Some(i) = copy.find_arrival(&pick.id) {
                    copy.arrivals[i].excluded = Exclusion::LargeResidual;
                }
                match self.relocate(&copy, DepthPolicy::Fixed(origin.dep)) {
                    Some(mut second) => {
                        let score3 = self.update_score(&mut second);
                        (score3 >= original_score).then_some(second)
                    }
                    None => {
                        warn!(origin = origin.id, "Relocation with excluded pick failed");
                        None
                    }
                }
            } else {
                Some(first)
            };

            if let Some(r) = &relo {
                if let Some(i) = r.find_arrival(&pick.id) {
                    if r.arrivals[i].residual.abs() > self.config.max_residual_use {
                        let mut large = r.arrivals[i].clone();
                        large.excluded = Exclusion::LargeResidual;
                        origin.add(large);
                        return true;
                    }
                }
            }
        }

        match relo {
            Some(r) => origin.update_from(&r),
            None => {
                if arr.excluded != Exclusion::UnusedPhase {
                    arr.excluded = Exclusion::DeterioratesSolution;
                }
                origin.add(arr);
            }
        }
        true
    }

    /// Residual within the window scaled by the given factors
    ///
    /// Core phases get twice the window with aggressive PKP handling. The
    /// upper bound of P-family phases widens at regional distance.
    pub(super) fn residual_ok(&self, arr: &Arrival, min_factor: f64, max_factor: f64) -> bool {
        let mut min_residual = -min_factor * self.config.max_residual_use;
        let mut max_residual = max_factor * self.config.max_residual_use;
        if self.config.aggressive_pkp && is_pkp_family(&arr.phase) {
            min_residual *= 2.0;
            max_residual *= 2.0;
        }
        if is_p_family(&arr.phase) {
            max_residual *= 1.0 + 0.7 * (-arr.distance * arr.distance / 50.0).exp();
        }
        (min_residual..=max_residual).contains(&arr.residual)
    }

    /// Associate unassociated pool picks from stations without a P/PKP
    /// arrival; true if any pick was added
    pub(super) fn add_more_picks(&self, origin: &mut Origin) -> bool {
        let mut have: HashSet<String> = origin
            .arrivals
            .iter()
            .filter(|a| !a.is_excluded())
            .map(|a| format!("{}:{}", a.pick.station_key(), a.phase))
            .collect();

        let candidates: Vec<Arc<Pick>> = self
            .pool
            .iter()
            .filter(|pick| {
                let dt = pick.time - origin.time;
                (-10.0..=1300.0).contains(&dt)
            })
            .filter(|pick| self.may_add(pick))
            .cloned()
            .collect();

        let mut added = 0;
        for pick in candidates {
            let key = pick.station_key();
            if have.contains(&format!("{}:P", key)) || have.contains(&format!("{}:PKP", key)) {
                continue;
            }
            let phase = if self.associate(origin, &pick, "P") {
                "P"
            } else if self.associate(origin, &pick, "PKP") {
                "PKP"
            } else {
                continue;
            };
            have.insert(format!("{}:{}", key, phase));
            debug!(origin = origin.id, pick = %pick.id, "Added pick from pool");
            added += 1;
        }
        if added == 0 {
            return false;
        }
        rename_p_pkp(origin);
        true
    }

    fn may_add(&self, pick: &Pick) -> bool {
        let Some(station) = &pick.station else {
            return false;
        };
        if pick.is_manual() {
            if !self.config.use_manual_picks {
                return false;
            }
        } else if !station.enabled {
            return false;
        }
        !pick.is_ignored()
            && pick.amp > 0.0
            && pick.snr > 0.0
            && (!self.too_low_snr(pick) || self.follows_bigger_pick(pick))
            && !pick.blacklisted
            && self.pool.associated_origin(&pick.id).is_none()
    }
}

/// Rename P beyond 105 degrees and 1000 s to PKP, and PKP within 125 degrees
/// and 1000 s back to P
pub(super) fn rename_p_pkp(origin: &mut Origin) {
    let time = origin.time;
    for arr in origin.arrivals.iter_mut() {
        let dt = arr.pick.time - time;
        if arr.distance > 105.0 && dt > 1000.0 && arr.phase == "P" {
            arr.phase = "PKP".to_string();
        }
        if arr.distance < 125.0 && dt < 1000.0 && arr.phase == "PKP" {
            arr.phase = "P".to_string();
        }
    }
}
