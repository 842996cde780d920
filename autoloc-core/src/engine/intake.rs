//! Pick intake
//!
//! **Responsibilities:**
//! - Pick and amplitude entry points
//! - Pick filters (SNR, station rate, blacklist, dead time, Pdiff)
//! - Processing order: associate, XXL fast path, nucleate

use super::core::Engine;
use crate::model::{Amplitude, Pick, PickMode};
use autoloc_common::geo;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Picks with a higher SNR are never suppressed as possible Pdiff
const PDIFF_MAX_SNR: f64 = 6.0;

/// Weight of the recent-pick sum in the station-rate guard
const RECENT_PICK_WEIGHT: f64 = 2.0 * 0.07;

impl Engine {
    /// Feed a new pick
    ///
    /// Returns true if the pick was processed. Rejected picks, picks
    /// waiting for an amplitude and picks that only went into the pool
    /// return false.
    pub fn feed_pick(&mut self, mut pick: Pick) -> bool {
        self.stats.picks_received += 1;
        self.tick();
        if self.config.playback {
            match pick.creation_time {
                Some(t) => self.sync(t),
                None => {
                    warn!(pick = %pick.id, "Pick without creation time");
                    self.sync(pick.time);
                }
            }
        } else if self.config.offline {
            self.sync(pick.time);
        }

        let priority = self.config.author_priority(&pick.author);
        if priority == 0 {
            info!(pick = %pick.id, author = %pick.author, "Pick not processed (author not accepted)");
            return false;
        }

        let Some(station) = self.stations.resolve(&pick.net, &pick.sta, pick.time) else {
            warn!(pick = %pick.id, "Pick from unknown station {}.{}", pick.net, pick.sta);
            return false;
        };
        pick.station = Some(station);

        if self.config.max_age > 0.0 && pick.time < self.now - self.config.max_age {
            info!(pick = %pick.id, "Ignored old pick");
            return false;
        }

        let id = pick.id.clone();
        if !self.pool.insert(pick) {
            debug!(pick = %id, "Duplicate pick ignored");
            return false;
        }

        if !self.ready_for_processing(&id) {
            return false;
        }
        self.process_and_report(&id)
    }

    /// Feed an amplitude for a pooled pick
    ///
    /// Only the configured absolute and SNR amplitude types are used. The
    /// pick is processed again once the amplitude is attached.
    pub fn feed_amplitude(&mut self, amplitude: &Amplitude) -> bool {
        self.stats.amplitudes_received += 1;
        self.tick();

        let is_snr = amplitude.amp_type == self.config.ampl_type_snr;
        let is_abs = amplitude.amp_type == self.config.ampl_type_abs;
        if !is_snr && !is_abs {
            return false;
        }
        let period = if self.config.ampl_type_abs == "mb" {
            amplitude.period.unwrap_or(0.0)
        } else {
            1.0
        };

        let updated = self.pool.update(&amplitude.pick_id, |p| {
            if is_snr {
                p.snr = amplitude.value;
            }
            if is_abs {
                p.amp = amplitude.value;
                p.per = period;
            }
        });
        if updated.is_none() {
            warn!(pick = %amplitude.pick_id, "Pick not found in pick pool");
            return false;
        }

        if !self.ready_for_processing(&amplitude.pick_id) {
            return false;
        }
        self.process_and_report(&amplitude.pick_id)
    }

    /// Automatic picks wait for an amplitude and are not processed from
    /// disabled stations
    fn ready_for_processing(&self, id: &str) -> bool {
        let Some(pick) = self.pool.get(id) else {
            return false;
        };
        if !pick.is_automatic() {
            return true;
        }
        if !pick.has_amplitude() {
            debug!(pick = %id, "Waiting for amplitude");
            return false;
        }
        if pick.station.as_ref().is_some_and(|s| !s.enabled) {
            debug!(pick = %id, "Station disabled, pick kept in pool only");
            return false;
        }
        true
    }

    fn process_and_report(&mut self, id: &str) -> bool {
        if !self.process(id) {
            return false;
        }
        self.report();
        self.cleanup(None);
        true
    }

    /// Run a pooled pick through filters, association and nucleation
    pub(super) fn process(&mut self, id: &str) -> bool {
        let Some(pick) = self.pool.get(id).cloned() else {
            return false;
        };

        if !pick.is_valid() {
            debug!(pick = %id, snr = pick.snr, amp = pick.amp, "Invalid pick");
            return false;
        }
        if pick.is_ignored() {
            debug!(pick = %id, "Pick previously ignored");
            return false;
        }

        if self.too_low_snr(&pick) {
            if !self.follows_bigger_pick(&pick) {
                debug!(pick = %id, snr = pick.snr, "SNR too low");
                return false;
            }
            info!(pick = %id, snr = pick.snr, "Low SNR pick after a larger pick accepted as probable secondary phase");
        }

        let xxl = &self.config.xxl;
        let is_xxl = xxl.enabled && pick.amp >= xxl.min_amplitude && pick.snr > xxl.min_snr;
        let normalization = if xxl.enabled { xxl.min_amplitude } else { 2000.0 };
        let normamp = pick.amp / normalization;
        let Some(pick) = self.pool.update(id, |p| {
            if is_xxl {
                p.xxl = true;
            }
            p.normamp = normamp;
        }) else {
            return false;
        };

        if pick.is_automatic() && self.too_many_recent_picks(&pick) {
            self.pool.update(id, |p| p.mode = PickMode::IgnoredAutomatic);
            return false;
        }

        if pick.blacklisted {
            info!(pick = %id, "Blacklisted pick ignored");
            return false;
        }

        if !pick.is_automatic() && !self.config.use_manual_picks {
            if self.config.use_manual_origins {
                debug!(pick = %id, "Manual pick kept for manual origins");
                return true;
            }
            info!(pick = %id, "Blacklisting manual pick");
            self.pool.update(id, |p| p.blacklisted = true);
            return false;
        }

        self.stats.picks_processed += 1;
        self.pick_log.log(&pick, self.now);
        info!(pick = %id, xxl = pick.xxl, "Process pick");

        if self.follows_xxl_pick(&pick) {
            info!(pick = %id, "Pick ignored (following XXL pick)");
            return false;
        }
        if self.perhaps_pdiff(&pick) {
            info!(pick = %id, "Pick ignored (possible Pdiff)");
            return false;
        }

        let mut associated_score = None;
        if let Some(mut origin) = self.try_associate(&pick) {
            if origin.imported {
                self.store(origin);
                return true;
            }
            self.rework(&mut origin);
            if self.passed_filter(&mut origin) {
                let stored = self.store(origin);
                associated_score = self.origins.get(&stored).map(|o| o.score);
            }
        }

        if let Some(score) = associated_score {
            if score >= self.config.min_score_bypass_nucleator {
                debug!(pick = %id, score, "Nucleator bypassed");
                return true;
            }
        }

        // XXL fast path ahead of the grid search
        let mut stored = associated_score.is_some();
        if !stored && self.config.xxl.enabled && pick.xxl {
            stored = self.try_xxl(&pick);
        }

        if let Some(mut origin) = self.try_nucleate(&pick) {
            self.rework(&mut origin);
            if self.passed_filter(&mut origin) {
                self.store(origin);
                return true;
            }
        }

        stored
    }

    /// XXL fast path; true if a preliminary origin was stored
    fn try_xxl(&mut self, pick: &Arc<Pick>) -> bool {
        let Some(mut origin) = self.xxl_preliminary_origin(pick) else {
            return false;
        };
        if let Some(equivalent) = self.xxl_equivalent_origin(&origin) {
            let mut updated = equivalent.clone();
            updated.update_from(&origin);
            origin = updated;
        }
        self.rework(&mut origin);
        if !self.passed_filter(&mut origin) {
            return false;
        }
        self.stats.xxl_origins += 1;
        self.store(origin);
        true
    }

    pub(super) fn too_low_snr(&self, pick: &Pick) -> bool {
        pick.is_automatic() && pick.snr < self.config.min_pick_snr
    }

    /// Per-station rate guard
    ///
    /// Picks from a station that picked a lot recently need a higher SNR.
    fn too_many_recent_picks(&self, pick: &Pick) -> bool {
        if !pick.is_automatic() {
            return false;
        }
        let span = self.config.dynamic_pick_threshold_interval;
        if span <= 0.0 {
            return false;
        }
        if pick.snr <= 0.0 {
            info!(pick = %pick.id, "Pick without SNR ignored");
            return true;
        }

        let mut weighted_sum = 0.0;
        let mut prev_threshold: f64 = 0.0;
        for old in self.pool.iter() {
            if !old.same_station(pick) {
                continue;
            }
            if !self.config.use_manual_picks && !self.config.use_manual_origins && old.is_manual() {
                continue;
            }
            let dt = pick.time - old.time;
            if !(0.0..=span).contains(&dt) {
                continue;
            }
            let snr = old.snr.clamp(3.0, 15.0);
            weighted_sum += snr * (1.0 - dt / span);
            prev_threshold = prev_threshold.max(snr * (1.0 - dt / self.config.xxl.dead_time));
        }
        weighted_sum *= RECENT_PICK_WEIGHT;

        if pick.snr < weighted_sum {
            info!(pick = %pick.id, snr = pick.snr, threshold = weighted_sum, "Too many recent picks at station");
            return true;
        }
        if pick.snr < prev_threshold {
            info!(pick = %pick.id, snr = pick.snr, threshold = prev_threshold, "Pick follows a stronger pick at station");
            return true;
        }
        false
    }

    /// A much larger pick at the same station shortly before
    pub(super) fn follows_bigger_pick(&self, pick: &Pick) -> bool {
        self.pool.iter().any(|other| {
            let dt = pick.time - other.time;
            other.id != pick.id
                && other.same_station(pick)
                && dt >= 0.0
                && dt <= self.config.xxl.dead_time
                && (other.xxl || other.snr >= 3.0 * pick.snr)
        })
    }

    /// Within the dead time after an XXL pick of the same station
    fn follows_xxl_pick(&self, pick: &Pick) -> bool {
        self.pool.iter().any(|other| {
            let dt = pick.time - other.time;
            other.id != pick.id
                && other.xxl
                && other.same_station(pick)
                && dt >= 0.0
                && dt <= self.config.xxl.dead_time
        })
    }

    /// Weak pick that fits Pdiff of a strong teleseismic origin
    fn perhaps_pdiff(&self, pick: &Pick) -> bool {
        if pick.snr > PDIFF_MAX_SNR {
            return false;
        }
        let Some(station) = &pick.station else {
            return false;
        };
        self.origins.values().any(|origin| {
            if pick.time - origin.time > 1000.0 || origin.score < 100.0 {
                return false;
            }
            let (delta, _, _) = geo::delazi(origin.lat, origin.lon, station.lat, station.lon);
            if !(98.0..=120.0).contains(&delta) {
                return false;
            }
            let Some(tt) = self.ttt.predict(
                "Pdiff",
                origin.lat,
                origin.lon,
                origin.dep,
                station.lat,
                station.lon,
                0.0,
            ) else {
                return false;
            };
            let dt = pick.time - (origin.time + tt.time);
            dt > 0.0 && dt < 150.0
        })
    }
}
