//! Origin lifecycle
//!
//! **Responsibilities:**
//! - Storing new and updated origins
//! - Merging equivalent origins
//! - Throttled publication through the origin sink
//! - Time-based cleanup of picks, origins and publication state

use super::associate::rename_p_pkp;
use super::core::Engine;
use crate::locator::DepthPolicy;
use crate::model::{DepthType, Exclusion, Origin, OriginId};
use autoloc_common::time::format_time;
use autoloc_common::Time;
use tracing::{debug, info, warn};

/// Seconds before the age limit at which cleanup cuts
const CLEANUP_MARGIN: f64 = 1800.0;

/// An unchanged origin is not sent again within this many seconds
const MIN_RESEND_INTERVAL: f64 = 150.0;

impl Engine {
    /// Store a new origin or update the live origin with the same id
    ///
    /// The origin is queued for the next [`Engine::report`] unless it is
    /// imported.
    pub(super) fn store(&mut self, mut origin: Origin) -> OriginId {
        rename_p_pkp(&mut origin);
        self.update_score(&mut origin);
        let id = origin.id;

        if origin.imported {
            info!(" IMP {}", origin.one_liner());
            self.origins.insert(id, origin);
            return id;
        }

        if origin.depth_phase_count() > 0 {
            origin.depth_type = DepthType::Phases;
        }
        origin.agency = self.config.agency_id.clone();
        origin.author = self.config.author.clone();
        if origin.defining_count() >= self.config.min_phase_count {
            origin.preliminary = false;
        }
        if origin.depth_type == DepthType::Default && origin.dep != self.config.default_depth {
            origin.depth_type = DepthType::Free;
        }

        self.pool.associate(&origin);
        let tag = match self.origins.get_mut(&id) {
            Some(existing) => {
                existing.update_from(&origin);
                " UPD "
            }
            None => " NEW ",
        };
        info!("{}{}", tag, origin.one_liner());
        debug!("{}", origin.printout());
        self.origins.entry(id).or_insert(origin);

        if !self.new_origins.contains(&id) {
            self.new_origins.push(id);
        }
        self.stats.origins_stored += 1;
        id
    }

    /// Merge `b` into `a`
    ///
    /// The result keeps the id of `a` and starts from the better-scoring of
    /// the two. Arrivals only in the other origin are tried after a free
    /// relocation and kept if their residual fits.
    pub(super) fn merge(&mut self, a: &Origin, b: &Origin) -> Origin {
        let mut scored_a = a.clone();
        let mut scored_b = b.clone();
        let score_a = self.update_score(&mut scored_a);
        let score_b = self.update_score(&mut scored_b);
        let (better, other) = if score_b > score_a {
            (scored_b, scored_a)
        } else {
            (scored_a, scored_b)
        };

        let mut combined = better;
        combined.id = a.id;
        debug!(" MRG1 {}", combined.one_liner());
        debug!(" MRG2 {}", other.one_liner());

        for arr in &other.arrivals {
            if combined.has_pick(&arr.pick.id) {
                continue;
            }
            let mut arr = arr.clone();
            arr.excluded = Exclusion::TemporarilyExcluded;
            debug!(" MRG {}->{} added {}", other.id, combined.id, arr.pick.id);
            combined.add(arr);
        }

        let Some(relo) = self.relocate(&combined, DepthPolicy::Free) else {
            warn!(origin = combined.id, "Relocation of merged origin failed");
            return combined;
        };
        combined.update_from(&relo);

        for i in 0..combined.arrivals.len() {
            if combined.arrivals[i].excluded != Exclusion::TemporarilyExcluded {
                continue;
            }
            combined.arrivals[i].excluded = if self.residual_ok(&combined.arrivals[i], 1.3, 1.8) {
                Exclusion::NotExcluded
            } else {
                Exclusion::LargeResidual
            };
        }

        self.trim_residuals(&mut combined, DepthPolicy::Inherit);
        combined
    }

    /// Publish the origins that are due
    ///
    /// An origin is due once its interval has elapsed, or earlier if its
    /// phase count grew by `publication_interval_pick_count`. Returns
    /// what was published; in test mode nothing reaches the sink.
    pub fn report(&mut self) -> Vec<Origin> {
        for id in self.new_origins.drain(..) {
            self.publication.outgoing.insert(id);
            self.publication.next_due.entry(id).or_insert(0.0);
        }

        let now = self.now;
        let dn_max = self.config.publication_interval_pick_count as i64;
        let queued: Vec<OriginId> = self.publication.outgoing.iter().copied().collect();
        let mut published = Vec::new();

        for id in queued {
            let Some(origin) = self.origins.get(&id).cloned() else {
                self.publication.outgoing.remove(&id);
                continue;
            };

            let last = self
                .publication
                .last_sent
                .get(&id)
                .map(|o| (o.phase_count(), o.defining_count(), o.arrivals.len(), o.timestamp));
            let dn = last.map_or(dn_max, |(phases, _, _, _)| {
                origin.phase_count() as i64 - phases as i64
            });
            let next_due = self.publication.next_due.get(&id).copied().unwrap_or(0.0);
            if now - next_due < 0.0 && dn < dn_max {
                continue;
            }

            if !self.publishable(&origin) {
                self.publication.outgoing.remove(&id);
                continue;
            }

            if let Some((_, defining, arrivals, timestamp)) = last {
                if origin.defining_count() <= defining
                    && (origin.arrivals.len() <= arrivals || now - timestamp < MIN_RESEND_INTERVAL)
                {
                    info!(origin = id, "Origin not sent (no improvement)");
                    self.publication.outgoing.remove(&id);
                    continue;
                }
            }

            let mut out = origin.clone();
            out.timestamp = now;
            if !self.config.report_all_phases {
                out.arrivals.retain(|a| a.is_p_or_pkp());
            }
            if self.config.test {
                info!(origin = id, "Test mode, origin not sent");
            } else {
                self.sink.publish(&out);
            }

            let interval = self.config.publication_interval_time_slope * origin.defining_count() as f64
                + self.config.publication_interval_time_intercept;
            self.publication.next_due.insert(id, now + interval.max(0.0));

            let mut snapshot = origin;
            snapshot.timestamp = now;
            info!(" OUT {}", snapshot.one_liner());
            self.publication.last_sent.insert(id, snapshot);
            *self.publication.versions.entry(id).or_insert(0) += 1;
            self.publication.outgoing.remove(&id);
            self.stats.origins_published += 1;
            published.push(out);
        }
        published
    }

    /// Purge everything older than the cutoff
    ///
    /// Without an explicit time the cutoff is `now - max_age - 1800` and
    /// the call runs at most once per `cleanup_interval`; `max_age <= 0`
    /// disables it.
    pub fn cleanup(&mut self, min_time: Option<Time>) {
        let cutoff = match min_time {
            Some(t) => t,
            None => {
                if self.config.max_age <= 0.0 || self.now < self.next_cleanup {
                    return;
                }
                self.now - self.config.max_age - CLEANUP_MARGIN
            }
        };

        let picks = self.pool.cleanup(cutoff);
        let projected = self.nucleator.cleanup(cutoff);

        let expired: Vec<OriginId> = self
            .origins
            .values()
            .filter(|o| o.time < cutoff)
            .map(|o| o.id)
            .collect();
        for id in &expired {
            self.origins.remove(id);
            self.publication.forget(*id);
            self.pool.release_origin(*id);
        }
        self.publication.last_sent.retain(|_, o| o.time >= cutoff);
        let origins = &self.origins;
        self.new_origins.retain(|id| origins.contains_key(id));

        self.next_cleanup = self.now + self.config.cleanup_interval;
        info!(
            picks,
            origins = expired.len(),
            projected,
            "Cleanup before {}",
            format_time(cutoff)
        );
        self.dump_state();
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{arrival, engine, origin_with, StaticSolver};
    use super::*;
    use autoloc_common::AutolocConfig;
    use std::sync::Arc;

    #[test]
    fn test_merge_readmits_fitting_arrivals() {
        let mut engine = engine(AutolocConfig::default(), Arc::new(StaticSolver::new()));
        let mut a = origin_with(&[(1.0, 0.0), (2.0, 0.0), (3.0, 0.0), (4.0, 0.0), (5.0, 0.0), (6.0, 0.0)]);
        a.id = 1;
        let mut b = Origin::new(a.lat, a.lon, a.dep, a.time);
        b.id = 2;
        for arr in &a.arrivals[..3] {
            b.add(arr.clone());
        }
        b.add(arrival("N01", 7.0, 30.0, 0.5));
        // below the lower bound of 1.3 * max_residual_use
        b.add(arrival("N02", 8.0, 210.0, -12.0));

        let merged = engine.merge(&a, &b);
        assert_eq!(merged.id, 1);
        assert_eq!(merged.arrivals.len(), 8);
        assert_eq!(merged.defining_count(), 7);

        let fit = merged.find_arrival("XX.N01.P").unwrap();
        assert_eq!(merged.arrivals[fit].excluded, Exclusion::NotExcluded);
        let off = merged.find_arrival("XX.N02.P").unwrap();
        assert_eq!(merged.arrivals[off].excluded, Exclusion::LargeResidual);
        assert!(merged
            .arrivals
            .iter()
            .all(|arr| arr.excluded != Exclusion::TemporarilyExcluded));
    }
}
