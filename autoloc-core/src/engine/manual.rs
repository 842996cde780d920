//! Origins fed from outside the engine
//!
//! **Responsibilities:**
//! - Accepting or ignoring analyst and foreign-agency origins
//! - Merging a manual origin into the matching live origin
//! - Storing foreign origins for passive association

use super::core::Engine;
use crate::locator::DepthPolicy;
use crate::model::{Arrival, DepthType, Origin, OriginId};
use crate::sink::OriginRecord;
use tracing::{debug, info, warn};

/// Manual and live origins this far apart in time are never matched
const MATCH_WINDOW: f64 = 1200.0;

/// Same-station picks this close in time count as the same observation
const SAME_PICK_TOLERANCE: f64 = 20.0;

impl Engine {
    /// Feed an origin from an analyst or another agency
    ///
    /// Returns true if the origin changed engine state.
    pub fn feed_origin(&mut self, record: &OriginRecord) -> bool {
        self.tick();

        if record.agency == self.config.agency_id {
            if !record.manual {
                debug!(origin = record.id, "Own automatic origin ignored");
                return false;
            }
            if !self.config.use_manual_origins {
                info!(origin = record.id, "Manual origin ignored");
                return false;
            }
            return self.feed_manual_origin(record);
        }

        if !self.config.use_imported_origins {
            info!(origin = record.id, agency = %record.agency, "Imported origin ignored");
            return false;
        }

        let mut origin = self.import_origin(record);
        origin.imported = true;
        origin.id = self.new_origin_id();
        let id = self.store(origin);

        if let Some(origin) = self.origins.get(&id) {
            for asso in self.associator.find_matching_picks(origin, self.pool.iter()) {
                info!(
                    origin = id,
                    pick = %asso.pick.id,
                    phase = %asso.phase,
                    affinity = asso.affinity,
                    "Pick matches imported origin"
                );
            }
        }
        true
    }

    fn feed_manual_origin(&mut self, record: &OriginRecord) -> bool {
        let manual = self.import_origin(record);
        if manual.arrivals.is_empty() {
            info!(origin = record.id, "Manual origin without arrivals ignored");
            return false;
        }

        let Some(found_id) = self.find_matching_origin(&manual) else {
            info!(origin = record.id, "No live origin matches manual origin");
            return false;
        };
        let Some(found) = self.origins.get(&found_id).cloned() else {
            return false;
        };
        info!(origin = found_id, "Manual origin matches {}", found.one_liner());

        let mut merged = manual;
        merged.id = found_id;
        for arr in &found.arrivals {
            if merged.has_pick(&arr.pick.id) {
                continue;
            }
            let duplicate = merged
                .arrivals
                .iter()
                .any(|m| m.pick.same_station(&arr.pick) && m.phase == arr.phase);
            if duplicate {
                continue;
            }
            merged.add(arr.clone());
        }
        merged.sort_arrivals();

        let policy = if merged.depth_type == DepthType::ManuallyFixed {
            DepthPolicy::Fixed(merged.dep)
        } else {
            DepthPolicy::Free
        };
        if !self.relocate_in_place(&mut merged, policy) {
            warn!(origin = found_id, "Relocation of manual origin failed");
            return false;
        }

        self.store(merged);
        self.report();
        self.cleanup(None);
        true
    }

    /// Origin from a record, with arrivals for the pooled picks it names
    fn import_origin(&self, record: &OriginRecord) -> Origin {
        let mut origin = Origin::new(record.lat, record.lon, record.depth, record.epoch);
        origin.depth_type = record.depth_type;
        origin.manual = record.manual;
        origin.agency = record.agency.clone();
        origin.author = record.author.clone();
        origin.error.sdepth = record.sdepth;
        origin.error.stime = record.stime;
        origin.quality.azi_gap_primary = record.azi_gap;
        origin.quality.azi_gap_secondary = record.azi_gap_secondary;

        for rec in &record.arrivals {
            let Some(pick) = self.pool.get(&rec.pick_id) else {
                warn!(origin = record.id, pick = %rec.pick_id, "Pick not found in pick pool");
                continue;
            };
            if pick.station.is_none() {
                continue;
            }
            let mut arr = Arrival::new(pick.clone(), &rec.phase, rec.residual);
            arr.excluded = rec.excluded;
            origin.add(arr);
        }
        origin.update_geometry();
        origin
    }

    /// Live origin sharing the most observations with `manual`
    ///
    /// A shared observation is the same pick, or a pick of the same
    /// station within 20 s.
    fn find_matching_origin(&self, manual: &Origin) -> Option<OriginId> {
        let mut best: Option<(OriginId, usize)> = None;
        for other in self.origins.values() {
            if other.imported || (other.time - manual.time).abs() > MATCH_WINDOW {
                continue;
            }
            let count = manual
                .arrivals
                .iter()
                .filter(|m| {
                    other.arrivals.iter().any(|a| {
                        a.pick.id == m.pick.id
                            || (a.pick.same_station(&m.pick)
                                && (a.pick.time - m.pick.time).abs() <= SAME_PICK_TOLERANCE)
                    })
                })
                .count();
            if count > 0 && best.map_or(true, |(_, n)| count > n) {
                best = Some((other.id, count));
            }
        }
        best.map(|(id, _)| id)
    }
}
