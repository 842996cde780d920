//! Phase association
//!
//! Matches picks against the predicted arrivals of existing origins. The
//! result of a match is an [`Association`]: a phase name, a normalized
//! residual and an affinity in `[0, 1]`. Deciding whether an association is
//! actually bound to an origin is up to the engine.

use crate::model::{Origin, OriginId, Pick};
use crate::score::avgfn;
use crate::traveltime::{self, TravelTimeProvider};
use autoloc_common::geo;
use std::sync::Arc;

/// Affinity below which a match is not reported
const MIN_AFFINITY: f64 = 0.1;

/// Distance/depth window in which a phase is considered
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseRange {
    pub code: String,
    pub dmin: f64,
    pub dmax: f64,
    pub zmin: f64,
    pub zmax: f64,
}

impl PhaseRange {
    pub fn new(code: &str, dmin: f64, dmax: f64) -> Self {
        Self {
            code: code.to_string(),
            dmin,
            dmax,
            zmin: 0.0,
            zmax: 1000.0,
        }
    }

    pub fn contains(&self, delta: f64, depth: f64) -> bool {
        (self.dmin..=self.dmax).contains(&delta) && (self.zmin..=self.zmax).contains(&depth)
    }
}

/// Phases tried for association, in order of preference
pub fn default_phase_ranges() -> Vec<PhaseRange> {
    vec![
        PhaseRange::new("P", 0.0, 180.0),
        PhaseRange::new("PcP", 25.0, 55.0),
        PhaseRange::new("ScP", 25.0, 55.0),
        PhaseRange::new("PP", 60.0, 160.0),
        PhaseRange::new("SKP", 120.0, 150.0),
        PhaseRange::new("PKKP", 80.0, 130.0),
        PhaseRange::new("PKiKP", 30.0, 120.0),
        PhaseRange::new("SKKP", 110.0, 152.0),
    ]
}

/// A possible pick-to-origin binding
#[derive(Debug, Clone)]
pub struct Association {
    pub origin_id: OriginId,
    pub pick: Arc<Pick>,
    pub phase: String,
    /// Residual, normalized for non-imported origins
    pub residual: f64,
    pub affinity: f64,
    pub distance: f64,
    pub azimuth: f64,
}

/// Regional down-weighting of residuals
fn residual_scale(delta: f64) -> f64 {
    1.0 + 0.6 * (-0.003 * delta * delta).exp() + 0.5 * (-0.03 * (15.0 - delta) * (15.0 - delta)).exp()
}

pub struct Associator {
    ttt: Arc<dyn TravelTimeProvider>,
    phase_ranges: Vec<PhaseRange>,
}

impl Associator {
    pub fn new(ttt: Arc<dyn TravelTimeProvider>) -> Self {
        Self {
            ttt,
            phase_ranges: default_phase_ranges(),
        }
    }

    pub fn phase_ranges(&self) -> &[PhaseRange] {
        &self.phase_ranges
    }

    /// Range for a phase code, accepting `n` and `diff` variants of P and S
    pub fn find_phase_range(&self, code: &str) -> Option<&PhaseRange> {
        if let Some(pr) = self.phase_ranges.iter().find(|pr| pr.code == code) {
            return Some(pr);
        }
        self.phase_ranges.iter().find(|pr| {
            ["P", "S"].iter().any(|base| {
                let n = format!("{}n", base);
                let diff = format!("{}diff", base);
                (pr.code == *base && (code == n || code == diff))
                    || ((pr.code == n || pr.code == diff) && code == *base)
            })
        })
    }

    /// At most one association per origin for `pick`
    pub fn find_matching_origins<'a, I>(&self, pick: &Arc<Pick>, origins: I) -> Vec<Association>
    where
        I: IntoIterator<Item = &'a Origin>,
    {
        let Some(station) = &pick.station else {
            return Vec::new();
        };

        let mut associations = Vec::new();
        for origin in origins {
            let (delta, az, _) = geo::delazi(origin.lat, origin.lon, station.lat, station.lon);
            let tts = self
                .ttt
                .compute(origin.lat, origin.lon, origin.dep, station.lat, station.lon, 0.0);

            // imported origins accept anything
            let score = if origin.imported { 1000.0 } else { origin.score };

            for range in &self.phase_ranges {
                let is_p = range.code == "P";
                if score < if is_p { 20.0 } else { 50.0 } {
                    continue;
                }
                if !range.contains(delta, origin.dep) {
                    continue;
                }

                let (tt, x) = if is_p {
                    (traveltime::first_p(&tts, delta), residual_scale(delta))
                } else {
                    (traveltime::first_with_prefix(&tts, &range.code), 1.0)
                };
                let Some(tt) = tt else {
                    continue;
                };

                let mut residual = pick.time - (origin.time + tt.time);
                let affinity = if origin.imported {
                    if !(-20.0..=30.0).contains(&residual) {
                        continue;
                    }
                    1.0
                } else {
                    residual = residual / x / 10.0;
                    let affinity = avgfn(residual);
                    if affinity < MIN_AFFINITY {
                        continue;
                    }
                    affinity
                };

                let phase = if is_p && tt.time > 960.0 {
                    "PKP".to_string()
                } else {
                    range.code.clone()
                };
                associations.push(Association {
                    origin_id: origin.id,
                    pick: pick.clone(),
                    phase,
                    residual,
                    affinity,
                    distance: delta,
                    azimuth: az,
                });
                break;
            }
        }
        associations
    }

    /// Picks in the 1500 s after `origin` that fit one of its phases
    pub fn find_matching_picks<'a, I>(&self, origin: &Origin, picks: I) -> Vec<Association>
    where
        I: IntoIterator<Item = &'a Arc<Pick>>,
    {
        let mut associations = Vec::new();
        for pick in picks {
            if pick.time < origin.time || pick.time > origin.time + 1500.0 {
                continue;
            }
            if pick.is_automatic() && !pick.has_amplitude() {
                continue;
            }
            let Some(station) = &pick.station else {
                continue;
            };

            let (delta, az, _) = geo::delazi(origin.lat, origin.lon, station.lat, station.lon);
            let x = residual_scale(delta);
            let tts = self
                .ttt
                .compute(origin.lat, origin.lon, origin.dep, station.lat, station.lon, 0.0);

            for tt in &tts {
                let Some(range) = self.find_phase_range(&tt.phase) else {
                    continue;
                };
                if !range.contains(delta, origin.dep) {
                    continue;
                }
                let residual = (pick.time - (origin.time + tt.time)) / x / 10.0;
                let affinity = avgfn(residual);
                if affinity < MIN_AFFINITY {
                    continue;
                }
                associations.push(Association {
                    origin_id: origin.id,
                    pick: pick.clone(),
                    phase: range.code.clone(),
                    residual,
                    affinity,
                    distance: delta,
                    azimuth: az,
                });
                break;
            }
        }
        associations
    }
}
