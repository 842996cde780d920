//! Constant-velocity sphere travel times
//!
//! Rays are straight chords through a homogeneous sphere. Four phases are
//! predicted: P, S and the surface reflections pP and sP.

use crate::traveltime::{TravelTime, TravelTimeProvider};
use autoloc_common::geo;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Homogeneous-sphere travel-time model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomogeneousModel {
    /// P velocity (km/s)
    pub vp: f64,
    /// S velocity (km/s)
    pub vs: f64,
}

impl Default for HomogeneousModel {
    fn default() -> Self {
        Self { vp: 6.0, vs: 3.5 }
    }
}

impl HomogeneousModel {
    pub fn new(vp: f64, vs: f64) -> Self {
        Self { vp, vs }
    }

    /// P travel time for a source at `depth` km, `delta` degrees away
    pub fn p_time(&self, delta: f64, depth: f64) -> f64 {
        chord(EARTH_RADIUS_KM - depth, EARTH_RADIUS_KM, delta) / self.vp
    }
}

/// Straight-line distance between two points at radii `r1`, `r2` separated
/// by `delta` degrees
fn chord(r1: f64, r2: f64, delta: f64) -> f64 {
    let d = delta.to_radians();
    (r1 * r1 + r2 * r2 - 2.0 * r1 * r2 * d.cos()).max(0.0).sqrt()
}

impl TravelTimeProvider for HomogeneousModel {
    fn compute(
        &self,
        lat: f64,
        lon: f64,
        depth: f64,
        rlat: f64,
        rlon: f64,
        ralt: f64,
    ) -> Vec<TravelTime> {
        let (delta, _, _) = geo::delazi(lat, lon, rlat, rlon);
        let d = delta.to_radians();
        let r1 = EARTH_RADIUS_KM - depth;
        let r2 = EARTH_RADIUS_KM + ralt / 1000.0;

        let c = chord(r1, r2, delta).max(1e-6);
        let dcdd = r1 * r2 * d.sin() / c * std::f64::consts::PI / 180.0;
        let dcdh = -(r1 - r2 * d.cos()) / c;

        let mut tts = vec![
            TravelTime {
                phase: "P".to_string(),
                time: c / self.vp,
                dtdd: dcdd / self.vp,
                dtdh: dcdh / self.vp,
            },
            TravelTime {
                phase: "S".to_string(),
                time: c / self.vs,
                dtdd: dcdd / self.vs,
                dtdh: dcdh / self.vs,
            },
        ];

        if depth > 0.0 {
            // mirror source above the free surface
            let ri = EARTH_RADIUS_KM + depth;
            let ci = chord(ri, r2, delta).max(1e-6);
            let dcidd = ri * r2 * d.sin() / ci * std::f64::consts::PI / 180.0;
            let dcidh = (ri - r2 * d.cos()) / ci;
            let pp = ci / self.vp;
            tts.push(TravelTime {
                phase: "pP".to_string(),
                time: pp,
                dtdd: dcidd / self.vp,
                dtdh: dcidh / self.vp,
            });
            tts.push(TravelTime {
                phase: "sP".to_string(),
                time: pp + depth * (1.0 / self.vs - 1.0 / self.vp),
                dtdd: dcidd / self.vp,
                dtdh: dcidh / self.vp + (1.0 / self.vs - 1.0 / self.vp),
            });
        }

        tts.sort_by(|a, b| a.time.total_cmp(&b.time));
        tts
    }

    fn phases(&self) -> Vec<String> {
        ["P", "pP", "sP", "S"].iter().map(|s| s.to_string()).collect()
    }
}
