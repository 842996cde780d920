//! Origins (hypocenter, time and arrivals)

use super::arrival::{is_depth_phase, Arrival, Exclusion};
use autoloc_common::{geo, time::format_time, Time};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type OriginId = u64;

/// How the depth of an origin was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthType {
    #[default]
    Free,
    /// Constrained by depth phases
    Phases,
    /// Held at the minimum depth
    Minimum,
    /// Held at the configured default depth
    Default,
    /// Fixed by an analyst
    ManuallyFixed,
}

impl DepthType {
    /// One-letter flag used in origin printouts
    pub fn flag(self) -> char {
        match self {
            DepthType::Free | DepthType::Minimum => ' ',
            DepthType::Phases => 'p',
            DepthType::Default => 'd',
            DepthType::ManuallyFixed => 'f',
        }
    }

    /// Depth stays fixed on relocation
    pub fn keeps_depth(self) -> bool {
        matches!(self, DepthType::Default | DepthType::ManuallyFixed)
    }
}

/// Azimuthal coverage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OriginQuality {
    pub azi_gap_primary: f64,
    pub azi_gap_secondary: f64,
}

impl Default for OriginQuality {
    fn default() -> Self {
        Self {
            azi_gap_primary: 360.0,
            azi_gap_secondary: 360.0,
        }
    }
}

/// Location uncertainties
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OriginError {
    /// Latitude error (km)
    pub slat: f64,
    /// Longitude error (km)
    pub slon: f64,
    /// Depth error (km)
    pub sdepth: f64,
    /// Origin time error (s)
    pub stime: f64,
}

/// Candidate or confirmed seismic event
#[derive(Debug, Clone)]
pub struct Origin {
    pub id: OriginId,
    pub lat: f64,
    pub lon: f64,
    /// Depth (km)
    pub dep: f64,
    pub time: Time,
    pub depth_type: DepthType,
    pub arrivals: Vec<Arrival>,
    pub score: f64,
    pub quality: OriginQuality,
    pub error: OriginError,
    /// Published before reaching the minimum phase count (XXL)
    pub preliminary: bool,
    /// Supplied by another agency; only used for passive association
    pub imported: bool,
    /// Location status manual (from an analyst) rather than automatic
    pub manual: bool,
    pub agency: String,
    pub author: String,
    /// Time of the last publication of this version
    pub timestamp: Time,
}

impl Origin {
    pub fn new(lat: f64, lon: f64, dep: f64, time: Time) -> Self {
        Self {
            id: 0,
            lat,
            lon,
            dep,
            time,
            depth_type: DepthType::Free,
            arrivals: Vec::new(),
            score: 0.0,
            quality: OriginQuality::default(),
            error: OriginError::default(),
            preliminary: false,
            imported: false,
            manual: false,
            agency: String::new(),
            author: String::new(),
            timestamp: 0.0,
        }
    }

    /// Index of the arrival for a pick
    pub fn find_arrival(&self, pick_id: &str) -> Option<usize> {
        self.arrivals.iter().position(|a| a.pick.id == pick_id)
    }

    pub fn has_pick(&self, pick_id: &str) -> bool {
        self.find_arrival(pick_id).is_some()
    }

    /// Add an arrival unless its pick is already present
    pub fn add(&mut self, arrival: Arrival) -> bool {
        if self.has_pick(&arrival.pick.id) {
            tracing::warn!(pick = %arrival.pick.id, "Pick already present, not added");
            return false;
        }
        self.arrivals.push(arrival);
        true
    }

    /// Take over everything but the identifier
    pub fn update_from(&mut self, other: &Origin) {
        let id = self.id;
        *self = other.clone();
        self.id = id;
    }

    /// Sort arrivals by distance, then pick time
    pub fn sort_arrivals(&mut self) {
        self.arrivals.sort_by(|a, b| a.order(b));
    }

    /// Recompute distance and azimuth of every arrival from the hypocenter
    pub fn update_geometry(&mut self) {
        let (lat, lon) = (self.lat, self.lon);
        for arr in &mut self.arrivals {
            if let Some(sta) = &arr.pick.station {
                let (delta, az, _) = geo::delazi(lat, lon, sta.lat, sta.lon);
                arr.distance = delta;
                arr.azimuth = az;
            }
        }
    }

    /// Arrivals that count, plus PKP arrivals even if excluded
    pub fn phase_count(&self) -> usize {
        self.arrivals
            .iter()
            .filter(|a| !a.is_excluded() || a.phase == "PKP")
            .count()
    }

    /// Defining arrivals at any distance
    pub fn defining_count(&self) -> usize {
        self.arrivals.iter().filter(|a| !a.is_excluded()).count()
    }

    /// Defining arrivals with distance in `[dmin, dmax]`
    pub fn defining_phase_count(&self, dmin: f64, dmax: f64) -> usize {
        let all = dmin <= 0.0 && dmax >= 180.0;
        self.arrivals
            .iter()
            .filter(|a| !a.is_excluded())
            .filter(|a| all || (a.distance >= dmin && a.distance <= dmax))
            .count()
    }

    /// Distinct stations with defining arrivals
    pub fn defining_station_count(&self) -> usize {
        self.arrivals
            .iter()
            .filter(|a| !a.is_excluded())
            .map(|a| a.pick.station_key())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Distinct stations with any arrival
    pub fn associated_station_count(&self) -> usize {
        self.arrivals
            .iter()
            .map(|a| a.pick.station_key())
            .collect::<HashSet<_>>()
            .len()
    }

    /// RMS of the defining residuals; 0 for imported origins
    pub fn rms(&self) -> f64 {
        if self.imported {
            return 0.0;
        }
        let res: Vec<f64> = self
            .arrivals
            .iter()
            .filter(|a| !a.is_excluded())
            .map(|a| a.residual)
            .collect();
        if res.is_empty() {
            return 0.0;
        }
        (res.iter().map(|r| r * r).sum::<f64>() / res.len() as f64).sqrt()
    }

    /// Median distance of the defining arrivals
    pub fn median_station_distance(&self) -> Option<f64> {
        let mut d: Vec<f64> = self
            .arrivals
            .iter()
            .filter(|a| !a.is_excluded())
            .map(|a| a.distance)
            .collect();
        if d.is_empty() {
            return None;
        }
        d.sort_by(|a, b| a.total_cmp(b));
        let n = d.len();
        Some(if n % 2 == 1 {
            d[n / 2]
        } else {
            0.5 * (d[n / 2 - 1] + d[n / 2])
        })
    }

    /// Azimuths of the defining arrivals
    pub fn defining_azimuths(&self) -> Vec<f64> {
        self.arrivals
            .iter()
            .filter(|a| !a.is_excluded())
            .map(|a| a.azimuth)
            .collect()
    }

    /// Defining depth phases (pP, sP)
    pub fn depth_phase_count(&self) -> usize {
        self.arrivals
            .iter()
            .filter(|a| !a.is_excluded() && is_depth_phase(&a.phase))
            .count()
    }

    /// Picks shared with another origin
    pub fn common_pick_count(&self, other: &Origin) -> usize {
        self.arrivals
            .iter()
            .filter(|a| other.has_pick(&a.pick.id))
            .count()
    }

    /// Index of a P/PKP arrival from the given station
    pub fn find_station_p(&self, net: &str, sta: &str) -> Option<usize> {
        self.arrivals
            .iter()
            .position(|a| a.pick.net == net && a.pick.sta == sta && a.is_p_or_pkp())
    }

    /// Mark every arrival with the given reason
    pub fn exclude_where<F>(&mut self, reason: Exclusion, pred: F) -> usize
    where
        F: Fn(&Arrival) -> bool,
    {
        let mut count = 0;
        for arr in self.arrivals.iter_mut() {
            if pred(arr) {
                arr.excluded = reason;
                count += 1;
            }
        }
        count
    }

    /// One-line summary
    ///
    /// `id time lat lon depth[flag] rms defining/arrivals score`
    pub fn one_liner(&self) -> String {
        format!(
            "{:>6} {} {:6.2} {:7.2} {:3.0}{} {:5.2} {:3}/{:<3} {:5.1}",
            self.id,
            format_time(self.time),
            self.lat,
            self.lon,
            self.dep,
            self.depth_type.flag(),
            self.rms(),
            self.defining_count(),
            self.arrivals.len(),
            self.score
        )
    }

    /// Multi-line printout with one row per arrival
    pub fn printout(&self) -> String {
        let mut out = self.one_liner();
        for arr in &self.arrivals {
            out.push_str(&format!(
                "\n    {:<12} {:<6} {:<6} {:<4} {} {:6.1} {:5.1} {:6.1} {} {:5.2} {:5.2} {:5.2} {:5.2}",
                arr.pick.id,
                arr.pick.net,
                arr.pick.sta,
                arr.phase,
                arr.pick.status_flag(),
                arr.distance,
                arr.azimuth,
                arr.residual,
                arr.excluded.flag(),
                arr.affinity,
                arr.tscore,
                arr.ascore,
                arr.score
            ));
        }
        out
    }
}
