//! Pick-to-origin associations

use super::pick::Pick;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Why an arrival does not contribute to the solution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    #[default]
    NotExcluded,
    LargeResidual,
    StationDistance,
    ManuallyExcluded,
    UnusedPhase,
    DeterioratesSolution,
    TemporarilyExcluded,
}

impl Exclusion {
    pub fn is_excluded(self) -> bool {
        self != Exclusion::NotExcluded
    }

    /// Two-letter flag used in origin printouts
    pub fn flag(self) -> &'static str {
        match self {
            Exclusion::NotExcluded => "  ",
            Exclusion::LargeResidual => "Xr",
            Exclusion::StationDistance => "Xd",
            Exclusion::ManuallyExcluded => "Xm",
            Exclusion::UnusedPhase => "Xp",
            Exclusion::DeterioratesSolution => "X!",
            Exclusion::TemporarilyExcluded => "Xt",
        }
    }
}

/// Binding of one pick to one origin
#[derive(Debug, Clone)]
pub struct Arrival {
    pub pick: Arc<Pick>,
    pub phase: String,
    /// Observed minus predicted time (s)
    pub residual: f64,
    /// Epicentral distance (degrees)
    pub distance: f64,
    /// Source-to-station azimuth (degrees)
    pub azimuth: f64,
    pub affinity: f64,
    pub score: f64,
    pub dscore: f64,
    pub ascore: f64,
    pub tscore: f64,
    pub excluded: Exclusion,
}

impl Arrival {
    pub fn new(pick: Arc<Pick>, phase: &str, residual: f64) -> Self {
        Self {
            pick,
            phase: phase.to_string(),
            residual,
            distance: 0.0,
            azimuth: 0.0,
            affinity: 0.0,
            score: 0.0,
            dscore: 0.0,
            ascore: 0.0,
            tscore: 0.0,
            excluded: Exclusion::NotExcluded,
        }
    }

    pub fn with_affinity(mut self, affinity: f64) -> Self {
        self.affinity = affinity;
        self
    }

    pub fn is_excluded(&self) -> bool {
        self.excluded.is_excluded()
    }

    /// Solution weight: 1 for defining arrivals, 0 otherwise
    pub fn weight(&self) -> f64 {
        if self.is_excluded() {
            0.0
        } else {
            1.0
        }
    }

    /// P or PKP
    pub fn is_p_or_pkp(&self) -> bool {
        self.phase == "P" || self.phase == "PKP"
    }

    /// Ordering by distance, then pick time
    pub fn order(&self, other: &Arrival) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.pick.time.total_cmp(&other.pick.time))
    }
}

/// Phase belongs to the P family used for the upper residual widening
pub fn is_p_family(phase: &str) -> bool {
    matches!(phase, "P" | "Pn" | "Pg" | "Pb")
}

/// Phase belongs to the core-phase family
pub fn is_pkp_family(phase: &str) -> bool {
    matches!(phase, "PKP" | "PKPab" | "PKPdf" | "PKiKP")
}

/// Depth phases
pub fn is_depth_phase(phase: &str) -> bool {
    matches!(phase, "pP" | "sP")
}
