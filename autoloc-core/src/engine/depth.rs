//! Depth policy
//!
//! **Responsibilities:**
//! - Choosing between manual, default and free depth during rework
//! - Testing whether the free depth is resolved by the station geometry

use super::core::Engine;
use crate::locator::DepthPolicy;
use crate::model::{DepthType, Origin};
use tracing::{debug, info, warn};

/// Kilometers per degree in the depth resolution rule
const KM_PER_DEGREE: f64 = 111.2;

impl Engine {
    /// Settle the depth of `origin` and return the policy for the
    /// relocations that follow in rework
    pub(super) fn apply_depth_policy(&self, origin: &mut Origin) -> DepthPolicy {
        if self.config.adopt_manual_depth
            && matches!(origin.depth_type, DepthType::ManuallyFixed | DepthType::Phases)
        {
            info!(origin = origin.id, "Adopting depth of {} km from manual origin", origin.dep);
            return DepthPolicy::Fixed(origin.dep);
        }

        let enforce_default = if self.is_sticky() {
            info!(origin = origin.id, "Enforcing default depth due to stickiness");
            true
        } else if self.epicenter_requires_default_depth(origin) && self.set_default_depth(origin) {
            info!(origin = origin.id, "Enforcing default depth due to epicenter location");
            true
        } else if self.set_the_right_depth(origin) {
            info!(origin = origin.id, "Enforcing default depth due to epicenter-station geometry");
            true
        } else {
            debug!(origin = origin.id, "Not fixing depth");
            false
        };

        if enforce_default {
            DepthPolicy::Fixed(self.config.default_depth)
        } else {
            DepthPolicy::Free
        }
    }

    /// Relocate at the default depth and flag the origin accordingly
    pub(super) fn set_default_depth(&self, origin: &mut Origin) -> bool {
        match self.relocate(origin, DepthPolicy::Fixed(self.config.default_depth)) {
            Some(relo) => {
                origin.update_from(&relo);
                origin.depth_type = DepthType::Default;
                true
            }
            None => {
                warn!(origin = origin.id, "Relocation at default depth failed");
                false
            }
        }
    }

    /// Decide between default and free depth from the station geometry
    ///
    /// Returns true if the default depth is to be enforced. Without at
    /// least two defining phases within five source depths, depth is
    /// considered unresolved and the default depth is preferred unless it
    /// makes the solution clearly worse.
    pub(super) fn set_the_right_depth(&self, origin: &mut Origin) -> bool {
        if !self.config.try_default_depth || origin.depth_type == DepthType::Phases {
            return false;
        }

        if origin.depth_type == DepthType::Default {
            let mut test = origin.clone();
            test.depth_type = DepthType::Free;
            let Some(relo) = self.relocate(&test, DepthPolicy::Free) else {
                warn!(origin = origin.id, "Relocation with free depth failed");
                return false;
            };
            let radius = 5.0 * relo.dep.max(self.config.default_depth) / KM_PER_DEGREE;
            if relo.defining_phase_count(0.0, radius) >= 2 {
                origin.update_from(&relo);
                return false;
            }
            if origin.dep != self.config.default_depth {
                self.set_default_depth(origin);
            }
            return true;
        }

        if origin.defining_phase_count(0.0, 5.0 * origin.dep / KM_PER_DEGREE) >= 2 {
            return false;
        }

        let mut test = origin.clone();
        if !self.set_default_depth(&mut test) {
            return false;
        }

        if self.config.default_depth_stickiness < 0.9 {
            let rms1 = origin.rms();
            let rms2 = test.rms();
            if rms2 > self.config.default_depth_rms_factor * rms1 && rms2 > self.config.good_rms {
                debug!(origin = origin.id, rms1, rms2, "Free depth kept (rms)");
                return false;
            }

            let score1 = self.update_score(origin);
            let score2 = self.update_score(&mut test);
            if score2 < self.config.default_depth_score_factor * score1 - self.config.default_depth_score_offset {
                debug!(origin = origin.id, score1, score2, "Free depth kept (score)");
                return false;
            }

            if origin.dep != test.dep {
                info!(
                    origin = origin.id,
                    "Changed depth from {:.1} to default of {:.1}   score: {:.1} -> {:.1}   rms: {:.1} -> {:.1}",
                    origin.dep,
                    test.dep,
                    score1,
                    score2,
                    rms1,
                    rms2
                );
            }
        }

        origin.update_from(&test);
        origin.depth_type = DepthType::Default;
        self.update_score(origin);
        true
    }

    /// Whether the free depth is constrained well enough to keep
    ///
    /// If not, `origin` is moved to the default depth.
    pub(super) fn depth_is_resolvable(&self, origin: &mut Origin) -> bool {
        if origin.depth_type == DepthType::Default && origin.dep != self.config.default_depth {
            origin.depth_type = DepthType::Free;
        }

        let mut test = origin.clone();
        test.depth_type = DepthType::Free;
        if let Some(relo) = self.relocate(&test, DepthPolicy::Free) {
            let error = relo.error;
            if error.sdepth > 0.0 && (error.sdepth < 15.0 * error.stime || error.sdepth < 0.7 * relo.dep) {
                return true;
            }
        }

        let mut test = origin.clone();
        test.dep = self.config.default_depth;
        let Some(mut relo) = self.relocate(&test, DepthPolicy::Fixed(self.config.default_depth)) else {
            return true;
        };

        let score1 = self.update_score(origin);
        let score2 = self.update_score(&mut relo);
        if score2 < 0.8 * score1 {
            return true;
        }

        if origin.dep != relo.dep {
            info!(
                origin = origin.id,
                "Changed depth from {:.1} to default of {:.1}   score: {:.1} -> {:.1}",
                origin.dep,
                relo.dep,
                score1,
                score2
            );
        }
        origin.update_from(&relo);
        origin.depth_type = DepthType::Default;
        self.update_score(origin);
        false
    }

    /// Region predicate installed with [`Engine::set_depth_region`]
    pub(super) fn epicenter_requires_default_depth(&self, origin: &Origin) -> bool {
        self.depth_region.as_ref().is_some_and(|region| region(origin))
    }
}
