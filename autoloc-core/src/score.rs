//! Origin score
//!
//! The score is a sum of per-arrival contributions, each the product of a
//! time, distance, amplitude and phase factor, scaled by a slight preference
//! for shallow sources.

use crate::model::{Exclusion, Origin};

/// Squared cosine taper, 1 at 0 and 0 outside `[-1, 1]`
pub fn avgfn(x: f64) -> f64 {
    if !(-1.0..=1.0).contains(&x) {
        return 0.0;
    }
    let c = (x * std::f64::consts::FRAC_PI_2).cos();
    c * c
}

/// Like [`avgfn`] but flat for `|x| < 0.2`
pub fn avgfn2(x: f64) -> f64 {
    const PLATEAU: f64 = 0.2;
    if !(-1.0..=1.0).contains(&x) {
        return 0.0;
    }
    if x.abs() < PLATEAU {
        return 1.0;
    }
    let x = (x - PLATEAU.copysign(x)) / (1.0 - PLATEAU);
    let c = 0.5 * ((x * std::f64::consts::PI).cos() + 1.0);
    c * c
}

/// Straight-line preference for shallower sources
pub fn depth_factor(depth: f64) -> f64 {
    1.0 + 0.0005 * (200.0 - depth)
}

/// Score an origin and store the per-arrival components on its arrivals
///
/// Arrivals are sorted by distance first; the amplitude cap depends on
/// that order.
pub fn origin_score(origin: &mut Origin, max_rms: f64, network_size_km: f64) -> f64 {
    origin.sort_arrivals();

    let mut score = 0.0;
    let mut ampl_score_max: f64 = 0.0;
    for (i, arr) in origin.arrivals.iter_mut().enumerate() {
        let pick = arr.pick.clone();
        let Some(station) = &pick.station else {
            continue;
        };

        arr.score = 0.0;
        arr.ascore = 0.0;
        arr.dscore = 0.0;
        arr.tscore = 0.0;

        let mut snr = pick.snr.max(3.0);
        if snr > 1.0e7 {
            continue;
        }
        snr = snr.min(100.0);
        if pick.is_manual() && pick.snr <= 0.0 {
            snr = 10.0;
        }

        let mut normamp = pick.normamp;
        if pick.is_manual() && normamp <= 0.0 {
            normamp = 1.0;
        }
        if normamp <= 0.0 {
            continue;
        }

        let d = arr.distance;
        let r = if network_size_km <= 0.0 {
            station.max_nuc_dist
        } else {
            0.5 * network_size_km / 111.195
        };
        let dist_score = 1.5 * (-d * d / (r * r)).exp();

        // A sudden big amplitude at large distance must not inflate the score
        let mut ampl_score = (1.0 + 0.8 * (1.0 + 0.5 * normamp.log10())).max(1.0);
        if ampl_score_max == 0.0 {
            ampl_score_max = ampl_score;
        } else {
            if i > 2 && ampl_score > ampl_score_max + 0.4 {
                ampl_score = ampl_score_max + 0.4;
            }
            ampl_score_max = ampl_score_max.max(ampl_score);
        }
        ampl_score *= snr.log10();

        let time_score = avgfn2(arr.residual / (2.0 * max_rms));

        arr.dscore = dist_score;
        arr.ascore = ampl_score;
        arr.tscore = time_score;

        let phase_score = match arr.excluded {
            Exclusion::NotExcluded => 1.0,
            Exclusion::UnusedPhase if arr.phase.starts_with("PKP") => 0.3,
            Exclusion::UnusedPhase => 0.1,
            _ => continue,
        };

        arr.score = phase_score * time_score * dist_score * ampl_score;
        score += arr.score;
    }

    score * depth_factor(origin.dep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Arrival, Pick, PickMode, Station};
    use std::sync::Arc;

    fn origin(n: usize, residual: f64) -> Origin {
        let mut origin = Origin::new(0.0, 0.0, 10.0, 0.0);
        for i in 0..n {
            let code = format!("S{:02}", i);
            let mut pick = Pick::new(&format!("p{}", i), "XX", &code, 100.0).with_amplitudes(2000.0, 20.0);
            pick.normamp = 1.0;
            pick.station = Some(Arc::new(Station::new("XX", &code, 0.0, 1.0 + i as f64, 0.0)));
            let mut arr = Arrival::new(Arc::new(pick), "P", residual);
            arr.distance = 1.0 + i as f64;
            origin.add(arr);
        }
        origin
    }

    #[test]
    fn test_avgfn_shapes() {
        assert_eq!(avgfn(0.0), 1.0);
        assert!(avgfn(1.0) < 1e-12);
        assert_eq!(avgfn(1.5), 0.0);
        assert_eq!(avgfn2(0.1), 1.0);
        assert_eq!(avgfn2(-0.19), 1.0);
        assert!((avgfn2(0.6) - 0.25).abs() < 1e-12);
        assert!(avgfn2(1.0) < 1e-12);
        assert_eq!(avgfn2(-1.1), 0.0);
    }

    #[test]
    fn test_score_grows_with_phase_count() {
        let mut small = origin(4, 0.0);
        let mut large = origin(8, 0.0);
        assert!(origin_score(&mut large, 3.5, 0.0) > origin_score(&mut small, 3.5, 0.0));
    }

    #[test]
    fn test_score_drops_with_residuals() {
        let mut good = origin(6, 0.5);
        let mut bad = origin(6, 4.0);
        assert!(origin_score(&mut good, 3.5, 0.0) > origin_score(&mut bad, 3.5, 0.0));
    }

    #[test]
    fn test_excluded_arrivals_do_not_count() {
        let mut full = origin(6, 0.0);
        let base = origin_score(&mut full, 3.5, 0.0);

        let mut excl = origin(6, 0.0);
        excl.arrivals[5].excluded = Exclusion::LargeResidual;
        let without = origin_score(&mut excl, 3.5, 0.0);
        assert!(without < base);
        assert_eq!(excl.arrivals[5].score, 0.0);

        let mut unused = origin(6, 0.0);
        unused.arrivals[5].excluded = Exclusion::UnusedPhase;
        unused.arrivals[5].phase = "PKP".to_string();
        let pkp = origin_score(&mut unused, 3.5, 0.0);
        assert!(pkp > without && pkp < base);
    }

    #[test]
    fn test_manual_pick_defaults() {
        let mut o = origin(1, 0.0);
        let mut pick = (*o.arrivals[0].pick).clone().with_mode(PickMode::Manual);
        pick.snr = 0.0;
        pick.normamp = 0.0;
        o.arrivals[0].pick = Arc::new(pick);
        let s = origin_score(&mut o, 3.5, 0.0);
        assert!(s > 0.0);
        assert!((o.arrivals[0].ascore - 1.8).abs() < 1e-9);
    }

    #[test]
    fn test_network_size_narrows_distance_term() {
        let mut wide = origin(4, 0.0);
        let mut narrow = origin(4, 0.0);
        let s_wide = origin_score(&mut wide, 3.5, 0.0);
        let s_narrow = origin_score(&mut narrow, 3.5, 200.0);
        assert!(s_narrow < s_wide);
    }
}
