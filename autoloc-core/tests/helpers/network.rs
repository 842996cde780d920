//! Synthetic seismic network
//!
//! Stations on a ring around a known epicenter, with exact P arrival times
//! from the homogeneous reference model. Locations computed from these
//! picks recover the epicenter to solver precision.

use autoloc_common::{geo, AutolocConfig, Time};
use autoloc_core::model::{Pick, PickMode};
use autoloc_core::nucleator::GridPoint;
use autoloc_core::reference::{GaussNewtonSolver, HomogeneousModel};
use autoloc_core::sink::VecSink;
use autoloc_core::stations::{StationConfigTable, StationLocation, StationLocationFile};
use autoloc_core::{Collaborators, Engine};
use std::sync::Arc;

pub const ORIGIN_TIME: Time = 1_700_000_000.0;
pub const EPICENTER: (f64, f64) = (-7.5, 110.0);
pub const DEPTH: f64 = 10.0;

/// Amplitude and SNR of picks that pass every filter comfortably
pub const STRONG: (f64, f64) = (20_000.0, 50.0);

#[derive(Debug, Clone)]
pub struct Network {
    pub lat: f64,
    pub lon: f64,
    pub depth: f64,
    pub origin_time: Time,
    pub stations: Vec<StationLocation>,
    model: HomogeneousModel,
}

impl Network {
    /// `n` stations between 2 and 5 degrees from the epicenter, evenly
    /// spread in azimuth
    pub fn regional(n: usize) -> Self {
        Self::ring(n, 2.0, 5.0)
    }

    pub fn ring(n: usize, dmin: f64, dmax: f64) -> Self {
        let (lat, lon) = EPICENTER;
        let stations = (0..n)
            .map(|i| {
                let delta = dmin + (dmax - dmin) * i as f64 / (n.max(2) - 1) as f64;
                let az = 15.0 + 360.0 * i as f64 / n as f64;
                let (slat, slon) = geo::destination(lat, lon, delta, az);
                StationLocation {
                    net: "XX".to_string(),
                    sta: format!("S{:02}", i + 1),
                    lat: slat,
                    lon: slon,
                    alt: 0.0,
                }
            })
            .collect();
        Self {
            lat,
            lon,
            depth: DEPTH,
            origin_time: ORIGIN_TIME,
            stations,
            model: HomogeneousModel::default(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        let model = Arc::new(self.model);
        Collaborators {
            travel_times: model.clone(),
            solver: Arc::new(GaussNewtonSolver::new(model)),
            stations: Arc::new(StationLocationFile::from_locations(self.stations.clone())),
        }
    }

    pub fn distance(&self, i: usize) -> f64 {
        let s = &self.stations[i];
        geo::delazi(self.lat, self.lon, s.lat, s.lon).0
    }

    /// Exact P arrival time at station `i`
    pub fn p_time(&self, i: usize) -> Time {
        self.origin_time + self.model.p_time(self.distance(i), self.depth)
    }

    /// Automatic P pick at station `i`
    pub fn pick(&self, i: usize, amp: f64, snr: f64) -> Pick {
        let s = &self.stations[i];
        Pick::new(&format!("{}.{}.P", s.net, s.sta), &s.net, &s.sta, self.p_time(i)).with_amplitudes(amp, snr)
    }

    /// Strong automatic picks at every station, in arrival order
    pub fn picks(&self) -> Vec<Pick> {
        let (amp, snr) = STRONG;
        let mut picks: Vec<Pick> = (0..self.stations.len()).map(|i| self.pick(i, amp, snr)).collect();
        picks.sort_by(|a, b| a.time.total_cmp(&b.time));
        picks
    }

    /// Manual P pick at station `i`, `offset` seconds after the exact time
    pub fn manual_pick(&self, i: usize, offset: f64) -> Pick {
        let s = &self.stations[i];
        Pick::new(&format!("{}.{}.P.manual", s.net, s.sta), &s.net, &s.sta, self.p_time(i) + offset)
            .with_mode(PickMode::Manual)
    }

    /// Grid node at the true hypocenter
    pub fn grid(&self, nmin: usize) -> Vec<GridPoint> {
        let mut gp = GridPoint::new(self.lat, self.lon, self.depth);
        gp.nmin = nmin;
        vec![gp]
    }
}

/// Offline configuration for small synthetic networks
pub fn test_config() -> AutolocConfig {
    AutolocConfig {
        offline: true,
        min_phase_count: 4,
        ..AutolocConfig::default()
    }
}

/// Engine over `network` with a collecting sink
pub fn build_engine(network: &Network, config: AutolocConfig, grid: Vec<GridPoint>) -> (Engine, VecSink) {
    let station_config = StationConfigTable::new(config.default_max_nuc_dist);
    let mut engine = Engine::new(config, network.collaborators(), station_config, grid).unwrap();
    let sink = VecSink::new();
    engine.set_sink(sink.clone());
    (engine, sink)
}
