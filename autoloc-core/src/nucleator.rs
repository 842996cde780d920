//! Grid-search nucleator
//!
//! Every grid point back-projects incoming picks to hypothetical origin
//! times using the first-P travel time from the point to the station. A
//! tight cluster of projected times that includes the new pick becomes a
//! candidate origin. Candidates from all points are deduplicated by pick
//! set, relocated with depth fixed at the node depth, and the best one is
//! relocated once more with free depth.

use crate::locator::{DepthPolicy, Relocator};
use crate::model::{Arrival, Exclusion, Origin, Pick, PickId, StationRef};
use crate::score::origin_score;
use crate::traveltime::{self, TravelTimeProvider};
use autoloc_common::{geo, Error, Result, Time};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Clustering tolerance added to the slowness term (s)
const CLUSTER_DT0: f64 = 4.0;

/// Station as seen from one grid point
#[derive(Debug, Clone)]
struct StationWrapper {
    distance: f64,
    azimuth: f64,
    /// First-P travel time (s)
    ttime: f64,
    /// Horizontal slowness (s/deg)
    hslow: f64,
}

/// A pick back-projected to a grid point
#[derive(Debug, Clone)]
struct ProjectedPick {
    pick: Arc<Pick>,
    station: String,
    time: Time,
}

/// One trial hypocenter
#[derive(Debug, Clone)]
pub struct GridPoint {
    pub lat: f64,
    pub lon: f64,
    pub dep: f64,
    /// Cluster radius (degrees)
    pub radius: f64,
    /// Half-width of the projected-time window (s)
    pub dt: f64,
    pub max_sta_dist: f64,
    pub nmin: usize,
    wrappers: HashMap<String, StationWrapper>,
    /// Sorted by projected time
    picks: Vec<ProjectedPick>,
}

impl GridPoint {
    pub fn new(lat: f64, lon: f64, dep: f64) -> Self {
        Self {
            lat,
            lon,
            dep,
            radius: 4.0,
            dt: 50.0,
            max_sta_dist: 180.0,
            nmin: 6,
            wrappers: HashMap::new(),
            picks: Vec::new(),
        }
    }

    /// Register a station unless it is beyond its nucleation distance
    fn setup_station(&mut self, station: &StationRef, ttt: &dyn TravelTimeProvider) -> bool {
        let (delta, az, _) = geo::delazi(self.lat, self.lon, station.lat, station.lon);
        if delta > station.max_nuc_dist {
            return false;
        }
        let tts = ttt.compute(self.lat, self.lon, self.dep, station.lat, station.lon, 0.0);
        let Some(tt) = traveltime::first_p(&tts, delta) else {
            return false;
        };
        self.wrappers.insert(
            station.key(),
            StationWrapper {
                distance: delta,
                azimuth: az,
                ttime: tt.time,
                hslow: tt.dtdd,
            },
        );
        true
    }

    /// Feed a pick and return a candidate origin if it completes a cluster
    fn feed(&mut self, pick: &Arc<Pick>) -> Option<Origin> {
        let station = pick.station.as_ref()?;
        let key = station.key();
        let wrapper = self.wrappers.get(&key)?;
        if wrapper.distance > self.max_sta_dist || wrapper.distance > station.max_nuc_dist {
            return None;
        }

        let projected = pick.time - wrapper.ttime;
        let at = self.picks.partition_point(|pp| pp.time <= projected);
        self.picks.insert(
            at,
            ProjectedPick {
                pick: pick.clone(),
                station: key,
                time: projected,
            },
        );

        let lower = self.picks.partition_point(|pp| pp.time < projected - self.dt);
        let upper = self.picks.partition_point(|pp| pp.time <= projected + self.dt);
        let pps = &self.picks[lower..upper];
        let npick = pps.len();
        if npick < self.nmin {
            return None;
        }

        let mut cnt = vec![0usize; npick];
        let mut flg = vec![false; npick];
        for i in 0..npick {
            let wi = &self.wrappers[&pps[i].station];
            for k in i..npick {
                let wk = &self.wrappers[&pps[k].station];
                let azi_diff = (((wk.azimuth - wi.azimuth) + 180.0) % 360.0 - 180.0).abs();
                let dtmax = self.radius * (wi.hslow + wk.hslow) * azi_diff / 90.0 + CLUSTER_DT0;
                if (pps[i].time - pps[k].time).abs() < dtmax {
                    cnt[i] += 1;
                    cnt[k] += 1;
                    if pps[i].pick.id == pick.id || pps[k].pick.id == pick.id {
                        flg[i] = true;
                        flg[k] = true;
                    }
                }
            }
        }

        if flg.iter().filter(|f| **f).count() < self.nmin {
            return None;
        }

        let mut cntmax = 0;
        let mut otime = projected;
        for i in (0..npick).filter(|i| flg[*i]) {
            if cnt[i] > cntmax {
                cntmax = cnt[i];
                otime = pps[i].time;
            }
        }

        let mut origin = Origin::new(self.lat, self.lon, self.dep, otime);
        let mut stations = HashSet::new();
        for pp in (0..npick).filter(|i| flg[*i]).map(|i| &pps[i]) {
            if !stations.insert(pp.station.as_str()) {
                continue;
            }
            let sw = &self.wrappers[&pp.station];
            let phase = if pp.pick.time - otime < 960.0 { "P" } else { "PKP" };
            let mut arr = Arrival::new(pp.pick.clone(), phase, pp.time - otime);
            arr.distance = sw.distance;
            arr.azimuth = sw.azimuth;
            origin.arrivals.push(arr);
        }

        if origin.arrivals.len() < self.nmin {
            return None;
        }
        Some(origin)
    }

    /// Drop projected picks up to `min_time`
    fn cleanup(&mut self, min_time: Time) -> usize {
        let upper = self.picks.partition_point(|pp| pp.time <= min_time);
        self.picks.drain(..upper);
        upper
    }

    pub fn projected_pick_count(&self) -> usize {
        self.picks.len()
    }
}

/// Bounds and node parameters for a generated grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    /// Node spacing (degrees of arc)
    pub spacing: f64,
    pub depth: f64,
    pub radius: f64,
    pub max_sta_dist: f64,
    pub nmin: usize,
}

impl GridSpec {
    /// Whole-Earth grid at the given spacing
    pub fn global(spacing: f64) -> Self {
        Self {
            lat_min: -90.0,
            lat_max: 90.0,
            lon_min: -180.0,
            lon_max: 180.0,
            spacing,
            depth: 10.0,
            radius: spacing,
            max_sta_dist: 180.0,
            nmin: 6,
        }
    }

    /// Roughly equidistant nodes: the longitude step widens toward the poles
    pub fn generate(&self) -> Vec<GridPoint> {
        let mut grid = Vec::new();
        if self.spacing <= 0.0 {
            return grid;
        }
        let mut lat = self.lat_min;
        while lat <= self.lat_max + 1e-9 {
            let coslat = lat.to_radians().cos();
            let dlon = if coslat > 1e-3 {
                (self.spacing / coslat).min(360.0)
            } else {
                360.0
            };
            let mut lon = self.lon_min;
            // a closed longitude circle must not get its seam node twice
            let lon_end = if self.lon_max - self.lon_min >= 360.0 {
                self.lon_max - dlon * 0.5
            } else {
                self.lon_max + 1e-9
            };
            while lon <= lon_end {
                let mut gp = GridPoint::new(lat, lon, self.depth);
                gp.radius = self.radius;
                gp.max_sta_dist = self.max_sta_dist;
                gp.nmin = self.nmin;
                grid.push(gp);
                lon += dlon;
            }
            lat += self.spacing;
        }
        grid
    }
}

/// Parse a grid file: `lat lon depth radius maxStationDistance minPickCount`
pub fn parse_grid(content: &str) -> Result<Vec<GridPoint>> {
    let mut grid = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            return Err(Error::Parse {
                line: i + 1,
                reason: format!("expected 6 fields, found {}", fields.len()),
            });
        }
        let mut values = [0.0; 5];
        for (v, field) in values.iter_mut().zip(&fields[..5]) {
            *v = field.parse().map_err(|_| Error::Parse {
                line: i + 1,
                reason: format!("invalid number: {}", field),
            })?;
        }
        let nmin = fields[5].parse::<usize>().map_err(|_| Error::Parse {
            line: i + 1,
            reason: format!("invalid pick count: {}", fields[5]),
        })?;
        let mut gp = GridPoint::new(values[0], values[1], values[2]);
        gp.radius = values[3];
        gp.max_sta_dist = values[4];
        gp.nmin = nmin;
        grid.push(gp);
    }
    Ok(grid)
}

/// Read and parse a grid file
pub fn load_grid(path: &Path) -> Result<Vec<GridPoint>> {
    let content = std::fs::read_to_string(path)?;
    let grid = parse_grid(&content)?;
    info!("Read {} grid points from {}", grid.len(), path.display());
    Ok(grid)
}

/// Grid search over all points
pub struct GridSearch {
    grid: Vec<GridPoint>,
    configured: HashSet<String>,
    /// Picks already projected, with their times
    fed: HashMap<PickId, Time>,
    ttt: Arc<dyn TravelTimeProvider>,
    relocator: Relocator,
    max_rms: f64,
    network_size_km: f64,
}

impl GridSearch {
    pub fn new(
        grid: Vec<GridPoint>,
        ttt: Arc<dyn TravelTimeProvider>,
        relocator: Relocator,
        max_rms: f64,
        network_size_km: f64,
    ) -> Self {
        Self {
            grid,
            configured: HashSet::new(),
            fed: HashMap::new(),
            ttt,
            relocator,
            max_rms,
            network_size_km,
        }
    }

    pub fn len(&self) -> usize {
        self.grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    /// Feed a pick to every grid point and return the new origins
    ///
    /// At most one origin is returned per call. A pick is projected only
    /// once; feeding it again yields nothing.
    pub fn feed(&mut self, pick: &Arc<Pick>) -> Vec<Origin> {
        let Some(station) = pick.station.clone() else {
            return Vec::new();
        };
        if self.fed.insert(pick.id.clone(), pick.time).is_some() {
            debug!(pick = %pick.id, "Pick already projected");
            return Vec::new();
        }

        let setup_needed = self.configured.insert(station.key());
        let mut by_pick_set: BTreeMap<Vec<PickId>, (Origin, f64)> = BTreeMap::new();
        let mut max_score: f64 = 0.0;

        for gp in self.grid.iter_mut() {
            if setup_needed {
                gp.setup_station(&station, self.ttt.as_ref());
            }
            let Some(mut origin) = gp.feed(pick) else {
                continue;
            };
            if !origin.has_pick(&pick.id) {
                continue;
            }

            let pick_set = pick_set(&origin);
            let score = origin_score(&mut origin, self.max_rms, self.network_size_km);
            if let Some((_, existing)) = by_pick_set.get(&pick_set) {
                if score <= *existing {
                    continue;
                }
            }
            if score < 0.6 * max_score {
                continue;
            }
            max_score = max_score.max(score);
            by_pick_set.insert(pick_set, (origin, score));
        }

        let mut candidates = Vec::new();
        for (origin, score) in by_pick_set.into_values() {
            if score < 0.6 * max_score {
                continue;
            }
            let Some(mut relo) = self.relocator.relocate(&origin, DepthPolicy::Fixed(origin.dep)) else {
                continue;
            };
            let Some(index) = relo.find_arrival(&pick.id) else {
                continue;
            };
            if relo.arrivals[index].distance > station.max_nuc_dist {
                continue;
            }
            relo.score = origin_score(&mut relo, self.max_rms, self.network_size_km);
            candidates.push(relo);
        }

        let Some(best) = candidates
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
        else {
            return Vec::new();
        };

        match self.relocator.relocate(&best, DepthPolicy::Free) {
            Some(mut relo) => {
                relo.score = origin_score(&mut relo, self.max_rms, self.network_size_km);
                debug!(pick = %pick.id, "Nucleated {}", relo.one_liner());
                vec![relo]
            }
            None => Vec::new(),
        }
    }

    /// Drop projected picks older than `min_time` from every grid point
    pub fn cleanup(&mut self, min_time: Time) -> usize {
        self.fed.retain(|_, t| *t >= min_time);
        self.grid.iter_mut().map(|gp| gp.cleanup(min_time)).sum()
    }

    /// Forget all projected picks and station setups
    pub fn reset(&mut self) {
        for gp in self.grid.iter_mut() {
            gp.picks.clear();
            gp.wrappers.clear();
        }
        self.configured.clear();
        self.fed.clear();
    }

    pub fn projected_pick_count(&self) -> usize {
        self.grid.iter().map(|gp| gp.projected_pick_count()).sum()
    }
}

/// Identifiers of the defining picks, sorted
fn pick_set(origin: &Origin) -> Vec<PickId> {
    origin
        .arrivals
        .iter()
        .filter(|a| a.excluded == Exclusion::NotExcluded)
        .map(|a| a.pick.id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Station;
    use crate::reference::{GaussNewtonSolver, HomogeneousModel};
    use autoloc_common::AutolocConfig;

    fn search(grid: Vec<GridPoint>) -> GridSearch {
        let model = Arc::new(HomogeneousModel::default());
        let solver = Arc::new(GaussNewtonSolver::new(model.clone()));
        let relocator = Relocator::new(solver, &AutolocConfig::default());
        GridSearch::new(grid, model, relocator, 3.5, 0.0)
    }

    fn pick_at(id: &str, sta: &str, lat: f64, lon: f64, src: (f64, f64, f64, f64)) -> Arc<Pick> {
        let model = HomogeneousModel::default();
        let (delta, _, _) = geo::delazi(src.0, src.1, lat, lon);
        let mut pick = Pick::new(id, "XX", sta, src.3 + model.p_time(delta, src.2)).with_amplitudes(2000.0, 20.0);
        pick.normamp = 1.0;
        pick.station = Some(Arc::new(Station::new("XX", sta, lat, lon, 0.0)));
        Arc::new(pick)
    }

    #[test]
    fn test_parse_grid_file() {
        let grid = parse_grid("# lat lon dep rad dmax nmin\n\n10 20 10 2.5 30 5\n-5 100.5 33 4 180 6\n").unwrap();
        assert_eq!(grid.len(), 2);
        assert_eq!(grid[0].radius, 2.5);
        assert_eq!(grid[0].max_sta_dist, 30.0);
        assert_eq!(grid[0].nmin, 5);
        assert_eq!(grid[1].dep, 33.0);
    }

    #[test]
    fn test_parse_grid_rejects_bad_line() {
        match parse_grid("10 20 10 2.5 30\n") {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 1),
            other => panic!("unexpected result: {:?}", other.map(|g| g.len())),
        }
    }

    #[test]
    fn test_global_grid_covers_sphere() {
        let grid = GridSpec::global(10.0).generate();
        assert!(grid.len() > 300 && grid.len() < 700);
        assert!(grid.iter().all(|gp| gp.lon < 180.0));
    }

    #[test]
    fn test_cluster_yields_origin() {
        let src = (0.0, 0.0, 10.0, 1000.0);
        let mut gp = GridPoint::new(0.0, 0.0, 10.0);
        gp.nmin = 4;
        let mut gs = search(vec![gp]);
        let stations = [(1.0, 0.0), (0.0, 1.0), (-1.0, 0.0), (0.0, -1.0)];
        let mut found = Vec::new();
        for (i, (lat, lon)) in stations.iter().enumerate() {
            let pick = pick_at(&format!("p{}", i), &format!("S{}", i), *lat, *lon, src);
            found = gs.feed(&pick);
        }
        assert_eq!(found.len(), 1);
        let origin = &found[0];
        assert_eq!(origin.arrivals.len(), 4);
        assert!((origin.time - 1000.0).abs() < 0.5);
        assert!(origin.lat.abs() < 0.05 && origin.lon.abs() < 0.05);
        assert_eq!(gs.projected_pick_count(), 4);
    }

    #[test]
    fn test_refeed_is_ignored() {
        let src = (0.0, 0.0, 10.0, 1000.0);
        let mut gp = GridPoint::new(0.0, 0.0, 10.0);
        gp.nmin = 4;
        let mut gs = search(vec![gp]);
        let stations = [(1.0, 0.0), (0.0, 1.0), (-1.0, 0.0), (0.0, -1.0)];
        let picks: Vec<Arc<Pick>> = stations
            .iter()
            .enumerate()
            .map(|(i, (lat, lon))| pick_at(&format!("p{}", i), &format!("S{}", i), *lat, *lon, src))
            .collect();
        for pick in &picks {
            gs.feed(pick);
        }
        assert!(gs.feed(&picks[3]).is_empty());
        assert_eq!(gs.projected_pick_count(), 4);
    }

    #[test]
    fn test_scattered_picks_do_not_nucleate() {
        let mut gp = GridPoint::new(0.0, 0.0, 10.0);
        gp.nmin = 4;
        let mut gs = search(vec![gp]);
        let stations = [(1.0, 0.0), (0.0, 1.0), (-1.0, 0.0), (0.0, -1.0)];
        for (i, (lat, lon)) in stations.iter().enumerate() {
            let src = (0.0, 0.0, 10.0, 1000.0 + 60.0 * i as f64);
            let pick = pick_at(&format!("p{}", i), &format!("S{}", i), *lat, *lon, src);
            assert!(gs.feed(&pick).is_empty());
        }
    }

    #[test]
    fn test_cleanup_drops_old_projections() {
        let mut gp = GridPoint::new(0.0, 0.0, 10.0);
        gp.nmin = 4;
        let mut gs = search(vec![gp]);
        let src = (0.0, 0.0, 10.0, 1000.0);
        gs.feed(&pick_at("a", "A", 1.0, 0.0, src));
        gs.feed(&pick_at("b", "B", 0.0, 1.0, (0.0, 0.0, 10.0, 5000.0)));
        assert_eq!(gs.cleanup(2000.0), 1);
        assert_eq!(gs.projected_pick_count(), 1);
    }
}
