//! Engine struct, construction and state accessors
//!
//! **Responsibilities:**
//! - Engine struct definition and initialization
//! - Clock (wall clock, offline and playback modes)
//! - Statistics, state inspection and reset

use crate::associator::Associator;
use crate::locator::{DepthPolicy, HypocenterSolver, Relocator};
use crate::model::{Origin, OriginId, Pick};
use crate::nucleator::{GridPoint, GridSearch};
use crate::pool::PickPool;
use crate::score::origin_score;
use crate::sink::{NoPickLog, NullSink, OriginSink, PickLog};
use crate::stations::{StationConfigTable, StationProvider, StationRegistry};
use crate::traveltime::TravelTimeProvider;
use autoloc_common::{time, AutolocConfig, Result, Time};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;

/// External services the engine depends on
#[derive(Clone)]
pub struct Collaborators {
    pub travel_times: Arc<dyn TravelTimeProvider>,
    pub solver: Arc<dyn HypocenterSolver>,
    pub stations: Arc<dyn StationProvider>,
}

/// Predicate marking epicenters that always get the default depth
pub type DepthRegion = Box<dyn Fn(&Origin) -> bool + Send>;

/// Counters since construction or the last reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub picks_received: u64,
    pub picks_processed: u64,
    pub amplitudes_received: u64,
    pub nucleator_calls: u64,
    /// Grid-search candidates that became new or merged origins
    pub nucleated_origins: u64,
    pub xxl_origins: u64,
    pub origins_stored: u64,
    pub origins_published: u64,
}

/// Publication state of one origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationState {
    NeverSent,
    /// Sent `version` times
    Sent { version: u32 },
}

/// Publication bookkeeping keyed by origin id
#[derive(Debug, Default)]
pub(super) struct Publication {
    pub(super) next_due: HashMap<OriginId, Time>,
    pub(super) last_sent: HashMap<OriginId, Origin>,
    pub(super) outgoing: BTreeSet<OriginId>,
    pub(super) versions: HashMap<OriginId, u32>,
}

impl Publication {
    pub(super) fn clear(&mut self) {
        self.next_due.clear();
        self.last_sent.clear();
        self.outgoing.clear();
        self.versions.clear();
    }

    pub(super) fn forget(&mut self, id: OriginId) {
        self.next_due.remove(&id);
        self.last_sent.remove(&id);
        self.outgoing.remove(&id);
        self.versions.remove(&id);
    }
}

/// Real-time phase association and location engine
///
/// A synchronous reducer over picks, amplitudes and external origins. All
/// entry points take `&mut self`; there is no internal concurrency.
pub struct Engine {
    pub(super) config: AutolocConfig,
    pub(super) stations: StationRegistry,
    pub(super) pool: PickPool,

    /// Live origins
    pub(super) origins: BTreeMap<OriginId, Origin>,

    pub(super) ttt: Arc<dyn TravelTimeProvider>,
    pub(super) associator: Associator,
    pub(super) relocator: Relocator,
    pub(super) nucleator: GridSearch,

    pub(super) sink: Box<dyn OriginSink>,
    pub(super) pick_log: Box<dyn PickLog>,
    pub(super) depth_region: Option<DepthRegion>,

    pub(super) publication: Publication,

    /// Origins stored since the last report, in store order
    pub(super) new_origins: Vec<OriginId>,

    pub(super) now: Time,
    pub(super) next_cleanup: Time,
    pub(super) next_id: OriginId,
    pub(super) stats: EngineStats,
}

impl Engine {
    /// Build an engine from a validated configuration
    ///
    /// Publication goes nowhere until a sink is installed with
    /// [`Engine::set_sink`].
    pub fn new(
        config: AutolocConfig,
        collaborators: Collaborators,
        station_config: StationConfigTable,
        grid: Vec<GridPoint>,
    ) -> Result<Self> {
        config.validate()?;

        let relocator = Relocator::new(collaborators.solver, &config);
        let nucleator = GridSearch::new(
            grid,
            collaborators.travel_times.clone(),
            relocator.clone(),
            config.max_rms,
            config.network_size_km,
        );
        info!(
            "Engine initialized: {} grid points, min_phase_count={}, max_rms={}, default_depth={} km",
            nucleator.len(),
            config.min_phase_count,
            config.max_rms,
            config.default_depth
        );

        Ok(Self {
            stations: StationRegistry::new(collaborators.stations, station_config),
            pool: PickPool::new(),
            origins: BTreeMap::new(),
            associator: Associator::new(collaborators.travel_times.clone()),
            ttt: collaborators.travel_times,
            relocator,
            nucleator,
            sink: Box::new(NullSink),
            pick_log: Box::new(NoPickLog),
            depth_region: None,
            publication: Publication::default(),
            new_origins: Vec::new(),
            now: 0.0,
            next_cleanup: 0.0,
            next_id: 0,
            stats: EngineStats::default(),
            config,
        })
    }

    pub fn set_sink<S: OriginSink + 'static>(&mut self, sink: S) {
        self.sink = Box::new(sink);
    }

    pub fn set_pick_log<L: PickLog + 'static>(&mut self, log: L) {
        self.pick_log = Box::new(log);
    }

    /// Install a region predicate that forces the default depth
    pub fn set_depth_region<F>(&mut self, region: F)
    where
        F: Fn(&Origin) -> bool + Send + 'static,
    {
        self.depth_region = Some(Box::new(region));
    }

    /// Replace the station configuration table
    ///
    /// Stations are re-resolved with the new table as picks arrive. Picks
    /// already pooled keep the station they were resolved with.
    pub fn set_station_config(&mut self, table: StationConfigTable) {
        info!("Station configuration replaced");
        self.stations.set_config(table);
    }

    /// Reload the station configuration file if it changed on disk
    ///
    /// Returns whether a new table was installed.
    pub fn reload_station_config(&mut self) -> Result<bool> {
        let table = self.stations.config();
        let Some(path) = table.path().map(|p| p.to_path_buf()) else {
            return Ok(false);
        };
        if !table.has_changed() {
            return Ok(false);
        }
        let table = StationConfigTable::load(&path, self.config.default_max_nuc_dist)?;
        self.set_station_config(table);
        Ok(true)
    }

    pub fn config(&self) -> &AutolocConfig {
        &self.config
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Engine time
    pub fn now(&self) -> Time {
        self.now
    }

    /// Advance engine time; never moves backwards
    pub fn sync(&mut self, t: Time) {
        if t > self.now {
            self.now = t;
        }
    }

    /// Follow the wall clock unless time is driven by the data
    pub(super) fn tick(&mut self) {
        if !self.config.offline && !self.config.playback {
            self.sync(time::now());
        }
    }

    pub fn origin(&self, id: OriginId) -> Option<&Origin> {
        self.origins.get(&id)
    }

    pub fn origins(&self) -> impl Iterator<Item = &Origin> {
        self.origins.values()
    }

    pub fn origin_count(&self) -> usize {
        self.origins.len()
    }

    pub fn pick(&self, id: &str) -> Option<&Arc<Pick>> {
        self.pool.get(id)
    }

    pub fn pick_count(&self) -> usize {
        self.pool.len()
    }

    /// Live origin a pooled pick is associated with
    pub fn associated_origin(&self, pick_id: &str) -> Option<OriginId> {
        self.pool.associated_origin(pick_id)
    }

    /// Picks currently projected onto the nucleation grid
    pub fn projected_pick_count(&self) -> usize {
        self.nucleator.projected_pick_count()
    }

    pub fn publication_state(&self, id: OriginId) -> PublicationState {
        match self.publication.versions.get(&id) {
            Some(&version) => PublicationState::Sent { version },
            None => PublicationState::NeverSent,
        }
    }

    /// Clear all picks, origins and publication state
    pub fn reset(&mut self) {
        info!("Reset requested");
        self.nucleator.reset();
        self.pool.clear();
        self.origins.clear();
        self.publication.clear();
        self.new_origins.clear();
    }

    /// Log one line per live origin
    pub fn dump_state(&self) {
        info!("{} live origins", self.origins.len());
        for origin in self.origins.values() {
            info!("{}", origin.one_liner());
        }
    }

    pub(super) fn new_origin_id(&mut self) -> OriginId {
        self.next_id += 1;
        self.next_id
    }

    /// Recompute and store the score
    pub(super) fn update_score(&self, origin: &mut Origin) -> f64 {
        let score = origin_score(origin, self.config.max_rms, self.config.network_size_km);
        origin.score = score;
        score
    }

    /// Relocate a copy of `origin`
    pub(super) fn relocate(&self, origin: &Origin, policy: DepthPolicy) -> Option<Origin> {
        self.relocator.relocate(origin, policy)
    }

    /// Relocate and take over the solution; false leaves `origin` untouched
    pub(super) fn relocate_in_place(&self, origin: &mut Origin, policy: DepthPolicy) -> bool {
        match self.relocator.relocate(origin, policy) {
            Some(relo) => {
                origin.update_from(&relo);
                true
            }
            None => false,
        }
    }

    pub(super) fn is_sticky(&self) -> bool {
        self.config.default_depth_stickiness >= 0.9
    }
}
