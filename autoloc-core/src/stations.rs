//! Station metadata: location providers, the station configuration table
//! and the lazily populated registry the engine resolves picks through

use crate::model::{station::station_key, Station, StationRef};
use autoloc_common::{Error, Result, Time};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Coordinates of a station as known to a provider
#[derive(Debug, Clone, PartialEq)]
pub struct StationLocation {
    pub net: String,
    pub sta: String,
    pub lat: f64,
    pub lon: f64,
    /// Elevation (m)
    pub alt: f64,
}

/// Source of station coordinates
pub trait StationProvider: Send + Sync {
    /// Location of `net.sta` valid at `time`
    fn resolve(&self, net: &str, sta: &str, time: Time) -> Option<StationLocation>;
}

/// Plain-text station location list
///
/// One station per line: `NET STA lat lon elevation`. Lines starting with
/// `#` and blank lines are ignored. Locations are assumed valid at all times.
#[derive(Debug, Clone, Default)]
pub struct StationLocationFile {
    stations: HashMap<String, StationLocation>,
}

impl StationLocationFile {
    pub fn from_locations(locations: impl IntoIterator<Item = StationLocation>) -> Self {
        let stations = locations
            .into_iter()
            .map(|loc| (station_key(&loc.net, &loc.sta), loc))
            .collect();
        Self { stations }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut locations = Vec::new();
        for (i, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                return Err(Error::Parse {
                    line: i + 1,
                    reason: format!("expected 5 fields, found {}", fields.len()),
                });
            }
            let number = |s: &str, what: &str| {
                s.parse::<f64>().map_err(|_| Error::Parse {
                    line: i + 1,
                    reason: format!("invalid {}: {}", what, s),
                })
            };
            locations.push(StationLocation {
                net: fields[0].to_string(),
                sta: fields[1].to_string(),
                lat: number(fields[2], "latitude")?,
                lon: number(fields[3], "longitude")?,
                alt: number(fields[4], "elevation")?,
            });
        }
        Ok(Self::from_locations(locations))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file = Self::parse(&content)?;
        info!("Loaded {} station locations from {}", file.len(), path.display());
        Ok(file)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

impl StationProvider for StationLocationFile {
    fn resolve(&self, net: &str, sta: &str, _time: Time) -> Option<StationLocation> {
        self.stations.get(&station_key(net, sta)).cloned()
    }
}

/// Per-station usage and nucleation distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StationConfigItem {
    pub usage: bool,
    /// Maximum nucleation distance (degrees)
    pub max_nuc_dist: f64,
}

/// Station configuration table keyed by `NET STA` patterns
///
/// Lookup tries `NET STA`, `NET *`, `* STA` and `* *` in that order.
#[derive(Debug, Clone)]
pub struct StationConfigTable {
    items: HashMap<String, StationConfigItem>,
    path: Option<PathBuf>,
    mtime: Option<SystemTime>,
}

impl StationConfigTable {
    /// Table holding only the `* *` default
    pub fn new(default_max_nuc_dist: f64) -> Self {
        let mut items = HashMap::new();
        items.insert(
            "* *".to_string(),
            StationConfigItem {
                usage: true,
                max_nuc_dist: default_max_nuc_dist,
            },
        );
        Self {
            items,
            path: None,
            mtime: None,
        }
    }

    /// Parse `NET STA usage maxNucDist` lines on top of the default
    pub fn parse(content: &str, default_max_nuc_dist: f64) -> Result<Self> {
        let mut table = Self::new(default_max_nuc_dist);
        for (i, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return Err(Error::Parse {
                    line: i + 1,
                    reason: format!("expected 4 fields, found {}", fields.len()),
                });
            }
            let usage = fields[2].parse::<i32>().map_err(|_| Error::Parse {
                line: i + 1,
                reason: format!("invalid usage flag: {}", fields[2]),
            })?;
            let max_nuc_dist = fields[3].parse::<f64>().map_err(|_| Error::Parse {
                line: i + 1,
                reason: format!("invalid maximum nucleation distance: {}", fields[3]),
            })?;
            table.items.insert(
                format!("{} {}", fields[0], fields[1]),
                StationConfigItem {
                    usage: usage > 0,
                    max_nuc_dist,
                },
            );
        }
        Ok(table)
    }

    pub fn load(path: &Path, default_max_nuc_dist: f64) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut table = Self::parse(&content, default_max_nuc_dist)?;
        table.mtime = modification_time(path);
        table.path = Some(path.to_path_buf());
        info!("Loaded {} station config entries from {}", table.items.len() - 1, path.display());
        Ok(table)
    }

    pub fn get(&self, net: &str, sta: &str) -> StationConfigItem {
        let patterns = [
            format!("{} {}", net, sta),
            format!("{} *", net),
            format!("* {}", sta),
            "* *".to_string(),
        ];
        for pattern in &patterns {
            if let Some(item) = self.items.get(pattern) {
                debug!(
                    "Station {} {} pattern {:<8} config: usage={} maxnucdist={}",
                    net, sta, pattern, item.usage, item.max_nuc_dist
                );
                return *item;
            }
        }
        // "* *" is always present
        StationConfigItem {
            usage: true,
            max_nuc_dist: 180.0,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// True when the backing file was modified since it was loaded
    pub fn has_changed(&self) -> bool {
        match &self.path {
            Some(path) => modification_time(path) != self.mtime,
            None => false,
        }
    }
}

fn modification_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Lazily resolved stations
///
/// A station is looked up in the provider the first time a pick from it
/// arrives and then cached. Stations the provider does not know are
/// reported once.
pub struct StationRegistry {
    provider: Arc<dyn StationProvider>,
    config: StationConfigTable,
    stations: HashMap<String, StationRef>,
    missing: HashSet<String>,
}

impl StationRegistry {
    pub fn new(provider: Arc<dyn StationProvider>, config: StationConfigTable) -> Self {
        Self {
            provider,
            config,
            stations: HashMap::new(),
            missing: HashSet::new(),
        }
    }

    pub fn resolve(&mut self, net: &str, sta: &str, time: Time) -> Option<StationRef> {
        let key = station_key(net, sta);
        if let Some(station) = self.stations.get(&key) {
            return Some(station.clone());
        }

        let Some(loc) = self.provider.resolve(net, sta, time) else {
            if self.missing.insert(key.clone()) {
                warn!("Station {} not found", key);
            }
            return None;
        };

        let item = self.config.get(net, sta);
        let mut station = Station::new(net, sta, loc.lat, loc.lon, loc.alt);
        station.max_nuc_dist = item.max_nuc_dist;
        station.enabled = item.usage;
        let station = Arc::new(station);
        debug!(
            "Station {} resolved: lat={:.3} lon={:.3} maxnucdist={} usage={}",
            key, loc.lat, loc.lon, item.max_nuc_dist, item.usage
        );
        self.missing.remove(&key);
        self.stations.insert(key, station.clone());
        Some(station)
    }

    pub fn get(&self, net: &str, sta: &str) -> Option<StationRef> {
        self.stations.get(&station_key(net, sta)).cloned()
    }

    pub fn config(&self) -> &StationConfigTable {
        &self.config
    }

    /// Install a new configuration table; stations are re-resolved with it
    pub fn set_config(&mut self, config: StationConfigTable) {
        self.config = config;
        self.stations.clear();
        self.missing.clear();
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}
