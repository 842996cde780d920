//! Engine configuration
//!
//! All tunables live in one immutable [`AutolocConfig`] value that is handed
//! to the engine at construction. Values come from a TOML file; every field
//! has a built-in default so a partial (or empty) file is valid.
//!
//! # Config File Resolution
//!
//! 1. Command-line argument (highest priority)
//! 2. `AUTOLOC_CONFIG` environment variable
//! 3. `<config dir>/autoloc/autoloc.toml` (e.g. `~/.config/autoloc/autoloc.toml`)
//! 4. Built-in defaults (fallback)
//!
//! A missing file is not an error: a warning is logged and the defaults are
//! used. A file that exists but fails to parse or validate is an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "AUTOLOC_CONFIG";

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutolocConfig {
    /// Agency identifier stamped on produced origins. Origins fed back with
    /// this agency are considered our own.
    pub agency_id: String,

    /// Author stamped on produced origins
    pub author: String,

    /// Amplitude type carrying the absolute amplitude (and period)
    pub ampl_type_abs: String,

    /// Amplitude type carrying the signal-to-noise ratio
    pub ampl_type_snr: String,

    /// Accepted pick authors, highest priority first. Empty accepts all.
    pub pick_authors: Vec<String>,

    /// Picks and origins older than this (seconds before now) are ignored
    /// and eventually purged.
    ///
    /// Valid range: >= 0 (0 disables age checks and automatic cleanup)
    /// Default: 21600
    pub max_age: f64,

    /// Window of the per-station pick-rate guard (seconds)
    ///
    /// Valid range: any; <= 0 disables the guard
    /// Default: 3600
    pub dynamic_pick_threshold_interval: f64,

    /// RMS considered good; also bounds re-inclusion of trimmed arrivals
    ///
    /// Default: 1.5
    pub good_rms: f64,

    /// Maximum RMS of a publishable origin
    ///
    /// Valid range: > 0, must be < max_residual_use
    /// Default: 3.5
    pub max_rms: f64,

    /// Maximum residual (seconds) of an arrival used in the solution
    ///
    /// Default: 7.0
    pub max_residual_use: f64,

    /// Maximum residual (seconds) of an arrival kept in an origin at all
    ///
    /// Default: 21.0
    pub max_residual_keep: f64,

    /// Default depth (km) used when depth cannot be resolved
    pub default_depth: f64,

    /// Preference for the default depth, 0..1. At 0.9 or above the default
    /// depth is always enforced.
    pub default_depth_stickiness: f64,

    /// Try the default depth when the free depth is poorly constrained
    pub try_default_depth: bool,

    /// Keep the depth of manual origins (manually fixed or from depth phases)
    pub adopt_manual_depth: bool,

    /// Minimum free depth (km); shallower solutions are fixed here
    pub minimum_depth: f64,

    /// Maximum depth (km) of a valid solution
    pub max_depth: f64,

    /// Maximum secondary azimuthal gap (degrees) of a publishable origin
    pub max_azi_gap_secondary: f64,

    /// Maximum station distance (degrees) of defining arrivals
    pub max_sta_dist: f64,

    /// Nucleation distance (degrees) of stations without an explicit entry
    pub default_max_nuc_dist: f64,

    /// Minimum SNR of an automatic pick
    pub min_pick_snr: f64,

    /// Minimum affinity of a pick to associate with an existing origin
    pub min_pick_affinity: f64,

    /// Minimum number of defining phases of an origin
    pub min_phase_count: usize,

    /// Minimum score of a publishable origin
    pub min_score: f64,

    /// Defining phases within 105 degrees above which core phases are unused
    pub min_sta_count_ignore_pkp: usize,

    /// Score of an associated origin above which nucleation is skipped
    pub min_score_bypass_nucleator: f64,

    /// Maximum fraction of arrivals explainable as phases of another event
    pub max_allowed_fake_probability: f64,

    /// Extra phases required per degree beyond a station's nucleation distance
    pub dist_slope: f64,

    /// Seconds between automatic cleanups
    pub cleanup_interval: f64,

    /// Publication interval slope (seconds per defining phase)
    pub publication_interval_time_slope: f64,

    /// Publication interval intercept (seconds)
    pub publication_interval_time_intercept: f64,

    /// Phase-count growth that makes an origin due for publication
    pub publication_interval_pick_count: usize,

    /// Run without wall clock; time advances only through fed data
    pub offline: bool,

    /// Test mode: everything is computed, nothing is published
    pub test: bool,

    /// Playback: engine time follows pick creation times
    pub playback: bool,

    pub use_manual_picks: bool,
    pub use_manual_origins: bool,
    pub use_imported_origins: bool,

    /// Treat core phases aggressively (wider residual window, no consistency
    /// exclusion)
    pub aggressive_pkp: bool,

    /// Publish all arrivals instead of only P and PKP
    pub report_all_phases: bool,

    /// Size (km) of the network; 0 uses each station's nucleation distance
    /// for distance weighting of the score
    pub network_size_km: f64,

    /// Travel-time / locator profile name passed to collaborators
    pub locator_profile: String,

    /// Default depth is rejected if its RMS exceeds the free solution's by
    /// this factor (and exceeds good_rms)
    ///
    /// Default: 1.2
    pub default_depth_rms_factor: f64,

    /// Default depth is rejected if its score is below factor * free score
    /// minus offset
    ///
    /// Default: 0.9
    pub default_depth_score_factor: f64,

    /// Default: 5.0
    pub default_depth_score_offset: f64,

    /// Leave-one-out passes of score enhancement (0 disables)
    pub enhance_score_max_loops: usize,

    /// Large-amplitude fast path
    pub xxl: XxlConfig,

    /// Optional input files
    pub files: FilesConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Parameters of the XXL (large amplitude) fast path
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XxlConfig {
    pub enabled: bool,

    /// Minimum absolute amplitude of an XXL pick
    pub min_amplitude: f64,

    /// Minimum SNR of an XXL pick
    pub min_snr: f64,

    /// Seconds after an XXL pick during which picks of the same station are
    /// treated as its coda
    pub dead_time: f64,

    /// XXL picks required for a preliminary origin
    pub min_phase_count: usize,

    /// Maximum station distance (degrees) of a preliminary origin
    pub max_sta_dist: f64,

    /// Deepest trial depth (km) of a preliminary origin
    pub max_depth: f64,
}

/// Paths to optional input files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Nucleation grid
    pub grid: Option<PathBuf>,

    /// Station usage and nucleation distance table
    pub station_config: Option<PathBuf>,

    /// Plain-text station coordinates
    pub station_locations: Option<PathBuf>,

    /// Pick log
    pub pick_log: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for XxlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_amplitude: 5000.0,
            min_snr: 20.0,
            dead_time: 120.0,
            min_phase_count: 4,
            max_sta_dist: 15.0,
            max_depth: 100.0,
        }
    }
}

impl Default for AutolocConfig {
    fn default() -> Self {
        Self {
            agency_id: "TEST".to_string(),
            author: "AUTOLOC".to_string(),
            ampl_type_abs: "mb".to_string(),
            ampl_type_snr: "snr".to_string(),
            pick_authors: Vec::new(),
            max_age: 6.0 * 3600.0,
            dynamic_pick_threshold_interval: 3600.0,
            good_rms: 1.5,
            max_rms: 3.5,
            max_residual_use: 7.0,
            max_residual_keep: 21.0,
            default_depth: 10.0,
            default_depth_stickiness: 0.5,
            try_default_depth: true,
            adopt_manual_depth: false,
            minimum_depth: 5.0,
            max_depth: 1000.0,
            max_azi_gap_secondary: 360.0,
            max_sta_dist: 180.0,
            default_max_nuc_dist: 180.0,
            min_pick_snr: 3.0,
            min_pick_affinity: 0.05,
            min_phase_count: 6,
            min_score: 8.0,
            min_sta_count_ignore_pkp: 15,
            min_score_bypass_nucleator: 40.0,
            max_allowed_fake_probability: 0.2,
            dist_slope: 1.0,
            cleanup_interval: 3600.0,
            publication_interval_time_slope: 0.5,
            publication_interval_time_intercept: 0.0,
            publication_interval_pick_count: 20,
            offline: false,
            test: false,
            playback: false,
            use_manual_picks: false,
            use_manual_origins: false,
            use_imported_origins: false,
            aggressive_pkp: true,
            report_all_phases: false,
            network_size_km: 0.0,
            locator_profile: "iasp91".to_string(),
            default_depth_rms_factor: 1.2,
            default_depth_score_factor: 0.9,
            default_depth_score_offset: 5.0,
            enhance_score_max_loops: 0,
            xxl: XxlConfig::default(),
            files: FilesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AutolocConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AutolocConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from the resolved config path, falling back to defaults when no
    /// file exists
    pub fn load_or_default(cli_arg: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_arg) {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("No config file location available, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check threshold consistency
    ///
    /// Rejects configurations violating
    /// `max_rms < max_residual_use < max_residual_keep` along with other
    /// out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if !(self.max_rms > 0.0) {
            return Err(Error::Config(format!(
                "max_rms must be positive (got {})",
                self.max_rms
            )));
        }
        if !(self.max_rms < self.max_residual_use) {
            return Err(Error::Config(format!(
                "max_rms ({}) must be less than max_residual_use ({})",
                self.max_rms, self.max_residual_use
            )));
        }
        if !(self.max_residual_use < self.max_residual_keep) {
            return Err(Error::Config(format!(
                "max_residual_use ({}) must be less than max_residual_keep ({})",
                self.max_residual_use, self.max_residual_keep
            )));
        }
        if self.minimum_depth < 0.0 || self.minimum_depth > self.max_depth {
            return Err(Error::Config(format!(
                "minimum_depth ({}) must be within [0, max_depth ({})]",
                self.minimum_depth, self.max_depth
            )));
        }
        if self.default_depth < 0.0 || self.default_depth > self.max_depth {
            return Err(Error::Config(format!(
                "default_depth ({}) must be within [0, max_depth ({})]",
                self.default_depth, self.max_depth
            )));
        }
        if !(0.0..=1.0).contains(&self.default_depth_stickiness) {
            return Err(Error::Config(format!(
                "default_depth_stickiness must be within [0, 1] (got {})",
                self.default_depth_stickiness
            )));
        }
        if self.min_phase_count == 0 {
            return Err(Error::Config("min_phase_count must be at least 1".to_string()));
        }
        if self.max_age < 0.0 {
            return Err(Error::Config(format!(
                "max_age must not be negative (got {})",
                self.max_age
            )));
        }
        if self.xxl.enabled && self.xxl.min_phase_count < 2 {
            return Err(Error::Config(
                "xxl.min_phase_count must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    /// Priority of a pick author; 0 means not accepted
    ///
    /// The first listed author has the highest priority. With no list every
    /// author has priority 1.
    pub fn author_priority(&self, author: &str) -> usize {
        if self.pick_authors.is_empty() {
            return 1;
        }
        let n = self.pick_authors.len();
        self.pick_authors
            .iter()
            .position(|a| a == author)
            .map(|i| n - i)
            .unwrap_or(0)
    }
}

/// Resolve the configuration file path
///
/// Returns `None` only when no platform config directory exists and neither
/// CLI nor environment name a file.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: OS config directory
    dirs::config_dir().map(|d| d.join("autoloc").join("autoloc.toml"))
}
