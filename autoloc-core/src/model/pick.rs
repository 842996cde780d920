//! Phase picks

use super::station::{station_key, StationRef};
use autoloc_common::Time;
use serde::{Deserialize, Serialize};

pub type PickId = String;

/// Evaluation mode of a pick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickMode {
    #[default]
    Automatic,
    Manual,
    Confirmed,
    /// Automatic pick rejected by the station-rate guard
    IgnoredAutomatic,
}

/// Amplitude measurement for a pooled pick
///
/// Arrives separately from its pick. The type decides whether `value` is
/// an absolute amplitude or a signal-to-noise ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amplitude {
    pub pick_id: PickId,
    pub amp_type: String,
    pub value: f64,
    #[serde(default)]
    pub period: Option<f64>,
}

impl Amplitude {
    pub fn new(pick_id: &str, amp_type: &str, value: f64) -> Self {
        Self {
            pick_id: pick_id.to_string(),
            amp_type: amp_type.to_string(),
            value,
            period: None,
        }
    }
}

/// A single detection of a phase at a station
///
/// Input fields are deserialized from the feed; the remaining fields are
/// engine state set during intake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pick {
    pub id: PickId,
    pub net: String,
    pub sta: String,
    #[serde(default)]
    pub loc: String,
    #[serde(default)]
    pub cha: String,

    /// Arrival time (epoch seconds)
    pub time: Time,

    /// Absolute amplitude (0 = unknown)
    #[serde(default)]
    pub amp: f64,
    /// Period of the absolute amplitude
    #[serde(default)]
    pub per: f64,
    /// Signal-to-noise ratio (0 = unknown)
    #[serde(default)]
    pub snr: f64,

    #[serde(default)]
    pub phase_hint: Option<String>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub mode: PickMode,

    /// Time the pick was created upstream, drives the playback clock
    #[serde(default)]
    pub creation_time: Option<Time>,

    #[serde(skip)]
    pub station: Option<StationRef>,
    /// Amplitude normalized to the XXL threshold
    #[serde(skip)]
    pub normamp: f64,
    #[serde(skip)]
    pub xxl: bool,
    #[serde(skip)]
    pub blacklisted: bool,
}

impl Pick {
    /// Automatic pick without amplitudes
    pub fn new(id: &str, net: &str, sta: &str, time: Time) -> Self {
        Self {
            id: id.to_string(),
            net: net.to_string(),
            sta: sta.to_string(),
            loc: String::new(),
            cha: String::new(),
            time,
            amp: 0.0,
            per: 0.0,
            snr: 0.0,
            phase_hint: None,
            author: String::new(),
            mode: PickMode::Automatic,
            creation_time: None,
            station: None,
            normamp: 0.0,
            xxl: false,
            blacklisted: false,
        }
    }

    pub fn with_amplitudes(mut self, amp: f64, snr: f64) -> Self {
        self.amp = amp;
        self.snr = snr;
        self
    }

    pub fn with_mode(mut self, mode: PickMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn station_key(&self) -> String {
        station_key(&self.net, &self.sta)
    }

    pub fn same_station(&self, other: &Pick) -> bool {
        self.net == other.net && self.sta == other.sta
    }

    pub fn is_automatic(&self) -> bool {
        self.mode == PickMode::Automatic
    }

    pub fn is_manual(&self) -> bool {
        self.mode == PickMode::Manual
    }

    pub fn is_ignored(&self) -> bool {
        self.mode == PickMode::IgnoredAutomatic
    }

    pub fn has_amplitude(&self) -> bool {
        self.amp > 0.0
    }

    /// `A` for automatic, `M` otherwise
    pub fn status_flag(&self) -> char {
        if self.is_automatic() {
            'A'
        } else {
            'M'
        }
    }

    /// Minimal consistency of a pick before processing
    pub fn is_valid(&self) -> bool {
        if self.station.is_none() {
            return false;
        }
        if self.is_automatic() {
            // Unrealistically high SNR values are treated as broken picks
            if self.snr <= 0.0 || self.snr > 1.0e7 {
                return false;
            }
            if self.amp <= 0.0 {
                return false;
            }
        }
        true
    }
}
