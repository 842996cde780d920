//! Output seams: where published origins and processed picks go

use crate::model::{DepthType, Exclusion, Origin, OriginId, Pick, PickMode};
use autoloc_common::time::{format_time, to_datetime};
use autoloc_common::Time;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Receiver of published origins
pub trait OriginSink: Send {
    fn publish(&mut self, origin: &Origin);
}

impl<F> OriginSink for F
where
    F: FnMut(&Origin) + Send,
{
    fn publish(&mut self, origin: &Origin) {
        (self)(origin)
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OriginSink for NullSink {
    fn publish(&mut self, _origin: &Origin) {}
}

/// Collects published origins behind a shared handle
#[derive(Debug, Default, Clone)]
pub struct VecSink {
    origins: Arc<Mutex<Vec<Origin>>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything published so far
    pub fn origins(&self) -> Vec<Origin> {
        self.origins.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.origins.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OriginSink for VecSink {
    fn publish(&mut self, origin: &Origin) {
        if let Ok(mut v) = self.origins.lock() {
            v.push(origin.clone());
        }
    }
}

/// Serializable view of an arrival
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalRecord {
    pub pick_id: String,
    #[serde(default)]
    pub net: String,
    #[serde(default)]
    pub sta: String,
    pub phase: String,
    #[serde(default)]
    pub residual: f64,
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub azimuth: f64,
    #[serde(default)]
    pub excluded: Exclusion,
    #[serde(default)]
    pub mode: PickMode,
}

/// Serializable view of an origin
///
/// Written for every published origin and read back for origins fed in
/// from analysts or other agencies. Derived quantities are optional on
/// input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginRecord {
    #[serde(default)]
    pub id: OriginId,
    /// ISO 8601 origin time
    #[serde(default)]
    pub time: String,
    pub epoch: Time,
    pub lat: f64,
    pub lon: f64,
    pub depth: f64,
    #[serde(default)]
    pub depth_type: DepthType,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub rms: f64,
    #[serde(default)]
    pub defining_phases: usize,
    #[serde(default = "full_circle")]
    pub azi_gap: f64,
    #[serde(default = "full_circle")]
    pub azi_gap_secondary: f64,
    #[serde(default)]
    pub sdepth: f64,
    #[serde(default)]
    pub stime: f64,
    #[serde(default)]
    pub preliminary: bool,
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub agency: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub arrivals: Vec<ArrivalRecord>,
}

fn full_circle() -> f64 {
    360.0
}

impl From<&Origin> for OriginRecord {
    fn from(origin: &Origin) -> Self {
        Self {
            id: origin.id,
            time: to_datetime(origin.time)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| format_time(origin.time)),
            epoch: origin.time,
            lat: origin.lat,
            lon: origin.lon,
            depth: origin.dep,
            depth_type: origin.depth_type,
            score: origin.score,
            rms: origin.rms(),
            defining_phases: origin.defining_count(),
            azi_gap: origin.quality.azi_gap_primary,
            azi_gap_secondary: origin.quality.azi_gap_secondary,
            sdepth: origin.error.sdepth,
            stime: origin.error.stime,
            preliminary: origin.preliminary,
            manual: origin.manual,
            agency: origin.agency.clone(),
            author: origin.author.clone(),
            arrivals: origin
                .arrivals
                .iter()
                .map(|a| ArrivalRecord {
                    pick_id: a.pick.id.clone(),
                    net: a.pick.net.clone(),
                    sta: a.pick.sta.clone(),
                    phase: a.phase.clone(),
                    residual: a.residual,
                    distance: a.distance,
                    azimuth: a.azimuth,
                    excluded: a.excluded,
                    mode: a.pick.mode,
                })
                .collect(),
        }
    }
}

/// Writes one JSON object per published origin
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> OriginSink for JsonLinesSink<W> {
    fn publish(&mut self, origin: &Origin) {
        let record = OriginRecord::from(origin);
        let result = serde_json::to_writer(&mut self.writer, &record)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush());
        if let Err(e) = result {
            warn!(origin = origin.id, "Failed to write origin: {}", e);
        }
    }
}

/// Receiver of one line per processed pick
pub trait PickLog: Send {
    fn log(&mut self, pick: &Pick, now: Time);
}

/// Pick log that writes nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPickLog;

impl PickLog for NoPickLog {
    fn log(&mut self, _pick: &Pick, _now: Time) {}
}

/// Appends `now pick-id net sta time snr amp mode` lines to a file
pub struct FilePickLog {
    writer: BufWriter<File>,
}

impl FilePickLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

/// One pick log line
pub fn pick_log_line(pick: &Pick, now: Time) -> String {
    format!(
        "{} {:<40} {:<2} {:<5} {} {:7.1} {:10.1} {}",
        format_time(now),
        pick.id,
        pick.net,
        pick.sta,
        format_time(pick.time),
        pick.snr,
        pick.amp,
        pick.status_flag()
    )
}

impl PickLog for FilePickLog {
    fn log(&mut self, pick: &Pick, now: Time) {
        let line = pick_log_line(pick, now);
        if let Err(e) = writeln!(self.writer, "{}", line).and_then(|_| self.writer.flush()) {
            warn!(pick = %pick.id, "Failed to write pick log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_sink() {
        let mut ids = Vec::new();
        {
            let mut sink = |o: &Origin| ids.push(o.id);
            let mut origin = Origin::new(0.0, 0.0, 10.0, 0.0);
            origin.id = 5;
            sink.publish(&origin);
        }
        assert_eq!(ids, vec![5]);
    }

    #[test]
    fn test_json_lines_sink_writes_records() {
        let mut sink = JsonLinesSink::new(Vec::new());
        let mut origin = Origin::new(1.0, 2.0, 10.0, 1_700_000_000.0);
        origin.id = 7;
        sink.publish(&origin);
        sink.publish(&origin);
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let record: OriginRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record.id, 7);
        assert_eq!(record.depth, 10.0);
        assert!(record.time.starts_with("2023-11-14T22:13:20"));
    }

    #[test]
    fn test_file_pick_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("picks.log");
        let mut log = FilePickLog::open(&path).unwrap();
        let pick = Pick::new("20240101.000000.00-AIC-XX.AAA..BHZ", "XX", "AAA", 1_700_000_000.0).with_amplitudes(1500.0, 12.0);
        log.log(&pick, 1_700_000_010.0);
        log.log(&pick, 1_700_000_020.0);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("XX AAA"));
        assert!(content.lines().all(|l| l.ends_with(" A")));
    }
}
