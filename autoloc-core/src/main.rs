//! Autoloc replay (autoloc-replay) - Main entry point
//!
//! Feeds a JSON-lines stream of picks, amplitudes and origins through the
//! association engine and writes every published origin as one JSON line
//! to stdout.
//!
//! Input lines look like:
//! - `{"type":"pick","id":"p1","net":"GE","sta":"UGM","time":1700000000.0,...}`
//! - `{"type":"amplitude","pick_id":"p1","amp_type":"snr","value":12.5}`
//! - `{"type":"origin","epoch":1700000000.0,"lat":-7.9,"lon":110.4,"depth":10,...}`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use autoloc_common::{time, AutolocConfig};
use autoloc_core::model::{Amplitude, Pick};
use autoloc_core::nucleator::{load_grid, GridSpec};
use autoloc_core::reference::{GaussNewtonSolver, HomogeneousModel};
use autoloc_core::sink::{FilePickLog, JsonLinesSink, OriginRecord};
use autoloc_core::stations::{StationConfigTable, StationLocationFile};
use autoloc_core::{Collaborators, Engine};
use clap::Parser;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for autoloc-replay
#[derive(Parser, Debug)]
#[command(name = "autoloc-replay")]
#[command(about = "Replay picks and amplitudes through the autoloc engine")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "AUTOLOC_CONFIG")]
    config: Option<PathBuf>,

    /// Station location file (NET STA lat lon elevation)
    #[arg(short, long)]
    stations: Option<PathBuf>,

    /// Station configuration file (NET STA usage maxNucDist)
    #[arg(long)]
    station_config: Option<PathBuf>,

    /// Nucleation grid file (lat lon depth radius maxStaDist minPickCount)
    #[arg(short, long)]
    grid: Option<PathBuf>,

    /// Spacing (degrees) of a global grid used when no grid file is given
    #[arg(long, default_value = "5.0")]
    grid_spacing: f64,

    /// P velocity (km/s) of the reference travel-time model
    #[arg(long, default_value = "6.0")]
    velocity: f64,

    /// Input file (JSON lines); stdin if omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Engine time follows pick creation times
    #[arg(long)]
    playback: bool,

    /// Engine time follows pick times
    #[arg(long)]
    offline: bool,
}

/// One line of replay input
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputEvent {
    Pick(Pick),
    Amplitude(Amplitude),
    Origin(OriginRecord),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AutolocConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    if args.playback {
        config.playback = true;
    }
    if args.offline {
        config.offline = true;
    }

    // Initialize tracing; RUST_LOG wins over the configured level
    let fallback = format!("autoloc_core={},autoloc_common={}", config.logging.level, config.logging.level);
    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };
    let stderr_layer = file_layer
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(file_layer)
        .with(stderr_layer)
        .init();

    info!("Starting autoloc replay");

    let station_path = args
        .stations
        .clone()
        .or_else(|| config.files.station_locations.clone())
        .context("No station location file given (--stations or files.station_locations)")?;
    let stations = StationLocationFile::load(&station_path)
        .with_context(|| format!("Failed to load stations from {}", station_path.display()))?;

    let station_config = match args.station_config.clone().or_else(|| config.files.station_config.clone()) {
        Some(path) => StationConfigTable::load(&path, config.default_max_nuc_dist)
            .with_context(|| format!("Failed to load station config from {}", path.display()))?,
        None => StationConfigTable::new(config.default_max_nuc_dist),
    };

    let grid = match args.grid.clone().or_else(|| config.files.grid.clone()) {
        Some(path) => load_grid(&path).with_context(|| format!("Failed to load grid from {}", path.display()))?,
        None => {
            let mut spec = GridSpec::global(args.grid_spacing);
            spec.nmin = config.min_phase_count;
            spec.depth = config.default_depth;
            info!("No grid file, using global grid at {} degrees", args.grid_spacing);
            spec.generate()
        }
    };

    let model = Arc::new(HomogeneousModel {
        vp: args.velocity,
        ..HomogeneousModel::default()
    });
    let collaborators = Collaborators {
        travel_times: model.clone(),
        solver: Arc::new(GaussNewtonSolver::new(model)),
        stations: Arc::new(stations),
    };

    let pick_log_path = config.files.pick_log.clone();
    let mut engine = Engine::new(config, collaborators, station_config, grid)
        .context("Failed to initialize engine")?;
    engine.set_sink(JsonLinesSink::new(std::io::stdout()));
    if let Some(path) = pick_log_path {
        let log = FilePickLog::open(&path)
            .with_context(|| format!("Failed to open pick log {}", path.display()))?;
        engine.set_pick_log(log);
    }
    info!("Engine initialized");

    let reader: Box<dyn AsyncRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let (tx, mut rx) = mpsc::channel::<InputEvent>(1024);
    let reader_task = tokio::spawn(read_events(reader, tx));

    let realtime = !engine.config().playback && !engine.config().offline;
    let mut timer = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    info!("End of input");
                    break;
                };
                dispatch(&mut engine, event);
            }
            _ = timer.tick(), if realtime => {
                engine.sync(time::now());
                engine.report();
                engine.cleanup(None);
            }
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal");
                reader_task.abort();
                break;
            }
        }
    }

    match reader_task.await {
        Ok(Ok(lines)) => debug!("Reader finished after {} lines", lines),
        Ok(Err(e)) => warn!("Reader failed: {:#}", e),
        Err(e) if e.is_cancelled() => debug!("Reader cancelled"),
        Err(e) => warn!("Reader task failed: {}", e),
    }

    let published = engine.report();
    if !published.is_empty() {
        info!("{} origins published at end of input", published.len());
    }
    let stats = engine.stats();
    info!(
        picks = stats.picks_received,
        processed = stats.picks_processed,
        amplitudes = stats.amplitudes_received,
        nucleated = stats.nucleated_origins,
        stored = stats.origins_stored,
        published = stats.origins_published,
        xxl = stats.xxl_origins,
        "Replay finished with {} live origins",
        engine.origin_count()
    );
    engine.dump_state();

    Ok(())
}

fn dispatch(engine: &mut Engine, event: InputEvent) {
    match event {
        InputEvent::Pick(pick) => {
            engine.feed_pick(pick);
        }
        InputEvent::Amplitude(amplitude) => {
            engine.feed_amplitude(&amplitude);
        }
        InputEvent::Origin(record) => {
            engine.feed_origin(&record);
        }
    }
}

/// Parse input lines and forward them to the engine loop
///
/// Malformed lines are logged and skipped. Returns the number of lines read.
async fn read_events(reader: Box<dyn AsyncRead + Unpin + Send>, tx: mpsc::Sender<InputEvent>) -> Result<usize> {
    let mut lines = BufReader::new(reader).lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        count += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<InputEvent>(line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("Skipping input line {}: {}", count, e),
        }
    }
    Ok(count)
}
