//! fencewatch scenario replay
//!
//! Runs a recorded scenario (regions, location samples, feed batches)
//! through a `FenceEngine` and prints every notification payload as one JSON
//! line on stdout, from the engine's delivery queue worker. Logs go to
//! stderr, filtered by `RUST_LOG`.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fencewatch::{
    AlertSink, DeliveryError, EngineConfig, FeedBatch, FenceEngine, FenceError, FenceResult,
    InMemoryNotificationLog, LocationSample, NotificationLog, NotificationPayload, OwnerId, Region,
    RegionChange, SubjectId,
};

/// Command-line options.
struct Args {
    scenario: Option<PathBuf>,
    config: Option<PathBuf>,
    history_for: Option<String>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        scenario: None,
        config: None,
        history_for: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--scenario" | "-s" => {
                if i + 1 < args.len() {
                    parsed.scenario = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --scenario requires a value");
                    std::process::exit(1);
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --config requires a value");
                    std::process::exit(1);
                }
            }
            "--history" => {
                if i + 1 < args.len() {
                    parsed.history_for = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    eprintln!("error: --history requires a value");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                println!("fencewatch-replay - replay a geofence scenario");
                println!();
                println!("USAGE:");
                println!("    fencewatch-replay --scenario <FILE> [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -s, --scenario <FILE>     Scenario JSON file");
                println!("    -c, --config <FILE>       Engine config JSON [default: built-in]");
                println!("        --history <PARENT>    Print the parent's breach history feed at the end");
                println!("    -h, --help                Print help information");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    parsed
}

/// Recorded input for one listening session.
#[derive(Debug, Deserialize)]
struct Scenario {
    session_start: DateTime<Utc>,
    #[serde(default)]
    viewer: Option<String>,
    #[serde(default)]
    names: HashMap<String, String>,
    #[serde(default)]
    regions: Vec<Region>,
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Step {
    Sample(LocationSample),
    Feed(FeedBatch),
    Region(RegionChange),
}

/// Writes each payload to stdout as a JSON line.
struct StdoutSink;

impl AlertSink for StdoutSink {
    fn deliver(&self, payload: &NotificationPayload) -> Result<(), DeliveryError> {
        let line = serde_json::to_string(payload).map_err(|e| DeliveryError::Rejected(e.to_string()))?;
        println!("{line}");
        Ok(())
    }
}

fn load_scenario(path: &Path) -> FenceResult<Scenario> {
    let text = std::fs::read_to_string(path).map_err(|e| FenceError::Config {
        message: format!("cannot read scenario {}: {e}", path.display()),
    })?;
    serde_json::from_str(&text).map_err(|e| FenceError::Config {
        message: format!("invalid scenario {}: {e}", path.display()),
    })
}

fn run(args: &Args) -> FenceResult<()> {
    let Some(scenario_path) = args.scenario.as_ref() else {
        return Err(FenceError::Config {
            message: "--scenario is required".to_string(),
        });
    };
    let config = match args.config.as_ref() {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let scenario = load_scenario(scenario_path)?;

    let log = Arc::new(InMemoryNotificationLog::new());
    let mut engine =
        FenceEngine::with_delivery_queue(config, Arc::new(StdoutSink), log.clone(), scenario.session_start)?;
    if let Some(viewer) = scenario.viewer.as_deref() {
        engine = engine.with_viewer(viewer);
    }

    for (subject, name) in scenario.names {
        engine.set_subject_name(subject, name)?;
    }
    for region in scenario.regions {
        engine.upsert_region(region)?;
    }

    let mut tracked: BTreeSet<SubjectId> = BTreeSet::new();
    let mut delivered = 0_usize;
    let mut failed = 0_usize;
    for (idx, step) in scenario.steps.into_iter().enumerate() {
        let report = match step {
            Step::Sample(sample) => match engine.handle_sample(&sample) {
                Ok(report) => {
                    tracked.insert(sample.subject.clone());
                    report
                }
                Err(err) => {
                    warn!(step = idx, error = %err, "sample skipped");
                    continue;
                }
            },
            Step::Feed(batch) => engine.handle_feed_batch(&batch),
            Step::Region(change) => {
                engine.apply_region_change(change)?;
                continue;
            }
        };
        delivered += report.delivered.len();
        failed += report.failures.len();
    }

    engine.close_delivery();

    if let Some(parent) = args.history_for.as_deref() {
        for record in log.list_for_parent(&OwnerId::from(parent))? {
            eprintln!("{}  {}", record.timestamp.to_rfc3339(), record.feed_title());
        }
    }

    let stats = engine.stats()?;
    info!(
        delivered,
        failed,
        dropped_samples = stats.dropped_samples,
        suppressed_events = stats.suppressed_events,
        queue_rejected = stats.queue_rejected,
        "replay finished"
    );
    for subject in tracked {
        if let Some(last) = engine.last_known_location(&subject)? {
            info!(subject = %subject, captured_at = %last.captured_at, "last known location");
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();
    if let Err(err) = run(&args) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
