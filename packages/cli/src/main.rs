#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the safe-return engine.
//!
//! `check-config` validates a TOML config file. `replay` runs a recorded
//! location trace against a set of geofences and prints every boundary
//! crossing as one JSON object per line.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use safe_return_geofence_models::{GeofenceSpec, LocationReport};
use safe_return_service::{Collaborators, Service, ServiceConfig};
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "safe_return", about = "Geofence and case escalation tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a TOML config, then print the effective values
    CheckConfig {
        /// Path to the config file
        path: PathBuf,
    },
    /// Replay a location trace against a set of geofences
    Replay {
        /// JSON array of geofences, each with an `ownerId`
        #[arg(long)]
        geofences: PathBuf,
        /// JSON Lines file of location reports, each with a `subjectId`
        #[arg(long)]
        reports: PathBuf,
        /// Optional TOML config; defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// One geofence in the replay input.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeofenceInput {
    owner_id: String,
    #[serde(flatten)]
    spec: GeofenceSpec,
}

/// One line of the replay trace.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportInput {
    subject_id: String,
    #[serde(flatten)]
    report: LocationReport,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { path } => {
            let config = ServiceConfig::load(&path)?;
            log::info!("{} is valid", path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Replay {
            geofences,
            reports,
            config,
        } => {
            let config = match config {
                Some(path) => ServiceConfig::load(path)?,
                None => ServiceConfig::default(),
            };
            replay(config, &geofences, &reports).await?;
        }
    }

    Ok(())
}

async fn replay(
    config: ServiceConfig,
    geofences: &Path,
    reports: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let zones: Vec<GeofenceInput> =
        serde_json::from_reader(BufReader::new(std::fs::File::open(geofences)?))?;

    let service = Service::start(
        config,
        Collaborators::in_memory(),
        safe_return_time::system_clock(),
    )
    .await?;

    for zone in zones {
        let created = service.create_geofence(&zone.owner_id, zone.spec)?;
        log::info!(
            "Registered geofence {} '{}' for {}",
            created.id,
            created.name,
            created.owner_id
        );
    }

    let mut replayed = 0_usize;
    let mut rejected = 0_usize;
    let mut transitions = 0_usize;
    let trace = BufReader::new(std::fs::File::open(reports)?);

    for (index, line) in trace.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let input: ReportInput = match serde_json::from_str(&line) {
            Ok(input) => input,
            Err(e) => {
                log::warn!("Skipping line {}: {e}", index + 1);
                rejected += 1;
                continue;
            }
        };
        match service.update_location(&input.subject_id, input.report) {
            Ok(events) => {
                replayed += 1;
                for event in events {
                    transitions += 1;
                    println!("{}", serde_json::to_string(&event)?);
                }
            }
            Err(e) => {
                log::warn!("Rejected report on line {}: {e}", index + 1);
                rejected += 1;
            }
        }
    }

    service.shutdown().await;
    log::info!("Replayed {replayed} report(s), {rejected} rejected, {transitions} transition(s)");
    Ok(())
}
