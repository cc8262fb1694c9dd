//! Gymkhana CLI
//!
//! Command-line front end for the race engine.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gymkhana_core::RaceSummary;
use gymkhana_engine::{RaceConfig, RaceManager, ReplayConfig, Replayer};
use gymkhana_event::Lap;
use gymkhana_schema::MICROS_PER_SECOND;
use gymkhana_tracker::Submission;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "gymkhana")]
#[command(about = "Gymkhana - time-trial race timing and lap matching", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a race fed by JSON submissions on stdin, one per line
    Run {
        /// Race configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Log level
        #[arg(short, long, default_value = "info")]
        log_level: String,
    },

    /// Replay a stored race summary and print its laps
    Replay {
        /// Race summary file
        summary: PathBuf,

        /// Replay speed multiplier (0 = as fast as possible)
        #[arg(short, long, default_value_t = 0.0)]
        speed: f64,

        /// Write the summary of the replayed race here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Log level
        #[arg(short, long, default_value = "info")]
        log_level: String,
    },

    /// Validate a race configuration file
    CheckConfig {
        /// Race configuration (YAML or JSON)
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, log_level } => {
            setup_logging(&log_level)?;
            run_race(config).await?;
        }
        Commands::Replay {
            summary,
            speed,
            output,
            log_level,
        } => {
            setup_logging(&log_level)?;
            replay_summary(summary, speed, output).await?;
        }
        Commands::CheckConfig { config } => {
            setup_logging("info")?;
            check_config(config)?;
        }
    }

    Ok(())
}

/// Install the subscriber; `RUST_LOG` overrides the level argument
fn setup_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))?;

    Ok(())
}

async fn run_race(config_path: PathBuf) -> Result<()> {
    let config = RaceConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let manager = RaceManager::new();
    let tracker = manager.start_with(&config)?;
    // submissions on stdin refer to riders by these ids
    println!("Grid");
    for (i, rider) in tracker.riders().iter().enumerate() {
        println!("{:>3}. {:<20} {}", i + 1, rider.name, rider.id);
    }
    println!();

    let (tx, rx) = mpsc::channel(1024);
    let ingest = manager.ingest(rx)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Race running. Close stdin or press Ctrl+C to stop.");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Submission>(&line) {
                    Ok(submission) => tx.send(submission).await?,
                    Err(e) => warn!(error = %e, "Skipping malformed submission"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    drop(tx);
    let stats = ingest.await?;
    info!(accepted = stats.accepted, rejected = stats.rejected, "Input closed");

    let laps = manager.best_laps()?;
    print_leaderboard(&laps);
    let summary = manager.stop()?;
    info!(events = summary.events.len(), "Race finished");

    Ok(())
}

async fn replay_summary(path: PathBuf, speed: f64, output: Option<PathBuf>) -> Result<()> {
    let summary = RaceSummary::read_file(&path)
        .with_context(|| format!("reading {}", path.display()))?;

    let replayer = Replayer::new(ReplayConfig {
        speed_multiplier: speed,
        ..Default::default()
    });
    let report = replayer.replay(&summary).await?;

    println!("Laps");
    for (i, lap) in report.laps.iter().enumerate() {
        println!("{:>3}. {:<20} {}", i + 1, lap.rider().name, format_lap(lap));
    }
    println!();

    print_leaderboard(&report.best_laps);

    if report.failed > 0 {
        warn!(failed = report.failed, "Some events were rejected during replay");
    }
    if let Some(output) = output {
        report.summary.write_file(&output)?;
    }

    Ok(())
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = RaceConfig::load(&path).with_context(|| format!("checking {}", path.display()))?;

    println!(
        "{}: ok ({} riders, start gate {}, end gate {}, match window {}s)",
        path.display(),
        config.riders.len(),
        config.tracker.start_gate_id,
        config.tracker.end_gate_id,
        config.tracker.end_match_timeout_secs
    );
    Ok(())
}

fn print_leaderboard(laps: &[Lap]) {
    println!("Leaderboard");
    for (i, lap) in laps.iter().enumerate() {
        println!("{:>3}. {:<20} {}", i + 1, lap.rider().name, format_lap(lap));
    }
}

fn format_lap(lap: &Lap) -> String {
    let Some(time) = lap.lap_time(true) else {
        return "DNF".to_string();
    };

    let mut text = format!("{:.3}s", time as f64 / MICROS_PER_SECOND as f64);
    if !lap.penalties().is_empty() {
        let seconds: u32 = lap.penalties().iter().map(|p| p.seconds).sum();
        text.push_str(&format!(" (+{}s)", seconds));
    }
    if lap.is_disqualified() {
        text.push_str(" DSQ");
    }
    text
}
