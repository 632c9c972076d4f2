use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use time::macros::format_description;

mod columns;
mod combine;
mod config;
mod extract;
mod filename;
mod imaging;
mod prep;
mod skeleton;

use config::TaskConfig;

#[derive(Parser)]
#[command(name = "FracLac Morphometry Pipeline")]
#[command(about = "Prepares mask batches for FracLac, combines FracLac box count outputs, and derives skeleton morphometrics.")]
#[command(version = "1.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    #[arg(short, long, default_value = "INFO", help = "Logging level (DEBUG, INFO, WARN, ERROR)")]
    log_level: String,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Clean mask images and chunk them into FracLac batch folders")]
    Prep {
        #[arg(long, help = "Folder with original mask images", required = true)]
        input: PathBuf,
        #[arg(short, long, help = "Output folder (FracLacImages and FracLacBatch are created inside)", required = true)]
        output: PathBuf,
        #[arg(long, default_value = "25", help = "Number of masks per batch folder")]
        batch_size: usize,
    },
    #[command(about = "Combine FracLac box count summaries into one CSV")]
    Combine {
        #[arg(long, help = "Folder containing the FracLac output folders", required = true)]
        data: PathBuf,
        #[arg(short, long, help = "Output folder for the combined CSV", required = true)]
        output: PathBuf,
    },
    #[command(about = "Skeletonize masks and derive per-cell morphometrics")]
    Skeleton {
        #[arg(long, help = "Folder with *_mask.tif images", required = true)]
        masks: PathBuf,
        #[arg(short, long, help = "Output folder for skeleton images and the results CSV", required = true)]
        output: PathBuf,
        #[arg(long, help = "Calibration in microns per pixel", required = true)]
        pixel_size: f64,
    },
    #[command(about = "Execute the tasks listed in a run configuration YAML file")]
    Run {
        #[arg(long, help = "Path to the run configuration YAML file", required = true)]
        run_config: PathBuf,
    },
}

fn format_elapsed(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let millis = elapsed.subsec_millis();
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}.{:03}s", seconds, millis)
    }
}

fn get_current_timestamp_str() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn execute_task(task: &TaskConfig) -> Result<()> {
    match task {
        TaskConfig::Prep { input, output, batch_size } => {
            let summary = prep::run_prep(input, output, *batch_size)?;
            info!(
                "Prep complete: {} masks cleaned, {} failed, {} batches",
                summary.cleaned, summary.failed, summary.batches
            );
        }
        TaskConfig::Combine { data, output } => {
            let summary = combine::run_combine(data, output)?;
            info!(
                "Combine complete: {} cells from {} folders ({} skipped), {} measurements per cell",
                summary.specimens, summary.folders, summary.skipped, summary.measurements
            );
        }
        TaskConfig::Skeleton { masks, output, pixel_size } => {
            let summary = skeleton::run_skeleton(masks, output, *pixel_size)?;
            info!(
                "Skeleton analysis complete: {} of {} masks processed, {} failed",
                summary.processed, summary.masks, summary.failed
            );
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_uppercase().as_str() {
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARN" | "WARNING" => LevelFilter::Warn,
        "ERROR" => LevelFilter::Error,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to INFO.", cli.log_level);
            LevelFilter::Info
        }
    };
    SimpleLogger::new()
        .with_level(log_level)
        .with_timestamp_format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .init()?;

    info!("Starting FracLac Morphometry Pipeline");
    info!("Run Timestamp: {}", get_current_timestamp_str());

    let tasks: Vec<TaskConfig> = match cli.command {
        Command::Prep { input, output, batch_size } => {
            vec![TaskConfig::Prep { input, output, batch_size }]
        }
        Command::Combine { data, output } => vec![TaskConfig::Combine { data, output }],
        Command::Skeleton { masks, output, pixel_size } => {
            vec![TaskConfig::Skeleton { masks, output, pixel_size }]
        }
        Command::Run { run_config } => {
            info!("Loading run configuration from: {}", run_config.display());
            let config = config::load_run_config(&run_config)?;
            if let Some(description) = &config.description {
                info!("  {}", description);
            }
            info!("Run config loaded: {} tasks.", config.tasks.len());
            config.tasks
        }
    };

    let mut failed_tasks = 0;
    for (i, task) in tasks.iter().enumerate() {
        info!("Processing Task {}/{} ({})", i + 1, tasks.len(), task.describe());
        if let Err(e) = execute_task(task) {
            error!("Task {} failed: {:#}", i + 1, e);
            failed_tasks += 1;
        }
    }

    info!("-------------------- FINAL SUMMARY --------------------");
    info!("Total execution time: {}", format_elapsed(start_time.elapsed()));
    info!("Tasks run: {}, failed: {}", tasks.len(), failed_tasks);
    info!("-------------------------------------------------------");

    if failed_tasks > 0 {
        std::process::exit(1);
    }

    Ok(())
}
