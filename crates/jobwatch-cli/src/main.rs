//! Jobwatch CLI - launch, follow and summarize long-running server jobs.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use jobwatch_client::StatusReport;
use jobwatch_core::{EventChannel, HistoricalRun, Job, JobError, JobEvent, JobId, JobKind};
use jobwatch_tracker::{stats, JobTracker, TrackOptions, TrackerConfig};

/// Jobwatch CLI - job tracking tool
#[derive(Parser)]
#[command(name = "jobwatch")]
#[command(about = "Launch and follow long-running analysis, pipeline and report jobs", long_about = None)]
struct Cli {
    /// Job API base URL (overrides the config file)
    #[arg(short, long)]
    api: Option<String>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job without waiting for it
    Start {
        /// Job kind (quality-analysis, insight-analysis, pipeline-run, report-generation)
        #[arg(short, long, value_parser = parse_kind)]
        kind: JobKind,

        /// Job configuration as JSON
        #[arg(short, long, default_value = "{}")]
        input: String,
    },

    /// Show the current server status of a job
    Status {
        /// Job ID
        id: JobId,
    },

    /// Follow a submitted job until it finishes
    Track {
        /// Job ID
        id: JobId,

        #[arg(short, long, value_parser = parse_kind)]
        kind: JobKind,

        /// Poll interval in milliseconds (defaults per kind)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Submit a job, follow it and print its result
    Run {
        #[arg(short, long, value_parser = parse_kind)]
        kind: JobKind,

        /// Job configuration as JSON
        #[arg(short, long, default_value = "{}")]
        input: String,

        #[arg(long)]
        interval_ms: Option<u64>,

        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Wait for a report-generation job and print the report
    Report {
        /// Job ID
        id: JobId,
    },

    /// Cancel a job
    Cancel {
        /// Job ID
        id: JobId,
    },

    /// Summarize a saved run history (JSON array of runs)
    Stats {
        /// History file
        #[arg(long)]
        history: PathBuf,

        /// Window for the recent-failure count, in minutes
        #[arg(long, default_value_t = 60)]
        window_mins: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobwatch=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TrackerConfig::from_file(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(api) = cli.api {
        config.api_base_url = api;
    }

    match cli.command {
        Commands::Stats {
            history,
            window_mins,
        } => {
            print_stats(&history, Duration::from_secs(window_mins * 60))?;
        }
        command => {
            info!(api = %config.api_base_url, "Connecting to job API");
            let tracker = JobTracker::from_config(config)?;
            run_command(&tracker, command).await?;
        }
    }

    Ok(())
}

async fn run_command(tracker: &JobTracker, command: Commands) -> Result<(), JobError> {
    match command {
        Commands::Start { kind, input } => {
            let id = tracker.submit(kind, &parse_input(&input)?).await?;
            println!("Job submitted: {}", id);
        }
        Commands::Status { id } => {
            let report = tracker.api().get_status(&id).await?;
            print_report(&id, &report);
        }
        Commands::Track {
            id,
            kind,
            interval_ms,
            timeout_ms,
        } => {
            let options = with_overrides(tracker.options(kind), interval_ms, timeout_ms);
            follow_status_changes(tracker);
            let job = tracker.track(id, with_progress(options)).wait().await?;
            print_job(&job);
        }
        Commands::Run {
            kind,
            input,
            interval_ms,
            timeout_ms,
        } => {
            let options = with_overrides(tracker.options(kind), interval_ms, timeout_ms);
            follow_status_changes(tracker);
            let job = tracker
                .run(kind, &parse_input(&input)?, with_progress(options))
                .await?;
            print_job(&job);

            if job.status == jobwatch_core::JobStatus::Completed {
                let result = tracker.fetch_result(&job.id).await?;
                print_json(&result);
            }
        }
        Commands::Report { id } => {
            follow_status_changes(tracker);
            let report = tracker.wait_for_report(&id).await?;
            print_json(&report);
        }
        Commands::Cancel { id } => {
            tracker.cancel(&id).await?;
            println!("Cancel requested for job {}", id);
        }
        Commands::Stats { .. } => {}
    }
    Ok(())
}

fn parse_kind(s: &str) -> Result<JobKind, String> {
    s.parse::<JobKind>().map_err(|e| e.to_string())
}

fn parse_input(input: &str) -> Result<Value, JobError> {
    serde_json::from_str(input).map_err(|e| JobError::ConfigInvalid {
        message: format!("input is not valid JSON: {}", e),
    })
}

fn with_overrides(
    mut options: TrackOptions,
    interval_ms: Option<u64>,
    timeout_ms: Option<u64>,
) -> TrackOptions {
    if let Some(ms) = interval_ms {
        options = options.with_interval(Duration::from_millis(ms));
    }
    if let Some(ms) = timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }
    options
}

fn with_progress(options: TrackOptions) -> TrackOptions {
    options.on_progress(|job| {
        println!("  {:<10} {:>3}%", job.status.as_str(), job.progress);
    })
}

fn follow_status_changes(tracker: &JobTracker) {
    tracker
        .bus()
        .subscribe(EventChannel::StatusChange, |event| {
            if let JobEvent::StatusChange {
                job_id,
                status,
                previous_status,
                ..
            } = event
            {
                match previous_status {
                    Some(prev) => println!("{}: {} -> {}", job_id, prev, status),
                    None => println!("{}: {}", job_id, status),
                }
            }
            Ok(())
        });
}

fn print_job(job: &Job) {
    println!("  ID:         {}", job.id);
    println!("  Kind:       {}", job.kind);
    println!("  Status:     {}", job.status);
    println!("  Progress:   {}%", job.progress);
    if let Some(started) = job.started_at {
        println!("  Started:    {}", format_timestamp(started));
    }
    if let Some(completed) = job.completed_at {
        println!("  Completed:  {}", format_timestamp(completed));
    }
    if let Some(ms) = job.duration_ms() {
        println!("  Duration:   {}ms", ms);
    }
    if let Some(error) = &job.error {
        match &error.step {
            Some(step) => println!("  Error:      {} (step {})", error.message, step),
            None => println!("  Error:      {}", error.message),
        }
    }

    if !job.steps.is_empty() {
        println!("  Steps:");
        for step in &job.steps {
            println!("    - {} ({})", step.id, step.status);
            if let Some(error) = &step.error {
                println!("      Error: {}", error);
            }
        }
    }
}

fn print_report(id: &JobId, report: &StatusReport) {
    println!("  ID:         {}", id);
    println!("  Status:     {}", report.status);
    if let Some(progress) = report.progress {
        println!("  Progress:   {}%", progress);
    }
    if let Some(error) = &report.error {
        println!("  Error:      {}", error.message);
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(pretty) => println!("{}", pretty),
        Err(_) => println!("{}", value),
    }
}

fn print_stats(path: &PathBuf, window: Duration) -> Result<(), Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read history from '{}': {}", path.display(), e))?;
    let runs: Vec<HistoricalRun> = serde_json::from_str(&raw)?;

    let report = stats::report(&runs);
    let summary = &report.summary;

    println!("Runs:           {}", summary.total_runs);
    println!("Succeeded:      {}", summary.successful_runs);
    println!("Failed:         {}", summary.failed_runs);
    println!("Success rate:   {:.1}%", summary.success_rate);
    println!("Avg duration:   {:.0}ms", summary.average_duration);
    println!("Duration trend: {:+.1}%", report.duration_trend);
    println!(
        "Recent failures ({}m): {}",
        window.as_secs() / 60,
        stats::recent_failure_count(&runs, window)
    );

    if !report.by_kind.is_empty() {
        println!();
        println!("{:<20}  {:>6}  {:>8}  {:>10}", "KIND", "RUNS", "SUCCESS", "AVG MS");
        println!("{}", "-".repeat(50));
        for k in &report.by_kind {
            println!(
                "{:<20}  {:>6}  {:>7.1}%  {:>10.0}",
                k.kind.as_str(),
                k.summary.total_runs,
                k.summary.success_rate,
                k.summary.average_duration
            );
        }
    }

    if !report.step_failures.is_empty() {
        println!();
        println!("{:<24}  {:>8}", "FAILING STEP", "FAILURES");
        println!("{}", "-".repeat(34));
        for failure in &report.step_failures {
            println!("{:<24}  {:>8}", failure.step, failure.count);
        }
    }

    if !report.step_success.is_empty() {
        println!();
        println!("{:<24}  {:>6}  {:>8}", "STEP", "RUNS", "SUCCESS");
        println!("{}", "-".repeat(42));
        for step in &report.step_success {
            println!("{:<24}  {:>6}  {:>7.1}%", step.step, step.runs, step.success_rate);
        }
    }

    Ok(())
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}
