//! datapipe - fetch World Bank indicators, run the transform job, publish the result.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Local;
use clap::{Parser, Subcommand};
use datapipe_core::RunEvent;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use datapipe_runner::json_output;
use datapipe_runner::{Config, ConfigError};

/// datapipe - weekly indicator ETL runner
#[derive(Parser)]
#[command(name = "datapipe")]
#[command(about = "Fetch, transform, and publish World Bank indicator data", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "DATAPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit run events and the final report as JSON lines on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once now
    Run,

    /// Run the pipeline on the weekly schedule until interrupted
    Serve,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.json {
        json_output::enable_json_mode();
    }

    // Logs go to stderr so stdout stays clean for JSON lines.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("datapipe=info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            json_output::emit_error(&e.to_string());
            return Err(e.into());
        }
    };

    match cli.command {
        Commands::Run => {
            let succeeded = run_once(&config).await?;
            Ok(if succeeded {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Serve => {
            serve(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run the pipeline once for today; `Ok(false)` means the run failed.
async fn run_once(config: &Config) -> Result<bool, ConfigError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let pipeline = config.build_pipeline()?.with_observer(tx);
    let forwarder = tokio::spawn(forward_events(rx));

    let report = pipeline.run().await;
    // Closing the channel lets the forwarder drain and finish.
    drop(pipeline);
    let _ = forwarder.await;

    json_output::emit_report(&report.run, &report.outcome);
    match &report.outcome {
        Ok(stored) => info!(
            run_id = %report.run.run_id,
            bucket = %stored.bucket,
            key = %stored.key,
            size_bytes = stored.size_bytes,
            "Run complete"
        ),
        Err(e) => error!(
            run_id = %report.run.run_id,
            stage = %e.stage(),
            error = %e,
            "Run failed"
        ),
    }
    Ok(report.is_success())
}

async fn forward_events(mut rx: mpsc::UnboundedReceiver<RunEvent>) {
    while let Some(event) = rx.recv().await {
        json_output::emit_run_event(&event);
    }
}

/// Wait for each weekly trigger and run; a failed run does not stop the loop.
async fn serve(config: &Config) -> Result<(), ConfigError> {
    let schedule = config.schedule()?;
    info!(schedule = %schedule, "Starting datapipe scheduler");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let now = Local::now();
        let next = schedule.next_after(&now);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next = %next, wait_secs = wait.as_secs(), "Waiting for next trigger");
        json_output::emit_next_trigger(&next.to_rfc3339());

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = &mut shutdown => {
                info!("Shutdown requested, exiting");
                return Ok(());
            }
        }

        match run_once(config).await {
            Ok(true) => {}
            Ok(false) => warn!("Scheduled run failed, waiting for the next trigger"),
            Err(e) => {
                error!(error = %e, "Failed to assemble pipeline");
                json_output::emit_error(&e.to_string());
            }
        }
    }
}
