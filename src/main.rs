//! mediabridge - command-line front end for the native bridge
//!
//! Drives a download worker registered as a native-messaging host: checks it,
//! starts and follows downloads, and forwards the folder dialogs.
//!
//! # Execution Flow
//!
//! 1. Load `mediabridge.yaml` from the config directory (default `Bridge Data/`)
//! 2. Initialize logging → `<log_dir>/mediabridge.<date>`
//! 3. Create a tokio runtime and an [`Orchestrator`] for the configured host
//! 4. Run the requested command
//! 5. Log the metrics summary and shut the runtime down

use anyhow::{Result, bail};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use mediabridge::events::log_notices;
use mediabridge::{
    APP_NAME, ConfigManager, DownloadRequest, EventSink, JobNotification, NativeHostConnector,
    Orchestrator, VERSION,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "mediabridge", version)]
#[command(about = "Talk to a media download worker over native messaging", long_about = None)]
struct Cli {
    /// Directory containing mediabridge.yaml
    #[arg(long, global = true, default_value = "Bridge Data")]
    config_dir: Utf8PathBuf,

    /// Log at debug level regardless of the config file
    #[arg(long, global = true)]
    debug: bool,

    /// Also write logs to stderr
    #[arg(long, global = true)]
    console: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default mediabridge.yaml (kept if one exists unless --force)
    InitConfig {
        #[arg(long)]
        force: bool,
    },

    #[command(flatten)]
    Worker(WorkerCommand),
}

/// Commands that talk to the worker and need the runtime.
#[derive(Subcommand)]
enum WorkerCommand {
    /// Check that the worker starts and report its tool versions
    Test,

    /// Download a URL and follow its progress until it finishes (Ctrl-C cancels)
    Download {
        url: String,

        /// Label shown in notifications
        #[arg(long)]
        title: String,

        /// Quality preset from the config (e.g. best, 1080p, audio)
        #[arg(long, conflicts_with = "format")]
        quality: Option<String>,

        /// Raw format selector passed to the worker
        #[arg(long)]
        format: Option<String>,

        #[arg(long)]
        extension: Option<String>,

        /// Output directory
        #[arg(long)]
        output: Option<String>,

        #[arg(long)]
        subtitles: bool,

        #[arg(long)]
        audio_only: bool,

        #[arg(long, requires = "audio_only")]
        audio_quality: Option<String>,
    },

    /// Ask the worker to show a directory picker and print the choice
    SelectDir,

    /// Ask the worker to reveal a path in the file manager
    Open { path: Utf8PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new(&cli.config_dir)?;

    let command = match cli.command {
        Command::InitConfig { force } => {
            if config_manager.write_default_config(force)? {
                println!("Wrote {}", config_manager.config_path());
            } else {
                println!("{} already exists", config_manager.config_path());
            }
            return Ok(());
        }
        Command::Worker(command) => command,
    };

    let config = config_manager.load_config()?;

    let _guard = mediabridge::logging::setup_logging_with_console(
        &config.bridge.log_dir,
        APP_NAME,
        cli.debug || config.bridge.debug_mode,
        cli.console,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    tracing::info!(
        "Config loaded from {} - host: {}",
        config_manager.config_path(),
        config.bridge.host_name
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("mediabridge-worker")
        .build()?;

    let connector = Arc::new(NativeHostConnector::from_settings(&config.bridge));
    let events = EventSink::new();
    events.register(Arc::new(log_notices()));

    let orchestrator = Orchestrator::new(config, connector, events, runtime.handle().clone());

    let result = runtime.block_on(run(command, &orchestrator));

    orchestrator.disconnect();
    orchestrator.metrics().log_summary();
    runtime.shutdown_timeout(Duration::from_secs(5));

    tracing::info!("Shutdown complete");
    result
}

async fn run(command: WorkerCommand, orchestrator: &Orchestrator) -> Result<()> {
    match command {
        WorkerCommand::Test => {
            let report = orchestrator.test_connection().await;
            if report.ok {
                println!("Worker OK");
                println!(
                    "  worker version:     {}",
                    report.worker_version.as_deref().unwrap_or("unknown")
                );
                println!(
                    "  media tool version: {}",
                    report.media_tool_version.as_deref().unwrap_or("unknown")
                );
                Ok(())
            } else {
                bail!(
                    "Worker test failed: {}",
                    report.error.as_deref().unwrap_or("unknown error")
                )
            }
        }
        WorkerCommand::Download {
            url,
            title,
            quality,
            format,
            extension,
            output,
            subtitles,
            audio_only,
            audio_quality,
        } => {
            let mut request = DownloadRequest::new(url, title);
            if let Some(quality) = quality {
                let Some(selector) = orchestrator.config().downloads.format_for_quality(&quality)
                else {
                    bail!("Unknown quality preset: {}", quality);
                };
                request = request.with_format(selector);
            }
            if let Some(format) = format {
                request = request.with_format(format);
            }
            if let Some(extension) = extension {
                request = request.with_extension(extension);
            }
            if let Some(output) = output {
                request = request.with_output(output);
            }
            if subtitles {
                request = request.with_subtitles(true);
            }
            if audio_only {
                request = request.audio_only(audio_quality);
            }

            follow_download(orchestrator, request).await
        }
        WorkerCommand::SelectDir => {
            let path = orchestrator.select_output_location().await?;
            println!("{}", path);
            Ok(())
        }
        WorkerCommand::Open { path } => {
            orchestrator.open_location(&path).await?;
            Ok(())
        }
    }
}

/// Start a job and print its notifications until it reaches a terminal state.
async fn follow_download(orchestrator: &Orchestrator, request: DownloadRequest) -> Result<()> {
    // Subscribe first so the Started notification is not missed
    let mut notifications = orchestrator.subscribe();
    let job_id = orchestrator.start_job(request)?;
    println!("Job {}", job_id);

    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
    let mut cancel_requested = false;

    loop {
        let notification = tokio::select! {
            received = notifications.recv() => match received {
                Ok(notification) => notification,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} notifications", skipped);
                    continue;
                }
                Err(RecvError::Closed) => bail!("Notification stream closed"),
            },
            _ = &mut ctrl_c, if !cancel_requested => {
                cancel_requested = true;
                println!("Cancelling {}", job_id);
                if let Err(e) = orchestrator.cancel_job(&job_id).await {
                    // Finished before the cancel went through
                    tracing::debug!("Cancel of {} ignored: {}", job_id, e);
                }
                continue;
            }
        };

        if notification.job_id() != &job_id {
            continue;
        }

        match &notification {
            JobNotification::Started { label, .. } => println!("Started: {}", label),
            JobNotification::Progress { progress, .. } => println!("  {}", progress.summary()),
            JobNotification::Completed { filename, .. } => {
                println!("Complete: {}", filename.as_deref().unwrap_or("(no filename)"));
                return Ok(());
            }
            JobNotification::Failed { error, .. } => bail!("Download failed: {}", error),
            JobNotification::Cancelled { .. } => {
                println!("Cancelled");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_config_is_not_a_worker_command() {
        let cli = Cli::try_parse_from(["mediabridge", "init-config", "--force"]).unwrap();
        assert!(matches!(cli.command, Command::InitConfig { force: true }));

        let cli = Cli::try_parse_from(["mediabridge", "open", "/tmp"]).unwrap();
        assert!(matches!(cli.command, Command::Worker(WorkerCommand::Open { .. })));
    }
}
