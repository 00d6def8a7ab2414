use anyhow::Result;
use clap::{Parser, Subcommand};
use frostbyte_core::{persist, Config, KernelSignaller, ProcDir, VERSION};
use frostbyte_daemon::{FrostByteDaemon, Paths};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// FrostByte - freezes idle desktop processes and thaws them on demand
#[derive(Parser, Debug)]
#[command(name = "frostbyte-daemon")]
#[command(version = VERSION)]
#[command(about = "FrostByte - idle process freezer", long_about = None)]
struct Cli {
    /// Path to configuration file (default: ~/.config/frostbyte/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path of the status snapshot written every scan
    #[arg(long)]
    status_file: Option<PathBuf>,

    /// Path of the focus pid file maintained by the window manager hook
    #[arg(long)]
    focus_file: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the freeze/thaw loop (the default)
    Run,

    /// Print the current status snapshot
    Status,

    /// Generate an example configuration file
    GenerateConfig {
        /// Output path for config file
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let mut paths = Paths::default_locations();
    if let Some(config) = cli.config {
        paths.config_file = config;
    }
    if let Some(status) = cli.status_file {
        paths.status_file = status;
    }
    if let Some(focus) = cli.focus_file {
        paths.focus_file = focus;
    }

    match cli.command {
        Some(Commands::Status) => show_status(&paths),
        Some(Commands::GenerateConfig { output }) => generate_config(&output),
        Some(Commands::Run) | None => run_daemon(paths).await,
    }
}

/// Run the daemon loop until killed.
async fn run_daemon(paths: Paths) -> Result<()> {
    info!("FrostByte v{} starting", VERSION);

    // A broken file at startup is worth a warning, not a refusal to run;
    // the hot-reload watcher picks it up once the user fixes it.
    let config = match Config::load(&paths.config_file) {
        Ok(config) => config,
        Err(e) => {
            warn!("config load failed, using defaults: {}", e);
            Config::default()
        }
    };
    info!(
        "config: poll {}s, scan {}s, freeze after {}m, min rss {} MB",
        config.poll_interval, config.scan_interval, config.freeze_after_minutes, config.min_rss_mb
    );

    // Only this user's processes are modeled; we could not signal the rest.
    let uid = nix::unistd::Uid::current().as_raw();
    let mut daemon = FrostByteDaemon::new(config, paths, ProcDir, KernelSignaller, Some(uid));
    daemon.run().await;
    Ok(())
}

/// Print the snapshot the running daemon last persisted.
fn show_status(paths: &Paths) -> Result<()> {
    let text = std::fs::read_to_string(&paths.status_file).map_err(|e| {
        anyhow::anyhow!(
            "cannot read {} ({}); is the daemon running?",
            paths.status_file.display(),
            e
        )
    })?;
    let data: serde_json::Value = serde_json::from_str(&text)?;

    let frozen = data["frozen"].as_array().cloned().unwrap_or_default();
    if frozen.is_empty() {
        println!("Nothing frozen.");
        return Ok(());
    }
    for entry in &frozen {
        println!(
            "{:>7}  {:<24} {:>6} MB  frozen for {}s",
            entry["pid"],
            entry["name"].as_str().unwrap_or("?"),
            entry["rss_mb"],
            entry["frozen_for_secs"]
        );
    }
    println!(
        "Total saved: {} MB (updated {})",
        data["saved_mb"],
        data["updated"].as_str().unwrap_or("?")
    );
    Ok(())
}

/// Write the example configuration file.
fn generate_config(output: &Path) -> Result<()> {
    persist::write_json_atomic(output, &Config::example_value())
        .map_err(|e| anyhow::anyhow!("failed to write {}: {}", output.display(), e))?;
    info!("example configuration written to {}", output.display());
    Ok(())
}

/// Initialize logging with file and stdout output.
fn init_logging() -> Result<()> {
    let log_dir = std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".local/state/frostbyte"))
        .unwrap_or_else(|_| PathBuf::from("./logs"));
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "frostbyte-daemon.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(true)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Keep the appender's worker thread alive for the process lifetime
    std::mem::forget(guard);

    Ok(())
}
