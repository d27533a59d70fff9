//! tilld: till point-of-sale sync daemon
//!
//! Usage:
//!   tilld [--config /etc/till/config.toml] [COMMAND]
//!
//! Commands:
//!   run                  - background sync daemon [default]
//!   sync                 - run one full sync and print the result
//!   queue list|stats     - inspect the operation queue
//!   queue retry|clear    - reset failed operations / drop everything
//!   status               - queue, connectivity and watermark summary
//!   config show          - display the active configuration

mod commands;
mod daemon;
mod metrics;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use till_core::config::TillConfig;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tilld", version, about = "till offline-first sync daemon")]
struct Cli {
    /// Path to the till TOML configuration file
    #[arg(
        long,
        short = 'c',
        env = "TILL_CONFIG",
        default_value = "/etc/till/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "TILL_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "TILL_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the sync daemon until SIGTERM / SIGINT (default)
    Run,

    /// Drain the queue and run one full sync in both directions
    Sync,

    /// Operation queue management
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Show queue, connectivity and per-table watermark state
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum QueueAction {
    /// List queued operations in drain order
    List,
    /// Show pending / failed counts
    Stats,
    /// Give failed operations a fresh attempt budget and drain
    Retry,
    /// Drop every queued operation without replaying it
    Clear,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).await?;

    let level = cli.log.as_deref().unwrap_or(&config.daemon.log_level);
    let format = cli.log_format.clone().unwrap_or_else(|| {
        if config.daemon.log_format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    });
    init_logging(level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "tilld starting"
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => daemon::run(config).await,
        Commands::Sync => commands::sync(&config).await,
        Commands::Queue { action } => match action {
            QueueAction::List => commands::queue_list(&config).await,
            QueueAction::Stats => commands::queue_stats(&config).await,
            QueueAction::Retry => commands::queue_retry(&config).await,
            QueueAction::Clear => commands::queue_clear(&config).await,
        },
        Commands::Status => commands::status(&config).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => commands::config_show(&config),
    }
}

async fn load_config(path: &Path) -> Result<TillConfig> {
    if path.exists() {
        let path = path.to_path_buf();
        let config = tokio::task::spawn_blocking(move || TillConfig::from_file(&path)).await??;
        Ok(config)
    } else {
        // logging is not up yet
        eprintln!(
            "tilld: config file not found: {}  (using defaults)",
            path.display()
        );
        Ok(TillConfig::default())
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    // stdout is reserved for command output
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_config_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load_config(&tmp.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.queue.default_max_attempts, 5);
    }

    #[tokio::test]
    async fn config_file_is_parsed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("till.toml");
        std::fs::write(&path, "[sync]\ninterval_secs = 60\n").unwrap();
        let config = load_config(&path).await.unwrap();
        assert_eq!(config.sync.interval_secs, 60);
    }

    #[tokio::test]
    async fn malformed_config_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("till.toml");
        std::fs::write(&path, "[sync\n").unwrap();
        assert!(load_config(&path).await.is_err());
    }

    #[test]
    fn subcommands_parse() {
        let cli = Cli::try_parse_from(["tilld", "-c", "/tmp/x.toml", "queue", "retry"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Queue {
                action: QueueAction::Retry
            })
        ));
        let cli = Cli::try_parse_from(["tilld", "--log-format", "json"]).unwrap();
        assert!(cli.command.is_none());
        assert!(matches!(cli.log_format, Some(LogFormat::Json)));
    }
}
