mod check_cmd;
mod routes_cmd;
mod simulate_cmd;
mod terminal_output;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use canopy_config::{config_dir, config_file_path, HostConfig};
use canopy_logging::{init_logger, LoggerOptions};

#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "Canopy — micro-frontend host runtime tools")]
#[command(version)]
struct Cli {
    /// Path to canopy.yaml (defaults to $CANOPY_CONFIG_DIR/canopy.yaml or ~/.canopy/canopy.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the host config and report every problem found
    Check,
    /// Print the route table, or resolve the given paths against it
    Routes {
        /// Paths to resolve
        paths: Vec<String>,
    },
    /// Register every configured application with headless modules and
    /// navigate through the given paths
    Simulate {
        /// Paths to navigate to, in order
        #[arg(required = true)]
        paths: Vec<String>,
        /// Make the named application fail when mounted
        #[arg(long = "fail-mount")]
        fail_mount: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| config_file_path(&config_dir()));

    match cli.command {
        Commands::Check => {
            init_logging(None, cli.log_level.as_deref().or(Some("warn")));
            check_cmd::run(&path).await
        }
        Commands::Routes { paths } => {
            let config = load_with_logging(&path, cli.log_level.as_deref()).await?;
            routes_cmd::run(&config, &paths)
        }
        Commands::Simulate { paths, fail_mount } => {
            let config = load_with_logging(&path, cli.log_level.as_deref()).await?;
            simulate_cmd::run(&path, &config, &paths, &fail_mount).await
        }
    }
}

/// Load the config, install logging from it, then log its validation
/// findings so they reach the configured subscriber.
async fn load_with_logging(path: &Path, level_override: Option<&str>) -> Result<HostConfig> {
    let (config, report) = canopy_config::load_and_validate(path).await?;
    init_logging(Some(&config), level_override);
    canopy_config::log_report(&report);
    Ok(config)
}

fn init_logging(config: Option<&HostConfig>, level_override: Option<&str>) {
    let logging = config.and_then(|c| c.logging.clone()).unwrap_or_default();
    let options = LoggerOptions {
        level: level_override
            .map(str::to_string)
            .or(logging.level)
            .unwrap_or_else(|| "info".to_string()),
        dir: logging.dir,
        json: logging.json.unwrap_or(false),
    };
    init_logger(&options);
}
