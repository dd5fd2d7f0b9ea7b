//! # Garden - Primary Process
//!
//! Persistent plant world whose plants are sharded over a pool of growth
//! workers. This entry point handles CLI parsing, configuration loading, and
//! application lifecycle management.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (one worker per CPU)
//! garden
//!
//! # Specify custom configuration
//! garden --config production.toml
//!
//! # Override specific settings
//! garden --workers 4 --data /var/lib/garden/plants.jsonl --log-level debug
//!
//! # JSON logging for production
//! garden --json-logs
//! ```
//!
//! ## Configuration
//!
//! The primary loads configuration from a TOML file (default: `garden.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! On SIGINT (Ctrl+C) or SIGTERM every worker posts its partition back to
//! the store before the process exits. A second signal exits immediately.

use tracing::error;

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Main entry point for the garden primary.
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();

    let mut logging = config.logging.clone();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use config::{ClusterSettings, LoggingSettings, StorageSettings};
