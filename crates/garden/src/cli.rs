//! Command-line interface for the garden primary.
//!
//! Every flag overrides the matching setting from the configuration file.

use clap::{value_parser, Arg, ArgMatches, Command};
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "garden.toml";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the number of workers
    pub workers: Option<usize>,
    /// Optional override for the plant store file
    pub data_path: Option<PathBuf>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses the process arguments. Exits with usage on bad input.
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&Self::command().try_get_matches_from(args)?))
    }

    fn command() -> Command {
        Command::new("garden")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Persistent plant world sharded over a pool of growth workers")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value(DEFAULT_CONFIG),
            )
            .arg(
                Arg::new("workers")
                    .short('w')
                    .long("workers")
                    .value_name("COUNT")
                    .help("Number of growth workers (0 = one per CPU)")
                    .value_parser(value_parser!(usize)),
            )
            .arg(
                Arg::new("data")
                    .short('d')
                    .long("data")
                    .value_name("FILE")
                    .help("Plant store file (JSON lines)"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)),
            workers: matches.get_one::<usize>("workers").copied(),
            data_path: matches.get_one::<String>("data").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}
