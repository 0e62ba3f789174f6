use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the mapcache binary.
#[derive(Debug, Parser)]
#[command(name = "mapcache", version, about = "Transactional query cache toolkit")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "MAPCACHE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the resolved cache definitions as JSON.
    Describe,
    /// Drive concurrent sessions through every configured cache.
    Simulate(SimulateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    /// Number of concurrent sessions.
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(usize))]
    pub threads: usize,

    /// Lookups issued by each session.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(usize))]
    pub queries: usize,

    /// Size of the key space the lookups draw from.
    #[arg(long = "distinct-keys", default_value_t = 64, value_parser = clap::value_parser!(usize))]
    pub distinct_keys: usize,

    /// Roll back every Nth transaction instead of committing it; 0 never does.
    #[arg(long = "rollback-every", default_value_t = 0, value_parser = clap::value_parser!(usize))]
    pub rollback_every: usize,
}

impl Default for SimulateArgs {
    fn default() -> Self {
        Self {
            threads: 4,
            queries: 1000,
            distinct_keys: 64,
            rollback_every: 0,
        }
    }
}
