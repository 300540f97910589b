use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Overrides;
use crate::report::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "devmon", version, about = "Device telemetry collector and delivery pipeline")]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    /// Never contact the collector.
    #[arg(short, long, global = true, default_value_t = false)]
    pub offline: bool,
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
    #[arg(short = 'l', long, global = true)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect, aggregate and deliver (default).
    Run,
    /// List delivery summaries for every aggregation key.
    ListSends,
    /// Show the delivery summary of one aggregation key (YYYY-MM-DD HH:00).
    SearchSend(SearchSendArgs),
    /// Dump raw samples for a timestamp prefix, or the current hour.
    ShowCollection(ShowCollectionArgs),
}

#[derive(Args, Debug)]
pub struct SearchSendArgs {
    pub key: String,
}

#[derive(Args, Debug)]
pub struct ShowCollectionArgs {
    /// Timestamp prefix, e.g. "2025-01-01 10" or "2025-01-01 10:15:00".
    pub timestamp: Option<String>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            offline: self.offline,
            verbose: self.verbose,
            log_level: self.log_level.clone(),
        }
    }
}
