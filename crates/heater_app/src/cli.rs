//! Command-line flags of the `view-heater` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use heater_engine::StoreSettings;
use log::LevelFilter;

use crate::config::Settings;

/// Keeps CouchDB view indexes warm.
#[derive(Debug, Parser)]
#[command(name = "view-heater")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Server or database URLs to heat. Replaces `--couch` and config file targets.
    pub targets: Vec<String>,

    /// Server URL to heat.
    #[arg(long, env = "VIEW_HEATER_COUCH")]
    pub couch: Option<String>,

    /// Single database on `--couch` to heat.
    #[arg(long, requires = "couch")]
    pub db: Option<String>,

    /// Heat every database on the server, including ones created later.
    #[arg(long)]
    pub all: bool,

    /// JSON config file with defaults, server sections and database sections.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Longest a view may go unrefreshed, in milliseconds.
    #[arg(long, default_value_t = 180_000)]
    pub age: u64,

    /// Number of database updates that forces a refresh.
    #[arg(long, default_value_t = 100)]
    pub seq: u64,

    /// Number of database updates between compactions.
    #[arg(long, default_value_t = 2000)]
    pub compact: u64,

    /// How often `--all` looks for new databases, in milliseconds.
    #[arg(long, default_value_t = 3_600_000)]
    pub refresh: u64,

    /// User name for basic authentication.
    #[arg(long, env = "VIEW_HEATER_USER")]
    pub user: Option<String>,

    /// Password for basic authentication.
    #[arg(long, env = "VIEW_HEATER_PASS", hide_env_values = true)]
    pub pass: Option<String>,

    /// Log level: off, error, warn, info, debug or trace.
    #[arg(long, default_value = "info", value_parser = parse_log_level)]
    pub log: LevelFilter,

    /// Also append log output to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Store requests allowed in flight at once.
    #[arg(long, default_value_t = 8)]
    pub max_in_flight: usize,
}

impl Cli {
    /// Settings given by flags, before any config file layer.
    #[must_use]
    pub fn settings(&self) -> Settings {
        Settings {
            age: Duration::from_millis(self.age),
            seq: self.seq,
            compact: self.compact,
            refresh: Duration::from_millis(self.refresh),
            all: self.all,
            security: Default::default(),
        }
    }

    #[must_use]
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            request_timeout: Duration::from_secs(self.timeout),
            max_in_flight: self.max_in_flight,
            ..StoreSettings::default()
        }
    }
}

fn parse_log_level(name: &str) -> Result<LevelFilter, String> {
    heater_logging::parse_level(name).ok_or_else(|| format!("unknown log level {name:?}"))
}
