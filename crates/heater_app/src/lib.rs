//! # view-heater
//!
//! Keeps CouchDB view indexes warm so queries never wait on a stale index.
//!
//! Targets are given as URLs on the command line, as `--couch` with `--db` or
//! `--all`, or as server sections of a JSON config file; see [`config`].

pub mod cli;
pub mod config;
pub mod run;

pub use cli::Cli;
pub use config::{resolve, ConfigError, ConfigFile, DatabaseTarget, ServerTarget, Settings, Target};
pub use run::heat;
