//! Layered settings and target resolution.
//!
//! Settings are layered lowest to highest: built-in defaults, command-line
//! flags, the config file's top level, a server section, a database section.
//! In the config file, keys that are `http(s)://` URLs open server sections
//! and keys starting with `/` inside a server section open database sections:
//!
//! ```json
//! {
//!   "age": 60000,
//!   "http://localhost:5984": {
//!     "seq": 50,
//!     "/music": { "age": 10000 }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use heater_core::{scrub_credentials, DbUrl, HeaterConfig, ServerUrl, UrlError};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::cli::Cli;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Syntax(#[from] serde_json::Error),
    #[error("config section {0} must be an object")]
    NotAnObject(String),
    #[error("not an http(s) URL: {0}")]
    NotUrl(String),
    #[error("Overlapping configuration for URL: {0}")]
    Overlapping(String),
    #[error(transparent)]
    InvalidUrl(#[from] UrlError),
    #[error("nothing to heat: pass a URL, --couch, or a config file with server sections")]
    NoTargets,
    #[error("no databases to heat on {0}: use --db, --all or database sections")]
    NoDatabases(String),
}

/// Fully layered settings for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub age: Duration,
    pub seq: u64,
    pub compact: u64,
    pub refresh: Duration,
    pub all: bool,
    /// `_security` documents keyed by database name.
    pub security: BTreeMap<String, Value>,
}

impl Settings {
    /// Returns these settings with every field `overrides` sets replaced.
    #[must_use]
    pub fn layered(&self, overrides: &Overrides) -> Self {
        let mut security = self.security.clone();
        if let Some(more) = &overrides.security {
            security.extend(more.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Self {
            age: overrides.age.map_or(self.age, Duration::from_millis),
            seq: overrides.seq.unwrap_or(self.seq),
            compact: overrides.compact.unwrap_or(self.compact),
            refresh: overrides.refresh.map_or(self.refresh, Duration::from_millis),
            all: overrides.all.unwrap_or(self.all),
            security,
        }
    }

    #[must_use]
    pub fn heater_config(&self) -> HeaterConfig {
        HeaterConfig {
            max_age: self.age,
            max_seq: self.seq,
            compact_threshold: self.compact,
        }
    }
}

/// One config file layer. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Overrides {
    pub age: Option<u64>,
    pub seq: Option<u64>,
    pub compact: Option<u64>,
    pub refresh: Option<u64>,
    pub all: Option<bool>,
    pub security: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Clone)]
struct ServerSection {
    url: String,
    overrides: Overrides,
    databases: Vec<DatabaseSection>,
}

#[derive(Debug, Clone)]
struct DatabaseSection {
    name: String,
    overrides: Overrides,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    top: Overrides,
    servers: Vec<ServerSection>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let root: Map<String, Value> = serde_json::from_str(text)?;
        let (sections, top) = split(root, is_url);
        let top = overrides_from(top)?;

        let mut claimed = HashSet::new();
        let mut servers = Vec::new();
        for (raw, body) in sections {
            let Value::Object(body) = body else {
                return Err(ConfigError::NotAnObject(scrub_credentials(&raw)));
            };
            let url = normalize(&raw)?;
            claim(&mut claimed, &url)?;

            let (db_sections, rest) = split(body, |key| key.starts_with('/'));
            let mut databases = Vec::new();
            for (key, body) in db_sections {
                let Value::Object(body) = body else {
                    return Err(ConfigError::NotAnObject(scrub_credentials(&format!(
                        "{url}{key}"
                    ))));
                };
                let full = normalize(&format!("{url}/{key}"))?;
                claim(&mut claimed, &full)?;
                databases.push(DatabaseSection {
                    name: full
                        .strip_prefix(url.as_str())
                        .unwrap_or(&full)
                        .trim_matches('/')
                        .to_string(),
                    overrides: overrides_from(body)?,
                });
            }
            servers.push(ServerSection {
                url,
                overrides: overrides_from(rest)?,
                databases,
            });
        }
        Ok(Self { top, servers })
    }

    /// Normalized URLs of every server section, in key order.
    pub fn server_urls(&self) -> impl Iterator<Item = &str> {
        self.servers.iter().map(|section| section.url.as_str())
    }

    /// Layers the sections that apply to `url` (already normalized) over `base`.
    ///
    /// Returns the layered settings and the database sections under `url`
    /// when it names a server section.
    fn settings_for(&self, url: &str, base: &Settings) -> (Settings, Vec<(String, Settings)>) {
        for section in &self.servers {
            let server_settings = base.layered(&section.overrides);
            if url == section.url {
                let databases = section
                    .databases
                    .iter()
                    .map(|db| (db.name.clone(), server_settings.layered(&db.overrides)))
                    .collect();
                return (server_settings, databases);
            }
            let Some(name) = url
                .strip_prefix(section.url.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            else {
                continue;
            };
            let settings = match section.databases.iter().find(|db| db.name == name) {
                Some(db) => server_settings.layered(&db.overrides),
                None => server_settings,
            };
            return (settings, Vec::new());
        }
        (base.clone(), Vec::new())
    }
}

/// One database to heat.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseTarget {
    pub db: DbUrl,
    pub config: HeaterConfig,
    /// `_security` document installed before heating starts.
    pub security: Option<Value>,
}

/// A server whose databases are heated.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerTarget {
    pub server: ServerUrl,
    pub config: HeaterConfig,
    /// Heat every database, rediscovering each `interval`.
    pub all: bool,
    pub interval: Duration,
    pub security: BTreeMap<String, Value>,
    /// Databases with their own section; heated even when `all` is off.
    pub databases: Vec<DatabaseTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Database(DatabaseTarget),
    Server(ServerTarget),
}

/// Works out what to heat from the command line and an optional config file.
///
/// Targets come from positional URLs, else `--couch` (with `--db`), else
/// every server section of the config file. A URL with a path names a
/// database; one without names a server.
pub fn resolve(cli: &Cli, file: Option<&ConfigFile>) -> Result<Vec<Target>, ConfigError> {
    let empty = ConfigFile::default();
    let file = file.unwrap_or(&empty);
    let base = cli.settings().layered(&file.top);
    let credentials = cli.user.as_ref().map(|user| (user.clone(), cli.pass.clone()));

    let urls: Vec<String> = if !cli.targets.is_empty() {
        cli.targets
            .iter()
            .map(|target| normalize(target))
            .collect::<Result<_, _>>()?
    } else if let Some(couch) = &cli.couch {
        let couch = normalize(couch)?;
        match &cli.db {
            Some(db) => vec![normalize(&format!("{couch}/{db}"))?],
            None => vec![couch],
        }
    } else {
        file.server_urls().map(str::to_string).collect()
    };
    if urls.is_empty() {
        return Err(ConfigError::NoTargets);
    }

    let mut targets = Vec::with_capacity(urls.len());
    for url in urls {
        let (settings, databases) = file.settings_for(&url, &base);
        let target = if has_path(&url) {
            let mut db = DbUrl::parse(&url)?;
            if let Some((user, pass)) = &credentials {
                if db.credentials().is_none() {
                    db = db.with_credentials(user.clone(), pass.clone());
                }
            }
            Target::Database(database_target(db, &settings))
        } else {
            let mut server = ServerUrl::parse(&url)?;
            if let Some((user, pass)) = &credentials {
                if server.credentials().is_none() {
                    server = server.with_credentials(user.clone(), pass.clone());
                }
            }
            if !settings.all && databases.is_empty() {
                return Err(ConfigError::NoDatabases(server.to_string()));
            }
            let databases = databases
                .iter()
                .map(|(name, db_settings)| database_target(server.database(name), db_settings))
                .collect();
            Target::Server(ServerTarget {
                config: settings.heater_config(),
                all: settings.all,
                interval: settings.refresh,
                security: settings.security.clone(),
                databases,
                server,
            })
        };
        targets.push(target);
    }
    Ok(targets)
}

fn database_target(db: DbUrl, settings: &Settings) -> DatabaseTarget {
    DatabaseTarget {
        security: settings.security.get(db.name()).cloned(),
        config: settings.heater_config(),
        db,
    }
}

fn is_url(key: &str) -> bool {
    split_scheme(key).is_some_and(|(_, rest)| !rest.is_empty())
}

fn split_scheme(raw: &str) -> Option<(&'static str, &str)> {
    ["http://", "https://"]
        .into_iter()
        .find_map(|scheme| raw.strip_prefix(scheme).map(|rest| (scheme, rest)))
}

/// Collapses repeated slashes and drops leading and trailing ones after the scheme.
pub fn normalize(raw: &str) -> Result<String, ConfigError> {
    let (scheme, rest) =
        split_scheme(raw).ok_or_else(|| ConfigError::NotUrl(scrub_credentials(raw)))?;
    let parts: Vec<&str> = rest.split('/').filter(|part| !part.is_empty()).collect();
    if parts.is_empty() {
        return Err(ConfigError::NotUrl(scrub_credentials(raw)));
    }
    Ok(format!("{scheme}{}", parts.join("/")))
}

fn has_path(normalized: &str) -> bool {
    split_scheme(normalized).is_some_and(|(_, rest)| rest.contains('/'))
}

fn claim(claimed: &mut HashSet<String>, url: &str) -> Result<(), ConfigError> {
    if claimed.insert(url.to_string()) {
        Ok(())
    } else {
        Err(ConfigError::Overlapping(scrub_credentials(url)))
    }
}

fn split(
    map: Map<String, Value>,
    pred: impl Fn(&str) -> bool,
) -> (Map<String, Value>, Map<String, Value>) {
    map.into_iter().partition(|(key, _)| pred(key))
}

fn overrides_from(map: Map<String, Value>) -> Result<Overrides, ConfigError> {
    Ok(serde_json::from_value(Value::Object(map))?)
}
