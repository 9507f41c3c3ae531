use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use heater_core::{HeaterConfig, ServerUrl};
use heater_logging::{heater_debug, heater_error, heater_info, heater_warn};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{HeatError, HeaterHandle, StoreClient};

/// How often the server is asked for new databases unless configured otherwise.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Heats every database on a server, picking up new databases as they appear.
///
/// A database is heated at most once per process: one that disappears keeps
/// its heater, and one whose heater failed is not restarted.
pub struct ServerHeater {
    store: Arc<dyn StoreClient>,
    server: ServerUrl,
    config: HeaterConfig,
    per_db: HashMap<String, HeaterConfig>,
    security: HashMap<String, Value>,
    interval: Duration,
    heaters: BTreeMap<String, HeaterHandle>,
}

impl ServerHeater {
    pub fn new(store: Arc<dyn StoreClient>, server: ServerUrl, config: HeaterConfig) -> Self {
        Self {
            store,
            server,
            config,
            per_db: HashMap::new(),
            security: HashMap::new(),
            interval: DEFAULT_DISCOVERY_INTERVAL,
            heaters: BTreeMap::new(),
        }
    }

    /// `_security` documents to install before a database is first heated, keyed by name.
    pub fn with_security(mut self, security: HashMap<String, Value>) -> Self {
        self.security = security;
        self
    }

    /// Thresholds for specific databases; everything else uses the server-wide config.
    pub fn with_database_configs(mut self, per_db: HashMap<String, HeaterConfig>) -> Self {
        self.per_db = per_db;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Names of databases with a heater, running or not.
    pub fn heated(&self) -> impl Iterator<Item = &str> {
        self.heaters.keys().map(String::as_str)
    }

    /// Lists the server's databases once and starts heaters for new ones.
    ///
    /// Returns the names started this round. A database whose `_security`
    /// document could not be installed is skipped and tried again next round.
    pub async fn discover(&mut self) -> Result<Vec<String>, HeatError> {
        let names = self.store.all_databases(&self.server).await?;
        if names.is_empty() {
            heater_info!("No databases on {}", self.server);
        }

        let mut started = Vec::new();
        for name in names {
            if self.heaters.contains_key(&name) {
                heater_debug!("Already heating: {}/{}", self.server, name);
                continue;
            }
            let db = self.server.database(&name);

            if let Some(security) = self.security.get(&name) {
                heater_debug!("Setting _security: {}", db);
                if let Err(err) = self.store.put_security(&db, security).await {
                    heater_error!("Could not set _security on {}: {}", db, err);
                    continue;
                }
                heater_debug!("Set _security for {}", db);
            }

            heater_debug!("Heating new database: {}", db);
            let config = self.per_db.get(&name).copied().unwrap_or(self.config);
            let handle = HeaterHandle::start(self.store.clone(), db, config);
            self.heaters.insert(name.clone(), handle);
            started.push(name);
        }
        Ok(started)
    }

    /// Runs discovery every interval until `cancel` fires, then stops every heater.
    ///
    /// Returns the number of heaters that ended with an error.
    pub async fn run(mut self, cancel: CancellationToken) -> usize {
        heater_debug!("Heating server: {}", self.server);
        loop {
            if let Err(err) = self.discover().await {
                heater_error!("Failure checking for databases on {}: {}", self.server, err);
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        self.shutdown().await
    }

    /// Stops every heater and waits for each to end.
    ///
    /// Returns the number of heaters that ended with an error.
    pub async fn shutdown(self) -> usize {
        for handle in self.heaters.values() {
            handle.stop();
        }
        let mut failures = 0;
        for (name, handle) in self.heaters {
            if let Err(err) = handle.wait().await {
                heater_warn!("Heater for {}/{} had failed: {}", self.server, name, err);
                failures += 1;
            }
        }
        failures
    }
}
