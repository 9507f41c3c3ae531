use std::collections::HashMap;
use std::sync::Arc;

use heater_core::DbUrl;
use heater_engine::{HeatError, HeaterHandle, ServerHeater, StoreClient};
use heater_logging::{heater_error, heater_info, heater_warn};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{DatabaseTarget, ServerTarget, Target};

/// Heats every target until `shutdown` fires or every heater has ended.
///
/// Returns the number of database heaters that ended with an error.
pub async fn heat(
    store: Arc<dyn StoreClient>,
    targets: Vec<Target>,
    shutdown: CancellationToken,
) -> usize {
    let mut tasks = JoinSet::new();
    for target in targets {
        match target {
            Target::Database(target) => {
                tasks.spawn(heat_database(store.clone(), target, shutdown.child_token()));
            }
            Target::Server(target) if target.all => {
                let heater = server_heater(store.clone(), target);
                tasks.spawn(heater.run(shutdown.child_token()));
            }
            Target::Server(target) => {
                for db in target.databases {
                    tasks.spawn(heat_database(store.clone(), db, shutdown.child_token()));
                }
            }
        }
    }

    let mut failures = 0;
    while let Some(outcome) = tasks.join_next().await {
        match outcome {
            Ok(failed) => failures += failed,
            Err(err) => {
                heater_error!("Heater task panicked: {}", err);
                failures += 1;
            }
        }
    }
    failures
}

fn server_heater(store: Arc<dyn StoreClient>, target: ServerTarget) -> ServerHeater {
    let mut security: HashMap<_, _> = target.security.into_iter().collect();
    let mut per_db = HashMap::new();
    for db in target.databases {
        let name = db.db.name().to_string();
        if let Some(doc) = db.security {
            security.insert(name.clone(), doc);
        }
        per_db.insert(name, db.config);
    }
    ServerHeater::new(store, target.server, target.config)
        .with_security(security)
        .with_database_configs(per_db)
        .with_interval(target.interval)
}

/// Heats one database. Returns 1 if heating ended with an error, else 0.
async fn heat_database(
    store: Arc<dyn StoreClient>,
    target: DatabaseTarget,
    cancel: CancellationToken,
) -> usize {
    let db = target.db;
    if let Some(security) = &target.security {
        if let Err(err) = store.put_security(&db, security).await {
            heater_error!("Could not set _security on {}: {}", db, err);
            return 1;
        }
    }

    let handle = HeaterHandle::start_with_cancel(store, db.clone(), target.config, cancel);
    match handle.wait().await {
        Ok(()) => {
            heater_info!("Stopped heating {}", db);
            0
        }
        Err(err) => {
            report(&db, &err);
            1
        }
    }
}

fn report(db: &DbUrl, err: &HeatError) {
    if err.is_integrity_violation() {
        heater_error!("Gave up heating {}; store data looks inconsistent: {}", db, err);
    } else {
        heater_warn!("Gave up heating {}: {}", db, err);
    }
}
