use heater_core::DbUrl;
use heater_logging::{heater_debug, heater_info, heater_warn};

use crate::{HeatError, StoreClient};

/// Asks the store to compact `db` and, once it accepts, to clean up orphaned view indexes.
///
/// The result reflects the compaction request only: a failed cleanup is
/// logged and otherwise ignored. Neither request waits for the store to
/// finish the work.
pub async fn compact_and_clean(store: &dyn StoreClient, db: &DbUrl) -> Result<(), HeatError> {
    store.compact(db).await.inspect_err(|err| {
        heater_warn!("Compaction request for {} failed: {}", db, err);
    })?;
    heater_debug!("Compaction accepted; sending view cleanup: {}", db);

    match store.view_cleanup(db).await {
        Ok(()) => heater_info!("Began compaction: {}", db),
        Err(err) => heater_warn!("View cleanup request for {} failed: {}", db, err),
    }
    Ok(())
}
