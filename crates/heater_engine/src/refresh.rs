use futures_util::future::try_join_all;
use heater_core::{DbUrl, RefreshResult, Seq};
use heater_logging::{heater_debug, heater_info};

use crate::{DesignDocument, HeatError, StoreClient};

/// What a refresh pass did with one design document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DdocOutcome {
    Current,
    Busy,
    NoViews,
    Probed,
}

/// Brings every stale design document of `db` up to the database's current sequence.
///
/// The returned time is taken before the first request, so the result never
/// claims freshness the views might not have. Any failing request aborts the
/// whole pass; probes already answered are not undone.
pub async fn refresh(
    store: &dyn StoreClient,
    db: &DbUrl,
    last_processed_seq: Seq,
) -> Result<RefreshResult, HeatError> {
    let query_timestamp = tokio::time::Instant::now().into_std();
    let done = |seq: Seq| RefreshResult {
        seq,
        time: query_timestamp,
    };

    let info = store.database_info(db).await?;
    if info.db_name.as_deref().map_or(true, str::is_empty) {
        return Err(HeatError::store(format!("bad answer to database query: {db}")));
    }

    let db_update_seq = info.update_seq;
    if db_update_seq < last_processed_seq {
        return Err(HeatError::Regression {
            db: db.to_string(),
            previous: last_processed_seq,
            observed: db_update_seq,
        });
    }
    if db_update_seq == last_processed_seq {
        heater_debug!("No updates to {}, still on seq {}", db, db_update_seq);
        return Ok(done(db_update_seq));
    }
    if info.compact_running {
        heater_debug!("Going easy on {} because compaction is running", db);
        return Ok(done(db_update_seq));
    }

    let ddocs = store.design_documents(db).await?;
    if ddocs.is_empty() {
        heater_debug!("Database has no design documents; nothing to do: {}", db);
        return Ok(done(db_update_seq));
    }

    heater_debug!("Updating {} design documents in {}", ddocs.len(), db);
    let outcomes = try_join_all(
        ddocs
            .iter()
            .map(|ddoc| warm_design_document(store, db, ddoc, db_update_seq)),
    )
    .await?;

    let probed = outcomes
        .iter()
        .filter(|outcome| **outcome == DdocOutcome::Probed)
        .count();
    heater_debug!(
        "Completed all design documents for {}: {} probed, {} skipped",
        db,
        probed,
        outcomes.len() - probed
    );
    Ok(done(db_update_seq))
}

async fn warm_design_document(
    store: &dyn StoreClient,
    db: &DbUrl,
    ddoc: &DesignDocument,
    db_update_seq: Seq,
) -> Result<DdocOutcome, HeatError> {
    let info = store.design_document_info(db, &ddoc.id).await?;

    if info.update_seq > db_update_seq {
        return Err(HeatError::Consistency {
            db: db.to_string(),
            ddoc: ddoc.id.clone(),
            ddoc_seq: info.update_seq,
            db_seq: db_update_seq,
        });
    }
    if info.update_seq == db_update_seq {
        heater_debug!("{}/{} is up to date at seq {}", db, ddoc.id, db_update_seq);
        return Ok(DdocOutcome::Current);
    }
    if info.is_busy() {
        heater_debug!(
            "Going easy on {}/{}: compact_running={} updater_running={} waiting_clients={}",
            db,
            ddoc.id,
            info.compact_running,
            info.updater_running,
            info.waiting_clients
        );
        return Ok(DdocOutcome::Busy);
    }

    let Some(view) = ddoc.probe_target() else {
        heater_debug!("No views in {}/{}", db, ddoc.id);
        return Ok(DdocOutcome::NoViews);
    };
    store.probe_view(db, &ddoc.id, view).await?;
    heater_info!(
        "Views for {}/{} are at least up to seq {}",
        db,
        ddoc.id,
        db_update_seq
    );
    Ok(DdocOutcome::Probed)
}
