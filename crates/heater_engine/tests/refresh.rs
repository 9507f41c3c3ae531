mod common;

use std::time::Duration;

use common::{db, Call, FakeStore};
use heater_engine::{refresh, DesignDocumentInfo, HeatError};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn idle_database_needs_no_design_document_work() {
    let store = FakeStore::new(42);
    store.add_ddoc("_design/app", &["by_date"], 10);

    let before = tokio::time::Instant::now().into_std();
    let result = refresh(store.as_ref(), &db(), 42).await.expect("refresh ok");

    assert_eq!(result.seq, 42);
    assert!(result.time >= before);
    assert_eq!(store.calls(), vec![Call::DatabaseInfo("music".into())]);
}

#[tokio::test]
async fn sequence_regression_is_fatal() {
    let store = FakeStore::new(5);
    let err = refresh(store.as_ref(), &db(), 10).await.unwrap_err();
    assert_eq!(
        err,
        HeatError::Regression {
            db: "http://localhost:5984/music".into(),
            previous: 10,
            observed: 5,
        }
    );
    assert!(err.is_integrity_violation());
    assert_eq!(store.calls().len(), 1);
}

#[tokio::test]
async fn running_compaction_backs_off() {
    let store = FakeStore::new(300);
    store.set_compact_running(true);
    store.add_ddoc("_design/app", &["by_date"], 10);

    let result = refresh(store.as_ref(), &db(), 100).await.expect("refresh ok");
    assert_eq!(result.seq, 300);
    assert_eq!(store.count(|c| matches!(c, Call::DesignDocuments(_))), 0);
}

#[tokio::test]
async fn missing_database_identity_is_a_store_error() {
    let store = FakeStore::new(3);
    store.set_db_name_missing();
    let err = refresh(store.as_ref(), &db(), 0).await.unwrap_err();
    assert!(matches!(err, HeatError::Store { .. }));
}

#[tokio::test]
async fn database_without_design_documents_is_trivially_warm() {
    let store = FakeStore::new(8);
    let result = refresh(store.as_ref(), &db(), 0).await.expect("refresh ok");
    assert_eq!(result.seq, 8);
    assert_eq!(
        store.calls(),
        vec![
            Call::DatabaseInfo("music".into()),
            Call::DesignDocuments("music".into())
        ]
    );
}

#[tokio::test]
async fn probes_only_the_design_document_that_is_behind() {
    let store = FakeStore::new(120);
    store.add_ddoc("_design/current", &["a", "b"], 120);
    store.add_ddoc("_design/behind", &["only"], 90);

    let before = tokio::time::Instant::now().into_std();
    let result = refresh(store.as_ref(), &db(), 100).await.expect("refresh ok");

    assert_eq!(result.seq, 120);
    assert!(result.time >= before);
    let probes: Vec<_> = store
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::ProbeView { .. }))
        .collect();
    assert_eq!(
        probes,
        vec![Call::ProbeView {
            ddoc: "_design/behind".into(),
            view: "only".into()
        }]
    );
}

#[tokio::test]
async fn busy_indexes_are_left_alone() {
    let store = FakeStore::new(50);
    let busy = [
        DesignDocumentInfo {
            update_seq: 1,
            compact_running: true,
            ..DesignDocumentInfo::default()
        },
        DesignDocumentInfo {
            update_seq: 1,
            updater_running: true,
            ..DesignDocumentInfo::default()
        },
        DesignDocumentInfo {
            update_seq: 1,
            waiting_clients: 3,
            ..DesignDocumentInfo::default()
        },
    ];
    for (i, info) in busy.into_iter().enumerate() {
        store.add_ddoc_with_info(&format!("_design/d{i}"), &["v"], info);
    }
    store.add_ddoc("_design/empty", &[], 1);

    let result = refresh(store.as_ref(), &db(), 0).await.expect("refresh ok");
    assert_eq!(result.seq, 50);
    assert_eq!(store.count(|c| matches!(c, Call::ProbeView { .. })), 0);
    assert_eq!(store.count(|c| matches!(c, Call::DesignDocumentInfo(_))), 4);
}

#[tokio::test]
async fn index_ahead_of_database_is_a_consistency_error() {
    let store = FakeStore::new(50);
    store.add_ddoc("_design/app", &["v"], 51);
    let err = refresh(store.as_ref(), &db(), 0).await.unwrap_err();
    assert!(matches!(
        err,
        HeatError::Consistency {
            ddoc_seq: 51,
            db_seq: 50,
            ..
        }
    ));
}

#[tokio::test]
async fn failed_probe_aborts_the_pass() {
    let store = FakeStore::new(50);
    store.add_ddoc("_design/app", &["v"], 10);
    store.fail_probes(HeatError::Timeout("view query".into()));

    let err = refresh(store.as_ref(), &db(), 0).await.unwrap_err();
    assert_eq!(err, HeatError::Timeout("view query".into()));
    assert!(err.is_transient());
}

#[tokio::test(start_paused = true)]
async fn timestamp_is_taken_before_the_first_request() {
    let store = FakeStore::new(9);
    store.set_info_delay(Duration::from_secs(4));

    let before = tokio::time::Instant::now().into_std();
    let result = refresh(store.as_ref(), &db(), 0).await.expect("refresh ok");
    let after = tokio::time::Instant::now().into_std();

    assert_eq!(result.time, before);
    assert_eq!(after - before, Duration::from_secs(4));
}
