#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use heater_core::{DbUrl, Seq, ServerUrl};
use heater_engine::{
    Change, ChangeStream, DatabaseInfo, DesignDocument, DesignDocumentInfo, HeatError,
    StoreClient,
};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    DatabaseInfo(String),
    DesignDocuments(String),
    DesignDocumentInfo(String),
    ProbeView { ddoc: String, view: String },
    Compact(String),
    ViewCleanup(String),
    AllDatabases,
    PutSecurity(String),
    Changes { db: String, since: Seq },
}

struct Inner {
    db_seq: Seq,
    compact_running: bool,
    db_name_missing: bool,
    ddocs: Vec<(DesignDocument, DesignDocumentInfo)>,
    info_delay: Duration,
    info_failure: Option<HeatError>,
    probe_failure: Option<HeatError>,
    compact_failure: Option<HeatError>,
    databases: Vec<String>,
    security_failures: HashSet<String>,
    feeds: Vec<mpsc::UnboundedSender<Change>>,
    calls: Vec<Call>,
}

/// In-memory store whose every request is recorded.
pub struct FakeStore {
    inner: Mutex<Inner>,
}

impl FakeStore {
    pub fn new(db_seq: Seq) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                db_seq,
                compact_running: false,
                db_name_missing: false,
                ddocs: Vec::new(),
                info_delay: Duration::ZERO,
                info_failure: None,
                probe_failure: None,
                compact_failure: None,
                databases: Vec::new(),
                security_failures: HashSet::new(),
                feeds: Vec::new(),
                calls: Vec::new(),
            }),
        })
    }

    pub fn set_db_seq(&self, seq: Seq) {
        self.inner.lock().unwrap().db_seq = seq;
    }

    pub fn set_compact_running(&self, running: bool) {
        self.inner.lock().unwrap().compact_running = running;
    }

    pub fn set_db_name_missing(&self) {
        self.inner.lock().unwrap().db_name_missing = true;
    }

    pub fn add_ddoc(&self, id: &str, views: &[&str], update_seq: Seq) {
        let info = DesignDocumentInfo {
            update_seq,
            ..DesignDocumentInfo::default()
        };
        self.add_ddoc_with_info(id, views, info);
    }

    pub fn add_ddoc_with_info(&self, id: &str, views: &[&str], info: DesignDocumentInfo) {
        let ddoc = DesignDocument::new(id, views.iter().copied());
        self.inner.lock().unwrap().ddocs.push((ddoc, info));
    }

    /// Every database metadata request sleeps this long before answering.
    pub fn set_info_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().info_delay = delay;
    }

    pub fn fail_database_info(&self, err: HeatError) {
        self.inner.lock().unwrap().info_failure = Some(err);
    }

    pub fn fail_probes(&self, err: HeatError) {
        self.inner.lock().unwrap().probe_failure = Some(err);
    }

    pub fn fail_compaction(&self, err: HeatError) {
        self.inner.lock().unwrap().compact_failure = Some(err);
    }

    pub fn set_databases(&self, names: &[&str]) {
        self.inner.lock().unwrap().databases = names.iter().map(|n| n.to_string()).collect();
    }

    pub fn fail_security_for(&self, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .security_failures
            .insert(name.to_string());
    }

    pub fn allow_security_for(&self, name: &str) {
        self.inner.lock().unwrap().security_failures.remove(name);
    }

    /// Delivers a change notification to every open feed.
    pub fn push_change(&self, seq: Seq) {
        let inner = self.inner.lock().unwrap();
        for feed in &inner.feeds {
            let _ = feed.send(Change { seq, id: None });
        }
    }

    pub fn open_feeds(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.feeds.iter().filter(|feed| !feed.is_closed()).count()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| pred(call)).count()
    }

    pub fn info_calls(&self) -> usize {
        self.count(|call| matches!(call, Call::DatabaseInfo(_)))
    }

    fn record(&self, call: Call) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

#[async_trait::async_trait]
impl StoreClient for FakeStore {
    async fn database_info(&self, db: &DbUrl) -> Result<DatabaseInfo, HeatError> {
        self.record(Call::DatabaseInfo(db.name().to_string()));
        let (delay, answer) = {
            let inner = self.inner.lock().unwrap();
            let answer = match &inner.info_failure {
                Some(err) => Err(err.clone()),
                None => Ok(DatabaseInfo {
                    db_name: (!inner.db_name_missing).then(|| db.name().to_string()),
                    update_seq: inner.db_seq,
                    compact_running: inner.compact_running,
                }),
            };
            (inner.info_delay, answer)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        answer
    }

    async fn design_documents(&self, db: &DbUrl) -> Result<Vec<DesignDocument>, HeatError> {
        self.record(Call::DesignDocuments(db.name().to_string()));
        let inner = self.inner.lock().unwrap();
        Ok(inner.ddocs.iter().map(|(ddoc, _)| ddoc.clone()).collect())
    }

    async fn design_document_info(
        &self,
        _db: &DbUrl,
        ddoc_id: &str,
    ) -> Result<DesignDocumentInfo, HeatError> {
        self.record(Call::DesignDocumentInfo(ddoc_id.to_string()));
        let inner = self.inner.lock().unwrap();
        inner
            .ddocs
            .iter()
            .find(|(ddoc, _)| ddoc.id == ddoc_id)
            .map(|(_, info)| info.clone())
            .ok_or_else(|| HeatError::Store {
                message: format!("no such design document {ddoc_id}"),
            })
    }

    async fn probe_view(&self, _db: &DbUrl, ddoc_id: &str, view: &str) -> Result<(), HeatError> {
        self.record(Call::ProbeView {
            ddoc: ddoc_id.to_string(),
            view: view.to_string(),
        });
        match &self.inner.lock().unwrap().probe_failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn compact(&self, db: &DbUrl) -> Result<(), HeatError> {
        self.record(Call::Compact(db.name().to_string()));
        match &self.inner.lock().unwrap().compact_failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn view_cleanup(&self, db: &DbUrl) -> Result<(), HeatError> {
        self.record(Call::ViewCleanup(db.name().to_string()));
        Ok(())
    }

    async fn all_databases(&self, _server: &ServerUrl) -> Result<Vec<String>, HeatError> {
        self.record(Call::AllDatabases);
        Ok(self.inner.lock().unwrap().databases.clone())
    }

    async fn put_security(&self, db: &DbUrl, _security: &Value) -> Result<(), HeatError> {
        self.record(Call::PutSecurity(db.name().to_string()));
        if self.inner.lock().unwrap().security_failures.contains(db.name()) {
            return Err(HeatError::HttpStatus {
                status: 401,
                url: db.endpoint(["_security"]).to_string(),
                reason: "unauthorized".into(),
            });
        }
        Ok(())
    }

    fn changes(&self, db: &DbUrl, since: Seq) -> ChangeStream {
        self.record(Call::Changes {
            db: db.name().to_string(),
            since,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().feeds.push(tx);
        stream::unfold(rx, |mut rx| async move {
            let change = rx.recv().await?;
            Some((change, rx))
        })
        .boxed()
    }
}

pub fn db() -> DbUrl {
    DbUrl::parse("http://localhost:5984/music").unwrap()
}

/// Lets spawned heater tasks run without moving far on a paused clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
