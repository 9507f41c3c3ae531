use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::BoxStream;
use heater_core::{Credentials, DbUrl, Seq, ServerUrl};
use heater_logging::heater_trace;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::changes::{continuous_feed, FeedSettings};
use crate::types::parse_seq;
use crate::{Change, DatabaseInfo, DesignDocument, DesignDocumentInfo, HeatError};

/// Live change notifications for one database, in non-decreasing `seq` order.
///
/// The stream reconnects on its own; it ends only if the transport gives up.
pub type ChangeStream = BoxStream<'static, Change>;

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub connect_timeout: Duration,
    /// Deadline for every request except the change feed.
    pub request_timeout: Duration,
    /// Store requests allowed in flight at once across all heaters.
    pub max_in_flight: usize,
    /// Heartbeat asked of the change feed; a silent feed is dropped after twice this.
    pub heartbeat: Duration,
    /// Pause before reopening a change feed that closed or failed.
    pub reconnect_delay: Duration,
    /// Longest change feed line accepted before the feed is reopened.
    pub max_feed_line_bytes: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_in_flight: 8,
            heartbeat: Duration::from_secs(55),
            reconnect_delay: Duration::from_secs(5),
            max_feed_line_bytes: 1024 * 1024,
        }
    }
}

/// The document store operations the heater depends on.
#[async_trait::async_trait]
pub trait StoreClient: Send + Sync {
    async fn database_info(&self, db: &DbUrl) -> Result<DatabaseInfo, HeatError>;

    async fn design_documents(&self, db: &DbUrl) -> Result<Vec<DesignDocument>, HeatError>;

    async fn design_document_info(
        &self,
        db: &DbUrl,
        ddoc_id: &str,
    ) -> Result<DesignDocumentInfo, HeatError>;

    /// Queries one row of `view`; returns once the view index has caught up.
    async fn probe_view(&self, db: &DbUrl, ddoc_id: &str, view: &str) -> Result<(), HeatError>;

    async fn compact(&self, db: &DbUrl) -> Result<(), HeatError>;

    async fn view_cleanup(&self, db: &DbUrl) -> Result<(), HeatError>;

    async fn all_databases(&self, server: &ServerUrl) -> Result<Vec<String>, HeatError>;

    async fn put_security(&self, db: &DbUrl, security: &Value) -> Result<(), HeatError>;

    fn changes(&self, db: &DbUrl, since: Seq) -> ChangeStream;
}

/// CouchDB over HTTP. One connection pool is shared by every heater using this store.
#[derive(Debug, Clone)]
pub struct ReqwestStore {
    client: reqwest::Client,
    settings: StoreSettings,
    permits: Arc<Semaphore>,
}

impl ReqwestStore {
    pub fn new(settings: StoreSettings) -> Result<Self, HeatError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| HeatError::Transport(err.to_string()))?;
        let permits = Arc::new(Semaphore::new(settings.max_in_flight.max(1)));
        Ok(Self {
            client,
            settings,
            permits,
        })
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    async fn request(
        &self,
        method: Method,
        url: Url,
        credentials: Option<&Credentials>,
        body: Option<&Value>,
    ) -> Result<(StatusCode, Value), HeatError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| HeatError::Transport("store client shut down".into()))?;
        heater_trace!("{} {}", method, url);
        let method_sends_body = method == Method::POST || method == Method::PUT;

        let mut request = self
            .client
            .request(method, url.clone())
            .timeout(self.settings.request_timeout)
            .header(ACCEPT, "application/json");
        if let Some(credentials) = credentials {
            request = request.basic_auth(&credentials.username, credentials.password.as_ref());
        }
        if method_sends_body {
            request = request.header(CONTENT_TYPE, "application/json");
        }
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            // Proxies in front of the store answer errors with HTML or plain text.
            let reason = match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => error_reason(&value),
                Err(_) => String::from_utf8_lossy(&bytes).trim().to_string(),
            };
            return Err(HeatError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
                reason,
            });
        }
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|err| HeatError::store(format!("invalid JSON from {url}: {err}")))?
        };
        if value.get("error").is_some() {
            return Err(HeatError::store(format!(
                "{url} answered with an error: {}",
                error_reason(&value)
            )));
        }
        Ok((status, value))
    }

    async fn get(&self, db: &DbUrl, url: Url) -> Result<Value, HeatError> {
        let (_, value) = self.request(Method::GET, url, db.credentials(), None).await?;
        Ok(value)
    }

    /// POST that the store must acknowledge with `202 Accepted` and `{"ok":true}`.
    async fn post_accepted(&self, db: &DbUrl, url: Url) -> Result<(), HeatError> {
        let (status, value) = self
            .request(Method::POST, url.clone(), db.credentials(), None)
            .await?;
        if status != StatusCode::ACCEPTED {
            return Err(HeatError::store(format!(
                "expected 202 from {url}, got {status}: {value}"
            )));
        }
        expect_ok(&url, &value)
    }
}

#[async_trait::async_trait]
impl StoreClient for ReqwestStore {
    async fn database_info(&self, db: &DbUrl) -> Result<DatabaseInfo, HeatError> {
        let url = db.url();
        let body: DatabaseBody = decode(&url, self.get(db, url.clone()).await?)?;
        let update_seq = parse_seq(&body.update_seq)
            .ok_or_else(|| HeatError::store(format!("no usable update_seq from {url}")))?;
        Ok(DatabaseInfo {
            db_name: body.db_name,
            update_seq,
            compact_running: body.compact_running,
        })
    }

    async fn design_documents(&self, db: &DbUrl) -> Result<Vec<DesignDocument>, HeatError> {
        let mut url = db.endpoint(["_all_docs"]);
        url.query_pairs_mut()
            .append_pair("include_docs", "true")
            .append_pair("startkey", "\"_design/\"")
            .append_pair("endkey", "\"_design0\"");
        let body: AllDocsBody = decode(&url, self.get(db, url.clone()).await?)?;
        let ddocs = body
            .rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(|doc| DesignDocument {
                id: doc.id,
                views: doc.views.into_keys().collect(),
            })
            .collect();
        Ok(ddocs)
    }

    async fn design_document_info(
        &self,
        db: &DbUrl,
        ddoc_id: &str,
    ) -> Result<DesignDocumentInfo, HeatError> {
        let mut segments = ddoc_segments(ddoc_id);
        segments.push("_info");
        let url = db.endpoint(segments);
        let body: DesignInfoBody = decode(&url, self.get(db, url.clone()).await?)?;
        // Index fields live under `view_index`; some stores put them at the top level.
        let index = body.view_index.unwrap_or(body.top_level);
        let update_seq = parse_seq(&index.update_seq)
            .ok_or_else(|| HeatError::store(format!("no usable update_seq from {url}")))?;
        let waiting_clients = match index.waiting_clients {
            Value::Number(n) => n.as_u64().unwrap_or(0),
            Value::Array(clients) => clients.len() as u64,
            Value::Bool(true) => 1,
            _ => 0,
        };
        Ok(DesignDocumentInfo {
            update_seq,
            compact_running: index.compact_running,
            updater_running: index.updater_running,
            waiting_clients,
        })
    }

    async fn probe_view(&self, db: &DbUrl, ddoc_id: &str, view: &str) -> Result<(), HeatError> {
        let mut segments = ddoc_segments(ddoc_id);
        segments.extend(["_view", view]);
        let mut url = db.endpoint(segments);
        url.query_pairs_mut().append_pair("limit", "1");
        self.get(db, url).await.map(|_| ())
    }

    async fn compact(&self, db: &DbUrl) -> Result<(), HeatError> {
        self.post_accepted(db, db.endpoint(["_compact"])).await
    }

    async fn view_cleanup(&self, db: &DbUrl) -> Result<(), HeatError> {
        self.post_accepted(db, db.endpoint(["_view_cleanup"])).await
    }

    async fn all_databases(&self, server: &ServerUrl) -> Result<Vec<String>, HeatError> {
        let url = server.endpoint(["_all_dbs"]);
        let (_, body) = self
            .request(Method::GET, url.clone(), server.credentials(), None)
            .await?;
        decode(&url, body)
    }

    async fn put_security(&self, db: &DbUrl, security: &Value) -> Result<(), HeatError> {
        let url = db.endpoint(["_security"]);
        let (_, body) = self
            .request(Method::PUT, url.clone(), db.credentials(), Some(security))
            .await?;
        expect_ok(&url, &body)
    }

    fn changes(&self, db: &DbUrl, since: Seq) -> ChangeStream {
        let settings = FeedSettings {
            heartbeat: self.settings.heartbeat,
            reconnect_delay: self.settings.reconnect_delay,
            max_line_bytes: self.settings.max_feed_line_bytes,
        };
        continuous_feed(self.client.clone(), db.clone(), since, settings)
    }
}

/// Path segments of a document id; `_design/app` keeps its slash unescaped.
fn ddoc_segments(ddoc_id: &str) -> Vec<&str> {
    match ddoc_id.strip_prefix("_design/") {
        Some(name) => vec!["_design", name],
        None => vec![ddoc_id],
    }
}

/// `GET /{db}`.
#[derive(Debug, Deserialize)]
struct DatabaseBody {
    db_name: Option<String>,
    #[serde(default)]
    update_seq: Value,
    #[serde(default)]
    compact_running: bool,
}

/// `GET /{db}/_all_docs?include_docs=true`.
#[derive(Debug, Deserialize)]
struct AllDocsBody {
    rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
struct AllDocsRow {
    doc: Option<DesignDocumentBody>,
}

#[derive(Debug, Deserialize)]
struct DesignDocumentBody {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    views: BTreeMap<String, IgnoredAny>,
}

/// `GET /{db}/_design/{ddoc}/_info`.
#[derive(Debug, Deserialize)]
struct DesignInfoBody {
    view_index: Option<IndexBody>,
    #[serde(flatten)]
    top_level: IndexBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IndexBody {
    update_seq: Value,
    compact_running: bool,
    updater_running: bool,
    waiting_clients: Value,
}

fn decode<T: DeserializeOwned>(url: &Url, body: Value) -> Result<T, HeatError> {
    serde_json::from_value(body)
        .map_err(|err| HeatError::store(format!("unexpected response from {url}: {err}")))
}

fn expect_ok(url: &Url, body: &Value) -> Result<(), HeatError> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        Ok(())
    } else {
        Err(HeatError::store(format!("unexpected response from {url}: {body}")))
    }
}

fn error_reason(body: &Value) -> String {
    match (body.get("error"), body.get("reason")) {
        (Some(error), Some(reason)) => format!("{} ({})", text(error), text(reason)),
        (Some(error), None) => text(error),
        _ => body.to_string(),
    }
}

fn text(value: &Value) -> String {
    value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> HeatError {
    // reqwest errors carry the request URL, which never includes credentials here.
    if err.is_timeout() {
        return HeatError::Timeout(err.to_string());
    }
    HeatError::Transport(err.to_string())
}
