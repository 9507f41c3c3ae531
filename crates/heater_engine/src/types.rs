use std::collections::BTreeSet;

use heater_core::Seq;
use serde_json::Value;

/// Metadata of a database as reported by `GET /db`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    /// Missing when the store answered with something that is not a database.
    pub db_name: Option<String>,
    pub update_seq: Seq,
    pub compact_running: bool,
}

/// A design document and the names of the views it defines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignDocument {
    pub id: String,
    pub views: BTreeSet<String>,
}

impl DesignDocument {
    pub fn new<I, S>(id: impl Into<String>, views: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            views: views.into_iter().map(Into::into).collect(),
        }
    }

    /// The view whose query forces the design document's index to catch up.
    ///
    /// All views of a design document share one index, so any view will do.
    pub fn probe_target(&self) -> Option<&str> {
        self.views.iter().next().map(String::as_str)
    }
}

/// Index status of one design document (`GET /db/_design/x/_info`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DesignDocumentInfo {
    pub update_seq: Seq,
    pub compact_running: bool,
    pub updater_running: bool,
    pub waiting_clients: u64,
}

impl DesignDocumentInfo {
    /// True when the store is already busy with this index.
    pub fn is_busy(&self) -> bool {
        self.compact_running || self.updater_running || self.waiting_clients > 0
    }
}

/// One notification from the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub seq: Seq,
    pub id: Option<String>,
}

/// Reads an update sequence, either a plain integer or a `"<n>-<opaque>"` string.
pub fn parse_seq(value: &Value) -> Option<Seq> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => {
            let digits = text.split('-').next().unwrap_or_default();
            digits.parse().ok()
        }
        _ => None,
    }
}
