//! Heater engine: store IO, refresh passes and the per-database scheduler tasks.
mod changes;
mod compaction;
mod error;
mod fanout;
mod refresh;
mod scheduler;
mod store;
mod types;

pub use changes::{parse_feed_line, FeedLine};
pub use compaction::compact_and_clean;
pub use error::HeatError;
pub use fanout::{ServerHeater, DEFAULT_DISCOVERY_INTERVAL};
pub use refresh::refresh;
pub use scheduler::HeaterHandle;
pub use store::{ChangeStream, ReqwestStore, StoreClient, StoreSettings};
pub use types::{parse_seq, Change, DatabaseInfo, DesignDocument, DesignDocumentInfo};
