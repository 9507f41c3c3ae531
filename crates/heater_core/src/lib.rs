//! Heater core: pure per-database scheduling state machine and store addressing.
mod db_url;
mod effect;
mod msg;
mod state;
mod update;

pub use db_url::{scrub_credentials, Credentials, DbUrl, ServerUrl, UrlError};
pub use effect::Effect;
pub use msg::Msg;
pub use state::{HeaterConfig, HeaterState, Phase, RefreshResult, RefreshTrigger, Seq};
pub use update::{maybe_compact, update};
