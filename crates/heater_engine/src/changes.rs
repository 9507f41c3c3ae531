//! Continuous `_changes` feed with automatic resume.
use std::collections::VecDeque;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::stream::{self, StreamExt};
use heater_core::{DbUrl, Seq};
use heater_logging::{heater_debug, heater_trace, heater_warn};
use serde_json::Value;

use crate::store::{map_reqwest_error, ChangeStream};
use crate::types::parse_seq;
use crate::{Change, HeatError};

#[derive(Debug, Clone, Copy)]
pub(crate) struct FeedSettings {
    pub heartbeat: Duration,
    pub reconnect_delay: Duration,
    pub max_line_bytes: usize,
}

/// One line of a continuous feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedLine {
    Heartbeat,
    Change(Change),
    /// The store closed the feed; resume after this sequence.
    End { last_seq: Option<Seq> },
    Unrecognized,
}

pub fn parse_feed_line(line: &[u8]) -> FeedLine {
    let line = line.trim_ascii();
    if line.is_empty() {
        return FeedLine::Heartbeat;
    }
    let Ok(value) = serde_json::from_slice::<Value>(line) else {
        return FeedLine::Unrecognized;
    };
    if let Some(seq) = value.get("seq").and_then(parse_seq) {
        let id = value.get("id").and_then(Value::as_str).map(str::to_string);
        return FeedLine::Change(Change { seq, id });
    }
    if let Some(last_seq) = value.get("last_seq") {
        return FeedLine::End {
            last_seq: parse_seq(last_seq),
        };
    }
    FeedLine::Unrecognized
}

struct Feed {
    client: reqwest::Client,
    db: DbUrl,
    since: Seq,
    settings: FeedSettings,
    response: Option<reqwest::Response>,
    buffer: BytesMut,
    /// Bytes of `buffer` already searched for a newline.
    scanned: usize,
    pending: VecDeque<Change>,
    connected_once: bool,
}

impl Feed {
    fn new(client: reqwest::Client, db: DbUrl, since: Seq, settings: FeedSettings) -> Self {
        Self {
            client,
            db,
            since,
            settings,
            response: None,
            buffer: BytesMut::new(),
            scanned: 0,
            pending: VecDeque::new(),
            connected_once: false,
        }
    }

    async fn connect(&mut self) -> Result<reqwest::Response, HeatError> {
        if self.connected_once {
            tokio::time::sleep(self.settings.reconnect_delay).await;
        }
        self.connected_once = true;

        let mut url = self.db.endpoint(["_changes"]);
        url.query_pairs_mut()
            .append_pair("feed", "continuous")
            .append_pair("since", &self.since.to_string())
            .append_pair("heartbeat", &self.settings.heartbeat.as_millis().to_string());

        let mut request = self.client.get(url.clone());
        if let Some(credentials) = self.db.credentials() {
            request = request.basic_auth(&credentials.username, credentials.password.as_ref());
        }
        let response = request.send().await.map_err(map_reqwest_error)?;
        if !response.status().is_success() {
            return Err(HeatError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
                reason: "change feed refused".into(),
            });
        }
        heater_debug!("Following changes since {}: {}", self.since, self.db);
        Ok(response)
    }

    fn ingest(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        while let Some(offset) = self.buffer[self.scanned..]
            .iter()
            .position(|byte| *byte == b'\n')
        {
            let end = self.scanned + offset;
            let line = self.buffer.split_to(end + 1);
            self.scanned = 0;
            self.apply(parse_feed_line(&line[..end]));
        }
        self.scanned = self.buffer.len();
        if self.buffer.len() > self.settings.max_line_bytes {
            heater_warn!(
                "Change feed line for {} exceeds {} bytes; reconnecting from seq {}",
                self.db,
                self.settings.max_line_bytes,
                self.since
            );
            self.disconnect();
        }
    }

    fn apply(&mut self, line: FeedLine) {
        match line {
            FeedLine::Heartbeat => heater_trace!("Change feed heartbeat: {}", self.db),
            // Replays after a reconnect are dropped.
            FeedLine::Change(change) if change.seq > self.since => {
                self.since = change.seq;
                self.pending.push_back(change);
            }
            FeedLine::Change(_) => {}
            FeedLine::End { last_seq } => {
                if let Some(seq) = last_seq {
                    self.since = self.since.max(seq);
                }
                heater_debug!("Change feed closed by store at {}: {}", self.since, self.db);
                self.disconnect();
            }
            FeedLine::Unrecognized => heater_warn!("Unrecognized change feed line: {}", self.db),
        }
    }

    fn disconnect(&mut self) {
        self.response = None;
        self.buffer.clear();
        self.scanned = 0;
    }

    async fn next_change(&mut self) -> Change {
        // A heartbeat is due every `heartbeat`; allow one to go missing.
        let idle_limit = self.settings.heartbeat * 2;
        loop {
            if let Some(change) = self.pending.pop_front() {
                return change;
            }
            if self.response.is_none() {
                match self.connect().await {
                    Ok(response) => self.response = Some(response),
                    Err(err) => heater_warn!("Change feed for {} unavailable: {}", self.db, err),
                }
                continue;
            }
            let Some(response) = self.response.as_mut() else {
                continue;
            };
            let next = tokio::time::timeout(idle_limit, response.chunk()).await;
            match next {
                Ok(Ok(Some(chunk))) => self.ingest(&chunk),
                Ok(Ok(None)) => {
                    heater_debug!("Change feed connection ended at {}: {}", self.since, self.db);
                    self.disconnect();
                }
                Ok(Err(err)) => {
                    heater_warn!("Change feed for {} failed: {}", self.db, map_reqwest_error(err));
                    self.disconnect();
                }
                Err(_) => {
                    heater_warn!(
                        "Change feed for {} silent for {:?}; reconnecting",
                        self.db,
                        idle_limit
                    );
                    self.disconnect();
                }
            }
        }
    }
}

/// Opens an endless change stream for `db` starting after `since`.
///
/// Dropped connections are reopened from the last sequence seen, so the
/// stream never yields a sequence twice and never goes backward.
pub(crate) fn continuous_feed(
    client: reqwest::Client,
    db: DbUrl,
    since: Seq,
    settings: FeedSettings,
) -> ChangeStream {
    let feed = Feed::new(client, db, since, settings);
    stream::unfold(feed, |mut feed| async move {
        let change = feed.next_change().await;
        Some((change, feed))
    })
    .boxed()
}
