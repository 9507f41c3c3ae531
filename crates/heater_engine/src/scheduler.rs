use std::future::pending;
use std::sync::Arc;

use futures_util::StreamExt;
use heater_core::{update, DbUrl, Effect, HeaterConfig, HeaterState, Msg, RefreshResult};
use heater_logging::{heater_debug, heater_error, heater_info, heater_warn};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::compaction::compact_and_clean;
use crate::refresh::refresh;
use crate::store::ChangeStream;
use crate::{Change, HeatError, StoreClient};

/// Keeps one database's views warm until stopped or until a refresh fails.
pub struct HeaterHandle {
    db: DbUrl,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), HeatError>>,
}

impl HeaterHandle {
    /// Spawns the heater on the current tokio runtime. Heating starts with a
    /// bootstrap refresh from sequence 0.
    pub fn start(store: Arc<dyn StoreClient>, db: DbUrl, config: HeaterConfig) -> Self {
        Self::start_with_cancel(store, db, config, CancellationToken::new())
    }

    /// Like [`HeaterHandle::start`], but the heater also stops when `cancel` fires.
    pub fn start_with_cancel(
        store: Arc<dyn StoreClient>,
        db: DbUrl,
        config: HeaterConfig,
        cancel: CancellationToken,
    ) -> Self {
        heater_info!(
            "Heating views on {} at most {:?} or {} changes apart",
            db,
            config.max_age,
            config.max_seq
        );
        let heater = Heater::new(store, db.clone(), config);
        let task = tokio::spawn(heater.run(cancel.clone()));
        Self { db, cancel, task }
    }

    pub fn db(&self) -> &DbUrl {
        &self.db
    }

    /// Cancels the timer and closes the change feed. A refresh pass already
    /// running is left to finish on its own; its result is discarded.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the heater to end. `Ok` means it was stopped; `Err` carries
    /// the failure that halted it.
    pub async fn wait(self) -> Result<(), HeatError> {
        self.task.await.unwrap_or_else(|err| Err(join_failure(err)))
    }
}

type RefreshTask = JoinHandle<Result<RefreshResult, HeatError>>;

struct Heater {
    store: Arc<dyn StoreClient>,
    db: DbUrl,
    state: HeaterState,
    deadline: Option<Instant>,
    feed: Option<ChangeStream>,
    refresh: Option<RefreshTask>,
    compaction_tx: mpsc::UnboundedSender<Msg>,
    compaction_rx: mpsc::UnboundedReceiver<Msg>,
    failure: Option<HeatError>,
}

impl Heater {
    fn new(store: Arc<dyn StoreClient>, db: DbUrl, config: HeaterConfig) -> Self {
        let (compaction_tx, compaction_rx) = mpsc::unbounded_channel();
        Self {
            store,
            db,
            state: HeaterState::new(config),
            deadline: None,
            feed: None,
            refresh: None,
            compaction_tx,
            compaction_rx,
            failure: None,
        }
    }

    async fn run(mut self, cancel: CancellationToken) -> Result<(), HeatError> {
        self.dispatch(Msg::Start);

        while !self.state.is_stopped() {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => Some(Msg::Stop),
                outcome = next_refresh_outcome(&mut self.refresh) => {
                    self.refresh = None;
                    Some(self.refresh_msg(outcome))
                }
                _ = deadline_reached(self.deadline) => {
                    self.deadline = None;
                    Some(Msg::TimerFired)
                }
                change = next_change(&mut self.feed) => match change {
                    Some(Change { seq, .. }) => Some(Msg::Change { seq }),
                    None => {
                        heater_warn!("Change feed ended; heating {} on the timer only", self.db);
                        self.feed = None;
                        None
                    }
                },
                Some(msg) = self.compaction_rx.recv() => Some(msg),
            };
            if let Some(msg) = msg {
                self.dispatch(msg);
            }
        }

        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn refresh_msg(&mut self, outcome: Result<Result<RefreshResult, HeatError>, JoinError>) -> Msg {
        match outcome.unwrap_or_else(|err| Err(join_failure(err))) {
            Ok(result) => {
                heater_debug!("Latest update for {}: seq {}", self.db, result.seq);
                Msg::RefreshCompleted {
                    result,
                    now: Instant::now().into_std(),
                }
            }
            Err(err) => {
                let reason = err.to_string();
                self.failure = Some(err);
                Msg::RefreshFailed { reason }
            }
        }
    }

    fn dispatch(&mut self, msg: Msg) {
        let config = *self.state.config();
        let state = std::mem::replace(&mut self.state, HeaterState::new(config));
        let (state, effects) = update(state, msg);
        self.state = state;
        for effect in effects {
            self.apply(effect);
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::StartRefresh { since, trigger } => {
                heater_debug!("{:?} refresh of {} since seq {}", trigger, self.db, since);
                let store = self.store.clone();
                let db = self.db.clone();
                self.refresh = Some(tokio::spawn(async move {
                    refresh(store.as_ref(), &db, since).await
                }));
            }
            Effect::ArmTimer { delay } => {
                heater_debug!("Next timed refresh of {} in {:?}", self.db, delay);
                self.deadline = Some(Instant::now() + delay);
            }
            Effect::CancelTimer => {
                self.deadline = None;
            }
            Effect::Subscribe { since } => {
                heater_debug!("Watching changes to {} since seq {}", self.db, since);
                self.feed = Some(self.store.changes(&self.db, since));
            }
            Effect::Unsubscribe => {
                self.feed = None;
            }
            Effect::Compact { seq } => {
                heater_debug!(
                    "Compacting {} after {} updates",
                    self.db,
                    self.state.updates_since_compaction()
                );
                let store = self.store.clone();
                let db = self.db.clone();
                let report = self.compaction_tx.clone();
                tokio::spawn(async move {
                    let msg = match compact_and_clean(store.as_ref(), &db).await {
                        Ok(()) => Msg::CompactionAccepted { seq },
                        Err(err) => Msg::CompactionFailed {
                            reason: err.to_string(),
                        },
                    };
                    let _ = report.send(msg);
                });
            }
            Effect::Halt { reason: Some(reason) } => {
                heater_error!("Stopped heating {}: {}", self.db, reason);
            }
            Effect::Halt { reason: None } => {
                heater_info!("Stopped heating {}", self.db);
            }
        }
    }
}

async fn next_refresh_outcome(
    task: &mut Option<RefreshTask>,
) -> Result<Result<RefreshResult, HeatError>, JoinError> {
    match task {
        Some(task) => task.await,
        None => pending().await,
    }
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn next_change(feed: &mut Option<ChangeStream>) -> Option<Change> {
    match feed {
        Some(feed) => feed.next().await,
        None => pending().await,
    }
}

fn join_failure(err: JoinError) -> HeatError {
    HeatError::TaskFailed(err.to_string())
}
