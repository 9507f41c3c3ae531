use std::time::{Duration, Instant};

/// Database update sequence number.
pub type Seq = u64;

/// Per-database heating thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaterConfig {
    /// Longest a view may go without a refresh.
    pub max_age: Duration,
    /// Number of updates after which a refresh is forced.
    pub max_seq: Seq,
    /// Number of updates since the last compaction before compacting again.
    pub compact_threshold: Seq,
}

impl Default for HeaterConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(3 * 60),
            max_seq: 100,
            compact_threshold: 2000,
        }
    }
}

/// Outcome of one refresh pass: the database sequence observed and when it was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshResult {
    pub seq: Seq,
    pub time: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// First pass from sequence 0 is pending or running.
    #[default]
    Bootstrap,
    /// Waiting on the timer and the change feed.
    Armed,
    /// A timer- or sequence-triggered pass is running.
    Refreshing,
    /// Stopped on request or after a fatal error. Terminal.
    Stopped,
}

/// Why a refresh pass was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Bootstrap,
    Timer,
    Sequence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaterState {
    config: HeaterConfig,
    phase: Phase,
    last_seq: Seq,
    last_check_time: Option<Instant>,
    last_compaction_seq: Seq,
    compaction_in_flight: bool,
    timer_armed: bool,
    refresh_in_progress: bool,
}

impl HeaterState {
    pub fn new(config: HeaterConfig) -> Self {
        Self {
            config,
            phase: Phase::Bootstrap,
            last_seq: 0,
            last_check_time: None,
            last_compaction_seq: 0,
            compaction_in_flight: false,
            timer_armed: false,
            refresh_in_progress: false,
        }
    }

    pub fn config(&self) -> &HeaterConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn last_seq(&self) -> Seq {
        self.last_seq
    }

    pub fn last_check_time(&self) -> Option<Instant> {
        self.last_check_time
    }

    pub fn last_compaction_seq(&self) -> Seq {
        self.last_compaction_seq
    }

    pub fn compaction_in_flight(&self) -> bool {
        self.compaction_in_flight
    }

    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    pub fn refresh_in_progress(&self) -> bool {
        self.refresh_in_progress
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == Phase::Stopped
    }

    /// True when `seq` is far enough past `last_seq` to force a refresh.
    pub fn crosses_seq_threshold(&self, seq: Seq) -> bool {
        self.last_seq.saturating_add(self.config.max_seq) <= seq
    }

    /// Updates accumulated since the last accepted compaction.
    pub fn updates_since_compaction(&self) -> Seq {
        self.last_seq.saturating_sub(self.last_compaction_seq)
    }

    /// Delay until the next timer-triggered refresh, measured from `now`. Never negative.
    pub fn timer_delay(&self, now: Instant) -> Duration {
        let elapsed = self
            .last_check_time
            .map(|checked| now.saturating_duration_since(checked))
            .unwrap_or_default();
        self.config.max_age.saturating_sub(elapsed)
    }

    pub(crate) fn begin_refresh(&mut self) {
        self.refresh_in_progress = true;
        self.timer_armed = false;
        if self.phase != Phase::Bootstrap {
            self.phase = Phase::Refreshing;
        }
    }

    /// Records a completed pass. `last_seq` never moves backward.
    pub(crate) fn record_refresh(&mut self, result: RefreshResult) {
        self.refresh_in_progress = false;
        self.last_seq = self.last_seq.max(result.seq);
        self.last_check_time = Some(result.time);
    }

    pub(crate) fn seed_compaction_baseline(&mut self) {
        self.last_compaction_seq = self.last_seq;
    }

    pub(crate) fn arm_timer(&mut self) {
        self.phase = Phase::Armed;
        self.timer_armed = true;
    }

    pub(crate) fn set_compaction_in_flight(&mut self, in_flight: bool) {
        self.compaction_in_flight = in_flight;
    }

    pub(crate) fn record_compaction(&mut self, seq: Seq) {
        self.compaction_in_flight = false;
        self.last_compaction_seq = self.last_compaction_seq.max(seq);
    }

    pub(crate) fn stop(&mut self) {
        self.phase = Phase::Stopped;
        self.timer_armed = false;
    }

    pub(crate) fn refresh_abandoned(&mut self) {
        self.refresh_in_progress = false;
    }
}
