use std::time::Instant;

use crate::{RefreshResult, Seq};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Scheduler task started; run the bootstrap pass.
    Start,
    /// The armed wall-clock timer fired.
    TimerFired,
    /// The change feed reported a mutation at `seq`.
    Change { seq: Seq },
    /// The outstanding refresh pass finished; `now` is when its result was received.
    RefreshCompleted { result: RefreshResult, now: Instant },
    /// The outstanding refresh pass failed.
    RefreshFailed { reason: String },
    /// The store accepted the compaction request issued at `seq`.
    CompactionAccepted { seq: Seq },
    /// The compaction request was rejected or never reached the store.
    CompactionFailed { reason: String },
    /// Owner asked the heater to stop.
    Stop,
}
