use std::time::Duration;

use crate::{RefreshTrigger, Seq};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartRefresh { since: Seq, trigger: RefreshTrigger },
    /// Arm (or re-arm) the refresh timer. Replaces any armed timer.
    ArmTimer { delay: Duration },
    CancelTimer,
    /// Open the change feed starting after `since`.
    Subscribe { since: Seq },
    /// Close the change feed.
    Unsubscribe,
    /// Issue compaction followed by view cleanup; report back with the same `seq`.
    Compact { seq: Seq },
    /// Heating for this database is over; `reason` is set when it ended in failure.
    Halt { reason: Option<String> },
}
