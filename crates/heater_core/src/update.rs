use crate::{Effect, HeaterState, Msg, Phase, RefreshTrigger};

/// Pure update function: applies a message to state and returns any effects.
///
/// Once the state is `Stopped` every message is ignored.
pub fn update(mut state: HeaterState, msg: Msg) -> (HeaterState, Vec<Effect>) {
    if state.is_stopped() {
        return (state, Vec::new());
    }

    let effects = match msg {
        Msg::Start => {
            if state.phase() == Phase::Bootstrap && !state.refresh_in_progress() {
                state.begin_refresh();
                vec![Effect::StartRefresh {
                    since: 0,
                    trigger: RefreshTrigger::Bootstrap,
                }]
            } else {
                Vec::new()
            }
        }
        Msg::TimerFired => {
            // A fire that raced a cancel is stale.
            if state.phase() == Phase::Armed && state.timer_armed() {
                state.begin_refresh();
                vec![Effect::StartRefresh {
                    since: state.last_seq(),
                    trigger: RefreshTrigger::Timer,
                }]
            } else {
                Vec::new()
            }
        }
        Msg::Change { seq } => {
            // Crossings seen while a pass runs are coalesced into that pass.
            if state.phase() == Phase::Armed && state.crosses_seq_threshold(seq) {
                state.begin_refresh();
                vec![
                    Effect::CancelTimer,
                    Effect::StartRefresh {
                        since: state.last_seq(),
                        trigger: RefreshTrigger::Sequence,
                    },
                ]
            } else {
                Vec::new()
            }
        }
        Msg::RefreshCompleted { result, now } => {
            if !state.refresh_in_progress() {
                return (state, Vec::new());
            }
            let bootstrap = state.phase() == Phase::Bootstrap;
            state.record_refresh(result);

            let mut effects = Vec::with_capacity(2);
            if bootstrap {
                state.seed_compaction_baseline();
                effects.push(Effect::Subscribe {
                    since: state.last_seq(),
                });
            } else if let Some(compact) = maybe_compact(&mut state) {
                effects.push(compact);
            }

            let delay = state.timer_delay(now);
            state.arm_timer();
            effects.push(Effect::ArmTimer { delay });
            effects
        }
        Msg::RefreshFailed { reason } => {
            if !state.refresh_in_progress() {
                return (state, Vec::new());
            }
            let subscribed = state.phase() != Phase::Bootstrap;
            state.refresh_abandoned();
            state.stop();

            let mut effects = Vec::with_capacity(2);
            if subscribed {
                effects.push(Effect::Unsubscribe);
            }
            effects.push(Effect::Halt {
                reason: Some(reason),
            });
            effects
        }
        Msg::CompactionAccepted { seq } => {
            state.record_compaction(seq);
            Vec::new()
        }
        Msg::CompactionFailed { .. } => {
            state.set_compaction_in_flight(false);
            Vec::new()
        }
        Msg::Stop => {
            let mut effects = Vec::with_capacity(3);
            if state.timer_armed() {
                effects.push(Effect::CancelTimer);
            }
            if state.phase() != Phase::Bootstrap {
                effects.push(Effect::Unsubscribe);
            }
            state.stop();
            effects.push(Effect::Halt { reason: None });
            effects
        }
    };

    (state, effects)
}

/// Decides whether enough updates piled up since the last compaction to compact again.
///
/// Returns the effect to issue and marks a compaction in flight, so a second
/// request is not sent before the store has answered the first.
pub fn maybe_compact(state: &mut HeaterState) -> Option<Effect> {
    if state.compaction_in_flight() {
        return None;
    }
    if state.updates_since_compaction() < state.config().compact_threshold {
        return None;
    }
    state.set_compaction_in_flight(true);
    Some(Effect::Compact {
        seq: state.last_seq(),
    })
}
