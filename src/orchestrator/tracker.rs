//! Per-stage state table for the live run.

use crate::model::{Stage, StageEvent, StageState, StageStatus};

/// Tracks the latest status of every pipeline stage. One event overwrites a
/// stage's previous state; the UI contract is "current status per stage",
/// not an audit trail.
#[derive(Debug, Default)]
pub struct StageTracker {
    states: [StageState; Stage::ALL.len()],
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return every stage to idle with all fields cleared. Idempotent.
    pub fn reset(&mut self) {
        for state in &mut self.states {
            *state = StageState::default();
        }
    }

    /// Apply one stage event, overwriting that stage's fields. Returns
    /// `false` when the event names a stage this tracker does not know;
    /// such events are ignored, not rejected, so a newer server can emit
    /// stages we have not learned yet.
    pub fn apply(&mut self, event: &StageEvent) -> bool {
        let Some(stage) = Stage::from_wire(&event.agent) else {
            return false;
        };
        self.states[stage as usize] = StageState {
            status: event.status,
            summary: event.summary.clone(),
            elapsed_ms: event.ms,
            raw_event: Some(event.raw.clone()),
        };
        true
    }

    /// Mark a stage running without a server event. Used for the optimistic
    /// first-stage indicator while the connection is still being opened.
    pub fn mark_running(&mut self, stage: Stage) {
        self.states[stage as usize].status = StageStatus::Running;
    }

    /// Mark a stage as failed unless it already completed. Used when the
    /// transport dies before the pipeline reached its last stage.
    pub fn mark_error_unless_done(&mut self, stage: Stage) {
        let state = &mut self.states[stage as usize];
        if state.status != StageStatus::Done {
            state.status = StageStatus::Error;
        }
    }

    pub fn get(&self, stage: Stage) -> &StageState {
        &self.states[stage as usize]
    }

    /// Cloned view of all stages in pipeline order. Consumers get their own
    /// copy and cannot corrupt tracker state through it.
    pub fn snapshot(&self) -> Vec<(Stage, StageState)> {
        Stage::ALL
            .iter()
            .map(|&stage| (stage, self.states[stage as usize].clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(agent: &str, status: StageStatus, summary: Option<&str>, ms: Option<u64>) -> StageEvent {
        StageEvent {
            agent: agent.to_string(),
            status,
            summary: summary.map(str::to_string),
            ms,
            raw: json!({"agent": agent}),
        }
    }

    #[test]
    fn apply_overwrites_previous_state() {
        let mut tracker = StageTracker::new();
        assert!(tracker.apply(&event("retrieval", StageStatus::Running, None, None)));
        assert!(tracker.apply(&event(
            "retrieval",
            StageStatus::Done,
            Some("Retriever ready"),
            Some(412),
        )));

        let state = tracker.get(Stage::Retrieval);
        assert_eq!(state.status, StageStatus::Done);
        assert_eq!(state.summary.as_deref(), Some("Retriever ready"));
        assert_eq!(state.elapsed_ms, Some(412));
    }

    #[test]
    fn apply_only_touches_the_named_stage() {
        let mut tracker = StageTracker::new();
        tracker.apply(&event("relevance", StageStatus::Done, Some("ok"), Some(3)));

        for (stage, state) in tracker.snapshot() {
            if stage == Stage::Relevance {
                assert_eq!(state.status, StageStatus::Done);
            } else {
                assert_eq!(state.status, StageStatus::Idle);
                assert!(state.summary.is_none());
            }
        }
    }

    #[test]
    fn last_event_wins_regardless_of_interleaving() {
        let mut a = StageTracker::new();
        a.apply(&event("research", StageStatus::Running, None, None));
        a.apply(&event("verify", StageStatus::Running, None, None));
        a.apply(&event("research", StageStatus::Done, Some("Draft created"), Some(1800)));

        let mut b = StageTracker::new();
        b.apply(&event("verify", StageStatus::Running, None, None));
        b.apply(&event("research", StageStatus::Running, None, None));
        b.apply(&event("research", StageStatus::Done, Some("Draft created"), Some(1800)));

        for stage in Stage::ALL {
            assert_eq!(a.get(stage).status, b.get(stage).status);
            assert_eq!(a.get(stage).summary, b.get(stage).summary);
        }
    }

    #[test]
    fn unknown_stage_is_ignored() {
        let mut tracker = StageTracker::new();
        assert!(!tracker.apply(&event("summarize", StageStatus::Done, None, None)));
        for (_, state) in tracker.snapshot() {
            assert_eq!(state.status, StageStatus::Idle);
        }
    }

    #[test]
    fn reset_is_idempotent() {
        let mut tracker = StageTracker::new();
        tracker.apply(&event("relevance", StageStatus::Done, Some("ok"), Some(10)));

        tracker.reset();
        let once: Vec<_> = tracker
            .snapshot()
            .into_iter()
            .map(|(s, st)| (s, st.status, st.summary))
            .collect();
        tracker.reset();
        let twice: Vec<_> = tracker
            .snapshot()
            .into_iter()
            .map(|(s, st)| (s, st.status, st.summary))
            .collect();

        assert_eq!(once, twice);
        assert!(once.iter().all(|(_, status, _)| *status == StageStatus::Idle));
    }

    #[test]
    fn snapshot_is_a_copy() {
        let mut tracker = StageTracker::new();
        let before = tracker.snapshot();
        tracker.apply(&event("verify", StageStatus::Error, Some("boom"), None));
        assert_eq!(before[Stage::Verify as usize].1.status, StageStatus::Idle);
    }

    #[test]
    fn mark_error_unless_done_respects_completion() {
        let mut tracker = StageTracker::new();
        tracker.apply(&event("verify", StageStatus::Done, None, None));
        tracker.mark_error_unless_done(Stage::Verify);
        assert_eq!(tracker.get(Stage::Verify).status, StageStatus::Done);

        tracker.reset();
        tracker.mark_running(Stage::Verify);
        tracker.mark_error_unless_done(Stage::Verify);
        assert_eq!(tracker.get(Stage::Verify).status, StageStatus::Error);
    }
}
