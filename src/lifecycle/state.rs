//! Per-request state machine with a fixed transition table.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Queued,
    Processing,
    Finalizing,
    Completed,
}

impl RequestState {
    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Completed)
                | (Processing, Finalizing)
                | (Processing, Completed)
                | (Finalizing, Completed)
        )
    }

    /// Processing or finalizing.
    pub fn is_active(self) -> bool {
        matches!(self, RequestState::Processing | RequestState::Finalizing)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Queued => "queued",
            RequestState::Processing => "processing",
            RequestState::Finalizing => "finalizing",
            RequestState::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: RequestState,
    completed_at: Option<Instant>,
}

/// Tracks the state of every known request id.
#[derive(Debug, Default)]
pub struct RequestStateMachine {
    entries: HashMap<String, Entry>,
}

impl RequestStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new request as `Queued`. Returns false if the id is known.
    pub fn register(&mut self, request_id: &str) -> bool {
        if self.entries.contains_key(request_id) {
            tracing::debug!(request_id, "Request already registered");
            return false;
        }
        self.entries.insert(
            request_id.to_string(),
            Entry {
                state: RequestState::Queued,
                completed_at: None,
            },
        );
        true
    }

    /// Pure check against the transition table. Unknown ids cannot move.
    pub fn can_transition(&self, request_id: &str, next: RequestState) -> bool {
        self.entries
            .get(request_id)
            .is_some_and(|entry| entry.state.can_transition(next))
    }

    /// Applies `next` if the edge is valid. A rejected transition changes
    /// nothing and is logged.
    pub fn transition(
        &mut self,
        request_id: &str,
        next: RequestState,
        reason: &str,
        now: Instant,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(request_id) else {
            tracing::warn!(request_id, to = %next, reason, "Transition for unknown request rejected");
            return false;
        };
        if !entry.state.can_transition(next) {
            tracing::warn!(
                request_id,
                from = %entry.state,
                to = %next,
                reason,
                "Invalid state transition rejected"
            );
            return false;
        }
        tracing::debug!(request_id, from = %entry.state, to = %next, reason, "State transition");
        entry.state = next;
        if next == RequestState::Completed {
            entry.completed_at = Some(now);
        }
        true
    }

    pub fn get(&self, request_id: &str) -> Option<RequestState> {
        self.entries.get(request_id).map(|entry| entry.state)
    }

    /// Number of requests in `Processing` or `Finalizing`.
    pub fn active_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.state.is_active())
            .count()
    }

    /// Drops completed entries older than `retention` and returns their ids.
    pub fn purge_completed(&mut self, now: Instant, retention: Duration) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry
                    .completed_at
                    .is_some_and(|at| now.saturating_duration_since(at) >= retention)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.entries.remove(id);
        }
        if !expired.is_empty() {
            tracing::debug!(purged = expired.len(), "Purged completed request states");
        }
        expired
    }

    pub fn snapshot(&self) -> Vec<(String, RequestState)> {
        let mut states: Vec<_> = self
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.state))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestState::*;

    const ALL: [RequestState; 4] = [Queued, Processing, Finalizing, Completed];

    #[test]
    fn transition_table_matches_lifecycle() {
        let allowed = [
            (Queued, Processing),
            (Queued, Completed),
            (Processing, Finalizing),
            (Processing, Completed),
            (Finalizing, Completed),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn completed_is_terminal() {
        assert!(ALL.iter().all(|s| !Completed.can_transition(*s)));
    }

    #[test]
    fn rejected_transition_has_no_effect() {
        let now = Instant::now();
        let mut sm = RequestStateMachine::new();
        assert!(sm.register("r1"));
        assert!(!sm.transition("r1", Finalizing, "skip", now));
        assert_eq!(sm.get("r1"), Some(Queued));

        assert!(sm.transition("r1", Processing, "activated", now));
        assert!(sm.transition("r1", Completed, "done", now));
        assert!(!sm.transition("r1", Processing, "revive", now));
        assert_eq!(sm.get("r1"), Some(Completed));
    }

    #[test]
    fn unknown_request_cannot_transition() {
        let mut sm = RequestStateMachine::new();
        assert!(!sm.can_transition("ghost", Processing));
        assert!(!sm.transition("ghost", Processing, "x", Instant::now()));
        assert!(sm.is_empty());
    }

    #[test]
    fn duplicate_register_is_rejected() {
        let mut sm = RequestStateMachine::new();
        assert!(sm.register("r1"));
        assert!(!sm.register("r1"));
        assert_eq!(sm.len(), 1);
    }

    #[test]
    fn active_count_tracks_processing_and_finalizing() {
        let now = Instant::now();
        let mut sm = RequestStateMachine::new();
        sm.register("a");
        sm.register("b");
        sm.transition("a", Processing, "", now);
        assert_eq!(sm.active_count(), 1);
        sm.transition("a", Finalizing, "", now);
        assert_eq!(sm.active_count(), 1);
        sm.transition("a", Completed, "", now);
        assert_eq!(sm.active_count(), 0);
    }

    #[test]
    fn purge_respects_retention() {
        let start = Instant::now();
        let mut sm = RequestStateMachine::new();
        sm.register("old");
        sm.register("live");
        sm.transition("old", Completed, "", start);

        let retention = Duration::from_secs(1);
        assert!(sm.purge_completed(start + Duration::from_millis(100), retention).is_empty());
        assert_eq!(
            sm.purge_completed(start + Duration::from_secs(2), retention),
            vec!["old".to_string()]
        );
        assert_eq!(sm.get("old"), None);
        assert_eq!(sm.get("live"), Some(Queued));
    }

    #[test]
    fn zero_retention_purges_eagerly() {
        let now = Instant::now();
        let mut sm = RequestStateMachine::new();
        sm.register("r1");
        sm.transition("r1", Completed, "", now);
        assert_eq!(sm.purge_completed(now, Duration::ZERO).len(), 1);
    }
}
