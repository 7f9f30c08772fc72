//! In-memory event store.
//!
//! Keeps the most recent events of every agent plus the timestamps the
//! liveness check needs.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rawhook_webhook::AgentStatus;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Events retained per agent.
pub const RECENT_EVENTS: usize = 100;

/// An event emitted by an agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEvent {
    pub id: Uuid,
    pub agent_id: u64,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct AgentRecord {
    events: VecDeque<StoredEvent>,
    status: AgentStatus,
}

/// Shared store, safe to use from the blocking pool.
#[derive(Debug, Default)]
pub struct EventStore {
    agents: Mutex<HashMap<u64, AgentRecord>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new event and mark it as the agent's latest.
    pub fn record_event(&self, agent_id: u64, payload: Value) -> StoredEvent {
        let event = StoredEvent {
            id: Uuid::new_v4(),
            agent_id,
            payload,
            created_at: Utc::now(),
        };

        let mut agents = self.agents.lock();
        let record = agents.entry(agent_id).or_default();
        record.status.last_event_at = Some(event.created_at);
        record.events.push_back(event.clone());
        if record.events.len() > RECENT_EVENTS {
            record.events.pop_front();
        }

        event
    }

    /// Remember that the agent logged an error just now.
    pub fn record_error(&self, agent_id: u64) {
        self.record_error_at(agent_id, Utc::now());
    }

    fn record_error_at(&self, agent_id: u64, at: DateTime<Utc>) {
        let mut agents = self.agents.lock();
        agents.entry(agent_id).or_default().status.last_error_log_at = Some(at);
    }

    pub fn status(&self, agent_id: u64) -> AgentStatus {
        self.agents
            .lock()
            .get(&agent_id)
            .map(|record| record.status)
            .unwrap_or_default()
    }

    /// Retained events of an agent, oldest first.
    pub fn recent_events(&self, agent_id: u64) -> Vec<StoredEvent> {
        self.agents
            .lock()
            .get(&agent_id)
            .map(|record| record.events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of retained events of an agent.
    pub fn event_count(&self, agent_id: u64) -> usize {
        self.agents
            .lock()
            .get(&agent_id)
            .map_or(0, |record| record.events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_agent_has_nothing() {
        let store = EventStore::new();
        assert!(store.recent_events(1).is_empty());
        assert_eq!(store.event_count(1), 0);
        assert_eq!(store.status(1), AgentStatus::default());
    }

    #[test]
    fn events_are_kept_per_agent() {
        let store = EventStore::new();
        let first = store.record_event(1, json!({ "body": "a" }));
        store.record_event(2, json!({ "body": "b" }));

        let events = store.recent_events(1);
        assert_eq!(events, vec![first.clone()]);
        assert_eq!(store.status(1).last_event_at, Some(first.created_at));
        assert_eq!(store.recent_events(2).len(), 1);
    }

    #[test]
    fn oldest_events_are_dropped() {
        let store = EventStore::new();
        for i in 0..RECENT_EVENTS + 5 {
            store.record_event(1, json!({ "n": i }));
        }

        let events = store.recent_events(1);
        assert_eq!(events.len(), RECENT_EVENTS);
        assert_eq!(store.event_count(1), RECENT_EVENTS);
        assert_eq!(events[0].payload, json!({ "n": 5 }));
        assert_eq!(events[RECENT_EVENTS - 1].payload, json!({ "n": RECENT_EVENTS + 4 }));
    }

    #[test]
    fn errors_update_status_only() {
        let store = EventStore::new();
        let at = Utc::now();
        store.record_error_at(4, at);

        let status = store.status(4);
        assert_eq!(status.last_error_log_at, Some(at));
        assert!(status.last_event_at.is_none());
        assert!(store.recent_events(4).is_empty());
    }
}
