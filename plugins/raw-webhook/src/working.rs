//! Liveness check inputs.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// What the host remembers about an agent between requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_error_log_at: Option<DateTime<Utc>>,
}

impl AgentStatus {
    /// Whether an event was created less than `days` days before `now`.
    pub fn event_created_within(&self, days: i64, now: DateTime<Utc>) -> bool {
        let Some(cutoff) = TimeDelta::try_days(days).and_then(|window| now.checked_sub_signed(window))
        else {
            return false;
        };
        self.last_event_at.is_some_and(|created| created > cutoff)
    }

    /// An error logged later than two minutes before the last event.
    pub fn recent_error_logs(&self) -> bool {
        match (self.last_event_at, self.last_error_log_at) {
            (Some(event), Some(error)) => error > event - TimeDelta::minutes(2),
            _ => false,
        }
    }
}
