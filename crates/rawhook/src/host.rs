//! The host side of the agent seam.

use std::sync::Arc;

use rawhook_agent_sdk::host::{AgentHost, HostError, HttpRequest, HttpResponse, LogLevel};
use rawhook_agent_sdk::template;
use rawhook_telemetry::{events, log_event_created};
use serde_json::Value;

use crate::events::EventStore;
use crate::http_client::HttpClient;

/// Facilities handed to one agent for one request.
pub struct RuntimeHost {
    agent_id: u64,
    store: Arc<EventStore>,
    http: Arc<HttpClient>,
}

impl RuntimeHost {
    pub fn new(agent_id: u64, store: Arc<EventStore>, http: Arc<HttpClient>) -> Self {
        Self {
            agent_id,
            store,
            http,
        }
    }
}

impl AgentHost for RuntimeHost {
    fn interpolate(&self, template: &str, context: &Value) -> String {
        template::render(template, context)
    }

    fn create_event(&self, payload: Value) {
        let event = self.store.record_event(self.agent_id, payload);
        log_event_created!(agent_id = self.agent_id, event_id = %event.id);
    }

    fn http_call(&self, request: HttpRequest) -> Result<HttpResponse, HostError> {
        tracing::debug!(
            agent_id = self.agent_id,
            method = %request.method,
            url = %request.url,
            "outbound call"
        );
        Ok(self.http.call(request)?)
    }

    fn log(&self, level: LogLevel, message: &str) {
        let agent_id = self.agent_id;
        match level {
            LogLevel::Error => {
                self.store.record_error(agent_id);
                tracing::error!(event = events::AGENT_LOG, agent_id, "{}", message);
            }
            LogLevel::Warn => tracing::warn!(event = events::AGENT_LOG, agent_id, "{}", message),
            LogLevel::Info => tracing::info!(event = events::AGENT_LOG, agent_id, "{}", message),
            LogLevel::Debug => tracing::debug!(event = events::AGENT_LOG, agent_id, "{}", message),
        }
    }
}
