//! SDK for building Rawhook agents.
//!
//! Provides the `Request`, `WebResponse` and `Response` types, the
//! [`AgentHost`](host::AgentHost) trait through which an agent reaches the
//! facilities its host owns (interpolation, event emission, outbound HTTP,
//! logging), and the `{{field}}` template renderer hosts use to implement
//! interpolation.
//!
//! # Example
//!
//! ```ignore
//! use rawhook_agent_sdk::prelude::*;
//!
//! struct Echo;
//!
//! impl Echo {
//!     fn receive_web_request(&self, host: &dyn AgentHost, req: &Request) -> WebResponse {
//!         host.create_event(serde_json::json!({ "body": req.raw_post() }));
//!         WebResponse::new("ok", 200)
//!     }
//! }
//! ```

pub mod host;
pub mod template;
pub mod types;

pub mod prelude {
    pub use crate::host::{AgentHost, HostError, HttpRequest, HttpResponse, LogLevel};
    pub use crate::types::*;
}
