//! HTTP front end: routes web requests to their agent and renders the
//! agent's answer.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::convert::Infallible;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderName, HeaderValue, ALLOW, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rawhook_agent_sdk::types::{Request as AgentRequest, WebResponse};
use rawhook_telemetry::log_request_completed;
use rawhook_webhook::RawWebhookAgent;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::config::HostConfig;
use crate::events::EventStore;
use crate::host::RuntimeHost;
use crate::http_client::{HttpClient, HttpClientConfig};

const RESERVED_PREFIX: &str = "/__rawhook/";

/// A registered agent and the user that owns it.
#[derive(Debug)]
pub struct AgentEntry {
    pub id: u64,
    pub user_id: u64,
    pub name: String,
    pub agent: RawWebhookAgent,
}

/// Shared server state.
pub struct WebhookServer {
    agents: HashMap<u64, Arc<AgentEntry>>,
    /// Users owning at least one agent.
    users: BTreeSet<u64>,
    store: Arc<EventStore>,
    http: Arc<HttpClient>,
    max_body_size: usize,
}

/// The dynamic segments of `/users/{user_id}/web_requests/{agent_id}/{secret}`.
#[derive(Debug, PartialEq, Eq)]
struct WebRequestRoute {
    user_id: String,
    agent_id: String,
    secret: String,
}

fn parse_web_request_path(path: &str) -> Option<WebRequestRoute> {
    let segments: Vec<&str> = path.strip_prefix('/')?.split('/').collect();
    match segments.as_slice() {
        ["users", user_id, "web_requests", agent_id, secret] => Some(WebRequestRoute {
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            secret: String::from_utf8_lossy(&urlencoding::decode_binary(secret.as_bytes()))
                .into_owned(),
        }),
        _ => None,
    }
}

impl WebhookServer {
    /// Build the server for an already validated configuration.
    pub fn from_config(config: &HostConfig) -> Self {
        let http = HttpClient::new(HttpClientConfig {
            default_timeout: Duration::from_secs(config.http_timeout_secs),
            allow_plaintext: config.allow_plaintext_http,
            ..HttpClientConfig::default()
        });

        let verify_url = config.recaptcha_verify_url.as_deref();
        let agents = config
            .agents
            .iter()
            .map(|agent| {
                let entry = AgentEntry {
                    id: agent.id,
                    user_id: agent.user_id,
                    name: agent.name.clone(),
                    agent: agent.agent(verify_url),
                };
                (agent.id, Arc::new(entry))
            })
            .collect();

        Self {
            agents,
            users: config.agents.iter().map(|agent| agent.user_id).collect(),
            store: Arc::new(EventStore::new()),
            http: Arc::new(http),
            max_body_size: config.max_body_size,
        }
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Handle an incoming HTTP request.
    pub async fn handle_request<B>(
        &self,
        req: Request<B>,
        remote: SocketAddr,
    ) -> Result<Response<Full<Bytes>>, Infallible>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let path = req.uri().path().to_string();

        // Reserved /__rawhook/* endpoints
        if path.starts_with(RESERVED_PREFIX) {
            return Ok(self.handle_rawhook_endpoint(&path, req.method()));
        }

        let Some(route) = parse_web_request_path(&path) else {
            return Ok(not_found_response("not found"));
        };

        let Some(user_id) = route
            .user_id
            .parse::<u64>()
            .ok()
            .filter(|id| self.users.contains(id))
        else {
            return Ok(not_found_response("user not found"));
        };

        let Some(entry) = route
            .agent_id
            .parse::<u64>()
            .ok()
            .and_then(|id| self.agents.get(&id))
            .filter(|entry| entry.user_id == user_id)
        else {
            return Ok(not_found_response("agent not found"));
        };
        let entry = Arc::clone(entry);

        let started = Instant::now();
        let (parts, body) = req.into_parts();

        // Check content-length before reading body (if present)
        let declared_length = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared_length.is_some_and(|len| len > self.max_body_size) {
            return Ok(payload_too_large_response());
        }

        let body = match Limited::new(body, self.max_body_size).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return Ok(payload_too_large_response());
            }
            Err(_) => return Ok(bad_request_response("failed to read request body")),
        };

        let headers = parts
            .headers
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();

        let mut path_params = BTreeMap::new();
        path_params.insert("user_id".to_string(), route.user_id);
        path_params.insert("agent_id".to_string(), route.agent_id);
        path_params.insert("secret".to_string(), route.secret);

        let request = AgentRequest {
            method: parts.method.as_str().to_string(),
            path,
            query: parts.uri.query().map(str::to_string),
            headers,
            body: (!body.is_empty()).then(|| String::from_utf8_lossy(&body).into_owned()),
            client_ip: remote.ip().to_string(),
            path_params,
        };

        let agent_id = entry.id;
        let host = RuntimeHost::new(agent_id, Arc::clone(&self.store), Arc::clone(&self.http));

        // The agent's outbound calls block; keep them off the runtime threads.
        let answer =
            tokio::task::spawn_blocking(move || entry.agent.receive_web_request(&host, &request))
                .await;

        let response = match answer {
            Ok(answer) => render_response(answer),
            Err(e) => {
                tracing::error!(agent_id, error = %e, "agent task failed");
                internal_error_response()
            }
        };

        log_request_completed!(
            agent_id,
            method = %parts.method,
            status = response.status().as_u16(),
            duration_ms = started.elapsed().as_millis() as u64
        );

        Ok(response)
    }

    /// Handle reserved /__rawhook/* endpoints.
    fn handle_rawhook_endpoint(&self, path: &str, method: &Method) -> Response<Full<Bytes>> {
        if method != Method::GET {
            return method_not_allowed_response();
        }

        match path {
            "/__rawhook/health" => json_response(StatusCode::OK, &json!({ "status": "ok" })),
            _ => match path
                .strip_prefix("/__rawhook/agents/")
                .and_then(|id| id.parse::<u64>().ok())
                .and_then(|id| self.agents.get(&id))
            {
                Some(entry) => self.agent_status_response(entry),
                None => not_found_response("not found"),
            },
        }
    }

    /// Build the status document of one agent.
    fn agent_status_response(&self, entry: &AgentEntry) -> Response<Full<Bytes>> {
        let status = self.store.status(entry.id);
        let host = RuntimeHost::new(entry.id, Arc::clone(&self.store), Arc::clone(&self.http));
        let working = entry.agent.is_working(&host, &status, Utc::now());

        let body = json!({
            "id": entry.id,
            "name": entry.name,
            "working": working,
            "last_event_at": status.last_event_at,
            "last_error_log_at": status.last_error_log_at,
            "event_count": self.store.event_count(entry.id),
        });
        json_response(StatusCode::OK, &body)
    }
}

/// Accept connections until the listener fails for good.
pub async fn serve(server: Arc<WebhookServer>, listener: TcpListener) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };

        let server = Arc::clone(&server);
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let server = Arc::clone(&server);
                async move { server.handle_request(req, remote).await }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "connection error");
            }
        });
    }
}

/// Turn an agent's answer into the HTTP response.
fn render_response(answer: WebResponse) -> Response<Full<Bytes>> {
    let rendered = answer.render();
    let Ok(status) = StatusCode::from_u16(rendered.status) else {
        return internal_error_response();
    };

    let mut response = Response::new(Full::new(Bytes::from(rendered.body.unwrap_or_default())));
    *response.status_mut() = status;

    for (name, value) in rendered.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(header), Ok(value)) => {
                response.headers_mut().insert(header, value);
            }
            _ => tracing::warn!(header = %name, "dropping invalid response header"),
        }
    }

    response
}

fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

/// Build a 404 Not Found response.
fn not_found_response(message: &'static str) -> Response<Full<Bytes>> {
    text_response(StatusCode::NOT_FOUND, message)
}

fn method_not_allowed_response() -> Response<Full<Bytes>> {
    let mut response = json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &json!({ "error": "method not allowed" }),
    );
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static("GET"));
    response
}

fn payload_too_large_response() -> Response<Full<Bytes>> {
    text_response(StatusCode::PAYLOAD_TOO_LARGE, "payload too large")
}

fn bad_request_response(message: &'static str) -> Response<Full<Bytes>> {
    text_response(StatusCode::BAD_REQUEST, message)
}

fn internal_error_response() -> Response<Full<Bytes>> {
    text_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::LOCATION;

    const CONFIG: &str = r#"
max_body_size: 64
agents:
  - id: 7
    user_id: 1
    name: Inbound hooks
    options:
      secret: foobar
      expected_receive_period_in_days: 1
  - id: 8
    user_id: 2
    options:
      secret: other
"#;

    fn server() -> WebhookServer {
        WebhookServer::from_config(&HostConfig::from_yaml(CONFIG).unwrap())
    }

    fn remote() -> SocketAddr {
        SocketAddr::from(([203, 0, 113, 5], 40000))
    }

    fn request(method: &str, uri: &str, body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    async fn send(server: &WebhookServer, req: Request<Full<Bytes>>) -> (StatusCode, String) {
        let response = server.handle_request(req, remote()).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn parses_web_request_paths() {
        assert_eq!(
            parse_web_request_path("/users/1/web_requests/7/s%20cret"),
            Some(WebRequestRoute {
                user_id: "1".into(),
                agent_id: "7".into(),
                secret: "s cret".into(),
            })
        );
        assert_eq!(parse_web_request_path("/users/1/web_requests/7"), None);
        assert_eq!(parse_web_request_path("/users/1/web_requests/7/s/extra"), None);
        assert_eq!(parse_web_request_path("/people/1/web_requests/7/s"), None);
    }

    #[test]
    fn renders_redirects_with_location() {
        let response = render_response(WebResponse::new("https://example.com/thanks", 302));
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[LOCATION],
            HeaderValue::from_static("https://example.com/thanks")
        );
        assert!(response.headers().get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn renders_custom_headers_and_skips_invalid_ones() {
        let mut headers = BTreeMap::new();
        headers.insert("Access-Control-Allow-Origin".to_string(), "*".to_string());
        headers.insert("bad header".to_string(), "x".to_string());

        let response = render_response(WebResponse::with_headers(
            "Event Created",
            201,
            "text/plain",
            headers,
        ));
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(response.headers().len(), 2);
    }

    #[tokio::test]
    async fn accepted_request_creates_event() {
        let server = server();
        let (status, body) = send(
            &server,
            request("POST", "/users/1/web_requests/7/foobar?page=2", r#"{"a":1}"#),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, "Event Created");

        let events = server.store().recent_events(7);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].payload,
            json!({ "body": r#"{"a":1}"#, "query": { "page": "2" }, "json": { "a": 1 } })
        );
    }

    #[tokio::test]
    async fn wrong_secret_is_not_authorized() {
        let server = server();
        let (status, body) =
            send(&server, request("POST", "/users/1/web_requests/7/nope", "")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "Not Authorized");
        assert!(server.store().recent_events(7).is_empty());
    }

    #[tokio::test]
    async fn unknown_user_and_agent_are_not_found() {
        let server = server();

        let (status, body) = send(&server, request("POST", "/users/9/web_requests/7/foobar", "")).await;
        assert_eq!((status, body.as_str()), (StatusCode::NOT_FOUND, "user not found"));

        let (status, body) = send(&server, request("POST", "/users/x/web_requests/7/foobar", "")).await;
        assert_eq!((status, body.as_str()), (StatusCode::NOT_FOUND, "user not found"));

        let (status, body) = send(&server, request("POST", "/users/1/web_requests/99/foobar", "")).await;
        assert_eq!((status, body.as_str()), (StatusCode::NOT_FOUND, "agent not found"));

        // Agent 8 belongs to user 2.
        let (status, body) = send(&server, request("POST", "/users/1/web_requests/8/other", "")).await;
        assert_eq!((status, body.as_str()), (StatusCode::NOT_FOUND, "agent not found"));

        let (status, _) = send(&server, request("GET", "/elsewhere", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let server = server();
        let (status, _) = send(
            &server,
            request("POST", "/users/1/web_requests/7/foobar", &"x".repeat(65)),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(server.store().recent_events(7).is_empty());
    }

    #[tokio::test]
    async fn health_endpoint() {
        let server = server();
        let (status, body) = send(&server, request("GET", "/__rawhook/health", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"status":"ok"}"#);

        let (status, _) = send(&server, request("POST", "/__rawhook/health", "")).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn agent_status_endpoint_reports_working() {
        let server = server();

        let (_, body) = send(&server, request("GET", "/__rawhook/agents/7", "")).await;
        let status: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(status["working"], json!(false));
        assert_eq!(status["name"], json!("Inbound hooks"));
        assert_eq!(status["event_count"], json!(0));

        send(&server, request("POST", "/users/1/web_requests/7/foobar", "hello")).await;

        let (_, body) = send(&server, request("GET", "/__rawhook/agents/7", "")).await;
        let status: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(status["id"], json!(7));
        assert_eq!(status["working"], json!(true));
        assert!(status["last_event_at"].is_string());
        assert_eq!(status["event_count"], json!(1));

        let (code, _) = send(&server, request("GET", "/__rawhook/agents/99", "")).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn agent_status_does_not_expose_payloads() {
        let server = server();
        send(
            &server,
            request(
                "POST",
                "/users/1/web_requests/7/foobar?token=qs-secret",
                r#"{"card":"4111111111111111"}"#,
            ),
        )
        .await;
        assert_eq!(server.store().event_count(7), 1);

        let (code, body) = send(&server, request("GET", "/__rawhook/agents/7", "")).await;
        assert_eq!(code, StatusCode::OK);
        assert!(!body.contains("4111111111111111"));
        assert!(!body.contains("qs-secret"));

        let status: Value = serde_json::from_str(&body).unwrap();
        assert!(status.get("events").is_none());
        let mut keys: Vec<&str> = status.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["event_count", "id", "last_error_log_at", "last_event_at", "name", "working"]
        );
    }
}
