use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Request parameters: string keys mapped to strings, arrays (for `key[]`
/// entries) or, for JSON bodies, arbitrary JSON values.
pub type Params = serde_json::Map<String, Value>;

/// An inbound HTTP request as seen by agents.
///
/// Uses BTreeMap so parameter and header iteration order is stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub client_ip: String,
    pub path_params: BTreeMap<String, String>,
}

impl Request {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The raw request body, or the empty string when there is none.
    pub fn raw_post(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }

    /// Parameters decoded from the query string.
    pub fn query_parameters(&self) -> Params {
        match &self.query {
            Some(q) if !q.is_empty() => parse_urlencoded(q.as_bytes()),
            _ => Params::new(),
        }
    }

    /// Parameters decoded from the body.
    ///
    /// Form-encoded bodies are decoded like the query string. JSON bodies
    /// contribute their top-level keys when they are objects. Anything else
    /// contributes nothing.
    pub fn body_parameters(&self) -> Params {
        let body = self.raw_post();
        if body.is_empty() {
            return Params::new();
        }

        let mime = self
            .header("content-type")
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .unwrap_or_default();

        match mime.as_str() {
            "application/x-www-form-urlencoded" => parse_urlencoded(body.as_bytes()),
            "application/json" => match serde_json::from_str::<Value>(body) {
                Ok(Value::Object(map)) => map,
                _ => Params::new(),
            },
            _ => Params::new(),
        }
    }

    /// All request parameters: query, then body, then path parameters.
    /// Later sources win on key collisions.
    pub fn params(&self) -> Params {
        let mut params = self.query_parameters();
        params.extend(self.body_parameters());
        for (key, value) in &self.path_params {
            params.insert(key.clone(), Value::String(value.clone()));
        }
        params
    }
}

/// Decode `application/x-www-form-urlencoded` data.
///
/// Repeated keys keep the last value. Bracketed keys nest: `user[name]=Ada`
/// becomes `{"user": {"name": "Ada"}}`, and a trailing `[]` collects every
/// value into an array (`tag[]=a&tag[]=b`).
fn parse_urlencoded(input: &[u8]) -> Params {
    let mut params = Params::new();

    for (key, value) in form_urlencoded::parse(input) {
        if key.is_empty() {
            continue;
        }

        let (name, path) = split_key(&key);
        let slot = params.entry(name.to_string()).or_insert(Value::Null);
        assign(slot, &path, value.into_owned());
    }

    params
}

/// Split `a[b][c]` into `("a", ["b", "c"])`. Keys that are not well-formed
/// bracket paths are kept whole.
fn split_key(key: &str) -> (&str, Vec<&str>) {
    let Some(open) = key.find('[').filter(|&i| i > 0 && key.ends_with(']')) else {
        return (key, Vec::new());
    };

    let inner = &key[open + 1..key.len() - 1];
    let path: Vec<&str> = inner.split("][").collect();
    if path.iter().any(|segment| segment.contains(['[', ']'])) {
        return (key, Vec::new());
    }

    (&key[..open], path)
}

fn assign(slot: &mut Value, path: &[&str], value: String) {
    match path.split_first() {
        None => *slot = Value::String(value),
        // `[]` appends; anything after it is not descended into.
        Some((&"", _)) => match slot {
            Value::Array(items) => items.push(Value::String(value)),
            other => *other = Value::Array(vec![Value::String(value)]),
        },
        Some((name, rest)) => {
            if !slot.is_object() {
                *slot = Value::Object(Params::new());
            }
            if let Value::Object(map) = slot {
                let child = map.entry(name.to_string()).or_insert(Value::Null);
                assign(child, rest, value);
            }
        }
    }
}

/// The answer an agent gives to a web request, before the host renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebResponse {
    pub body: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl WebResponse {
    pub fn new(body: impl Into<String>, status: u16) -> Self {
        Self {
            body: body.into(),
            status,
            content_type: None,
            headers: None,
        }
    }

    /// A response carrying an explicit content type and extra headers.
    pub fn with_headers(
        body: impl Into<String>,
        status: u16,
        content_type: impl Into<String>,
        headers: BTreeMap<String, String>,
    ) -> Self {
        Self {
            body: body.into(),
            status,
            content_type: Some(content_type.into()),
            headers: Some(headers),
        }
    }

    /// The uniform answer to every failed authorization.
    pub fn not_authorized() -> Self {
        Self::new("Not Authorized", 401)
    }

    /// `301` and `302` answers redirect to the URL held in the body.
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302)
    }

    /// Render into the HTTP response the host sends back.
    pub fn render(self) -> Response {
        let redirect = self.is_redirect();

        let mut headers: BTreeMap<String, String> = self
            .headers
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();

        if redirect {
            headers.insert("location".to_string(), self.body);
            return Response {
                status: self.status,
                headers,
                body: None,
            };
        }

        headers.insert(
            "content-type".to_string(),
            self.content_type
                .unwrap_or_else(|| "text/plain".to_string()),
        );

        Response {
            status: self.status,
            headers,
            body: Some(self.body),
        }
    }
}

/// An HTTP response as sent by the host.
///
/// Uses BTreeMap so header order is stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(query: Option<&str>, content_type: Option<&str>, body: Option<&str>) -> Request {
        let mut headers = BTreeMap::new();
        if let Some(ct) = content_type {
            headers.insert("Content-Type".to_string(), ct.to_string());
        }
        Request {
            method: "POST".to_string(),
            path: "/users/1/web_requests/2/s3cret".to_string(),
            query: query.map(str::to_string),
            headers,
            body: body.map(str::to_string),
            client_ip: "10.0.0.1".to_string(),
            path_params: BTreeMap::new(),
        }
    }

    #[test]
    fn query_parameters_last_value_wins() {
        let req = request(Some("a=1&b=two%20words&a=3"), None, None);
        let params = req.query_parameters();
        assert_eq!(params["a"], json!("3"));
        assert_eq!(params["b"], json!("two words"));
    }

    #[test]
    fn query_parameters_collect_bracket_keys() {
        let req = request(Some("tag[]=x&tag[]=y&other=z"), None, None);
        let params = req.query_parameters();
        assert_eq!(params["tag"], json!(["x", "y"]));
        assert_eq!(params["other"], json!("z"));
    }

    #[test]
    fn query_parameters_nest_bracket_paths() {
        let req = request(
            Some("user[name]=Ada&user[langs][]=en&user[langs][]=fr&a[b][c]=1"),
            None,
            None,
        );
        let params = req.query_parameters();
        assert_eq!(
            params["user"],
            json!({ "name": "Ada", "langs": ["en", "fr"] })
        );
        assert_eq!(params["a"], json!({ "b": { "c": "1" } }));
    }

    #[test]
    fn malformed_bracket_keys_stay_flat() {
        let req = request(Some("[x]=1&a]b=2&c[d=3&e[f]g]=4"), None, None);
        let params = req.query_parameters();
        assert_eq!(params["[x]"], json!("1"));
        assert_eq!(params["a]b"], json!("2"));
        assert_eq!(params["c[d"], json!("3"));
        assert_eq!(params["e[f]g]"], json!("4"));
    }

    #[test]
    fn query_parameters_empty() {
        assert!(request(None, None, None).query_parameters().is_empty());
        assert!(request(Some(""), None, None).query_parameters().is_empty());
    }

    #[test]
    fn body_parameters_form_encoded() {
        let req = request(
            None,
            Some("application/x-www-form-urlencoded; charset=utf-8"),
            Some("secret=abc&g-recaptcha-response=tok"),
        );
        let params = req.body_parameters();
        assert_eq!(params["secret"], json!("abc"));
        assert_eq!(params["g-recaptcha-response"], json!("tok"));
    }

    #[test]
    fn body_parameters_json_object() {
        let req = request(None, Some("application/json"), Some(r#"{"name":"x","n":1}"#));
        let params = req.body_parameters();
        assert_eq!(params["name"], json!("x"));
        assert_eq!(params["n"], json!(1));
    }

    #[test]
    fn body_parameters_ignore_other_types() {
        let req = request(None, Some("text/plain"), Some("secret=abc"));
        assert!(req.body_parameters().is_empty());

        let req = request(None, Some("application/json"), Some("[1,2]"));
        assert!(req.body_parameters().is_empty());

        let req = request(None, Some("application/json"), Some("not json"));
        assert!(req.body_parameters().is_empty());
    }

    #[test]
    fn params_path_wins_over_body_and_query() {
        let mut req = request(
            Some("secret=from-query&q=1"),
            Some("application/x-www-form-urlencoded"),
            Some("secret=from-body&b=2"),
        );
        assert_eq!(req.params()["secret"], json!("from-body"));

        req.path_params
            .insert("secret".to_string(), "from-path".to_string());
        let params = req.params();
        assert_eq!(params["secret"], json!("from-path"));
        assert_eq!(params["q"], json!("1"));
        assert_eq!(params["b"], json!("2"));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = request(None, Some("text/plain"), None);
        assert_eq!(req.header("content-type"), Some("text/plain"));
        assert_eq!(req.header("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn raw_post_defaults_to_empty() {
        assert_eq!(request(None, None, None).raw_post(), "");
        assert_eq!(request(None, None, Some("hi")).raw_post(), "hi");
    }

    #[test]
    fn render_plain_response() {
        let resp = WebResponse::new("Event Created", 201).render();
        assert_eq!(resp.status, 201);
        assert_eq!(resp.headers["content-type"], "text/plain");
        assert_eq!(resp.body.as_deref(), Some("Event Created"));
    }

    #[test]
    fn render_custom_headers() {
        let mut headers = BTreeMap::new();
        headers.insert("Access-Control-Allow-Origin".to_string(), "*".to_string());
        let resp = WebResponse::with_headers("ok", 200, "text/plain", headers).render();
        assert_eq!(resp.headers["access-control-allow-origin"], "*");
        assert_eq!(resp.headers["content-type"], "text/plain");
    }

    #[test]
    fn render_redirect() {
        let resp = WebResponse::new("https://example.com/thanks", 302).render();
        assert_eq!(resp.status, 302);
        assert_eq!(resp.headers["location"], "https://example.com/thanks");
        assert!(resp.body.is_none());
        assert!(!resp.headers.contains_key("content-type"));
    }

    #[test]
    fn not_authorized_is_401() {
        assert_eq!(
            WebResponse::not_authorized(),
            WebResponse::new("Not Authorized", 401)
        );
    }
}
