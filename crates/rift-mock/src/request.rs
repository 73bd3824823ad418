//! Normalized view of an inbound request.
//!
//! A [`NormalizedRequest`] is built once per call and shared by reference
//! through condition matching, template rendering, hooks and recording.
//!
//! # Dotted references
//!
//! Conditions address request attributes with dotted references:
//!
//! - `method`, `path`, `url`, `charset`, `protocol`, `ip`, `body`
//! - `query.<name>` - query parameter
//! - `header.<name>` / `headers.<name>` - header value (case-insensitive)
//! - `body.<field>.<field>` - field of a JSON request body

use bytes::Bytes;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::SocketAddr;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedRequest {
    /// Lower-cased HTTP method
    pub method: String,
    /// Request path (without query string)
    pub path: String,
    /// Path plus query string as received
    pub url: String,
    pub query: HashMap<String, String>,
    /// Header values keyed by lower-cased name
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    pub protocol: String,
    pub ip: String,
    pub body: String,
    /// Body bytes as received; `body` is their lossy text form
    #[serde(skip)]
    raw_body: Bytes,
    #[serde(skip)]
    json_body: OnceCell<Option<Value>>,
}

impl NormalizedRequest {
    /// Build a request from a method and a `path?query` url.
    pub fn new(method: &str, url: &str) -> Self {
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (url, None),
        };
        Self {
            method: method.to_lowercase(),
            path: if path.is_empty() { "/" } else { path }.to_string(),
            url: url.to_string(),
            query: parse_query_string(query),
            headers: HashMap::new(),
            charset: None,
            protocol: "http".to_string(),
            ip: String::new(),
            body: String::new(),
            raw_body: Bytes::new(),
            json_body: OnceCell::new(),
        }
    }

    /// Build a request from hyper request parts and the collected body.
    pub fn from_parts(parts: &hyper::http::request::Parts, body: &[u8], remote: SocketAddr) -> Self {
        let url = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        let mut request = Self::new(parts.method.as_str(), &url);
        for (name, value) in &parts.headers {
            if let Ok(value) = value.to_str() {
                request = request.with_header(name.as_str(), value);
            }
        }
        request.protocol = parts
            .uri
            .scheme_str()
            .unwrap_or("http")
            .to_string();
        request.ip = remote.ip().to_string();
        request.with_raw_body(Bytes::copy_from_slice(body))
    }

    /// Add a header. The charset is derived from `content-type` when present.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = name.to_lowercase();
        if name == "content-type" {
            self.charset = extract_charset(value);
        }
        self.headers.insert(name, value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self.raw_body = Bytes::from(self.body.clone());
        self.json_body = OnceCell::new();
        self
    }

    /// Set the body from raw bytes, which need not be UTF-8.
    pub fn with_raw_body(mut self, body: Bytes) -> Self {
        self.body = String::from_utf8_lossy(&body).into_owned();
        self.raw_body = body;
        self.json_body = OnceCell::new();
        self
    }

    /// The body exactly as received.
    pub fn body_bytes(&self) -> Bytes {
        self.raw_body.clone()
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    /// Host name from the `host` header, without port and lower-cased.
    pub fn host(&self) -> Option<String> {
        let host = self.headers.get("host")?;
        let name = match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host.as_str(),
        };
        Some(name.to_lowercase())
    }

    /// The body parsed as JSON, if it is JSON.
    pub fn json_body(&self) -> Option<&Value> {
        self.json_body
            .get_or_init(|| serde_json::from_str(&self.body).ok())
            .as_ref()
    }

    /// Resolve a dotted reference. Absent attributes yield `None`.
    pub fn lookup(&self, reference: &str) -> Option<Value> {
        let mut parts = reference.splitn(2, '.');
        let head = parts.next()?;
        let rest = parts.next();

        match (head, rest) {
            ("method", None) => Some(Value::String(self.method.clone())),
            ("path", None) => Some(Value::String(self.path.clone())),
            ("url", None) => Some(Value::String(self.url.clone())),
            ("protocol", None) => Some(Value::String(self.protocol.clone())),
            ("ip", None) => Some(Value::String(self.ip.clone())),
            ("charset", None) => self.charset.clone().map(Value::String),
            ("body", None) => Some(Value::String(self.body.clone())),
            ("query", Some(name)) => self.query.get(name).cloned().map(Value::String),
            ("header" | "headers", Some(name)) => self
                .headers
                .get(&name.to_lowercase())
                .cloned()
                .map(Value::String),
            ("body", Some(field_path)) => {
                let mut current = self.json_body()?;
                for field in field_path.split('.') {
                    current = match current {
                        Value::Object(map) => map.get(field)?,
                        Value::Array(items) => items.get(field.parse::<usize>().ok()?)?,
                        _ => return None,
                    };
                }
                Some(current.clone())
            }
            _ => None,
        }
    }

    /// The object templates are rendered against.
    pub fn context(&self) -> Value {
        let headers: Map<String, Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let query: Map<String, Value> = self
            .query
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let body = self
            .json_body()
            .cloned()
            .unwrap_or_else(|| Value::String(self.body.clone()));

        let mut context = Map::new();
        context.insert("method".into(), Value::String(self.method.clone()));
        context.insert("path".into(), Value::String(self.path.clone()));
        context.insert("url".into(), Value::String(self.url.clone()));
        context.insert("query".into(), Value::Object(query));
        context.insert("header".into(), Value::Object(headers.clone()));
        context.insert("headers".into(), Value::Object(headers));
        context.insert(
            "charset".into(),
            self.charset.clone().map(Value::String).unwrap_or(Value::Null),
        );
        context.insert("protocol".into(), Value::String(self.protocol.clone()));
        context.insert("ip".into(), Value::String(self.ip.clone()));
        context.insert("body".into(), body);
        Value::Object(context)
    }

    /// [`context`](Self::context) plus query parameters and top-level JSON
    /// body fields as bare names (`you` for `?you=Ada`). Request attributes
    /// win on collision, then query parameters.
    pub fn template_context(&self) -> Value {
        let mut context = self.context();
        if let Value::Object(map) = &mut context {
            for (name, value) in &self.query {
                map.entry(name.clone())
                    .or_insert_with(|| Value::String(value.clone()));
            }
            if let Some(Value::Object(fields)) = self.json_body() {
                for (name, value) in fields {
                    map.entry(name.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        context
    }
}

/// Parse query string into a HashMap
pub fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(q) = query {
        for pair in q.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                let key = urlencoding::decode(key).unwrap_or_default().to_string();
                let decoded = urlencoding::decode(&value.replace('+', " "))
                    .unwrap_or_default()
                    .to_string();
                params.insert(key, decoded);
            } else if !pair.is_empty() {
                params.insert(pair.to_string(), String::new());
            }
        }
    }
    params
}

fn extract_charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_lowercase())
        } else {
            None
        }
    })
}
