//! The response produced for a matched request.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Response handed back to the transport (and to hooks and recorders).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockResponse {
    pub status: u16,
    /// Header pairs in wire order; a name may repeat (`set-cookie`)
    pub headers: Vec<(String, String)>,
    pub content_type: String,
    /// Text form of the body
    pub body: String,
    /// Exact bytes of a passed-through body. `body` then holds its lossy text form.
    #[serde(skip)]
    pub raw_body: Option<Bytes>,
}

impl MockResponse {
    pub fn new(status: u16, content_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            content_type: content_type.into(),
            body: body.into(),
            raw_body: None,
        }
    }

    /// A response whose body is sent byte for byte.
    pub fn from_bytes(status: u16, content_type: impl Into<String>, body: Bytes) -> Self {
        Self {
            status,
            headers: Vec::new(),
            content_type: content_type.into(),
            body: String::from_utf8_lossy(&body).into_owned(),
            raw_body: Some(body),
        }
    }

    /// First value of a header (case-insensitive name).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace every value of `name` with `value`.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn append_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Convert into a hyper response. Invalid header names/values are dropped with a warning.
    pub fn into_http(self) -> Response<Full<Bytes>> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = self.raw_body.unwrap_or_else(|| Bytes::from(self.body));
        let mut response = Response::new(Full::new(body));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!("Dropping invalid response header {}: {}", name, value),
            }
        }
        if let Ok(value) = HeaderValue::from_str(&self.content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_http_sets_content_type_and_headers() {
        let mut mock = MockResponse::new(201, "text/plain", "created");
        mock.set_header("X-Mock", "yes");
        mock.set_header("bad header", "ignored");

        let response = mock.into_http();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["content-type"], "text/plain");
        assert_eq!(response.headers()["x-mock"], "yes");
        assert_eq!(response.headers().len(), 2);
    }

    #[test]
    fn test_into_http_invalid_status_becomes_500() {
        let response = MockResponse::new(42, "application/json", "{}").into_http();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_set_header_replaces_append_keeps() {
        let mut mock = MockResponse::new(200, "text/plain", "");
        mock.set_header("X-A", "1");
        mock.set_header("x-a", "2");
        mock.append_header("Set-Cookie", "a=1");
        mock.append_header("Set-Cookie", "b=2");
        assert_eq!(mock.header("X-A"), Some("2"));
        assert_eq!(mock.headers.len(), 3);

        let response = mock.into_http();
        let cookies: Vec<_> = response.headers().get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[tokio::test]
    async fn test_raw_body_is_sent_verbatim() {
        use http_body_util::BodyExt;

        let bytes = Bytes::from_static(&[0x89, 0xff, 0x00, 0xfe]);
        let mock = MockResponse::from_bytes(200, "application/octet-stream", bytes.clone());
        assert_eq!(mock.body, String::from_utf8_lossy(&bytes));

        let body = mock.into_http().into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, bytes);
    }
}
