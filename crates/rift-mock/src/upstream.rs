//! Proxy mode: pass a matched request through to an upstream.

use crate::request::NormalizedRequest;
use crate::response::MockResponse;
use crate::rule::ProxySpec;
use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Headers that describe the inbound hop and must not be forwarded.
const HOP_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "proxy-connection",
];

/// Forwards requests for rules in proxy mode.
#[async_trait]
pub trait ProxyClient: Send + Sync {
    async fn forward(
        &self,
        spec: &ProxySpec,
        request: &NormalizedRequest,
    ) -> anyhow::Result<MockResponse>;
}

/// reqwest-backed [`ProxyClient`].
pub struct HttpProxyClient {
    client: reqwest::Client,
}

impl HttpProxyClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
            .context("Failed to create upstream HTTP client")?;
        Ok(Self { client })
    }
}

/// `http://upstream:8080/` + `/a?b=1` → `http://upstream:8080/a?b=1`
pub fn target_url(target: &str, url: &str) -> String {
    format!(
        "{}/{}",
        target.trim_end_matches('/'),
        url.trim_start_matches('/')
    )
}

fn forwardable(name: &str) -> bool {
    !HOP_HEADERS.contains(&name.to_lowercase().as_str())
}

#[async_trait]
impl ProxyClient for HttpProxyClient {
    async fn forward(
        &self,
        spec: &ProxySpec,
        request: &NormalizedRequest,
    ) -> anyhow::Result<MockResponse> {
        let url = target_url(&spec.target, &request.url);
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .with_context(|| format!("Invalid method '{}'", request.method))?;
        debug!("Proxy request to: {} {}", method, url);

        let mut builder = self.client.request(method, &url);
        for (name, value) in request.headers.iter().filter(|(n, _)| forwardable(n)) {
            builder = builder.header(name, value);
        }
        let body = request.body_bytes();
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to send proxy request to {url}"))?;

        let status = response.status().as_u16();
        let mut content_type = String::new();
        let mut headers = Vec::new();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else {
                debug!("Dropping non-text upstream header {}", name);
                continue;
            };
            if *name == reqwest::header::CONTENT_TYPE {
                content_type = value.to_string();
            } else if forwardable(name.as_str()) {
                headers.push((name.to_string(), value.to_string()));
            }
        }
        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read response body from {url}"))?;

        let mut forwarded = MockResponse::from_bytes(status, content_type, body);
        forwarded.headers = headers;
        Ok(forwarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_url() {
        assert_eq!(
            target_url("http://upstream:8080/", "/a/b?x=1"),
            "http://upstream:8080/a/b?x=1"
        );
        assert_eq!(target_url("http://upstream:8080", "/"), "http://upstream:8080/");
    }

    #[test]
    fn test_hop_headers_not_forwarded() {
        assert!(!forwardable("Host"));
        assert!(!forwardable("content-length"));
        assert!(forwardable("x-request-id"));
        assert!(forwardable("content-type"));
    }

    /// Serve one canned raw HTTP response and hand back the request bytes it received.
    async fn raw_upstream(reply: Vec<u8>) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            // headers plus the 4 body bytes the test sends
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
                if n == 0 || (received.windows(4).any(|w| w == b"\r\n\r\n") && received.ends_with(&[0xfe])) {
                    break;
                }
            }
            stream.write_all(&reply).await.unwrap();
            stream.shutdown().await.unwrap();
            received
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn test_binary_body_and_repeated_headers_pass_through() {
        let payload: &[u8] = &[0x89, 0xff, 0x00, 0xfe];
        let mut reply = b"HTTP/1.1 200 OK\r\n\
Content-Type: application/octet-stream\r\n\
Set-Cookie: a=1\r\n\
Set-Cookie: b=2\r\n\
Content-Length: 4\r\n\
Connection: close\r\n\r\n"
            .to_vec();
        reply.extend_from_slice(payload);
        let (target, upstream) = raw_upstream(reply).await;

        let client = HttpProxyClient::new(Duration::from_secs(5)).unwrap();
        let spec = ProxySpec {
            enabled: true,
            target,
        };
        let request = NormalizedRequest::new("POST", "/bin")
            .with_raw_body(bytes::Bytes::from_static(&[0x89, 0xff, 0x00, 0xfe]));
        let response = client.forward(&spec, &request).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "application/octet-stream");
        assert_eq!(response.raw_body.as_deref(), Some(payload));
        let cookies: Vec<_> = response
            .headers
            .iter()
            .filter(|(name, _)| name == "set-cookie")
            .map(|(_, value)| value.as_str())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert!(response.header("connection").is_none());

        let received = upstream.await.unwrap();
        assert!(received.ends_with(payload));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_an_error() {
        let client = HttpProxyClient::new(Duration::from_millis(500)).unwrap();
        let spec = ProxySpec {
            enabled: true,
            target: "http://127.0.0.1:1".to_string(),
        };
        let result = client.forward(&spec, &NormalizedRequest::new("GET", "/x")).await;
        assert!(result.is_err());
    }
}
