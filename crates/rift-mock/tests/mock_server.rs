//! End-to-end tests: mock directory → loader → dispatcher → HTTP listeners.
//!
//! Every test serves its own temporary mock directory on ephemeral ports.

use reqwest::Client;
use rift_mock::engine::Collaborators;
use rift_mock::hooks::{HookDispatcher, HttpHookTransport};
use rift_mock::recording::InMemoryRecorder;
use rift_mock::server::{CollaboratorFactory, Dispatcher, MockServer};
use rift_mock::upstream::HttpProxyClient;
use serde_json::json;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

const MOCK_PORT: u16 = 7086;
const UPSTREAM_PORT: u16 = 7087;

fn write(root: &Path, relative: &str, contents: String) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

struct TestServer {
    _dir: TempDir,
    server: Arc<MockServer>,
    recorder: Arc<InMemoryRecorder>,
    mock_addr: SocketAddr,
    client: Client,
}

impl TestServer {
    async fn start(body_limit: usize) -> Self {
        let mock_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mock_addr = mock_listener.local_addr().unwrap();
        let upstream_addr = upstream_listener.local_addr().unwrap();

        let dir = TempDir::new().unwrap();
        populate(dir.path(), upstream_addr);

        let recorder = Arc::new(InMemoryRecorder::new());
        let factory: CollaboratorFactory = {
            let recorder = Arc::clone(&recorder);
            let proxy = Arc::new(HttpProxyClient::new(Duration::from_secs(5)).unwrap());
            Arc::new(move |port| {
                let addr = if port == MOCK_PORT { mock_addr } else { upstream_addr };
                Collaborators {
                    proxy: proxy.clone(),
                    recorder: recorder.clone(),
                    hooks: HookDispatcher::new(Arc::new(
                        HttpHookTransport::new(format!("http://{addr}")).unwrap(),
                    )),
                }
            })
        };

        let dispatcher = Arc::new(Dispatcher::new(dir.path(), factory));
        let server = Arc::new(MockServer::new(dispatcher, "127.0.0.1", body_limit));
        server.serve(MOCK_PORT, mock_listener).unwrap();
        server.serve(UPSTREAM_PORT, upstream_listener).unwrap();

        Self {
            _dir: dir,
            server,
            recorder,
            mock_addr,
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.mock_addr, path)
    }

    async fn get(&self, host: &str, path: &str) -> (u16, String, String) {
        let response = self
            .client
            .get(self.url(path))
            .header("Host", host)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        (status, content_type, response.text().await.unwrap())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

fn populate(root: &Path, upstream: SocketAddr) {
    write(
        root,
        "7086/first.com/mw.json",
        json!({"domains": ["alias.first.com"], "record": true}).to_string(),
    );
    write(root, "7086/first.com/f1/rule.json", "{}".to_string());
    write(
        root,
        "7086/first.com/hi/rule.yaml",
        "response:\n  type: text/plain\n  template: \"hi <%= you %>\"\n".to_string(),
    );
    write(
        root,
        "7086/first.com/x/a.json",
        json!({"q": "query.flag == true", "response": {"body": "flagged"}}).to_string(),
    );
    write(
        root,
        "7086/first.com/x/b.json",
        json!({"response": {"body": "plain"}}).to_string(),
    );
    write(
        root,
        "7086/first.com/notify/rule.json",
        json!({"method": "post", "response": {"body": "noted"}}).to_string(),
    );
    write(
        root,
        "7086/first.com/hooked/rule.json",
        json!({"response": {"body": "hooked"}, "hooks": {"after": [{"path": "/notify"}]}})
            .to_string(),
    );
    write(
        root,
        "7086/first.com/proxied/rule.json",
        json!({"proxy": {"enabled": true, "target": format!("http://{upstream}")}}).to_string(),
    );
    write(
        root,
        "7086/first.com/broken/rule.json",
        "{\"response\": ".to_string(),
    );
    write(
        root,
        "7086/second.org/rule.json",
        json!({"response": {"body": "second"}}).to_string(),
    );
    write(
        root,
        "7087/upstream.local/rule.json",
        json!({"response": {"type": "text/plain", "template": {"type": "mustache", "text": "from upstream {{path}}"}}})
            .to_string(),
    );
}

#[tokio::test]
async fn test_prefix_match_returns_default_body() {
    let t = TestServer::start(1024 * 1024).await;
    let (status, content_type, body) = t.get("first.com", "/f1/anything").await;
    assert_eq!(status, 200);
    assert_eq!(content_type, "application/json");
    assert_eq!(body, "no response body specified");
}

#[tokio::test]
async fn test_template_rendered_from_query() {
    let t = TestServer::start(1024 * 1024).await;
    let (status, content_type, body) = t.get("first.com", "/hi?you=Ada").await;
    assert_eq!(status, 200);
    assert_eq!(content_type, "text/plain");
    assert_eq!(body, "hi Ada");
}

#[tokio::test]
async fn test_condition_disambiguates() {
    let t = TestServer::start(1024 * 1024).await;
    assert_eq!(t.get("first.com", "/x?flag=true").await.2, "flagged");
    assert_eq!(t.get("first.com", "/x").await.2, "plain");
}

#[tokio::test]
async fn test_virtual_hosts_and_aliases() {
    let t = TestServer::start(1024 * 1024).await;
    assert_eq!(t.get("second.org", "/anything").await.2, "second");
    assert_eq!(t.get("alias.first.com", "/x").await.2, "plain");

    let (status, _, body) = t.get("unknown.net", "/x").await;
    assert_eq!(status, 404);
    assert!(body.contains("NO_VIRTUAL_HOST"));
}

#[tokio::test]
async fn test_no_rule_matches_is_404_and_recorded() {
    let t = TestServer::start(1024 * 1024).await;
    let (status, content_type, body) = t.get("first.com", "/nowhere").await;
    assert_eq!(status, 404);
    assert_eq!(content_type, "application/json");
    let error: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(error["code"], "NO_RULE_MATCHES");

    let recorded = t.recorder.list();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].request.path, "/nowhere");
    assert_eq!(recorded[0].response.status, 404);
}

#[tokio::test]
async fn test_broken_rule_file_is_skipped() {
    let t = TestServer::start(1024 * 1024).await;
    let (status, _, _) = t.get("first.com", "/broken").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_after_hook_reaches_target() {
    let t = TestServer::start(1024 * 1024).await;
    assert_eq!(t.get("first.com", "/hooked").await.2, "hooked");

    let notified: Vec<_> = t
        .recorder
        .list()
        .into_iter()
        .filter(|p| p.request.path == "/notify")
        .collect();
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].request.method, "post");
    assert_eq!(notified[0].response.body, "noted");
    let payload: serde_json::Value = serde_json::from_str(&notified[0].request.body).unwrap();
    assert_eq!(payload["stage"], "after");
    assert_eq!(payload["response"]["body"], "hooked");
}

#[tokio::test]
async fn test_proxy_rule_forwards_upstream() {
    let t = TestServer::start(1024 * 1024).await;
    let (status, content_type, body) = t.get("first.com", "/proxied/item?id=1").await;
    assert_eq!(status, 200);
    assert_eq!(content_type, "text/plain");
    assert_eq!(body, "from upstream /proxied/item");

    let proxied: Vec<_> = t
        .recorder
        .list()
        .into_iter()
        .filter(|p| p.port == 7086 && p.request.path == "/proxied/item")
        .collect();
    assert_eq!(proxied.len(), 1);
    assert_eq!(proxied[0].response.body, "from upstream /proxied/item");
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let t = TestServer::start(16).await;
    let response = t
        .client
        .post(t.url("/notify"))
        .header("Host", "first.com")
        .body("x".repeat(64))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 413);
}
