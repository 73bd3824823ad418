//! Before/after hooks around response synthesis.
//!
//! Hooks notify external targets about a request/response pair. They never
//! influence which rule was matched, and their failures are logged and
//! swallowed so a broken notification target cannot break a mock.

use crate::error::ConfigError;
use crate::request::NormalizedRequest;
use crate::response::MockResponse;
use crate::rule::HookTargetFile;
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for hook calls made by [`HttpHookTransport`].
const HOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// One hook target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookTarget {
    pub path: String,
    /// Lower-cased HTTP method, `post` unless configured
    pub method: String,
    /// Fire without waiting for completion
    #[serde(rename = "async")]
    pub is_async: bool,
}

/// The hook lists declared by a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hooks {
    pub before: Vec<HookTarget>,
    pub after: Vec<HookTarget>,
}

impl Hooks {
    pub fn need_call_before(&self) -> bool {
        !self.before.is_empty()
    }

    pub fn need_call_after(&self) -> bool {
        !self.after.is_empty()
    }
}

pub fn normalize_async_flag(flag: Option<bool>) -> bool {
    flag.unwrap_or(false)
}

/// Normalize one target. `field` names it in error messages (e.g. `hooks.before[0]`).
pub fn normalize_target(target: &HookTargetFile, field: &str) -> Result<HookTarget, ConfigError> {
    let path = target
        .path
        .as_ref()
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingParameter(format!("{field}.path")))?;
    Ok(HookTarget {
        path: path.clone(),
        method: target
            .method
            .as_deref()
            .unwrap_or("post")
            .to_lowercase(),
        is_async: normalize_async_flag(target.is_async),
    })
}

pub fn normalize_list(
    targets: Option<&[HookTargetFile]>,
    field: &str,
) -> Result<Vec<HookTarget>, ConfigError> {
    targets
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(i, t)| normalize_target(t, &format!("{field}[{i}]")))
        .collect()
}

/// Body sent to hook targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookPayload {
    pub stage: HookStage,
    pub rule: String,
    pub request: NormalizedRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<MockResponse>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookStage {
    Before,
    After,
}

/// Delivers a payload to one target.
#[async_trait]
pub trait HookTransport: Send + Sync {
    async fn invoke(&self, target: &HookTarget, payload: &HookPayload) -> anyhow::Result<()>;
}

/// Invokes hook lists with per-target failure isolation.
#[derive(Clone)]
pub struct HookDispatcher {
    transport: Arc<dyn HookTransport>,
}

impl HookDispatcher {
    pub fn new(transport: Arc<dyn HookTransport>) -> Self {
        Self { transport }
    }

    pub async fn call_before(&self, hooks: &Hooks, payload: HookPayload) {
        self.call_all(&hooks.before, payload).await;
    }

    pub async fn call_after(&self, hooks: &Hooks, payload: HookPayload) {
        self.call_all(&hooks.after, payload).await;
    }

    async fn call_all(&self, targets: &[HookTarget], payload: HookPayload) {
        let payload = Arc::new(payload);
        for target in targets {
            if target.is_async {
                let transport = Arc::clone(&self.transport);
                let target = target.clone();
                let payload = Arc::clone(&payload);
                tokio::spawn(async move {
                    invoke_logged(transport.as_ref(), &target, &payload).await;
                });
            } else {
                invoke_logged(self.transport.as_ref(), target, &payload).await;
            }
        }
    }
}

async fn invoke_logged(transport: &dyn HookTransport, target: &HookTarget, payload: &HookPayload) {
    let outcome = AssertUnwindSafe(transport.invoke(target, payload))
        .catch_unwind()
        .await;
    match outcome {
        Ok(Ok(())) => debug!(
            "Hook {} {} ({:?}) for rule '{}' succeeded",
            target.method, target.path, payload.stage, payload.rule
        ),
        Ok(Err(e)) => warn!(
            "Hook {} {} ({:?}) for rule '{}' failed: {}",
            target.method, target.path, payload.stage, payload.rule, e
        ),
        Err(_) => warn!(
            "Hook {} {} ({:?}) for rule '{}' panicked",
            target.method, target.path, payload.stage, payload.rule
        ),
    }
}

/// Sends hook payloads as JSON over HTTP.
///
/// Relative target paths are resolved against `base_url` (normally the
/// port's own listener); absolute `http(s)://` paths are used as-is.
pub struct HttpHookTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHookTransport {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self::with_client(Self::client()?, base_url))
    }

    /// Share one client between transports of several ports.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// A client configured with the hook timeout.
    pub fn client() -> anyhow::Result<reqwest::Client> {
        Ok(reqwest::Client::builder().timeout(HOOK_TIMEOUT).build()?)
    }

    fn url_for(&self, path: &str) -> String {
        if is_absolute(path) {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn is_absolute(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

#[async_trait]
impl HookTransport for HttpHookTransport {
    async fn invoke(&self, target: &HookTarget, payload: &HookPayload) -> anyhow::Result<()> {
        let method = reqwest::Method::from_bytes(target.method.to_uppercase().as_bytes())?;
        let mut request = self.client.request(method, self.url_for(&target.path));
        // relative targets are served by the same virtual host
        if !is_absolute(&target.path) {
            if let Some(host) = payload.request.headers.get("host") {
                request = request.header(reqwest::header::HOST, host);
            }
        }
        request.json(payload).send().await?.error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records calls; fails for targets whose path contains "fail", panics for "panic".
    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HookTransport for RecordingTransport {
        async fn invoke(&self, target: &HookTarget, _payload: &HookPayload) -> anyhow::Result<()> {
            self.calls.lock().push(target.path.clone());
            if target.path.contains("fail") {
                anyhow::bail!("target unavailable");
            }
            if target.path.contains("panic") {
                panic!("transport bug");
            }
            Ok(())
        }
    }

    fn target(path: &str) -> HookTarget {
        HookTarget {
            path: path.to_string(),
            method: "post".to_string(),
            is_async: false,
        }
    }

    fn payload() -> HookPayload {
        HookPayload {
            stage: HookStage::Before,
            rule: "r".to_string(),
            request: NormalizedRequest::new("GET", "/"),
            response: None,
        }
    }

    #[test]
    fn test_normalize_async_flag() {
        assert!(!normalize_async_flag(None));
        assert!(normalize_async_flag(Some(true)));
        assert!(!normalize_async_flag(Some(false)));
    }

    #[test]
    fn test_normalize_list() {
        assert!(normalize_list(None, "hooks.before").unwrap().is_empty());
        assert!(normalize_list(Some(&[] as &[HookTargetFile]), "hooks.before").unwrap().is_empty());

        let targets = vec![
            HookTargetFile {
                path: Some("/a".to_string()),
                ..Default::default()
            },
            HookTargetFile {
                path: Some("/b".to_string()),
                ..Default::default()
            },
        ];
        assert_eq!(normalize_list(Some(targets.as_slice()), "hooks.before").unwrap().len(), 2);
    }

    #[test]
    fn test_normalize_target_method() {
        let t = HookTargetFile {
            path: Some("/".to_string()),
            ..Default::default()
        };
        assert_eq!(normalize_target(&t, "t").unwrap().method, "post");

        let t = HookTargetFile {
            path: Some("/".to_string()),
            method: Some("GET".to_string()),
            ..Default::default()
        };
        assert_eq!(normalize_target(&t, "t").unwrap().method, "get");
    }

    #[test]
    fn test_normalize_target_missing_path() {
        let err = normalize_target(&HookTargetFile::default(), "hooks.after[2]").unwrap_err();
        match err {
            ConfigError::MissingParameter(field) => assert!(field.contains("path")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_need_call() {
        let empty = Hooks::default();
        assert!(!empty.need_call_before());
        assert!(!empty.need_call_after());

        let hooks = Hooks {
            before: vec![target("/a")],
            after: vec![],
        };
        assert!(hooks.need_call_before());
        assert!(!hooks.need_call_after());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_siblings() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = HookDispatcher::new(transport.clone());
        let hooks = Hooks {
            before: vec![target("/first"), target("/fail"), target("/last")],
            after: vec![],
        };

        dispatcher.call_before(&hooks, payload()).await;

        assert_eq!(*transport.calls.lock(), vec!["/first", "/fail", "/last"]);
    }

    #[tokio::test]
    async fn test_panicking_target_is_contained() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = HookDispatcher::new(transport.clone());
        let hooks = Hooks {
            before: vec![],
            after: vec![target("/panic"), target("/last")],
        };

        dispatcher.call_after(&hooks, payload()).await;

        assert_eq!(*transport.calls.lock(), vec!["/panic", "/last"]);
    }

    #[tokio::test]
    async fn test_async_targets_are_spawned() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = HookDispatcher::new(transport.clone());
        let mut async_target = target("/async");
        async_target.is_async = true;
        let hooks = Hooks {
            before: vec![],
            after: vec![async_target],
        };

        dispatcher.call_after(&hooks, payload()).await;
        for _ in 0..50 {
            if !transport.calls.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*transport.calls.lock(), vec!["/async"]);
    }

    #[test]
    fn test_url_for() {
        let transport = HttpHookTransport::new("http://127.0.0.1:7086/").unwrap();
        assert_eq!(transport.url_for("/notify"), "http://127.0.0.1:7086/notify");
        assert_eq!(transport.url_for("http://elsewhere/x"), "http://elsewhere/x");
    }
}
