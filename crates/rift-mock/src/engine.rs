//! Per-virtual-host request pipeline.
//!
//! ```text
//! Received → Matched | Unmatched
//!          → Proxied | (before hooks → Rendered → latency → after hooks)
//!          → Recorded? → Done
//! ```
//!
//! Recording runs after the pipeline whatever its outcome, including a
//! panic inside it, and its own failures are only logged.

use crate::condition::condition_matches;
use crate::error::EngineError;
use crate::hooks::{HookDispatcher, HookPayload, HookStage};
use crate::model::VirtualHost;
use crate::recording::{RecordedPair, Recorder};
use crate::request::NormalizedRequest;
use crate::response::MockResponse;
use crate::rule::{ResponseContent, Rule};
use crate::rule_tree::RuleTree;
use crate::upstream::ProxyClient;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// External services the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub proxy: Arc<dyn ProxyClient>,
    pub recorder: Arc<dyn Recorder>,
    pub hooks: HookDispatcher,
}

/// Matches and answers requests for one virtual host.
pub struct RuleEngine {
    port: u16,
    vhost: String,
    record: bool,
    tree: RuleTree,
    collaborators: Collaborators,
}

impl RuleEngine {
    pub fn new(port: u16, vhost: &VirtualHost, collaborators: Collaborators) -> Self {
        let tree = vhost.rules.iter().map(|(_, rule)| Arc::clone(rule)).collect();
        Self {
            port,
            vhost: vhost.name.clone(),
            record: vhost.record,
            tree,
            collaborators,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn vhost(&self) -> &str {
        &self.vhost
    }

    pub fn rule_count(&self) -> usize {
        self.tree.len()
    }

    /// Handle one request end to end.
    pub async fn handle(&self, request: &NormalizedRequest) -> Result<MockResponse, EngineError> {
        let mut matched = None;
        let outcome = AssertUnwindSafe(self.pipeline(request, &mut matched))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(EngineError::Internal(panic_message(panic.as_ref()))));

        if self.record {
            self.record(request, matched, &outcome).await;
        }
        outcome
    }

    /// First candidate, most specific prefix first, whose condition holds.
    pub fn find_rule(&self, request: &NormalizedRequest) -> Result<Arc<Rule>, EngineError> {
        let candidates = self.tree.candidates(&request.method, &request.path);
        debug!(
            "{} candidate rules for {} {} on '{}'",
            candidates.len(),
            request.method,
            request.path,
            self.vhost
        );
        candidates
            .into_iter()
            .find(|rule| condition_matches(rule.condition.as_ref(), request))
            .ok_or_else(|| EngineError::NoRuleMatches {
                method: request.method.clone(),
                path: request.path.clone(),
            })
    }

    async fn pipeline(
        &self,
        request: &NormalizedRequest,
        matched: &mut Option<String>,
    ) -> Result<MockResponse, EngineError> {
        let rule = self.find_rule(request)?;
        info!("Found matched rule '{}' for {} {}", rule.name, request.method, request.url);
        *matched = Some(rule.name.clone());

        if let Some(proxy) = rule.proxy.as_ref().filter(|p| p.is_enabled()) {
            return self
                .collaborators
                .proxy
                .forward(proxy, request)
                .await
                .map_err(|e| EngineError::Upstream(format!("{e:#}")));
        }

        if rule.hooks.need_call_before() {
            let payload = self.payload(HookStage::Before, &rule, request, None);
            self.collaborators.hooks.call_before(&rule.hooks, payload).await;
        }

        let response = render(&rule, request)?;

        let latency = rule.response.effective_latency();
        if !latency.is_zero() {
            debug!("Delaying response of rule '{}' by {:?}", rule.name, latency);
            tokio::time::sleep(latency).await;
        }

        if rule.hooks.need_call_after() {
            let payload = self.payload(HookStage::After, &rule, request, Some(response.clone()));
            self.collaborators.hooks.call_after(&rule.hooks, payload).await;
        }

        Ok(response)
    }

    fn payload(
        &self,
        stage: HookStage,
        rule: &Rule,
        request: &NormalizedRequest,
        response: Option<MockResponse>,
    ) -> HookPayload {
        HookPayload {
            stage,
            rule: rule.name.clone(),
            request: request.clone(),
            response,
        }
    }

    async fn record(
        &self,
        request: &NormalizedRequest,
        rule: Option<String>,
        outcome: &Result<MockResponse, EngineError>,
    ) {
        let response = match outcome {
            Ok(response) => response.clone(),
            Err(e) => e.to_response(),
        };
        let pair = RecordedPair::new(self.port, self.vhost.as_str(), rule, request.clone(), response);
        if let Err(e) = self.collaborators.recorder.insert(pair).await {
            warn!("Failed to record {} {} on port {}: {}", request.method, request.url, self.port, e);
        }
    }
}

/// Synthesize the response of a non-proxy rule.
pub fn render(rule: &Rule, request: &NormalizedRequest) -> Result<MockResponse, EngineError> {
    let spec = &rule.response;
    let body = match &spec.content {
        ResponseContent::Body(body) => body.clone(),
        ResponseContent::Template(template) => template
            .render(&request.template_context())
            .map_err(|source| EngineError::TemplateRender {
                rule: rule.name.clone(),
                source,
            })?,
    };

    let mut response = MockResponse::new(spec.status, spec.content_type.as_str(), body);
    for (name, value) in &spec.headers {
        if name.eq_ignore_ascii_case("content-type") {
            response.content_type = value.clone();
        } else {
            response.set_header(name.as_str(), value.as_str());
        }
    }
    Ok(response)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "request handler panicked".to_string()
    }
}
