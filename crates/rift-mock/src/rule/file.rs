//! On-disk rule file format.
//!
//! Unknown keys are ignored so operators can annotate rule files freely.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One rule file, as written by the operator.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Explicit path prefix; overrides the directory-derived one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Condition expression
    #[serde(default, alias = "condition", skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<HooksFile>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResponseFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(
        default,
        rename = "type",
        alias = "contentType",
        skip_serializing_if = "Option::is_none"
    )]
    pub content_type: Option<String>,
    #[serde(default, alias = "headers", skip_serializing_if = "HashMap::is_empty")]
    pub header: HashMap<String, String>,
    /// Literal body; non-string values are sent as JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateFile>,
    /// Simulated latency in milliseconds
    #[serde(default, alias = "latency", skip_serializing_if = "Option::is_none")]
    pub sleep: Option<i64>,
    /// Adjustment added to `sleep`
    #[serde(
        default,
        rename = "sleepFix",
        alias = "latencyFix",
        skip_serializing_if = "Option::is_none"
    )]
    pub sleep_fix: Option<i64>,
}

/// A template is either bare text (ejs) or a `{type, text}` pair.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TemplateFile {
    Text(String),
    Spec {
        #[serde(
            default,
            rename = "type",
            alias = "dialect",
            skip_serializing_if = "Option::is_none"
        )]
        dialect: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

/// Proxy mode configuration (external collaborator input).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ProxySpec {
    #[serde(default)]
    pub enabled: bool,
    /// Upstream base URL, e.g. `http://127.0.0.1:9000`
    #[serde(default)]
    pub target: String,
}

impl ProxySpec {
    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.target.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HooksFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Vec<HookTargetFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Vec<HookTargetFile>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HookTargetFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, rename = "async", skip_serializing_if = "Option::is_none")]
    pub is_async: Option<bool>,
}

/// Rule-set level defaults, read from the `default` key of a vhost config.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuleDefaults {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, alias = "condition")]
    pub q: Option<String>,
    #[serde(default)]
    pub response: Option<ResponseFile>,
}
