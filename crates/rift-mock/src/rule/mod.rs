//! Rules: what a request must look like and what to answer with.
//!
//! - `file`: the serde model of rule files and vhost defaults
//! - this module: normalization into a compiled, immutable [`Rule`]

mod file;

pub use file::{
    HookTargetFile, HooksFile, ProxySpec, ResponseFile, RuleDefaults, RuleFile, TemplateFile,
};

use crate::condition::Condition;
use crate::error::ConfigError;
use crate::hooks::{normalize_list, Hooks};
use crate::template::Template;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_METHOD: &str = "get";
pub const DEFAULT_STATUS: u16 = 200;
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";
pub const DEFAULT_BODY: &str = "no response body specified";
pub const DEFAULT_TEMPLATE_DIALECT: &str = "ejs";
const DEFAULT_TEMPLATE_TEXT: &str = "template not specified";
/// Subtracted from `sleep` to cover time already spent handling the request.
pub const DEFAULT_LATENCY_FIX_MS: i64 = -10;

/// What the response body is made of.
#[derive(Debug, Clone)]
pub enum ResponseContent {
    Body(String),
    Template(Template),
}

#[derive(Debug, Clone)]
pub struct ResponseSpec {
    pub status: u16,
    pub content_type: String,
    pub headers: HashMap<String, String>,
    pub content: ResponseContent,
    pub latency_ms: i64,
    pub latency_fix_ms: i64,
}

impl ResponseSpec {
    /// `max(0, latency + latencyFix)`
    pub fn effective_latency(&self) -> Duration {
        let total = self.latency_ms.saturating_add(self.latency_fix_ms);
        Duration::from_millis(total.max(0) as u64)
    }

    fn from_file(file: &ResponseFile) -> Result<Self, ConfigError> {
        if file.body.is_some() && file.template.is_some() {
            return Err(ConfigError::MultipleResponseContents);
        }

        let content = match (&file.template, &file.body) {
            (Some(template), _) => {
                let (dialect, text) = match template {
                    TemplateFile::Text(text) => (DEFAULT_TEMPLATE_DIALECT, text.as_str()),
                    TemplateFile::Spec { dialect, text } => (
                        dialect.as_deref().unwrap_or(DEFAULT_TEMPLATE_DIALECT),
                        text.as_deref().unwrap_or(DEFAULT_TEMPLATE_TEXT),
                    ),
                };
                ResponseContent::Template(Template::compile(dialect, text)?)
            }
            (None, Some(Value::String(body))) => ResponseContent::Body(body.clone()),
            (None, Some(Value::Null)) | (None, None) => {
                ResponseContent::Body(DEFAULT_BODY.to_string())
            }
            (None, Some(other)) => ResponseContent::Body(other.to_string()),
        };

        Ok(Self {
            status: file.status.unwrap_or(DEFAULT_STATUS),
            content_type: file
                .content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            headers: file.header.clone(),
            content,
            latency_ms: file.sleep.unwrap_or(0),
            // an explicit 0 also takes the default
            latency_fix_ms: file
                .sleep_fix
                .filter(|fix| *fix != 0)
                .unwrap_or(DEFAULT_LATENCY_FIX_MS),
        })
    }
}

/// A normalized, compiled rule. Immutable once built.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    /// Lower-cased HTTP method
    pub method: String,
    pub path_prefix: String,
    pub condition: Option<Condition>,
    pub response: ResponseSpec,
    pub proxy: Option<ProxySpec>,
    pub hooks: Hooks,
}

impl Rule {
    /// Normalize a rule file.
    ///
    /// `derived_prefix` is the prefix implied by the file's location; only
    /// rules built without one fall back to the vhost default path.
    /// `fallback_name` is used when the file does not name itself.
    pub fn from_file(
        file: &RuleFile,
        defaults: &RuleDefaults,
        derived_prefix: Option<&str>,
        fallback_name: String,
    ) -> Result<Self, ConfigError> {
        let method = file
            .method
            .as_deref()
            .or(defaults.method.as_deref())
            .unwrap_or(DEFAULT_METHOD)
            .to_lowercase();

        let path_prefix = normalize_prefix(
            file.path
                .as_deref()
                .or(derived_prefix)
                .or(defaults.path.as_deref())
                .unwrap_or("/"),
        );

        let condition = file
            .q
            .as_deref()
            .or(defaults.q.as_deref())
            .filter(|q| !q.trim().is_empty())
            .map(Condition::compile)
            .transpose()?;

        let response_file = file
            .response
            .as_ref()
            .or(defaults.response.as_ref())
            .cloned()
            .unwrap_or_default();
        let response = ResponseSpec::from_file(&response_file)?;

        let hooks_file = file.hooks.clone().unwrap_or_default();
        let hooks = Hooks {
            before: normalize_list(hooks_file.before.as_deref(), "hooks.before")?,
            after: normalize_list(hooks_file.after.as_deref(), "hooks.after")?,
        };

        Ok(Self {
            name: file.name.clone().unwrap_or(fallback_name),
            method,
            path_prefix,
            condition,
            response,
            proxy: file.proxy.clone(),
            hooks,
        })
    }

    pub fn is_proxy(&self) -> bool {
        self.proxy.as_ref().is_some_and(ProxySpec::is_enabled)
    }
}

/// Ensure a leading slash and drop trailing ones (except for the root).
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
