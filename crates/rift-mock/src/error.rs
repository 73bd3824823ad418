//! Error types for rule loading and request handling.
//!
//! Load-time problems surface as [`ConfigError`] and only ever disqualify the
//! offending rule file. Request-time problems surface as [`EngineError`] and
//! are turned into a JSON error response by [`EngineError::to_response`].

use crate::response::MockResponse;
use crate::template::TemplateError;
use hyper::StatusCode;

/// Problems found while loading or normalizing a rule.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid condition '{condition}': {reason}")]
    InvalidCondition { condition: String, reason: String },
    #[error("Rule declares both 'body' and 'template' in its response")]
    MultipleResponseContents,
    #[error("Missing required parameter '{0}'")]
    MissingParameter(String),
    #[error("Unsupported template type '{0}'")]
    UnsupportedDialect(String),
    #[error("Invalid template: {0}")]
    Template(String),
    #[error("Failed to parse '{path}': {reason}")]
    Parse { path: String, reason: String },
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<TemplateError> for ConfigError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::UnsupportedDialect(dialect) => ConfigError::UnsupportedDialect(dialect),
            other => ConfigError::Template(other.to_string()),
        }
    }
}

/// Failures reported back to the caller of [`crate::engine::RuleEngine::handle`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No rule matches {method} {path}")]
    NoRuleMatches { method: String, path: String },
    #[error("No virtual host serves '{0}'")]
    NoVirtualHost(String),
    #[error("Failed to generate response with template of rule '{rule}': {source}")]
    TemplateRender {
        rule: String,
        #[source]
        source: TemplateError,
    },
    #[error("Upstream request failed: {0}")]
    Upstream(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable code placed in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NoRuleMatches { .. } => "NO_RULE_MATCHES",
            EngineError::NoVirtualHost(_) => "NO_VIRTUAL_HOST",
            EngineError::TemplateRender { .. } => "FAILED_TO_GENERATE_RESPONSE_WITH_TEMPLATE",
            EngineError::Upstream(_) => "UPSTREAM_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::NoRuleMatches { .. } | EngineError::NoVirtualHost(_) => {
                StatusCode::NOT_FOUND
            }
            EngineError::TemplateRender { .. } | EngineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            EngineError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Render this error the way the transport writes it to the wire.
    pub fn to_response(&self) -> MockResponse {
        let body = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        MockResponse::new(self.status().as_u16(), "application/json", body.to_string())
    }
}
