//! Types for request recording.

use crate::request::NormalizedRequest;
use crate::response::MockResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One handled request and the response sent for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedPair {
    pub port: u16,
    /// Virtual host that handled the request
    pub vhost: String,
    /// Matched rule, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    pub request: NormalizedRequest,
    pub response: MockResponse,
    pub recorded_at: DateTime<Utc>,
}

impl RecordedPair {
    pub fn new(
        port: u16,
        vhost: impl Into<String>,
        rule: Option<String>,
        request: NormalizedRequest,
        response: MockResponse,
    ) -> Self {
        Self {
            port,
            vhost: vhost.into(),
            rule,
            request,
            response,
            recorded_at: Utc::now(),
        }
    }
}
