//! HTTP request handling for port listeners.

use super::dispatcher::Dispatcher;
use crate::request::NormalizedRequest;
use crate::response::MockResponse;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle a request received by the listener of `port`.
pub async fn handle_mock_request(
    req: Request<Incoming>,
    dispatcher: Arc<Dispatcher>,
    port: u16,
    client_addr: SocketAddr,
    body_limit: usize,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, body_limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(
                "Rejecting {} {} from {}: body exceeds {} bytes",
                parts.method, parts.uri, client_addr, body_limit
            );
            return Ok(error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                &format!("Request body exceeds {body_limit} bytes"),
            ));
        }
        Err(e) => {
            debug!("Failed to read request body from {}: {}", client_addr, e);
            return Ok(error_response(
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                "Failed to read request body",
            ));
        }
    };

    let request = NormalizedRequest::from_parts(&parts, &body, client_addr);
    debug!("Port {}: {} {}", port, request.method, request.url);

    let response = dispatcher.dispatch(port, &request).await;
    Ok(response.into_http())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "code": code, "message": message });
    MockResponse::new(status.as_u16(), "application/json", body.to_string()).into_http()
}
