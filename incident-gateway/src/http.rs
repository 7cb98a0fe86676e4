use http::StatusCode;
use reqwest::RequestBuilder;
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

pub const SERVICE_UNAVAILABLE_MESSAGE: &str = "Service unavailable";

/// Transport-level failure talking to a collaborator service
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Upstream timeout for {0}")]
    Timeout(String),

    #[error("Upstream request failed for {0}: {1}")]
    RequestFailed(String, String),

    #[error("Failed to read response body from {0}: {1}")]
    ResponseBody(String, String),
}

/// Status and decoded body of a collaborator response
#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub body: Value,
}

impl UpstreamReply {
    /// The reply synthesized when a collaborator cannot be reached.
    pub fn unavailable() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: json!({ "error": SERVICE_UNAVAILABLE_MESSAGE }),
        }
    }
}

/// Joins a configured base URL and a request path.
///
/// The base may or may not carry a trailing slash; the path always starts with one.
pub fn upstream_url(base: &Url, path: &str) -> String {
    format!("{}{}", base.as_str().trim_end_matches('/'), path)
}

/// Send a request to a collaborator and collect the entire reply.
///
/// Every status code is a reply, including 4xx and 5xx; only transport
/// failures are errors. The request is expected to carry its own timeout,
/// which covers the whole cycle including reading the body.
///
/// Bodies that are not JSON are kept as a JSON string, an empty body is `null`.
pub async fn send_to_upstream(
    request: RequestBuilder,
    upstream: &str,
) -> Result<UpstreamReply, UpstreamError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            UpstreamError::Timeout(upstream.to_string())
        } else {
            UpstreamError::RequestFailed(upstream.to_string(), e.to_string())
        }
    })?;

    let status = response.status();
    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            UpstreamError::Timeout(upstream.to_string())
        } else {
            UpstreamError::ResponseBody(upstream.to_string(), e.to_string())
        }
    })?;

    Ok(UpstreamReply {
        status,
        body: decode_body(&bytes),
    })
}

fn decode_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
