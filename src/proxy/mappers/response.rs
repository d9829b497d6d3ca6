// Backend response -> uniform client contract
//
// 2xx JSON      -> body and status verbatim
// 2xx other     -> {"data": "<text>"}
// non-2xx       -> {"error": "<message>"}

use axum::http::StatusCode;
use serde_json::{json, Value};

use crate::proxy::upstream::BackendResponse;

#[derive(Debug, Clone, PartialEq)]
pub enum RelayBody {
    Json(Value),
    /// Statuses that must not carry a body (204, 205, 304)
    Empty,
}

impl RelayBody {
    pub fn error(message: impl Into<String>) -> Self {
        RelayBody::Json(json!({ "error": message.into() }))
    }
}

pub fn normalize(response: &BackendResponse) -> (StatusCode, RelayBody) {
    let status = response.status;

    if !status.is_success() {
        return (status, RelayBody::error(error_message(response)));
    }

    if is_bodyless(status) {
        return (status, RelayBody::Empty);
    }

    if response.is_json() {
        match serde_json::from_slice::<Value>(&response.body) {
            Ok(value) => return (status, RelayBody::Json(value)),
            Err(e) => {
                tracing::warn!("Backend declared JSON but sent something else: {}", e);
            }
        }
    }

    (status, RelayBody::Json(json!({ "data": response.text_lossy() })))
}

fn is_bodyless(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT | StatusCode::NOT_MODIFIED
    )
}

/// Backend's own message when it sent one, else its raw text, else the reason phrase
pub fn error_message(response: &BackendResponse) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(&response.body) {
        for key in ["message", "error"] {
            if let Some(Value::String(msg)) = map.get(key) {
                if !msg.trim().is_empty() {
                    return msg.clone();
                }
            }
        }
    }

    let text = response.text_lossy();
    let text = text.trim();
    if !text.is_empty() {
        return text.to_string();
    }

    response
        .status
        .canonical_reason()
        .map(|r| r.to_string())
        .unwrap_or_else(|| response.status.as_str().to_string())
}
