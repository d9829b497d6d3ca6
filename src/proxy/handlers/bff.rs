// BFF relay handler
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Response,
};

use crate::error::AppResult;
use crate::proxy::relay::LogicalRequest;
use crate::proxy::server::AppState;
use crate::proxy::session::InboundSession;

/// POST /api/bff
///
/// Body: `{endpoint, requestMethod, data?}`. The backend base URL is checked
/// before the body so a misconfigured deployment always answers 500.
pub async fn handle_bff(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let relay = state.relay()?;
    let request = LogicalRequest::from_body(&body)?;
    let session = InboundSession::from_headers(&headers, &state.cookie_policy);

    let outcome = relay.relay(&session, request).await?;
    Ok(outcome.into_response(&state.cookie_policy))
}
