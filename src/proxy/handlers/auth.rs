// Session routes that live beside the relay
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::error::AppResult;
use crate::proxy::server::AppState;
use crate::proxy::session::{InboundSession, SessionPatch};

/// POST /api/auth/reissue - rotate using the refresh cookie
pub async fn handle_reissue(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let relay = state.relay()?;
    let session = InboundSession::from_headers(&headers, &state.cookie_policy);

    let outcome = relay.reissue(&session).await;
    Ok(outcome.into_response(&state.cookie_policy))
}

/// POST /api/auth/logout - drop the local session without contacting the backend
pub async fn handle_logout(State(state): State<AppState>) -> Response {
    let mut response = (StatusCode::OK, Json(json!({ "success": true }))).into_response();
    SessionPatch::Clear.write_headers(response.headers_mut(), &state.cookie_policy);
    response
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenView {
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

/// GET /api/auth/get-token - echo the HttpOnly session cookies back to page code
pub async fn handle_get_token(State(state): State<AppState>, headers: HeaderMap) -> Json<TokenView> {
    let session = InboundSession::from_headers(&headers, &state.cookie_policy);
    Json(TokenView {
        access_token: session.access_token,
        refresh_token: session.refresh_token,
    })
}
