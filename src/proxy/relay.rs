// Token relay: forward a logical request with the session's bearer token,
// rotate once on 401, retry once, and report the cookie changes to make.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::proxy::mappers::{normalize, RelayBody};
use crate::proxy::session::{CookiePolicy, InboundSession, SessionPatch};
use crate::proxy::token_manager::TokenManager;
use crate::proxy::upstream::{Backend, BackendRequest, BackendResponse, RequestMethod, UpstreamError};

pub const LOGOUT_ENDPOINT: &str = "/auth/logout";

/// Body of a 503 when the backend cannot be reached
pub const SERVICE_UNAVAILABLE_MESSAGE: &str = "API_SERVER_UNAVAILABLE";

/// `{endpoint, requestMethod, data?}` as posted by the browser
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    endpoint: Option<String>,
    request_method: Option<String>,
    data: Option<Value>,
}

/// What the browser wants the backend to do
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalRequest {
    pub endpoint: String,
    pub method: RequestMethod,
    pub data: Option<Value>,
}

impl LogicalRequest {
    pub fn new(endpoint: &str, method: RequestMethod, data: Option<Value>) -> Self {
        Self {
            endpoint: normalize_endpoint(endpoint),
            method,
            data,
        }
    }

    /// Parse the relay envelope. A missing `requestMethod` means GET.
    pub fn from_body(body: &[u8]) -> AppResult<Self> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?;

        let endpoint = envelope
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AppError::BadRequest("endpoint is required".to_string()))?;

        let method = match envelope.request_method.as_deref() {
            Some(m) => m.parse().map_err(AppError::BadRequest)?,
            None => RequestMethod::Get,
        };

        Ok(Self::new(endpoint, method, envelope.data))
    }

    fn to_backend(&self, bearer: Option<&str>) -> BackendRequest {
        BackendRequest {
            method: self.method,
            endpoint: self.endpoint.clone(),
            bearer: bearer.map(str::to_string),
            body: if self.method.is_mutating() {
                self.data.clone()
            } else {
                None
            },
        }
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.starts_with('/') {
        endpoint.to_string()
    } else {
        format!("/{}", endpoint)
    }
}

/// Relay result: what to send back and which cookies to touch
#[derive(Debug, Clone, PartialEq)]
pub struct RelayOutcome {
    pub status: StatusCode,
    pub body: RelayBody,
    pub session: SessionPatch,
}

impl RelayOutcome {
    pub fn from_backend(response: &BackendResponse, session: SessionPatch) -> Self {
        let (status, body) = normalize(response);
        Self {
            status,
            body,
            session,
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: RelayBody::error("Unauthorized"),
            session: SessionPatch::Clear,
        }
    }

    pub fn unavailable(session: SessionPatch) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: RelayBody::error(SERVICE_UNAVAILABLE_MESSAGE),
            session,
        }
    }

    fn json(status: StatusCode, value: Value, session: SessionPatch) -> Self {
        Self {
            status,
            body: RelayBody::Json(value),
            session,
        }
    }

    /// Render for the browser, writing the session patch as `Set-Cookie`
    pub fn into_response(self, policy: &CookiePolicy) -> Response {
        let mut response = match self.body {
            RelayBody::Json(value) => (self.status, Json(value)).into_response(),
            RelayBody::Empty => self.status.into_response(),
        };
        self.session.write_headers(response.headers_mut(), policy);
        response
    }
}

pub struct Relay {
    backend: Arc<dyn Backend>,
    tokens: Arc<TokenManager>,
}

impl Relay {
    pub fn new(backend: Arc<dyn Backend>, tokens: Arc<TokenManager>) -> Self {
        Self { backend, tokens }
    }

    /// Forward `request` on behalf of `session`
    pub async fn relay(
        &self,
        session: &InboundSession,
        request: LogicalRequest,
    ) -> AppResult<RelayOutcome> {
        tracing::info!("Relaying {} {}", request.method, request.endpoint);

        if request.endpoint == LOGOUT_ENDPOINT {
            return Ok(self.logout(session).await);
        }

        let backend_request = request.to_backend(session.access_token.as_deref());

        let first = match self.backend.send(&backend_request).await {
            Ok(response) => response,
            Err(UpstreamError::Unavailable(e)) => {
                tracing::warn!("Backend unreachable for {}: {}", request.endpoint, e);
                return Ok(RelayOutcome::unavailable(SessionPatch::Keep));
            }
            Err(UpstreamError::InvalidRequest(e)) => return Err(AppError::BadRequest(e)),
        };

        if first.status != StatusCode::UNAUTHORIZED {
            return Ok(RelayOutcome::from_backend(&first, SessionPatch::Keep));
        }

        let Some(refresh_token) = session.refresh_token.as_deref() else {
            tracing::info!("401 from {} and no refresh token", request.endpoint);
            return Ok(RelayOutcome::unauthorized());
        };

        let tokens = match self.tokens.rotate(self.backend.clone(), refresh_token).await {
            Ok(tokens) => tokens,
            Err(e) if e.ends_session() => return Ok(RelayOutcome::unauthorized()),
            Err(e) => {
                tracing::warn!("Rotation could not complete: {}", e);
                return Ok(RelayOutcome::unavailable(SessionPatch::Keep));
            }
        };

        // Exactly one retry; its result stands even if it is another 401
        let retry = backend_request.with_bearer(&tokens.access_token);
        let patch = SessionPatch::Rotated(tokens);

        match self.backend.send(&retry).await {
            Ok(response) => Ok(RelayOutcome::from_backend(&response, patch)),
            Err(UpstreamError::Unavailable(e)) => {
                tracing::warn!("Backend unreachable on retry of {}: {}", request.endpoint, e);
                Ok(RelayOutcome::unavailable(patch))
            }
            Err(UpstreamError::InvalidRequest(e)) => Ok(RelayOutcome {
                status: StatusCode::BAD_GATEWAY,
                body: RelayBody::error(e),
                session: patch,
            }),
        }
    }

    /// Backend logout is best-effort; the local session is always cleared
    async fn logout(&self, session: &InboundSession) -> RelayOutcome {
        match self.backend.logout(session.access_token.as_deref()).await {
            Ok(response) if response.status.is_success() => {
                tracing::info!("Backend logout succeeded");
            }
            Ok(response) => {
                tracing::warn!("Backend logout returned {}, clearing session anyway", response.status);
            }
            Err(e) => {
                tracing::warn!("Backend logout failed: {}, clearing session anyway", e);
            }
        }

        RelayOutcome::json(StatusCode::OK, json!({ "success": true }), SessionPatch::Clear)
    }

    /// Explicit rotation requested by the browser
    pub async fn reissue(&self, session: &InboundSession) -> RelayOutcome {
        let Some(refresh_token) = session.refresh_token.as_deref() else {
            return RelayOutcome::json(
                StatusCode::UNAUTHORIZED,
                json!({ "error": "No refresh token" }),
                SessionPatch::Keep,
            );
        };

        match self.tokens.rotate(self.backend.clone(), refresh_token).await {
            Ok(tokens) => RelayOutcome::json(
                StatusCode::OK,
                json!({ "accessToken": tokens.access_token, "tokenType": tokens.token_type }),
                SessionPatch::Rotated(tokens),
            ),
            Err(e) if e.ends_session() => RelayOutcome::json(
                StatusCode::UNAUTHORIZED,
                json!({ "error": "Token refresh failed" }),
                SessionPatch::Clear,
            ),
            Err(e) => {
                tracing::warn!("Rotation could not complete: {}", e);
                RelayOutcome::unavailable(SessionPatch::Keep)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::session::IssuedTokens;
    use crate::proxy::upstream::fake::FakeBackend;
    use futures::future::join_all;
    use std::time::Duration;

    fn relay_with(backend: Arc<FakeBackend>) -> Relay {
        Relay::new(backend, Arc::new(TokenManager::new(Duration::ZERO)))
    }

    fn diaries() -> Value {
        json!({ "content": [{ "id": 1, "title": "first" }, { "id": 2, "title": "second" }] })
    }

    fn expired_session() -> InboundSession {
        InboundSession::new(Some("old-a"), Some("r-1"))
    }

    fn rotated() -> SessionPatch {
        SessionPatch::Rotated(IssuedTokens {
            access_token: "new-a".to_string(),
            refresh_token: Some("new-r".to_string()),
            token_type: "Bearer".to_string(),
        })
    }

    #[test]
    fn test_envelope_parsing() {
        let request = LogicalRequest::from_body(
            br#"{"endpoint":"/diaries","requestMethod":"POST","data":{"title":"t"}}"#,
        )
        .unwrap();
        assert_eq!(request.endpoint, "/diaries");
        assert_eq!(request.method, RequestMethod::Post);
        assert_eq!(request.data, Some(json!({ "title": "t" })));

        let request = LogicalRequest::from_body(br#"{"endpoint":"users/me/profile"}"#).unwrap();
        assert_eq!(request.endpoint, "/users/me/profile");
        assert_eq!(request.method, RequestMethod::Get);
    }

    #[test]
    fn test_envelope_rejections() {
        for body in [
            &br#"{"requestMethod":"GET"}"#[..],
            &br#"{"endpoint":"  "}"#[..],
            &br#"{"endpoint":"/x","requestMethod":"TRACE"}"#[..],
            &b"not json"[..],
            &b"[1,2]"[..],
        ] {
            let err = LogicalRequest::from_body(body).unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_body_only_for_mutating_methods() {
        let data = Some(json!({ "title": "t" }));
        let get = LogicalRequest::new("/diaries", RequestMethod::Get, data.clone());
        assert_eq!(get.to_backend(None).body, None);

        let patch = LogicalRequest::new("/diaries/1", RequestMethod::Patch, data.clone());
        assert_eq!(patch.to_backend(Some("a")).body, data);
        assert_eq!(patch.to_backend(Some("a")).bearer.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_valid_token_passes_through() {
        let backend = Arc::new(FakeBackend::guarded(
            "good-a",
            BackendResponse::json(StatusCode::OK, &diaries()),
        ));
        let relay = relay_with(backend.clone());
        let session = InboundSession::new(Some("good-a"), Some("r-1"));

        let outcome = relay
            .relay(&session, LogicalRequest::new("/diaries", RequestMethod::Get, None))
            .await
            .unwrap();

        assert_eq!(outcome.status, StatusCode::OK);
        assert_eq!(outcome.body, RelayBody::Json(diaries()));
        assert_eq!(outcome.session, SessionPatch::Keep);
        assert_eq!(backend.reissue_count(), 0);
        assert_eq!(backend.sent_requests()[0].bearer.as_deref(), Some("good-a"));
    }

    #[tokio::test]
    async fn test_expired_token_rotates_and_retries() {
        let backend = Arc::new(
            FakeBackend::guarded("new-a", BackendResponse::json(StatusCode::OK, &diaries()))
                .with_rotation("r-1", "new-a", "new-r"),
        );
        let relay = relay_with(backend.clone());

        let outcome = relay
            .relay(
                &expired_session(),
                LogicalRequest::new("/diaries", RequestMethod::Get, None),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, StatusCode::OK);
        assert_eq!(outcome.body, RelayBody::Json(diaries()));
        assert_eq!(outcome.session, rotated());

        let sent = backend.sent_requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].bearer.as_deref(), Some("old-a"));
        assert_eq!(sent[1].bearer.as_deref(), Some("new-a"));
    }

    #[tokio::test]
    async fn test_invalid_refresh_token_clears_session() {
        let backend = Arc::new(
            FakeBackend::guarded("new-a", BackendResponse::json(StatusCode::OK, &diaries()))
                .with_rotation("some-other-token", "new-a", "new-r"),
        );
        let relay = relay_with(backend.clone());

        let outcome = relay
            .relay(
                &expired_session(),
                LogicalRequest::new("/diaries", RequestMethod::Get, None),
            )
            .await
            .unwrap();

        assert_eq!(outcome, RelayOutcome::unauthorized());
        assert_eq!(outcome.body, RelayBody::Json(json!({ "error": "Unauthorized" })));
        assert_eq!(backend.sent_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_401_without_refresh_token() {
        let backend = Arc::new(FakeBackend::guarded(
            "new-a",
            BackendResponse::json(StatusCode::OK, &diaries()),
        ));
        let relay = relay_with(backend.clone());
        let session = InboundSession::new(Some("old-a"), None);

        let outcome = relay
            .relay(&session, LogicalRequest::new("/diaries", RequestMethod::Get, None))
            .await
            .unwrap();

        assert_eq!(outcome, RelayOutcome::unauthorized());
        assert_eq!(backend.reissue_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_retry_is_not_rotated_again() {
        // Backend rejects every access token, even fresh ones
        let backend = Arc::new(
            FakeBackend::guarded("never", BackendResponse::json(StatusCode::OK, &diaries()))
                .with_rotation("r-1", "new-a", "new-r"),
        );
        let relay = relay_with(backend.clone());

        let outcome = relay
            .relay(
                &expired_session(),
                LogicalRequest::new("/diaries", RequestMethod::Get, None),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, StatusCode::UNAUTHORIZED);
        assert_eq!(outcome.body, RelayBody::error("expired"));
        assert_eq!(outcome.session, rotated());
        assert_eq!(backend.reissue_count(), 1);
        assert_eq!(backend.sent_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_rotation() {
        let backend = Arc::new(
            FakeBackend::guarded("new-a", BackendResponse::json(StatusCode::OK, &diaries()))
                .with_rotation("r-1", "new-a", "new-r")
                .with_reissue_delay(Duration::from_millis(100)),
        );
        let relay = relay_with(backend.clone());
        let session = expired_session();

        let calls = (0..6).map(|i| {
            relay.relay(
                &session,
                LogicalRequest::new(&format!("/diaries/{}", i), RequestMethod::Get, None),
            )
        });
        let outcomes = join_all(calls).await;

        assert_eq!(backend.reissue_count(), 1);
        for outcome in outcomes {
            let outcome = outcome.unwrap();
            assert_eq!(outcome.status, StatusCode::OK);
            assert_eq!(outcome.session, rotated());
        }
        assert_eq!(backend.sent_requests().len(), 12);
    }

    #[tokio::test]
    async fn test_concurrent_401s_all_fail_with_rotation() {
        let backend = Arc::new(
            FakeBackend::guarded("new-a", BackendResponse::json(StatusCode::OK, &diaries()))
                .with_reissue_delay(Duration::from_millis(100)),
        );
        let relay = relay_with(backend.clone());
        let session = expired_session();

        let calls = (0..6)
            .map(|_| relay.relay(&session, LogicalRequest::new("/diaries", RequestMethod::Get, None)));
        let outcomes = join_all(calls).await;

        assert_eq!(backend.reissue_count(), 1);
        for outcome in outcomes {
            let outcome = outcome.unwrap();
            assert_eq!(outcome.status, StatusCode::UNAUTHORIZED);
            assert_eq!(outcome.session, SessionPatch::Clear);
        }
    }

    #[tokio::test]
    async fn test_queued_retries_succeed_or_fail_on_their_own() {
        let backend = Arc::new(
            FakeBackend::new(|request| {
                if request.bearer.as_deref() != Some("new-a") {
                    return Ok(BackendResponse::json(StatusCode::UNAUTHORIZED, &json!({})));
                }
                if request.endpoint == "/diaries/broken" {
                    Ok(BackendResponse::json(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &json!({ "message": "boom" }),
                    ))
                } else {
                    Ok(BackendResponse::json(StatusCode::OK, &json!({ "ok": true })))
                }
            })
            .with_rotation("r-1", "new-a", "new-r")
            .with_reissue_delay(Duration::from_millis(100)),
        );
        let relay = relay_with(backend.clone());
        let session = expired_session();

        let (good, bad) = tokio::join!(
            relay.relay(&session, LogicalRequest::new("/diaries/1", RequestMethod::Get, None)),
            relay.relay(&session, LogicalRequest::new("/diaries/broken", RequestMethod::Get, None)),
        );

        let good = good.unwrap();
        let bad = bad.unwrap();
        assert_eq!(backend.reissue_count(), 1);
        assert_eq!(good.status, StatusCode::OK);
        assert_eq!(bad.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(bad.body, RelayBody::error("boom"));
        assert_eq!(good.session, rotated());
        assert_eq!(bad.session, rotated());
    }

    #[tokio::test]
    async fn test_logout_succeeds_when_backend_fails() {
        let backend = Arc::new(
            FakeBackend::new(|_| Ok(BackendResponse::json(StatusCode::OK, &json!({}))))
                .with_logout_result(Ok(BackendResponse::text(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Logout failed",
                ))),
        );
        let relay = relay_with(backend.clone());

        let outcome = relay
            .relay(
                &expired_session(),
                LogicalRequest::new(LOGOUT_ENDPOINT, RequestMethod::Post, None),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, StatusCode::OK);
        assert_eq!(outcome.body, RelayBody::Json(json!({ "success": true })));
        assert_eq!(outcome.session, SessionPatch::Clear);
        assert_eq!(backend.logout_count(), 1);
        assert!(backend.sent_requests().is_empty());
    }

    #[tokio::test]
    async fn test_logout_succeeds_when_backend_unreachable() {
        let backend = Arc::new(
            FakeBackend::new(|_| Ok(BackendResponse::json(StatusCode::OK, &json!({}))))
                .with_logout_result(Err(UpstreamError::Unavailable("refused".into()))),
        );
        let relay = relay_with(backend);

        let outcome = relay
            .relay(
                &InboundSession::default(),
                LogicalRequest::new("auth/logout", RequestMethod::Post, None),
            )
            .await
            .unwrap();

        assert_eq!(outcome.body, RelayBody::Json(json!({ "success": true })));
        assert_eq!(outcome.session, SessionPatch::Clear);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_distinct() {
        let backend = Arc::new(FakeBackend::new(|_| {
            Err(UpstreamError::Unavailable("connection refused".into()))
        }));
        let relay = relay_with(backend);

        let outcome = relay
            .relay(
                &expired_session(),
                LogicalRequest::new("/diaries", RequestMethod::Get, None),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(outcome.body, RelayBody::error(SERVICE_UNAVAILABLE_MESSAGE));
        assert_eq!(outcome.session, SessionPatch::Keep);
    }

    #[tokio::test]
    async fn test_unreachable_reissue_keeps_cookies() {
        let backend = Arc::new(
            FakeBackend::guarded("new-a", BackendResponse::json(StatusCode::OK, &diaries()))
                .with_reissue(|_| Err(UpstreamError::Unavailable("timeout".into()))),
        );
        let relay = relay_with(backend);

        let outcome = relay
            .relay(
                &expired_session(),
                LogicalRequest::new("/diaries", RequestMethod::Get, None),
            )
            .await
            .unwrap();

        assert_eq!(outcome, RelayOutcome::unavailable(SessionPatch::Keep));
    }

    #[tokio::test]
    async fn test_explicit_reissue() {
        let backend = Arc::new(
            FakeBackend::guarded("new-a", BackendResponse::json(StatusCode::OK, &diaries()))
                .with_rotation("r-1", "new-a", "new-r"),
        );
        let relay = relay_with(backend);

        let outcome = relay.reissue(&expired_session()).await;
        assert_eq!(outcome.status, StatusCode::OK);
        assert_eq!(
            outcome.body,
            RelayBody::Json(json!({ "accessToken": "new-a", "tokenType": "Bearer" }))
        );
        assert_eq!(outcome.session, rotated());

        let outcome = relay.reissue(&InboundSession::new(Some("a"), Some("bogus"))).await;
        assert_eq!(outcome.status, StatusCode::UNAUTHORIZED);
        assert_eq!(outcome.session, SessionPatch::Clear);

        let outcome = relay.reissue(&InboundSession::default()).await;
        assert_eq!(outcome.status, StatusCode::UNAUTHORIZED);
        assert_eq!(outcome.body, RelayBody::error("No refresh token"));
        assert_eq!(outcome.session, SessionPatch::Keep);
    }
}
