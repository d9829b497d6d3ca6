// Scripted in-process backend for relay and rotation tests

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::types::{Backend, BackendRequest, BackendResponse, UpstreamError};

type Responder = Box<dyn Fn(&BackendRequest) -> Result<BackendResponse, UpstreamError> + Send + Sync>;
type ReissueResponder = Box<dyn Fn(&str) -> Result<BackendResponse, UpstreamError> + Send + Sync>;

pub struct FakeBackend {
    responder: Responder,
    reissuer: ReissueResponder,
    logout_result: Result<BackendResponse, UpstreamError>,
    reissue_delay: Duration,
    pub sent: Mutex<Vec<BackendRequest>>,
    pub reissue_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(
        responder: impl Fn(&BackendRequest) -> Result<BackendResponse, UpstreamError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            reissuer: Box::new(|_| {
                Ok(BackendResponse::json(
                    StatusCode::UNAUTHORIZED,
                    &json!({ "message": "invalid refresh token" }),
                ))
            }),
            logout_result: Ok(BackendResponse::new(StatusCode::OK, None, "")),
            reissue_delay: Duration::from_millis(0),
            sent: Mutex::new(Vec::new()),
            reissue_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        }
    }

    /// Accepts only `valid_access`; anything else gets 401
    pub fn guarded(valid_access: &'static str, ok: BackendResponse) -> Self {
        Self::new(move |request| {
            if request.bearer.as_deref() == Some(valid_access) {
                Ok(ok.clone())
            } else {
                Ok(BackendResponse::json(
                    StatusCode::UNAUTHORIZED,
                    &json!({ "message": "expired" }),
                ))
            }
        })
    }

    pub fn with_reissue(
        mut self,
        reissuer: impl Fn(&str) -> Result<BackendResponse, UpstreamError> + Send + Sync + 'static,
    ) -> Self {
        self.reissuer = Box::new(reissuer);
        self
    }

    /// Reissue answers `{accessToken, refreshToken}` for `valid_refresh`, 401 otherwise
    pub fn with_rotation(self, valid_refresh: &'static str, access: &'static str, refresh: &'static str) -> Self {
        self.with_reissue(move |token| {
            if token == valid_refresh {
                Ok(BackendResponse::json(
                    StatusCode::OK,
                    &json!({ "accessToken": access, "refreshToken": refresh, "tokenType": "Bearer" }),
                ))
            } else {
                Ok(BackendResponse::json(
                    StatusCode::UNAUTHORIZED,
                    &json!({ "message": "invalid refresh token" }),
                ))
            }
        })
    }

    pub fn with_reissue_delay(mut self, delay: Duration) -> Self {
        self.reissue_delay = delay;
        self
    }

    pub fn with_logout_result(mut self, result: Result<BackendResponse, UpstreamError>) -> Self {
        self.logout_result = result;
        self
    }

    pub fn sent_requests(&self) -> Vec<BackendRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn reissue_count(&self) -> usize {
        self.reissue_calls.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn send(&self, request: &BackendRequest) -> Result<BackendResponse, UpstreamError> {
        self.sent.lock().unwrap().push(request.clone());
        tokio::task::yield_now().await;
        (self.responder)(request)
    }

    async fn reissue(&self, refresh_token: &str) -> Result<BackendResponse, UpstreamError> {
        self.reissue_calls.fetch_add(1, Ordering::SeqCst);
        if !self.reissue_delay.is_zero() {
            tokio::time::sleep(self.reissue_delay).await;
        }
        (self.reissuer)(refresh_token)
    }

    async fn logout(&self, _access_token: Option<&str>) -> Result<BackendResponse, UpstreamError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.logout_result.clone()
    }
}
