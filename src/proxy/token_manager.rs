// Refresh-token rotation coordinator
//
// Callers presenting the same refresh token share one in-flight `/auth/reissue`.
// The first caller spawns the exchange; later callers queue on it and all of
// them observe the same outcome. The exchange runs on its own task, so a caller
// that goes away does not abort a rotation other callers are waiting on.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::proxy::session::{token_preview, IssuedTokens};
use crate::proxy::upstream::{Backend, UpstreamError};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RotationError {
    /// Backend refused the refresh token
    #[error("Refresh token rejected with status {0}")]
    Rejected(u16),

    /// Backend answered 2xx but without a usable access token
    #[error("Malformed reissue response: {0}")]
    Malformed(String),

    /// Backend could not be reached; the session may still be valid
    #[error("{0}")]
    Unavailable(String),

    /// The exchange task ended without reporting an outcome
    #[error("Rotation interrupted")]
    Interrupted,
}

impl RotationError {
    /// Whether the session is unrecoverable and its cookies must go
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Malformed(_))
    }
}

impl From<UpstreamError> for RotationError {
    fn from(e: UpstreamError) -> Self {
        match e {
            UpstreamError::Unavailable(msg) => Self::Unavailable(msg),
            // A refresh token that cannot even be sent will never be accepted
            UpstreamError::InvalidRequest(msg) => Self::Malformed(msg),
        }
    }
}

pub type RotationOutcome = Result<IssuedTokens, RotationError>;

pub struct TokenManager {
    /// refresh token -> callers waiting on its rotation
    in_flight: Arc<DashMap<String, Vec<oneshot::Sender<RotationOutcome>>>>,
    /// consumed refresh token -> (when, what it was exchanged for)
    recent: Arc<DashMap<String, (Instant, IssuedTokens)>>,
    grace: Duration,
    /// (reached, resume): parks the next caller between the grace check and joining
    #[cfg(test)]
    join_pause: std::sync::Mutex<Option<(Arc<tokio::sync::Notify>, Arc<tokio::sync::Notify>)>>,
}

impl TokenManager {
    /// Create new TokenManager; `grace` is how long a successful rotation
    /// is replayed to late callers still holding the consumed refresh token
    pub fn new(grace: Duration) -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            recent: Arc::new(DashMap::new()),
            grace,
            #[cfg(test)]
            join_pause: std::sync::Mutex::new(None),
        }
    }

    /// Exchange `refresh_token` for new tokens, joining an in-flight
    /// exchange for the same token when there is one
    pub async fn rotate(&self, backend: Arc<dyn Backend>, refresh_token: &str) -> RotationOutcome {
        if let Some(tokens) = self.recently_rotated(refresh_token) {
            tracing::debug!(
                "Reusing rotation of {} from grace window",
                token_preview(refresh_token)
            );
            return Ok(tokens);
        }

        #[cfg(test)]
        self.pause_after_grace_check().await;

        let (tx, rx) = oneshot::channel();

        let leader = match self.in_flight.entry(refresh_token.to_string()) {
            Entry::Occupied(mut waiters) => {
                waiters.get_mut().push(tx);
                false
            }
            Entry::Vacant(slot) => {
                // The exchange task records into `recent` before it frees this
                // slot, so a rotation that finished since the check above is visible here
                if let Some(tokens) = self.recently_rotated(refresh_token) {
                    drop(slot);
                    tracing::debug!(
                        "Rotation of {} completed while joining, reusing it",
                        token_preview(refresh_token)
                    );
                    return Ok(tokens);
                }
                slot.insert(vec![tx]);
                true
            }
        };

        if leader {
            tracing::info!("Rotating refresh token {}", token_preview(refresh_token));
            self.spawn_exchange(backend, refresh_token.to_string());
        } else {
            tracing::info!(
                "Rotation of {} already in progress, queuing",
                token_preview(refresh_token)
            );
        }

        rx.await.unwrap_or(Err(RotationError::Interrupted))
    }

    fn spawn_exchange(&self, backend: Arc<dyn Backend>, refresh_token: String) {
        let in_flight = self.in_flight.clone();
        let recent = self.recent.clone();
        let grace = self.grace;

        tokio::spawn(async move {
            let outcome = exchange(backend.as_ref(), &refresh_token).await;

            match &outcome {
                Ok(tokens) => {
                    tracing::info!("Token rotation succeeded");
                    if !grace.is_zero() {
                        recent.retain(|_, (at, _)| at.elapsed() < grace);
                        recent.insert(refresh_token.clone(), (Instant::now(), tokens.clone()));
                    }
                }
                Err(e) => tracing::warn!("Token rotation failed: {}", e),
            }

            // Removal and insertion of waiters both go through the map's shard
            // lock, so no caller can join after this point and miss the outcome
            let waiters = in_flight
                .remove(&refresh_token)
                .map(|(_, waiters)| waiters)
                .unwrap_or_default();

            tracing::debug!("Resolving {} rotation waiter(s)", waiters.len());
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }
        });
    }

    fn recently_rotated(&self, refresh_token: &str) -> Option<IssuedTokens> {
        let entry = self.recent.get(refresh_token)?;
        let (at, tokens) = entry.value();
        if at.elapsed() < self.grace {
            Some(tokens.clone())
        } else {
            None
        }
    }

    #[cfg(test)]
    async fn pause_after_grace_check(&self) {
        let pause = self.join_pause.lock().unwrap().take();
        if let Some((reached, resume)) = pause {
            reached.notify_one();
            resume.notified().await;
        }
    }

    /// Whether an exchange for `refresh_token` is currently outstanding
    pub fn is_rotating(&self, refresh_token: &str) -> bool {
        self.in_flight.contains_key(refresh_token)
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

/// One `/auth/reissue` round trip
async fn exchange(backend: &dyn Backend, refresh_token: &str) -> RotationOutcome {
    let response = backend.reissue(refresh_token).await?;

    if !response.status.is_success() {
        return Err(RotationError::Rejected(response.status.as_u16()));
    }

    let tokens: IssuedTokens = serde_json::from_slice(&response.body)
        .map_err(|e| RotationError::Malformed(e.to_string()))?;

    if tokens.access_token.is_empty() {
        return Err(RotationError::Malformed("empty accessToken".to_string()));
    }

    Ok(tokens)
}
