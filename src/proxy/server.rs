use axum::{
    extract::DefaultBodyLimit,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::error::{AppError, AppResult};
use crate::proxy::config::ProxyConfig;
use crate::proxy::relay::Relay;
use crate::proxy::session::CookiePolicy;
use crate::proxy::upstream::{Backend, UpstreamClient};
use crate::proxy::TokenManager;

/// Diary payloads are JSON; images go straight to object storage
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Axum application state
#[derive(Clone)]
pub struct AppState {
    /// `None` when no backend base URL is configured
    pub relay: Option<Arc<Relay>>,
    pub cookie_policy: Arc<CookiePolicy>,
}

impl AppState {
    pub fn from_config(config: &ProxyConfig) -> Self {
        let backend = config.backend_base_url().map(|base_url| {
            Arc::new(UpstreamClient::new(
                base_url,
                config.request_timeout,
                Some(&config.upstream_proxy),
            )) as Arc<dyn Backend>
        });

        if backend.is_none() {
            tracing::error!("API_BASE_URL is not configured; relayed calls will fail with 500");
        }

        Self::with_backend(backend, config)
    }

    pub fn with_backend(backend: Option<Arc<dyn Backend>>, config: &ProxyConfig) -> Self {
        let token_manager = Arc::new(TokenManager::new(Duration::from_secs(
            config.rotation_grace_secs,
        )));

        Self {
            relay: backend.map(|b| Arc::new(Relay::new(b, token_manager))),
            cookie_policy: Arc::new(CookiePolicy::from_config(config)),
        }
    }

    pub fn relay(&self) -> AppResult<&Arc<Relay>> {
        self.relay
            .as_ref()
            .ok_or_else(|| AppError::Config("API_BASE_URL is not configured".to_string()))
    }
}

/// Build routes
pub fn build_router(state: AppState, config: &ProxyConfig) -> Router {
    use crate::proxy::handlers;

    Router::new()
        .route("/api/bff", post(handlers::bff::handle_bff))
        .route("/api/auth/reissue", post(handlers::auth::handle_reissue))
        .route("/api/auth/logout", post(handlers::auth::handle_logout))
        .route("/api/auth/get-token", get(handlers::auth::handle_get_token))
        .route("/healthz", get(health_check_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(
            crate::proxy::middleware::logging_middleware,
        ))
        .layer(crate::proxy::middleware::cors_layer(&config.cors))
        .with_state(state)
}

/// Axum server instance
pub struct AxumServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    local_addr: std::net::SocketAddr,
}

impl AxumServer {
    /// Start Axum server
    pub async fn start(
        config: &ProxyConfig,
        state: AppState,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), String> {
        let app = build_router(state, config);

        // Bind address
        let addr = format!("{}:{}", config.get_bind_address(), config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind address {}: {}", addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        tracing::info!("BFF relay started at http://{}", local_addr);

        // Create shutdown channel
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let server_instance = Self {
            shutdown_tx: Some(shutdown_tx),
            local_addr,
        };

        // Start server in new task
        let handle = tokio::spawn(async move {
            use hyper::server::conn::http1;
            use hyper_util::rt::TokioIo;
            use hyper_util::service::TowerToHyperService;

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let service = TowerToHyperService::new(app.clone());

                                tokio::task::spawn(async move {
                                    if let Err(err) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!("Connection handling finished or errored: {:?}", err);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {:?}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("BFF relay stopped listening");
                        break;
                    }
                }
            }
        });

        Ok((server_instance, handle))
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Stop server
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Health check handler
async fn health_check_handler() -> Response {
    Json(serde_json::json!({
        "status": "ok"
    }))
    .into_response()
}
