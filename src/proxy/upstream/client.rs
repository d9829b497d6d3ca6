// Upstream client implementation
// reqwest-backed access to the diary backend API

use async_trait::async_trait;
use reqwest::{header, Client, Response};

use super::types::{Backend, BackendRequest, BackendResponse, UpstreamError};
use crate::proxy::config::UpstreamProxyConfig;

const REISSUE_PATH: &str = "/auth/reissue";
const LOGOUT_PATH: &str = "/auth/logout";
const REFRESH_TOKEN_HEADER: &str = "Refresh-Token";

pub struct UpstreamClient {
    http_client: Client,
    base_url: String,
}

impl UpstreamClient {
    /// `base_url` must already be validated and have no trailing slash
    pub fn new(
        base_url: String,
        timeout_secs: u64,
        proxy_config: Option<&UpstreamProxyConfig>,
    ) -> Self {
        let http_client = crate::utils::http::create_client_with_proxy(timeout_secs, proxy_config);
        tracing::info!("UpstreamClient targeting {}", base_url);
        Self {
            http_client,
            base_url,
        }
    }

    /// Build backend URL
    fn build_url(base_url: &str, endpoint: &str) -> String {
        format!("{}{}", base_url, endpoint)
    }

    fn bearer_value(access_token: &str) -> Result<header::HeaderValue, UpstreamError> {
        header::HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|e| UpstreamError::InvalidRequest(format!("access token: {}", e)))
    }

    /// Buffer the whole response; a body cut off mid-read counts as unreachable
    async fn read(response: Response) -> Result<BackendResponse, UpstreamError> {
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Unavailable(format!("Failed to read body: {}", e)))?;

        Ok(BackendResponse::new(status, content_type, body))
    }

    fn map_send_error(e: reqwest::Error) -> UpstreamError {
        if e.is_builder() {
            UpstreamError::InvalidRequest(e.to_string())
        } else {
            UpstreamError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl Backend for UpstreamClient {
    async fn send(&self, request: &BackendRequest) -> Result<BackendResponse, UpstreamError> {
        let url = Self::build_url(&self.base_url, &request.endpoint);

        let mut headers = header::HeaderMap::new();
        if let Some(token) = &request.bearer {
            headers.insert(header::AUTHORIZATION, Self::bearer_value(token)?);
        }

        let mut builder = self
            .http_client
            .request(request.method.to_reqwest(), &url);

        // JSON only for POST/PUT/PATCH
        if request.method.is_mutating() {
            headers.insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("application/json"),
            );
            if let Some(body) = &request.body {
                builder = builder.body(body.to_string());
            }
        }

        tracing::debug!("Upstream {} {}", request.method, url);

        let response = builder
            .headers(headers)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Self::read(response).await
    }

    async fn reissue(&self, refresh_token: &str) -> Result<BackendResponse, UpstreamError> {
        let url = Self::build_url(&self.base_url, REISSUE_PATH);
        let value = header::HeaderValue::from_str(refresh_token)
            .map_err(|e| UpstreamError::InvalidRequest(format!("refresh token: {}", e)))?;

        let response = self
            .http_client
            .post(&url)
            .header(REFRESH_TOKEN_HEADER, value)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Self::read(response).await
    }

    async fn logout(&self, access_token: Option<&str>) -> Result<BackendResponse, UpstreamError> {
        let url = Self::build_url(&self.base_url, LOGOUT_PATH);

        let mut builder = self.http_client.post(&url);
        if let Some(token) = access_token {
            builder = builder.header(header::AUTHORIZATION, Self::bearer_value(token)?);
        }

        let response = builder.send().await.map_err(Self::map_send_error)?;
        Self::read(response).await
    }
}
