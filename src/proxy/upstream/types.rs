// Backend-facing request/response types and the seam the relay talks through

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// HTTP verbs a logical request may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl RequestMethod {
    /// Only these carry a JSON body and `Content-Type`
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl FromStr for RequestMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("Unsupported request method: {}", other)),
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved call to `{base}{endpoint}`
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub method: RequestMethod,
    pub endpoint: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

impl BackendRequest {
    /// Same request, re-authorized with another access token
    pub fn with_bearer(&self, access_token: &str) -> Self {
        Self {
            bearer: Some(access_token.to_string()),
            ..self.clone()
        }
    }
}

/// Buffered backend response
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl BackendResponse {
    pub fn new(status: StatusCode, content_type: Option<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }

    pub fn json(status: StatusCode, value: &Value) -> Self {
        Self::new(
            status,
            Some("application/json".to_string()),
            value.to_string(),
        )
    }

    pub fn text(status: StatusCode, text: &str) -> Self {
        Self::new(
            status,
            Some("text/plain;charset=UTF-8".to_string()),
            text.to_string(),
        )
    }

    /// `application/json`, any `+json` suffix type, parameters ignored
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|essence| {
                let essence = essence.trim().to_ascii_lowercase();
                essence == "application/json" || essence.ends_with("+json")
            })
            .unwrap_or(false)
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum UpstreamError {
    /// No usable response: connect failure, timeout, reset, truncated body
    #[error("API_SERVER_UNAVAILABLE: {0}")]
    Unavailable(String),

    /// The request could not be built (e.g. a token that is not a valid header value)
    #[error("Invalid upstream request: {0}")]
    InvalidRequest(String),
}

/// Backend API as seen by the relay
#[async_trait]
pub trait Backend: Send + Sync {
    /// Forward a relayed call
    async fn send(&self, request: &BackendRequest) -> Result<BackendResponse, UpstreamError>;

    /// `POST {base}/auth/reissue` with `Refresh-Token`
    async fn reissue(&self, refresh_token: &str) -> Result<BackendResponse, UpstreamError>;

    /// Body-less `POST {base}/auth/logout`
    async fn logout(&self, access_token: Option<&str>) -> Result<BackendResponse, UpstreamError>;
}
