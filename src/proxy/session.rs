// Session tokens at the HTTP boundary: read from `Cookie`, written back as `Set-Cookie`

use axum::http::{header, HeaderMap, HeaderValue};
use cookie::time::Duration as CookieDuration;
use cookie::{Cookie, SameSite};
use serde::Deserialize;

use crate::proxy::config::ProxyConfig;

/// Cookie names and attributes for the two session tokens
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    pub access_name: String,
    pub refresh_name: String,
    pub access_max_age: i64,
    pub refresh_max_age: i64,
    pub secure: bool,
}

impl CookiePolicy {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            access_name: config.cookies.access_cookie_name.clone(),
            refresh_name: config.cookies.refresh_cookie_name.clone(),
            access_max_age: config.cookies.access_max_age,
            refresh_max_age: config.cookies.refresh_max_age,
            secure: config.production,
        }
    }

    fn build(&self, name: &str, value: &str, max_age: i64) -> String {
        Cookie::build((name.to_string(), value.to_string()))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(CookieDuration::seconds(max_age))
            .build()
            .to_string()
    }
}

impl Default for CookiePolicy {
    fn default() -> Self {
        Self::from_config(&ProxyConfig::default())
    }
}

/// Tokens presented by the browser on this request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundSession {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl InboundSession {
    pub fn new(access_token: Option<&str>, refresh_token: Option<&str>) -> Self {
        Self {
            access_token: access_token.map(str::to_string),
            refresh_token: refresh_token.map(str::to_string),
        }
    }

    pub fn from_headers(headers: &HeaderMap, policy: &CookiePolicy) -> Self {
        Self {
            access_token: cookie_value(headers, &policy.access_name),
            refresh_token: cookie_value(headers, &policy.refresh_name),
        }
    }
}

/// First non-empty value of `name` across every `Cookie` header
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|part| Cookie::parse(part.trim().to_string()).ok())
        .find(|c| c.name() == name && !c.value().is_empty())
        .map(|c| c.value().to_string())
}

/// Result of a successful `/auth/reissue`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedTokens {
    pub access_token: String,
    /// Present only when the backend rotated the refresh token too
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Cookie changes the HTTP layer must emit alongside a relay result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionPatch {
    #[default]
    Keep,
    Rotated(IssuedTokens),
    Clear,
}

impl SessionPatch {
    /// `Set-Cookie` header values, in emission order
    pub fn set_cookie_values(&self, policy: &CookiePolicy) -> Vec<String> {
        match self {
            SessionPatch::Keep => Vec::new(),
            SessionPatch::Rotated(tokens) => {
                let mut values = vec![policy.build(
                    &policy.access_name,
                    &tokens.access_token,
                    policy.access_max_age,
                )];
                if let Some(refresh) = &tokens.refresh_token {
                    values.push(policy.build(&policy.refresh_name, refresh, policy.refresh_max_age));
                }
                values
            }
            SessionPatch::Clear => vec![
                policy.build(&policy.access_name, "", 0),
                policy.build(&policy.refresh_name, "", 0),
            ],
        }
    }

    pub fn write_headers(&self, headers: &mut HeaderMap, policy: &CookiePolicy) {
        for value in self.set_cookie_values(policy) {
            match HeaderValue::from_str(&value) {
                Ok(v) => {
                    headers.append(header::SET_COOKIE, v);
                }
                Err(e) => tracing::error!("Dropping unrepresentable Set-Cookie: {}", e),
            }
        }
    }
}

/// Short token prefix for log lines
pub fn token_preview(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{}...", prefix)
}
