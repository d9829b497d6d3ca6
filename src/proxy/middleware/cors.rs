// CORS allow-list: exact origins plus `*` wildcard patterns for preview deployments
use axum::http::{header, request::Parts, HeaderValue, Method};
use regex::Regex;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::proxy::config::CorsConfig;

#[derive(Debug, Default)]
pub struct OriginMatcher {
    exact: Vec<String>,
    patterns: Vec<Regex>,
}

impl OriginMatcher {
    pub fn new(origins: &[String]) -> Self {
        let mut matcher = Self::default();
        for origin in origins.iter().map(|o| o.trim().trim_end_matches('/')) {
            if origin.is_empty() {
                continue;
            }
            if origin.contains('*') {
                match pattern_to_regex(origin) {
                    Ok(re) => matcher.patterns.push(re),
                    Err(e) => tracing::error!("Ignoring CORS pattern {}: {}", origin, e),
                }
            } else {
                matcher.exact.push(origin.to_string());
            }
        }
        matcher
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.exact.iter().any(|o| o == origin) || self.patterns.iter().any(|re| re.is_match(origin))
    }
}

/// `*` matches any run of characters except `/`; everything else is literal
fn pattern_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("[^/]*");
    Regex::new(&format!("^{}$", body))
}

pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let matcher = Arc::new(OriginMatcher::new(&config.allowed_origins));

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _request: &Parts| {
                origin
                    .to_str()
                    .map(|o| matcher.is_allowed(o))
                    .unwrap_or(false)
            },
        ))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
}
