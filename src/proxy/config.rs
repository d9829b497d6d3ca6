use serde::{Deserialize, Serialize};

/// Relay service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Whether to accept connections from the LAN
    /// - false: 127.0.0.1 only (default)
    /// - true: 0.0.0.0
    #[serde(default)]
    pub allow_lan_access: bool,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Backend API base URL, e.g. `https://api.example.com/api`.
    /// Absent means every relayed call fails with a configuration error.
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// Production mode marks session cookies `Secure`
    #[serde(default)]
    pub production: bool,

    /// Backend request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// How long a successful rotation is reused for late callers (seconds)
    #[serde(default = "default_rotation_grace")]
    pub rotation_grace_secs: u64,

    /// Session cookie settings
    #[serde(default)]
    pub cookies: CookieConfig,

    /// Browser origins allowed to call the relay
    #[serde(default)]
    pub cors: CorsConfig,

    /// Upstream proxy configuration
    #[serde(default)]
    pub upstream_proxy: UpstreamProxyConfig,
}

/// Upstream proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpstreamProxyConfig {
    /// Enabled
    pub enabled: bool,
    /// Proxy address (http://, https://, socks5://)
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieConfig {
    #[serde(default = "default_access_cookie")]
    pub access_cookie_name: String,
    #[serde(default = "default_refresh_cookie")]
    pub refresh_cookie_name: String,
    /// Access cookie max-age (seconds)
    #[serde(default = "default_access_max_age")]
    pub access_max_age: i64,
    /// Refresh cookie max-age (seconds)
    #[serde(default = "default_refresh_max_age")]
    pub refresh_max_age: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Exact origins, or patterns where `*` matches one run of
    /// non-separator characters (`https://app-*.vercel.app`)
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            allow_lan_access: false,
            port: default_port(),
            api_base_url: None,
            production: false,
            request_timeout: default_request_timeout(),
            rotation_grace_secs: default_rotation_grace(),
            cookies: CookieConfig::default(),
            cors: CorsConfig::default(),
            upstream_proxy: UpstreamProxyConfig::default(),
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            access_cookie_name: default_access_cookie(),
            refresh_cookie_name: default_refresh_cookie(),
            access_max_age: default_access_max_age(),
            refresh_max_age: default_refresh_max_age(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_rotation_grace() -> u64 {
    10
}

fn default_access_cookie() -> String {
    "accessToken".to_string()
}

fn default_refresh_cookie() -> String {
    "refreshToken".to_string()
}

fn default_access_max_age() -> i64 {
    60 * 60
}

fn default_refresh_max_age() -> i64 {
    60 * 60 * 24 * 7
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "https://diary-web-qyme.vercel.app".to_string(),
        "http://localhost:3000".to_string(),
        "https://diary-web-qyme-*.vercel.app".to_string(),
    ]
}

impl ProxyConfig {
    /// Get the actual listen address
    pub fn get_bind_address(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }

    /// Parsed backend base URL with any trailing slash removed.
    /// `None` when unset, blank, or not an absolute http(s) URL.
    pub fn backend_base_url(&self) -> Option<String> {
        let raw = self.api_base_url.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        match url::Url::parse(raw) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                Some(raw.trim_end_matches('/').to_string())
            }
            Ok(parsed) => {
                tracing::error!("Unsupported backend URL scheme: {}", parsed.scheme());
                None
            }
            Err(e) => {
                tracing::error!("Invalid backend URL {}: {}", raw, e);
                None
            }
        }
    }
}
