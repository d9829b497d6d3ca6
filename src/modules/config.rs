use serde_json;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{AppError, AppResult};
use crate::models::AppConfig;

const DATA_DIR: &str = ".diary_bff";
const CONFIG_FILE: &str = "bff_config.json";

/// Get data directory path
pub fn get_data_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Failed to get user home directory")?;
    let data_dir = home.join(DATA_DIR);

    // Ensure directory exists
    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)
            .map_err(|e| format!("Failed to create data directory: {}", e))?;
    }

    Ok(data_dir)
}

fn config_path() -> AppResult<PathBuf> {
    match std::env::var("BFF_CONFIG") {
        Ok(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
        _ => Ok(get_data_dir().map_err(AppError::Config)?.join(CONFIG_FILE)),
    }
}

/// Load application config: JSON file first, then process environment
pub fn load_app_config() -> AppResult<AppConfig> {
    let config = load_from_file(&config_path()?)?;
    Ok(apply_env_overrides(config, |key| std::env::var(key).ok()))
}

fn load_from_file(path: &Path) -> AppResult<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::new());
    }

    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Layer environment variables over a loaded config.
/// Unparseable values are logged and ignored.
pub fn apply_env_overrides<F>(mut config: AppConfig, lookup: F) -> AppConfig
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(url) = get("API_BASE_URL").or_else(|| get("NEXT_PUBLIC_API_BASE_URL")) {
        config.proxy.api_base_url = Some(url);
    }
    if let Some(port) = parse_var(&get, "BFF_PORT") {
        config.proxy.port = port;
    }
    if let Some(lan) = parse_var(&get, "BFF_ALLOW_LAN_ACCESS") {
        config.proxy.allow_lan_access = lan;
    }
    if let Some(env) = get("APP_ENV").or_else(|| get("NODE_ENV")) {
        config.proxy.production = env.eq_ignore_ascii_case("production");
    }
    if let Some(origins) = get("BFF_ALLOWED_ORIGINS") {
        config.proxy.cors.allowed_origins = origins
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
    }
    if let Some(timeout) = parse_var(&get, "BFF_REQUEST_TIMEOUT") {
        config.proxy.request_timeout = timeout;
    }
    if let Some(proxy_url) = get("BFF_UPSTREAM_PROXY") {
        config.proxy.upstream_proxy.enabled = true;
        config.proxy.upstream_proxy.url = proxy_url;
    }
    if let Some(dir) = get("BFF_LOG_DIR") {
        config.log_dir = Some(PathBuf::from(dir));
    }

    config
}

fn parse_var<T, G>(get: &G, key: &str) -> Option<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    let raw = get(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={}", key, raw);
            None
        }
    }
}
