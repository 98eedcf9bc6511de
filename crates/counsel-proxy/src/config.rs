use std::time::Duration;

use counsel_common::gateway::GatewayClientConfig;

use crate::error::ProxyError;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_FORWARD_PATH: &str = "/api/dify";
const DEFAULT_UPSTREAM_ORIGIN: &str = "https://gateway.lingxinai.com/dify-test";
const DEFAULT_REWRITE_FROM: &str = "/api";
const DEFAULT_REWRITE_TO: &str = "/v1";

/// Proxy configuration loaded explicitly from environment variables.
///
/// Every variable is optional. Values that are set but malformed are an
/// error rather than silently replaced by the default.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Listen address, e.g. "0.0.0.0:3001".
    pub bind_addr: String,
    /// Path of the envelope route (`{apiUrl, apiKey, payload}`).
    pub forward_path: String,
    /// Gateway origin for the `/api/*` pass-through route.
    pub upstream_origin: String,
    pub rewrite_from: String,
    pub rewrite_to: String,
    pub gateway: GatewayClientConfig,
}

impl ProxyConfig {
    /// Optional:
    /// - `PROXY_BIND_ADDR` (default `0.0.0.0:3001`)
    /// - `PROXY_FORWARD_PATH` (default `/api/dify`)
    /// - `PROXY_UPSTREAM_ORIGIN` (default `https://gateway.lingxinai.com/dify-test`)
    /// - `PROXY_REWRITE_FROM` / `PROXY_REWRITE_TO` (default `/api` -> `/v1`)
    /// - `PROXY_TIMEOUT_SECS`: upstream request timeout; unset means none
    /// - `PROXY_MAX_ERROR_BODY_BYTES` (default 65536)
    /// - `PROXY_ACCEPT_INVALID_CERTS` (default false)
    pub fn from_env() -> Result<Self, ProxyError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ProxyError> {
        let var = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let bind_addr = var("PROXY_BIND_ADDR", DEFAULT_BIND_ADDR);

        let forward_path = var("PROXY_FORWARD_PATH", DEFAULT_FORWARD_PATH);
        require_path("PROXY_FORWARD_PATH", &forward_path)?;

        let upstream_origin = var("PROXY_UPSTREAM_ORIGIN", DEFAULT_UPSTREAM_ORIGIN)
            .trim_end_matches('/')
            .to_string();
        if !(upstream_origin.starts_with("http://") || upstream_origin.starts_with("https://")) {
            return Err(ProxyError::Config(format!(
                "PROXY_UPSTREAM_ORIGIN must be an http(s) URL, got {upstream_origin}"
            )));
        }

        let rewrite_from = var("PROXY_REWRITE_FROM", DEFAULT_REWRITE_FROM);
        require_path("PROXY_REWRITE_FROM", &rewrite_from)?;
        let rewrite_to = var("PROXY_REWRITE_TO", DEFAULT_REWRITE_TO);
        require_path("PROXY_REWRITE_TO", &rewrite_to)?;

        let defaults = GatewayClientConfig::default();

        let timeout = lookup("PROXY_TIMEOUT_SECS")
            .map(|s| parse_number::<u64>("PROXY_TIMEOUT_SECS", &s))
            .transpose()?
            .map(Duration::from_secs);

        let max_error_body_bytes = lookup("PROXY_MAX_ERROR_BODY_BYTES")
            .map(|s| parse_number::<usize>("PROXY_MAX_ERROR_BODY_BYTES", &s))
            .transpose()?
            .unwrap_or(defaults.max_error_body_bytes);

        let accept_invalid_certs = lookup("PROXY_ACCEPT_INVALID_CERTS")
            .map(|s| parse_bool("PROXY_ACCEPT_INVALID_CERTS", &s))
            .transpose()?
            .unwrap_or(defaults.accept_invalid_certs);

        Ok(Self {
            bind_addr,
            forward_path,
            upstream_origin,
            rewrite_from,
            rewrite_to,
            gateway: GatewayClientConfig {
                timeout,
                max_error_body_bytes,
                accept_invalid_certs,
            },
        })
    }
}

fn require_path(key: &str, value: &str) -> Result<(), ProxyError> {
    if value.starts_with('/') {
        Ok(())
    } else {
        Err(ProxyError::Config(format!("{key} must start with '/', got {value}")))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ProxyError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ProxyError::Config(format!("{key} must be a non-negative integer, got {value}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ProxyError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ProxyError::Config(format!("{key} must be a boolean, got {value}"))),
    }
}
