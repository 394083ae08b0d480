//! Settings schema and environment parsing.
//!
//! All runtime configuration comes from the environment. Missing or
//! malformed values are fatal at startup; the only optional knobs have
//! conservative defaults.

use std::env;

use crate::error::SettingsError;

/// Environment variable carrying the KV connection URL.
pub const ENV_REDIS_URL: &str = "API_PROXY_REDIS_URL";
/// Environment variable carrying the shared admin secret.
pub const ENV_ADMIN_TOKEN: &str = "ADMIN_TOKEN";
/// Environment variable overriding the listen port.
pub const ENV_PORT: &str = "PORT";
/// Environment variable toggling the statistics subsystem.
pub const ENV_ENABLE_STATS: &str = "ENABLE_STATS";
/// Environment variable enabling the global rate limit (requests/second).
pub const ENV_RATE_LIMIT_RPS: &str = "RATE_LIMIT_RPS";

const DEFAULT_PORT: u16 = 8000;

/// Runtime settings for the proxy.
#[derive(Debug, Clone)]
pub struct Settings {
    /// KV connection URL (`redis://` or `rediss://`).
    pub redis_url: String,

    /// Shared admin secret. `None` disables the admin surface (endpoints
    /// answer 503).
    pub admin_token: Option<String>,

    /// Listen port for the HTTP server.
    pub port: u16,

    /// Whether the statistics collector runs. When off, a no-op observer
    /// is injected into the forwarder.
    pub enable_stats: bool,

    /// Global requests-per-second budget for the proxy route. Zero
    /// disables rate limiting.
    pub rate_limit_rps: u32,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        let redis_url = env::var(ENV_REDIS_URL)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or(SettingsError::Missing(ENV_REDIS_URL))?;

        let admin_token = env::var(ENV_ADMIN_TOKEN).ok().filter(|v| !v.is_empty());

        let port = match env::var(ENV_PORT) {
            Ok(raw) => raw.parse::<u16>().map_err(|e| SettingsError::Invalid {
                name: ENV_PORT,
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let enable_stats = match env::var(ENV_ENABLE_STATS) {
            Ok(raw) => parse_bool(&raw).ok_or_else(|| SettingsError::Invalid {
                name: ENV_ENABLE_STATS,
                value: raw.clone(),
                reason: "expected true/false".into(),
            })?,
            Err(_) => true,
        };

        let rate_limit_rps = match env::var(ENV_RATE_LIMIT_RPS) {
            Ok(raw) => raw.parse::<u32>().map_err(|e| SettingsError::Invalid {
                name: ENV_RATE_LIMIT_RPS,
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            Err(_) => 0,
        };

        Ok(Self {
            redis_url,
            admin_token,
            port,
            enable_stats,
            rate_limit_rps,
        })
    }

    /// Bind address derived from the configured port.
    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
