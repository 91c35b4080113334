use std::time::Duration;

use tracing::warn;

/// Runtime configuration, sourced from environment variables with defaults.
/// Command-line flags may override individual fields after loading.
#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,

    // Fixed credential set for the remote application.
    pub user_name: String,
    pub comp_id: String,
    pub user_pass: String,

    pub browser_headless: bool,
    pub browser_debug: bool,

    pub sqlite_path: String,

    pub session_ttl: Duration,
    pub cookie_ttl: Duration,

    /// Downstream ingestion endpoint for raw extracted records.
    pub ingest_api_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        let cfg = Self {
            http_port: env_u16("HTTP_PORT", 8080),
            user_name: env_str("USER_NAME", ""),
            comp_id: env_str("COMP_ID", ""),
            user_pass: env_str("USER_PASS", ""),
            browser_headless: env_bool("BROWSER_HEADLESS", true),
            browser_debug: env_bool("BROWSER_DEBUG", false),
            sqlite_path: env_str("SQLITE_PATH", "./data/venus_render.db"),
            session_ttl: env_duration("SESSION_TTL", Duration::from_secs(10 * 60)),
            cookie_ttl: env_duration("COOKIE_TTL", Duration::from_secs(24 * 60 * 60)),
            ingest_api_url: env_str(
                "INGEST_API_URL",
                "https://hono-api.mtamaramu.com/api/dtakologs",
            ),
        };

        if cfg.user_name.is_empty() || cfg.comp_id.is_empty() || cfg.user_pass.is_empty() {
            warn!("Authentication credentials not set in environment variables");
        }

        cfg
    }
}

fn env_str(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => parse_duration(&v).unwrap_or(default),
        _ => default,
    }
}

/// Accepts either a plain number of seconds or an `s`/`m`/`h` suffix.
pub(crate) fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // Split on the final char; the suffix may be multi-byte garbage.
    let mut chars = value.chars();
    let unit = chars.next_back()?;
    let n: u64 = chars.as_str().trim().parse().ok()?;
    match unit {
        's' => Some(Duration::from_secs(n)),
        'm' => Some(Duration::from_secs(n * 60)),
        'h' => Some(Duration::from_secs(n * 60 * 60)),
        _ => None,
    }
}
