use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::retry::RetryPolicy;

pub const DEFAULT_UPSTREAM_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_ROUTE: &str = "/api/verify_step";

/// Verification proxy settings. Every flag can also come from the
/// environment (or a `.env` file).
#[derive(Debug, Clone, Parser)]
#[command(name = "stepcheck", about = "Step verification proxy for a vision model")]
pub struct ProxyConfig {
    #[arg(long, env = "STEPCHECK_BIND", default_value = "127.0.0.1:8787")]
    pub bind: SocketAddr,

    #[arg(long, env = "STEPCHECK_ROUTE", default_value = DEFAULT_ROUTE)]
    pub route: String,

    #[arg(long, env = "GEMINI_API_BASE", default_value = DEFAULT_UPSTREAM_URL)]
    pub upstream_url: String,

    /// Without it every verification answers 500.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Require `Authorization: Bearer <token>` on verification requests.
    #[arg(long, env = "STEPCHECK_REQUIRE_AUTH", default_value_t = false)]
    pub require_auth: bool,

    #[arg(long, env = "STEPCHECK_ALLOW_ORIGIN", default_value = "*")]
    pub allow_origin: String,

    #[arg(long, env = "STEPCHECK_MAX_ATTEMPTS", default_value_t = crate::retry::DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    #[arg(long, env = "STEPCHECK_BACKOFF_MS", default_value_t = 350)]
    pub backoff_ms: u64,

    #[arg(long, env = "STEPCHECK_ATTEMPT_TIMEOUT_MS", default_value_t = 10_000)]
    pub attempt_timeout_ms: u64,

    #[arg(long, env = "STEPCHECK_MAX_BODY_BYTES", default_value_t = 16 * 1024 * 1024)]
    pub max_body_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8787)),
            route: DEFAULT_ROUTE.to_string(),
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            require_auth: false,
            allow_origin: "*".to_string(),
            max_attempts: crate::retry::DEFAULT_MAX_ATTEMPTS,
            backoff_ms: 350,
            attempt_timeout_ms: 10_000,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ProxyConfig {
    /// Reads `.env` (if any), then flags and environment.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::parse()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_ms),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
        }
    }

    /// The upstream key, treating a blank value as missing.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_parsed_defaults() {
        let parsed = ProxyConfig::try_parse_from(["stepcheck"]).unwrap();
        let default = ProxyConfig::default();
        assert_eq!(parsed.bind, default.bind);
        assert_eq!(parsed.route, default.route);
        assert_eq!(parsed.retry_policy(), RetryPolicy::default());
        assert_eq!(parsed.max_body_bytes, default.max_body_bytes);
    }

    #[test]
    fn flags_override_defaults() {
        let parsed = ProxyConfig::try_parse_from([
            "stepcheck",
            "--require-auth",
            "--model",
            "gemini-2.0-flash",
            "--api-key",
            "k",
            "--max-attempts",
            "5",
            "--backoff-ms",
            "100",
        ])
        .unwrap();
        assert!(parsed.require_auth);
        assert_eq!(parsed.model, "gemini-2.0-flash");
        assert_eq!(parsed.api_key(), Some("k"));
        assert_eq!(parsed.retry_policy().max_attempts, 5);
        assert_eq!(parsed.retry_policy().backoff(2), Duration::from_millis(200));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let config = ProxyConfig {
            api_key: Some("   ".into()),
            ..ProxyConfig::default()
        };
        assert_eq!(config.api_key(), None);
    }
}
