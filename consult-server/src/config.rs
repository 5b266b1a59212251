//! Server configuration from environment variables.

use std::env;
use std::time::Duration;

/// Everything the server reads from the environment, loaded once at
/// startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr:             String,
    pub db_path:               String,
    pub token_secret:          String,
    /// Token lifetime handed to the issuance helper; verification always
    /// trusts the embedded `exp`.
    pub token_ttl:             Duration,
    pub provider_base_url:     String,
    pub provider_api_key:      String,
    pub provider_timeout:      Duration,
    pub offline_queue_cap:     usize,
    /// When set, WebSocket upgrades must carry this `Origin`.
    pub cors_origin:           Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    Missing(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(var) => write!(f, "required environment variable {var} is not set"),
        }
    }
}
impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let token_secret = env::var("CONSULT_TOKEN_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("CONSULT_TOKEN_SECRET"))?;

        Ok(Self {
            bind_addr: env::var("CONSULT_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".into()),
            db_path:   env::var("CONSULT_DB_PATH").unwrap_or_else(|_| "consult.db".into()),
            token_secret,
            token_ttl: Duration::from_secs(parse_or("CONSULT_TOKEN_TTL_SECS", 86_400)),
            provider_base_url: env::var("CONSULT_PROVIDER_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            provider_api_key: env::var("CONSULT_PROVIDER_API_KEY").unwrap_or_default(),
            provider_timeout: Duration::from_secs(parse_or("CONSULT_PROVIDER_TIMEOUT_SECS", 30)),
            offline_queue_cap: parse_or("CONSULT_OFFLINE_QUEUE_CAP", 256) as usize,
            cors_origin: env::var("CONSULT_CORS_ORIGIN").ok().filter(|s| !s.is_empty()),
        })
    }
}

fn parse_or(var: &str, default: u64) -> u64 {
    env::var(var).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}
