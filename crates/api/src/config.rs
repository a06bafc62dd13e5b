use axum::http::HeaderValue;
use entrypass_core::pin::{PinAttemptPolicy, DEFAULT_BASE_BACKOFF_SECS, DEFAULT_MAX_BACKOFF_SECS};

use crate::auth::jwt::JwtConfig;

/// Idle verification sessions are discarded after this long by default.
const DEFAULT_SESSION_TTL_SECS: u64 = 900;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has an invalid value '{value}'")]
    Invalid { var: &'static str, value: String },
}

/// Server configuration loaded from environment variables.
///
/// All fields except the database URL and JWT secret have defaults suitable
/// for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Grace period for in-flight requests on shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    pub database_url: String,
    pub jwt: JwtConfig,
    /// Idle lifetime of a verification session (default: `900`).
    pub session_ttl_secs: u64,
    /// Lockout policy for incorrect PIN entries. Unlimited by default.
    pub pin_policy: PinAttemptPolicy,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `3000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                    |
    /// | `DATABASE_URL`          | required                |
    /// | `JWT_SECRET`            | required                |
    /// | `SESSION_TTL_SECS`      | `900`                   |
    /// | `PIN_MAX_FAILURES`      | unset (unlimited)       |
    /// | `PIN_BASE_BACKOFF_SECS` | `30`                    |
    /// | `PIN_MAX_BACKOFF_SECS`  | `900`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = parse_var("PORT", 3000)?;

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(bad) = cors_origins
            .iter()
            .find(|o| o.parse::<HeaderValue>().is_err())
        {
            return Err(ConfigError::Invalid {
                var: "CORS_ORIGINS",
                value: bad.clone(),
            });
        }

        let request_timeout_secs = parse_var("REQUEST_TIMEOUT_SECS", 30)?;
        let shutdown_timeout_secs = parse_var("SHUTDOWN_TIMEOUT_SECS", 30)?;
        let database_url = required_var("DATABASE_URL")?;
        let jwt = JwtConfig::from_env()?;
        let session_ttl_secs = parse_var("SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?;

        let pin_policy = PinAttemptPolicy {
            max_failures: parse_optional_var("PIN_MAX_FAILURES")?,
            base_backoff_secs: parse_var("PIN_BASE_BACKOFF_SECS", DEFAULT_BASE_BACKOFF_SECS)?,
            max_backoff_secs: parse_var("PIN_MAX_BACKOFF_SECS", DEFAULT_MAX_BACKOFF_SECS)?,
        };

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            database_url,
            jwt,
            session_ttl_secs,
            pin_policy,
        })
    }
}

pub(crate) fn required_var(var: &'static str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(var)),
    }
}

pub(crate) fn parse_var<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    Ok(parse_optional_var(var)?.unwrap_or(default))
}

fn parse_optional_var<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
        Err(_) => Ok(None),
    }
}
