//! Environment-driven service configuration.

use chrono::Duration;
use std::env;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set in environment")]
    Missing(&'static str),

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Clone, Debug)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub api_url: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub max_connections: u32,
    pub jwt_access_secret: String,
    pub jwt_refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub razorpay: Option<RazorpayConfig>,
    pub nats_url: Option<String>,
    pub client_url: String,
    pub mail_from: String,
    /// Requests allowed per client IP in each `rate_limit_window` under `/api`.
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    /// Key clients by `X-Forwarded-For` when running behind a reverse proxy.
    pub trust_proxy: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok().filter(|v| !v.trim().is_empty()))
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let port = get("PORT").unwrap_or_else(|| "5000".to_string()).parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::Invalid { key: "PORT", reason: e.to_string() })?;
        let max_connections = get("DATABASE_MAX_CONNECTIONS").unwrap_or_else(|| "10".to_string()).parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::Invalid { key: "DATABASE_MAX_CONNECTIONS", reason: e.to_string() })?;

        let access_ttl = parse_duration(&get("JWT_ACCESS_EXPIRY").unwrap_or_else(|| "15m".to_string()))
            .map_err(|reason| ConfigError::Invalid { key: "JWT_ACCESS_EXPIRY", reason })?;
        let refresh_ttl = parse_duration(&get("JWT_REFRESH_EXPIRY").unwrap_or_else(|| "7d".to_string()))
            .map_err(|reason| ConfigError::Invalid { key: "JWT_REFRESH_EXPIRY", reason })?;

        let rate_limit_max = get("RATE_LIMIT_MAX").unwrap_or_else(|| "200".to_string()).parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::Invalid { key: "RATE_LIMIT_MAX", reason: e.to_string() })?;
        let rate_limit_window = parse_duration(&get("RATE_LIMIT_WINDOW").unwrap_or_else(|| "15m".to_string()))
            .map_err(|reason| ConfigError::Invalid { key: "RATE_LIMIT_WINDOW", reason })?;

        let razorpay = match (get("RAZORPAY_KEY_ID"), get("RAZORPAY_KEY_SECRET")) {
            (Some(key_id), Some(key_secret)) => Some(RazorpayConfig {
                key_id,
                key_secret,
                api_url: get("RAZORPAY_API_URL").unwrap_or_else(|| "https://api.razorpay.com".to_string()),
            }),
            _ => None,
        };

        let config = Self {
            database_url: required("DATABASE_URL")?,
            port,
            max_connections,
            jwt_access_secret: required("JWT_ACCESS_SECRET")?,
            jwt_refresh_secret: required("JWT_REFRESH_SECRET")?,
            access_ttl,
            refresh_ttl,
            razorpay,
            nats_url: get("NATS_URL"),
            client_url: get("CLIENT_URL").unwrap_or_else(|| "http://localhost:3000".to_string()),
            mail_from: get("MAIL_FROM").unwrap_or_else(|| "SparePartsHub <no-reply@sparepartshub.in>".to_string()),
            rate_limit_max,
            rate_limit_window,
            trust_proxy: get("TRUST_PROXY").is_some_and(|v| matches!(v.trim(), "1" | "true" | "yes")),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, secret) in [("JWT_ACCESS_SECRET", &self.jwt_access_secret), ("JWT_REFRESH_SECRET", &self.jwt_refresh_secret)] {
            if secret.len() < 32 {
                return Err(ConfigError::Invalid { key, reason: "must be at least 32 characters long".to_string() });
            }
        }
        if self.jwt_access_secret == self.jwt_refresh_secret {
            return Err(ConfigError::Invalid { key: "JWT_REFRESH_SECRET", reason: "must differ from JWT_ACCESS_SECRET".to_string() });
        }
        if self.rate_limit_max == 0 {
            return Err(ConfigError::Invalid { key: "RATE_LIMIT_MAX", reason: "must be at least 1".to_string() });
        }
        if self.refresh_ttl <= self.access_ttl {
            return Err(ConfigError::Invalid { key: "JWT_REFRESH_EXPIRY", reason: "must be longer than JWT_ACCESS_EXPIRY".to_string() });
        }
        Ok(())
    }
}

const MAX_DURATION_DAYS: i64 = 365;

/// Parses `30s`, `15m`, `12h` or `7d`, up to a year.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value.find(|c: char| !c.is_ascii_digit()).ok_or_else(|| format!("missing unit in '{value}'"))?;
    let (digits, unit) = value.split_at(split);
    let n: i64 = digits.parse().map_err(|_| format!("invalid amount in '{value}'"))?;
    if n <= 0 { return Err(format!("duration must be positive, got '{value}'")); }
    let duration = match unit {
        "s" => Duration::try_seconds(n),
        "m" => Duration::try_minutes(n),
        "h" => Duration::try_hours(n),
        "d" => Duration::try_days(n),
        other => return Err(format!("unknown unit '{other}'")),
    };
    match duration {
        Some(d) if d <= Duration::days(MAX_DURATION_DAYS) => Ok(d),
        _ => Err(format!("'{value}' is longer than {MAX_DURATION_DAYS}d")),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/sparepartshub_test".to_string(),
        port: 5000,
        max_connections: 1,
        jwt_access_secret: "test-access-secret-must-be-at-least-32-chars".to_string(),
        jwt_refresh_secret: "test-refresh-secret-must-be-at-least-32-chars".to_string(),
        access_ttl: Duration::minutes(15),
        refresh_ttl: Duration::days(7),
        razorpay: None,
        nats_url: None,
        client_url: "http://localhost:3000".to_string(),
        mail_from: "SparePartsHub <no-reply@sparepartshub.in>".to_string(),
        rate_limit_max: 200,
        rate_limit_window: Duration::minutes(15),
        trust_proxy: false,
    }
}
