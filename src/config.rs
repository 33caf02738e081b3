//! Process configuration, read once from the environment at startup.

use std::env;
use tracing::warn;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub pool_max: u32,
    pub pool_min: u32,
    pub idle_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db: DbConfig,
    /// When false (APP_ENV=production), storage error detail is redacted at
    /// the HTTP surface.
    pub expose_errors: bool,
    pub bulk_data_path: String,
    pub recent_data_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let db = DbConfig {
            host: env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: env_parsed("DB_PORT", 5432),
            name: required_env("DB_NAME")?,
            user: required_env("DB_USER")?,
            password: required_env("DB_PASSWORD")?,
            pool_max: env_parsed("DB_POOL_MAX", 20),
            pool_min: env_parsed("DB_POOL_MIN", 2),
            idle_timeout_ms: env_parsed("DB_IDLE_TIMEOUT", 30_000),
            connect_timeout_ms: env_parsed("DB_CONNECT_TIMEOUT", 5_000),
        };

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        Ok(Config {
            port: env_parsed("PORT", 8080),
            db,
            expose_errors: app_env != "production",
            bulk_data_path: env::var("BULK_DATA_PATH")
                .unwrap_or_else(|_| "data/bulk.json".to_string()),
            recent_data_path: env::var("RECENT_DATA_PATH")
                .unwrap_or_else(|_| "data/recent.json".to_string()),
        })
    }
}

fn required_env(var: &str) -> Result<String, AppError> {
    env::var(var).map_err(|_| AppError::Validation(format!("{} must be set", var)))
}

/// Parse an env var, falling back to the default (with a warning) on
/// anything unparseable rather than refusing to start.
fn env_parsed<T>(var: &str, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Invalid {} value '{}'; defaulting to {}", var, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parsed_falls_back_on_garbage() {
        std::env::set_var("REGWATCH_TEST_PORT", "not-a-number");
        assert_eq!(env_parsed("REGWATCH_TEST_PORT", 8080u16), 8080);
        std::env::remove_var("REGWATCH_TEST_PORT");
    }

    #[test]
    fn env_parsed_reads_valid_values() {
        std::env::set_var("REGWATCH_TEST_MAX", "42");
        assert_eq!(env_parsed("REGWATCH_TEST_MAX", 20u32), 42);
        std::env::remove_var("REGWATCH_TEST_MAX");
    }

    #[test]
    fn env_parsed_uses_default_when_unset() {
        assert_eq!(env_parsed("REGWATCH_TEST_MISSING", 7u64), 7);
    }
}
