use std::{net::SocketAddr, str::FromStr};

use anyhow::Context;
use axum::http::HeaderValue;

/// Runtime settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    /// How many messages a joiner receives in `chat-history`.
    pub history_limit: u32,
    /// Per-connection outbound queue length before events get dropped.
    pub outbound_buffer: usize,
    /// Keep ended rooms as inactive records instead of deleting them.
    pub retain_ended_rooms: bool,
    pub session_inactivity_minutes: i64,
    pub frontend_origin: Option<HeaderValue>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            database_url: "sqlite:peercall.db?mode=rwc".to_owned(),
            database_max_connections: 16,
            history_limit: 50,
            outbound_buffer: 64,
            retain_ended_rooms: false,
            session_inactivity_minutes: 60,
            frontend_origin: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Config::default();

        let frontend_origin = match dotenv::var("FRONTEND_URL") {
            Ok(url) => Some(
                HeaderValue::from_str(&url).with_context(|| format!("FRONTEND_URL={url}"))?,
            ),
            Err(_) => None,
        };

        Ok(Config {
            bind_addr: var_or("BIND_ADDR", defaults.bind_addr)?,
            database_url: dotenv::var("DATABASE_URL").unwrap_or(defaults.database_url),
            database_max_connections: var_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            history_limit: positive(var_or("CHAT_HISTORY_LIMIT", defaults.history_limit)?, "CHAT_HISTORY_LIMIT")?,
            outbound_buffer: var_or("OUTBOUND_BUFFER", defaults.outbound_buffer)?,
            retain_ended_rooms: var_or("RETAIN_ENDED_ROOMS", defaults.retain_ended_rooms)?,
            session_inactivity_minutes: var_or(
                "SESSION_INACTIVITY_MINUTES",
                defaults.session_inactivity_minutes,
            )?,
            frontend_origin,
        })
    }
}

fn positive(value: u32, key: &str) -> anyhow::Result<u32> {
    anyhow::ensure!(value > 0, "{key} must be at least 1");
    Ok(value)
}

fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenv::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variables_fall_back() {
        let value: u32 = var_or("PEERCALL_TEST_SURELY_UNSET", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn history_limit_must_be_positive() {
        assert!(positive(0, "CHAT_HISTORY_LIMIT").is_err());
        assert_eq!(positive(50, "CHAT_HISTORY_LIMIT").unwrap(), 50);
        assert!("-1".parse::<u32>().is_err());
    }

    #[test]
    fn defaults_match_the_wire_contract() {
        let config = Config::default();
        assert_eq!(config.history_limit, 50);
        assert!(!config.retain_ended_rooms);
    }
}
