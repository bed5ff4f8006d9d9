use std::{str::FromStr, time::Duration};

use anyhow::{Context, anyhow};

use crate::rates::RefreshSchedule;

pub const DEFAULT_EXCHANGE_API_URL: &str = "https://v6.exchangerate-api.com/v6";
pub const PUBLIC_EXCHANGE_API_URL: &str = "https://open.er-api.com/v6";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub jwt_secret: String,
    pub token_ttl: time::Duration,
    pub base_currency: String,
    pub exchange_api_url: String,
    pub exchange_api_key: Option<String>,
    pub refresh: RefreshSchedule,
    pub rate_fetch_timeout: Duration,
    pub evict_superseded: bool,
}

impl Config {
    /// Reads the process environment, after `.env` if one exists.
    pub fn from_env() -> anyhow::Result<Config> {
        let _ = dotenv::dotenv();

        let jwt_secret = dotenv::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.is_empty() {
            return Err(anyhow!("JWT_SECRET must not be empty"));
        }

        let (hour, minute) = parse_clock(&var_or("RATE_REFRESH_AT", "09:00"))?;
        let offset_hours: i8 = parse_var("RATE_REFRESH_UTC_OFFSET", 9)?;
        let refresh = RefreshSchedule::new(hour, minute, offset_hours)?;

        Ok(Config {
            database_url: var_or("DATABASE_URL", "sqlite://campusmarket.db?mode=rwc"),
            bind_addr: var_or("BIND_ADDR", "0.0.0.0:8080"),
            jwt_secret,
            token_ttl: time::Duration::seconds(parse_var("TOKEN_TTL_SECS", 86_400)?),
            base_currency: var_or("BASE_CURRENCY", "KRW").to_uppercase(),
            exchange_api_url: var_or("EXCHANGE_API_URL", DEFAULT_EXCHANGE_API_URL),
            exchange_api_key: dotenv::var("EXCHANGE_API_KEY").ok().filter(|k| !k.is_empty()),
            refresh,
            rate_fetch_timeout: Duration::from_secs(parse_var("RATE_FETCH_TIMEOUT_SECS", 10)?),
            evict_superseded: parse_var("CHAT_EVICT_SUPERSEDED", false)?,
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    dotenv::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match dotenv::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {key}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

fn parse_clock(raw: &str) -> anyhow::Result<(u8, u8)> {
    let (h, m) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("expected HH:MM, got {raw:?}"))?;
    Ok((h.trim().parse()?, m.trim().parse()?))
}
