//! Environment-driven configuration with defaults.

use anyhow::{Context, Result};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";
const DEFAULT_CLOB_URL: &str = "https://clob.polymarket.com";

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub database_pool_size: u32,
    pub metrics_port: u16,
    pub polymarket_ws_url: String,
    pub polymarket_clob_url: String,
    pub market_sync_interval: Duration,
    pub snapshot_interval: Duration,
    /// Levels per side to persist; 0 disables snapshotting.
    pub snapshot_depth: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: require("DATABASE_URL")?,
            database_pool_size: parse_env("DATABASE_POOL_SIZE", 5)?,
            metrics_port: parse_env("METRICS_PORT", 9090)?,
            polymarket_ws_url: env_or("POLYMARKET_WS_URL", DEFAULT_WS_URL),
            polymarket_clob_url: env_or("POLYMARKET_CLOB_URL", DEFAULT_CLOB_URL),
            market_sync_interval: Duration::from_secs(parse_env(
                "MARKET_SYNC_INTERVAL_SECS",
                300,
            )?),
            snapshot_interval: Duration::from_millis(parse_env("SNAPSHOT_INTERVAL_MS", 1000)?),
            snapshot_depth: parse_env("SNAPSHOT_DEPTH", 10)?,
        })
    }
}

fn require(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} is required"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_uses_default_when_unset() {
        let port: u16 = parse_env("COLLECTOR_TEST_UNSET_PORT", 9090).unwrap();
        assert_eq!(port, 9090);
    }

    #[test]
    fn parse_env_reads_and_parses() {
        std::env::set_var("COLLECTOR_TEST_DEPTH", "25");
        let depth: usize = parse_env("COLLECTOR_TEST_DEPTH", 10).unwrap();
        assert_eq!(depth, 25);
    }

    #[test]
    fn parse_env_surfaces_bad_values() {
        std::env::set_var("COLLECTOR_TEST_BAD_PORT", "not-a-port");
        assert!(parse_env::<u16>("COLLECTOR_TEST_BAD_PORT", 1).is_err());
    }

    #[test]
    fn require_fails_when_missing() {
        assert!(require("COLLECTOR_TEST_MISSING_URL").is_err());
    }
}
