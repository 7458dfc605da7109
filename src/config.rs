use std::{env, net::SocketAddr, time::Duration};

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub engine_url: String,
    pub engine_token: Option<String>,
    pub chunk_cache_limit: usize,
    pub overview_cache_limit: usize,
    pub event_buffer_ttl: Duration,
    pub cache_sweep_interval: Duration,
    pub background_sweep_divisor: usize,
    pub cache_entry_ttl: Duration,
    pub event_channel_capacity: usize,
    pub notification_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8090)),
            engine_url: "http://127.0.0.1:8091".to_string(),
            engine_token: None,
            chunk_cache_limit: 15,
            overview_cache_limit: 10,
            event_buffer_ttl: Duration::from_millis(30_000),
            cache_sweep_interval: Duration::from_millis(60_000),
            background_sweep_divisor: 2,
            cache_entry_ttl: Duration::from_millis(300_000),
            event_channel_capacity: 256,
            notification_capacity: 50,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let bind_raw = env::var("ANALYSIS_BIND_ADDR").unwrap_or_default();
        let bind_normalized = bind_raw
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .to_string();
        let bind_addr = bind_normalized
            .parse::<SocketAddr>()
            .unwrap_or(defaults.bind_addr);

        let engine_url = env::var("ANALYSIS_ENGINE_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.engine_url);

        let engine_token = env::var("ANALYSIS_ENGINE_TOKEN")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let chunk_cache_limit =
            env_parse::<usize>("ANALYSIS_CHUNK_CACHE_LIMIT").unwrap_or(defaults.chunk_cache_limit);

        let overview_cache_limit = env_parse::<usize>("ANALYSIS_OVERVIEW_CACHE_LIMIT")
            .unwrap_or(defaults.overview_cache_limit);

        let event_buffer_ttl =
            env_millis("ANALYSIS_EVENT_BUFFER_TTL_MS").unwrap_or(defaults.event_buffer_ttl);

        let cache_sweep_interval = env_millis("ANALYSIS_CACHE_SWEEP_INTERVAL_MS")
            .unwrap_or(defaults.cache_sweep_interval);

        let background_sweep_divisor = env_parse::<usize>("ANALYSIS_BACKGROUND_SWEEP_DIVISOR")
            .unwrap_or(defaults.background_sweep_divisor)
            .max(1);

        let cache_entry_ttl =
            env_millis("ANALYSIS_CACHE_ENTRY_TTL_MS").unwrap_or(defaults.cache_entry_ttl);

        let event_channel_capacity = env_parse::<usize>("ANALYSIS_EVENT_CHANNEL_CAPACITY")
            .unwrap_or(defaults.event_channel_capacity)
            .max(1);

        let notification_capacity = env_parse::<usize>("ANALYSIS_NOTIFICATION_CAPACITY")
            .unwrap_or(defaults.notification_capacity)
            .max(1);

        Ok(Self {
            bind_addr,
            engine_url,
            engine_token,
            chunk_cache_limit,
            overview_cache_limit,
            event_buffer_ttl,
            cache_sweep_interval,
            background_sweep_divisor,
            cache_entry_ttl,
            event_channel_capacity,
            notification_capacity,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

/// Positive millisecond durations only; zero falls back like a malformed value.
fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key)
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.chunk_cache_limit, 15);
        assert_eq!(config.overview_cache_limit, 10);
        assert_eq!(config.event_buffer_ttl.as_millis(), 30_000);
        assert_eq!(config.cache_sweep_interval.as_millis(), 60_000);
        assert_eq!(config.background_sweep_divisor, 2);
    }

    #[test]
    fn zero_or_malformed_durations_fall_back_to_defaults() {
        std::env::set_var("ANALYSIS_EVENT_BUFFER_TTL_MS", "0");
        std::env::set_var("ANALYSIS_CACHE_SWEEP_INTERVAL_MS", "soon");
        std::env::set_var("ANALYSIS_CACHE_ENTRY_TTL_MS", " 1500 ");

        let config = Config::from_env().expect("config");
        let defaults = Config::default();
        assert_eq!(config.event_buffer_ttl, defaults.event_buffer_ttl);
        assert_eq!(config.cache_sweep_interval, defaults.cache_sweep_interval);
        assert_eq!(config.cache_entry_ttl.as_millis(), 1500);

        std::env::remove_var("ANALYSIS_EVENT_BUFFER_TTL_MS");
        std::env::remove_var("ANALYSIS_CACHE_SWEEP_INTERVAL_MS");
        std::env::remove_var("ANALYSIS_CACHE_ENTRY_TTL_MS");
    }
}
