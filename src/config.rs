use std::{env, net::SocketAddr, time::Duration};

use anyhow::Result;

use crate::engine::EngineSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub poll_interval_ms: u64,
    pub retry_limit: u32,
    pub last_result_ttl_seconds: u64,
    pub request_timeout_seconds: u64,
    pub event_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_raw =
            lookup("LINTAI_TRACKER_BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8600".to_string());
        let bind_normalized = bind_raw
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .to_string();
        let bind_addr = bind_normalized
            .parse::<SocketAddr>()
            .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8600)));

        let api_base_url = lookup("LINTAI_API_BASE_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "http://127.0.0.1:8501".to_string());

        let api_token = lookup("LINTAI_API_TOKEN")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let poll_interval_ms = lookup("LINTAI_POLL_INTERVAL_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(3000);

        let retry_limit = lookup("LINTAI_RETRY_LIMIT")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(3);

        let last_result_ttl_seconds = lookup("LINTAI_LAST_RESULT_TTL_SECONDS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(5 * 60);

        let request_timeout_seconds = lookup("LINTAI_REQUEST_TIMEOUT_SECONDS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(30);

        let event_capacity = lookup("LINTAI_EVENT_CAPACITY")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(64);

        Ok(Self {
            bind_addr,
            api_base_url,
            api_token,
            poll_interval_ms,
            retry_limit,
            last_result_ttl_seconds,
            request_timeout_seconds,
            event_capacity,
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            retry_limit: self.retry_limit,
            last_result_ttl: Duration::from_secs(self.last_result_ttl_seconds),
        }
    }
}
