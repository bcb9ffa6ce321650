use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::constants::{
    DEFAULT_LISTEN_ADDR, DEFAULT_PROBE_CONCURRENCY, DEFAULT_PROBE_MAX_BYTES,
    DEFAULT_PROBE_TIMEOUT_SECONDS, DEFAULT_REQUEST_TIMEOUT_SECONDS, MAX_PROBE_CONCURRENCY,
    OPENAQ_BASE_URL, SNAPSHOT_BASE_URL,
};

#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: String,
    pub snapshot_base_url: String,
    pub openaq_base_url: String,
    pub openaq_api_key: Option<String>,
    pub probe_concurrency: usize,
    pub probe_timeout: Duration,
    pub probe_max_bytes: u64,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = env_string("BALLOON_LISTEN_ADDR", DEFAULT_LISTEN_ADDR);
        let snapshot_base_url =
            trim_base_url(&env_string("BALLOON_SNAPSHOT_BASE_URL", SNAPSHOT_BASE_URL));
        let openaq_base_url = trim_base_url(&env_string("OPENAQ_BASE_URL", OPENAQ_BASE_URL));
        let openaq_api_key = env_optional("OPENAQ_API_KEY");
        let probe_concurrency = parse_probe_concurrency(env_u64(
            "BALLOON_PROBE_CONCURRENCY",
            DEFAULT_PROBE_CONCURRENCY as u64,
        )?)?;
        let probe_timeout = Duration::from_secs(env_u64(
            "BALLOON_PROBE_TIMEOUT_SECONDS",
            DEFAULT_PROBE_TIMEOUT_SECONDS,
        )?);
        let probe_max_bytes = env_u64("BALLOON_PROBE_MAX_BYTES", DEFAULT_PROBE_MAX_BYTES)?;
        let request_timeout = Duration::from_secs(env_u64(
            "BALLOON_REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?);

        Ok(Self {
            listen_addr,
            snapshot_base_url,
            openaq_base_url,
            openaq_api_key,
            probe_concurrency,
            probe_timeout,
            probe_max_bytes,
            request_timeout,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            snapshot_base_url: SNAPSHOT_BASE_URL.to_string(),
            openaq_base_url: OPENAQ_BASE_URL.to_string(),
            openaq_api_key: None,
            probe_concurrency: DEFAULT_PROBE_CONCURRENCY,
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECONDS),
            probe_max_bytes: DEFAULT_PROBE_MAX_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS),
        }
    }
}

fn parse_probe_concurrency(value: u64) -> Result<usize> {
    if value == 0 || value > MAX_PROBE_CONCURRENCY as u64 {
        bail!(
            "BALLOON_PROBE_CONCURRENCY must be between 1 and {}, got {}",
            MAX_PROBE_CONCURRENCY,
            value
        );
    }
    Ok(value as usize)
}

fn trim_base_url(value: &str) -> String {
    value.trim().trim_end_matches('/').to_string()
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_string(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match env_optional(name) {
        Some(value) => value
            .parse::<u64>()
            .with_context(|| format!("Failed to parse {}={} as u64", name, value)),
        None => Ok(default),
    }
}
