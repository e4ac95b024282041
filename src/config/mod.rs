//! Startup configuration, read once from the environment.
//!
//! Every knob has a `PRICETRAWL_*` variable; unset or unparsable values fall
//! back to the defaults in [`EngineConfig::default`]. Booleans accept
//! `1/true/yes` (case-insensitive).

mod types;

pub use types::{EngineConfig, ProxySettings, RelaySettings};

use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

use crate::marketplaces::Marketplace;

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("ignoring unparsable {key}={raw}, keeping default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Build the engine configuration from the process environment.
#[must_use]
pub fn from_env() -> EngineConfig {
    let mut config = EngineConfig::default();

    if let Some(url) = env_string("PRICETRAWL_DATABASE_URL") {
        config.database_url = url;
    }
    if let Some(url) = env_string("PRICETRAWL_QUEUE_URL") {
        config.queue_url = url;
    }

    config.concurrency = env_parse("PRICETRAWL_CONCURRENCY", config.concurrency).max(1);
    config.attempt_timeout_secs =
        env_parse("PRICETRAWL_ATTEMPT_TIMEOUT_SECS", config.attempt_timeout_secs);
    config.content_wait_secs = env_parse("PRICETRAWL_CONTENT_WAIT_SECS", config.content_wait_secs);
    config.poll_interval_ms = env_parse("PRICETRAWL_POLL_INTERVAL_MS", config.poll_interval_ms);
    config.max_attempts = env_parse("PRICETRAWL_MAX_ATTEMPTS", config.max_attempts).max(1);
    config.retry_backoff_base_ms =
        env_parse("PRICETRAWL_RETRY_BACKOFF_MS", config.retry_backoff_base_ms);
    config.failed_job_retention =
        env_parse("PRICETRAWL_FAILED_RETENTION", config.failed_job_retention);
    config.headless = env_flag("PRICETRAWL_HEADLESS", config.headless);
    config.max_page_uses = env_parse("PRICETRAWL_MAX_PAGE_USES", config.max_page_uses).max(1);
    config.page_pool_capacity =
        env_parse("PRICETRAWL_PAGE_POOL_CAPACITY", config.page_pool_capacity);
    config.block_trackers = env_flag("PRICETRAWL_BLOCK_TRACKERS", config.block_trackers);

    config.explicit_proxy = explicit_proxy_from_env();
    config.harvest_proxies = env_flag("PRICETRAWL_HARVEST_PROXIES", config.harvest_proxies);
    if let Some(raw) = env_string("PRICETRAWL_PROXY_SOURCES") {
        config.proxy_sources = raw.split(',').map(|s| s.trim().to_string()).collect();
    }
    config.proxy_refresh_interval_secs = env_parse(
        "PRICETRAWL_PROXY_REFRESH_SECS",
        config.proxy_refresh_interval_secs,
    );

    config.relay = relay_from_env();
    config.rate_limits_per_minute = rate_limits_from_env(config.rate_limits_per_minute);

    config.min_action_delay_ms =
        env_parse("PRICETRAWL_MIN_ACTION_DELAY_MS", config.min_action_delay_ms);
    config.max_action_delay_ms =
        env_parse("PRICETRAWL_MAX_ACTION_DELAY_MS", config.max_action_delay_ms)
            .max(config.min_action_delay_ms);

    config
}

fn explicit_proxy_from_env() -> Option<ProxySettings> {
    let host = env_string("PRICETRAWL_PROXY_HOST")?;
    let port = env_parse("PRICETRAWL_PROXY_PORT", 8080u16);
    Some(ProxySettings {
        host,
        port,
        protocol: env_string("PRICETRAWL_PROXY_PROTOCOL").unwrap_or_else(|| "http".to_string()),
        username: env_string("PRICETRAWL_PROXY_USER"),
        password: env_string("PRICETRAWL_PROXY_PASS"),
    })
}

fn relay_from_env() -> Option<RelaySettings> {
    if !env_flag("PRICETRAWL_RELAY_ENABLED", false) {
        return None;
    }
    let endpoint = env_string("PRICETRAWL_RELAY_ENDPOINT")?;
    let api_key = env_string("PRICETRAWL_RELAY_API_KEY").unwrap_or_default();
    let marketplaces = env_string("PRICETRAWL_RELAY_MARKETPLACES")
        .map(|raw| {
            raw.split(',')
                .filter_map(|name| match name.trim().parse() {
                    Ok(marketplace) => Some(marketplace),
                    Err(_) => {
                        warn!("unknown marketplace in PRICETRAWL_RELAY_MARKETPLACES: {name}");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_else(|| Marketplace::ALL.to_vec());
    Some(RelaySettings {
        endpoint,
        api_key,
        marketplaces,
    })
}

fn rate_limits_from_env(defaults: HashMap<Marketplace, u32>) -> HashMap<Marketplace, u32> {
    let mut limits = defaults;
    for marketplace in Marketplace::ALL {
        let key = format!(
            "PRICETRAWL_RATE_LIMIT_{}",
            marketplace.as_str().to_uppercase()
        );
        if let Ok(raw) = std::env::var(&key) {
            match raw.trim().parse::<u32>() {
                Ok(0) => {
                    limits.remove(marketplace);
                }
                Ok(per_minute) => {
                    limits.insert(*marketplace, per_minute);
                }
                Err(_) => warn!("ignoring unparsable {key}={raw}"),
            }
        }
    }
    limits
}
