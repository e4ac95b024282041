//! Engine configuration types.
//!
//! The configuration surface is environment-style and read once at startup;
//! see [`super::from_env`]. Defaults are deliberately conservative: a low
//! worker count and per-marketplace rate caps trade throughput for stealth.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::marketplaces::Marketplace;
use crate::proxy::harvest;

/// Explicitly configured egress proxy. Takes precedence over harvesting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    /// "http" or "socks5".
    pub protocol: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Paid relay service used as an alternate, non-browser fetch path for the
/// marketplaces it is enabled for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    pub endpoint: String,
    pub api_key: String,
    /// Marketplaces routed through the relay instead of the browser pool.
    pub marketplaces: Vec<Marketplace>,
}

/// Full engine configuration, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Price-history store (result sink) connection.
    pub database_url: String,
    /// Job queue backing store connection.
    pub queue_url: String,

    /// Concurrent scrape workers. Kept low on purpose; marketplaces
    /// penalize bursts.
    pub concurrency: usize,
    /// Hard ceiling on one fetch-extract attempt.
    pub attempt_timeout_secs: u64,
    /// Upper bound for waiting on marketplace content markers.
    pub content_wait_secs: u64,
    /// Queue poll interval when no job is ready.
    pub poll_interval_ms: u64,

    /// Attempt ceiling per job before terminal failure.
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub retry_backoff_base_ms: u64,
    /// Failed jobs kept for diagnostics.
    pub failed_job_retention: u32,

    pub headless: bool,
    /// Pages are destroyed instead of re-pooled after this many uses.
    pub max_page_uses: u32,
    /// Idle pages kept per browser session.
    pub page_pool_capacity: usize,
    pub launch_retries: u32,
    pub launch_retry_pause_ms: u64,
    /// Drop tracking/analytics requests and heavy resources (images, media,
    /// fonts) for speed and bandwidth.
    pub block_trackers: bool,

    pub explicit_proxy: Option<ProxySettings>,
    /// Harvest free proxy lists when no explicit proxy is configured.
    pub harvest_proxies: bool,
    pub proxy_sources: Vec<String>,
    pub proxy_refresh_interval_secs: u64,

    pub relay: Option<RelaySettings>,

    /// Requests per minute per marketplace. Absent entry = unlimited.
    pub rate_limits_per_minute: HashMap<Marketplace, u32>,

    /// Randomized inter-action pause window used by the pacing helpers.
    pub min_action_delay_ms: u64,
    pub max_action_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut rate_limits_per_minute = HashMap::new();
        for marketplace in Marketplace::ALL {
            rate_limits_per_minute.insert(*marketplace, 6);
        }

        Self {
            database_url: "sqlite://pricetrawl.db".to_string(),
            queue_url: "sqlite://pricetrawl-queue.db".to_string(),
            concurrency: 2,
            attempt_timeout_secs: 45,
            content_wait_secs: 10,
            poll_interval_ms: 500,
            max_attempts: 3,
            retry_backoff_base_ms: 2000,
            failed_job_retention: 1000,
            headless: true,
            max_page_uses: 20,
            page_pool_capacity: 4,
            launch_retries: 3,
            launch_retry_pause_ms: 2000,
            block_trackers: true,
            explicit_proxy: None,
            harvest_proxies: false,
            proxy_sources: harvest::DEFAULT_SOURCES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            proxy_refresh_interval_secs: 1800,
            relay: None,
            rate_limits_per_minute,
            min_action_delay_ms: 800,
            max_action_delay_ms: 2500,
        }
    }
}
