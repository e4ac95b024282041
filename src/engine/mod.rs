//! Scrape engine: owns the queue, the session pool and the worker fleet.

mod rate_limiter;
mod worker;

pub use rate_limiter::{MarketplaceRateLimiter, RateLimitDecision};

use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::marketplaces::{Marketplace, ScraperRegistry};
use crate::proxy::ProxyRotator;
use crate::queue::{FailedJob, JobQueue, RetryPolicy};
use crate::relay::RelayClient;
use crate::session::SessionPool;
use crate::sink::ProductSink;
use worker::WorkerContext;

pub struct Engine {
    ctx: Arc<WorkerContext>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Wire up the engine from configuration. The browser is launched lazily
    /// on the first job, so construction stays cheap.
    pub async fn new(config: EngineConfig, sink: Arc<dyn ProductSink>) -> Result<Self> {
        let queue = JobQueue::connect(
            &config.queue_url,
            RetryPolicy {
                max_attempts: config.max_attempts,
                backoff_base: Duration::from_millis(config.retry_backoff_base_ms),
                failed_job_retention: config.failed_job_retention,
            },
        )
        .await
        .context("failed to open job queue")?;

        crate::browser::cleanup_stale_profiles();

        let rotator = ProxyRotator::new();
        if let Some(ref settings) = config.explicit_proxy {
            rotator.load_explicit(settings).await;
        } else if config.harvest_proxies {
            rotator
                .start_harvesting(
                    config.proxy_sources.clone(),
                    Duration::from_secs(config.proxy_refresh_interval_secs),
                )
                .await;
        }

        let pool = SessionPool::new(config.clone(), Arc::clone(&rotator));
        let relay = config
            .relay
            .clone()
            .map(|settings| Arc::new(RelayClient::new(settings)));
        if let Some(ref relay) = relay {
            let covered: Vec<&str> = Marketplace::ALL
                .iter()
                .filter(|m| relay.covers(**m))
                .map(|m| m.as_str())
                .collect();
            info!(?covered, "relay fetch path enabled");
        }
        let limiter = Arc::new(MarketplaceRateLimiter::new(
            config.rate_limits_per_minute.clone(),
        ));

        let ctx = Arc::new(WorkerContext {
            queue: Arc::new(queue),
            pool,
            rotator,
            registry: Arc::new(ScraperRegistry::with_default_marketplaces()),
            sink,
            relay,
            limiter,
            shutdown: Arc::new(AtomicBool::new(false)),
            config,
        });

        Ok(Self {
            ctx,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the worker fleet. Idempotent; workers already running stay.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return;
        }
        for worker_id in 0..self.ctx.config.concurrency {
            let ctx = Arc::clone(&self.ctx);
            workers.push(tokio::spawn(worker::run_worker(worker_id, ctx)));
        }
        info!(concurrency = self.ctx.config.concurrency, "engine started");
    }

    /// Submit a product URL for scraping. Higher priority runs sooner.
    pub async fn submit(&self, product_id: &str, url: &str, priority: i32) -> Result<i64> {
        self.submit_with_attempts(product_id, url, priority, 0).await
    }

    /// Submit a job that already burned part of its retry budget, typically
    /// a resubmission of a previously failed job.
    pub async fn submit_with_attempts(
        &self,
        product_id: &str,
        url: &str,
        priority: i32,
        attempts: u32,
    ) -> Result<i64> {
        let target = self.ctx.registry.parse_any(url)?;
        self.ctx
            .queue
            .enqueue_with_attempts(
                product_id,
                &target.canonical_url,
                target.marketplace,
                &target.marketplace_id,
                priority,
                attempts,
            )
            .await
    }

    pub async fn pending_count(&self) -> Result<u64> {
        self.ctx.queue.pending_count().await
    }

    /// Recent terminally failed jobs, for operator inspection.
    pub async fn failed_jobs(&self, limit: u32) -> Result<Vec<FailedJob>> {
        self.ctx.queue.failed_jobs(limit).await
    }

    /// Stop claiming new jobs, wait for in-flight attempts, then release the
    /// browser and background tasks.
    pub async fn shutdown(&self) {
        self.ctx.shutdown.store(true, Ordering::SeqCst);
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            if let Err(e) = handle.await {
                warn!("worker join failed: {e}");
            }
        }
        self.ctx.rotator.shutdown().await;
        self.ctx.pool.close().await;
        info!("engine shut down");
    }
}
