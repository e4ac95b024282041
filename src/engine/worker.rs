//! Worker loop: claim a job, run one scrape attempt, route the outcome.

use chromiumoxide::Page;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use super::rate_limiter::MarketplaceRateLimiter;
use crate::config::EngineConfig;
use crate::error::ScrapeError;
use crate::marketplaces::{MarketplaceScraper, ScrapeTarget, ScraperRegistry};
use crate::product::ScrapedProduct;
use crate::proxy::ProxyRotator;
use crate::queue::{Job, JobQueue, RetryOutcome};
use crate::relay::RelayClient;
use crate::session::SessionPool;
use crate::sink::ProductSink;
use crate::stealth::pacing;

pub(crate) struct WorkerContext {
    pub config: EngineConfig,
    pub queue: Arc<JobQueue>,
    pub pool: Arc<SessionPool>,
    pub rotator: Arc<ProxyRotator>,
    pub registry: Arc<ScraperRegistry>,
    pub sink: Arc<dyn ProductSink>,
    pub relay: Option<Arc<RelayClient>>,
    pub limiter: Arc<MarketplaceRateLimiter>,
    pub shutdown: Arc<AtomicBool>,
}

pub(crate) async fn run_worker(worker_id: usize, ctx: Arc<WorkerContext>) {
    info!(worker = worker_id, "worker started");
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match ctx.queue.dequeue().await {
            Ok(Some(job)) => {
                let span = info_span!(
                    "scrape_job",
                    worker = worker_id,
                    job = job.id,
                    marketplace = %job.marketplace,
                    attempt = job.attempts + 1,
                );
                process_job(&ctx, &job).instrument(span).await;
            }
            Ok(None) => {
                sleep(Duration::from_millis(ctx.config.poll_interval_ms)).await;
            }
            Err(e) => {
                error!(worker = worker_id, "queue dequeue failed: {e:#}");
                sleep(Duration::from_millis(ctx.config.poll_interval_ms)).await;
            }
        }
    }
    info!(worker = worker_id, "worker stopped");
}

async fn process_job(ctx: &Arc<WorkerContext>, job: &Job) {
    let Some(scraper) = ctx.registry.get(job.marketplace) else {
        let err = ScrapeError::PermanentParse(format!(
            "no scraper registered for {}",
            job.marketplace
        ));
        if let Err(e) = ctx.queue.fail_permanent(job, &err).await {
            error!("failed to record permanent failure: {e:#}");
        }
        return;
    };

    let target = match scraper.parse_url(&job.url) {
        Ok(target) => target,
        Err(err) => {
            if let Err(e) = ctx.queue.fail_permanent(job, &err).await {
                error!("failed to record permanent failure: {e:#}");
            }
            return;
        }
    };

    ctx.limiter.acquire(job.marketplace).await;

    match run_attempt(ctx, scraper, &target).await {
        Ok(product) => {
            if let Err(e) = ctx.sink.persist(&job.product_id, &product).await {
                warn!("result persistence failed, will retry job: {e:#}");
                let err = ScrapeError::TransientNetwork(format!("sink write failed: {e}"));
                route_failure(ctx, job, err).await;
                return;
            }
            if let Some(address) = ctx.pool.active_proxy_address().await {
                ctx.rotator.mark_success(&address).await;
            }
            if let Err(e) = ctx.queue.complete(job).await {
                error!("failed to complete job: {e:#}");
            }
            info!(
                product = %job.product_id,
                price = product.price,
                currency = %product.currency,
                availability = product.availability.as_str(),
                "scrape succeeded"
            );
        }
        Err(err) => route_failure(ctx, job, err).await,
    }
}

async fn run_attempt(
    ctx: &Arc<WorkerContext>,
    scraper: &dyn MarketplaceScraper,
    target: &ScrapeTarget,
) -> Result<ScrapedProduct, ScrapeError> {
    let budget = Duration::from_secs(ctx.config.attempt_timeout_secs);

    if let Some(relay) = ctx.relay.as_ref().filter(|r| r.covers(target.marketplace)) {
        let html = with_attempt_budget(budget, relay.fetch(&target.canonical_url)).await?;
        if let Some(reason) = scraper.detect_block(&target.canonical_url, &html) {
            return Err(ScrapeError::Blocked(format!("relay response blocked: {reason}")));
        }
        return scraper.extract(target, &html);
    }

    let handle = ctx
        .pool
        .get_page()
        .await
        .map_err(|e| ScrapeError::Browser(format!("page checkout failed: {e:#}")))?;
    // The budget bounds only the fetch-and-extract work: the checked-out page
    // must be released no matter how the attempt ends, including expiry.
    let result = with_attempt_budget(
        budget,
        attempt_on_page(&ctx.config, scraper, target, &handle.page),
    )
    .await;
    ctx.pool.release_page(handle).await;
    result
}

/// Bound one attempt's fetch work. Expiry drops the hung future and maps to
/// a retryable network failure so control always returns to the caller's
/// cleanup steps.
async fn with_attempt_budget<T>(
    budget: Duration,
    attempt: impl Future<Output = Result<T, ScrapeError>>,
) -> Result<T, ScrapeError> {
    match timeout(budget, attempt).await {
        Ok(result) => result,
        Err(_) => Err(ScrapeError::TransientNetwork(format!(
            "attempt exceeded {}s budget",
            budget.as_secs()
        ))),
    }
}

async fn attempt_on_page(
    config: &EngineConfig,
    scraper: &dyn MarketplaceScraper,
    target: &ScrapeTarget,
    page: &Page,
) -> Result<ScrapedProduct, ScrapeError> {
    page.goto(&target.canonical_url)
        .await
        .map_err(|e| ScrapeError::from_browser_message(&e.to_string()))?;

    wait_for_content(page, scraper.content_markers(), config.content_wait_secs).await;

    pacing::human_delay(config.min_action_delay_ms, config.max_action_delay_ms).await;
    pacing::human_scroll(page).await;
    pacing::human_mouse(page).await;

    let current_url = page
        .url()
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| target.canonical_url.clone());
    let html = page
        .content()
        .await
        .map_err(|e| ScrapeError::from_browser_message(&e.to_string()))?;

    if let Some(reason) = scraper.detect_block(&current_url, &html) {
        return Err(ScrapeError::Blocked(reason));
    }

    scraper.extract(target, &html)
}

/// Poll for any of the content markers until the budget runs out. A timeout
/// is not an error; extraction decides whether the page was good enough.
async fn wait_for_content(page: &Page, markers: &[&str], budget_secs: u64) {
    let deadline = Instant::now() + Duration::from_secs(budget_secs);
    loop {
        for marker in markers {
            if page.find_element(*marker).await.is_ok() {
                trace!(marker, "content marker present");
                return;
            }
        }
        if Instant::now() >= deadline {
            debug!("content markers did not appear within budget, proceeding anyway");
            return;
        }
        sleep(Duration::from_millis(250)).await;
    }
}

async fn route_failure(ctx: &Arc<WorkerContext>, job: &Job, err: ScrapeError) {
    if !err.retryable() {
        if let Err(e) = ctx.queue.fail_permanent(job, &err).await {
            error!("failed to record permanent failure: {e:#}");
        }
        return;
    }

    let relay_served = ctx
        .relay
        .as_ref()
        .is_some_and(|relay| relay.covers(job.marketplace));
    if should_rotate_proxy(&err, job.attempts, relay_served) {
        if let Some(address) = ctx.pool.active_proxy_address().await {
            ctx.rotator.mark_failed(&address).await;
        }
        if let Err(e) = ctx.pool.rotate_proxy().await {
            warn!("proxy rotation failed: {e:#}");
        }
    }

    match ctx.queue.retry(job, &err).await {
        Ok(RetryOutcome::Requeued { attempt, delay }) => {
            debug!(attempt, delay_ms = delay.as_millis() as u64, "attempt failed: {err}");
        }
        Ok(RetryOutcome::TerminallyFailed) => {}
        Err(e) => error!("failed to requeue job: {e:#}"),
    }
}

/// Whether a failed attempt should rotate the browser away from its proxy.
/// Blocks always rotate; network trouble rotates once it repeats. Attempts
/// served by the relay never touch the browser, so rotating (and thereby
/// tearing down a browser other marketplaces may be using) would be wasted.
fn should_rotate_proxy(err: &ScrapeError, prior_attempts: u32, relay_served: bool) -> bool {
    if relay_served {
        return false;
    }
    let repeated_network =
        matches!(err, ScrapeError::TransientNetwork(_)) && prior_attempts + 1 >= 2;
    err.wants_proxy_rotation() || repeated_network
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expired_budget_maps_to_a_transient_failure() {
        let result: Result<(), ScrapeError> = with_attempt_budget(
            Duration::from_millis(50),
            std::future::pending::<Result<(), ScrapeError>>(),
        )
        .await;
        assert!(matches!(result, Err(ScrapeError::TransientNetwork(_))));
    }

    // A hung fetch must be torn down by the budget while control returns to
    // the caller, whose unconditional page release then runs.
    #[tokio::test(start_paused = true)]
    async fn hung_fetch_is_dropped_and_control_returns_for_release() {
        struct SetOnDrop(Arc<AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(Arc::clone(&dropped));
        let attempt = async move {
            let _held = guard;
            std::future::pending::<Result<(), ScrapeError>>().await
        };

        let result = with_attempt_budget(Duration::from_secs(1), attempt).await;
        assert!(result.is_err());
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn blocks_rotate_but_relay_served_attempts_never_do() {
        let blocked = ScrapeError::Blocked("captcha".into());
        assert!(should_rotate_proxy(&blocked, 0, false));
        assert!(!should_rotate_proxy(&blocked, 0, true));
    }

    #[test]
    fn network_trouble_rotates_only_once_it_repeats() {
        let err = ScrapeError::TransientNetwork("reset".into());
        assert!(!should_rotate_proxy(&err, 0, false));
        assert!(should_rotate_proxy(&err, 1, false));
        assert!(!should_rotate_proxy(&err, 1, true));
    }

    #[test]
    fn incomplete_extraction_does_not_burn_a_proxy() {
        let err = ScrapeError::ExtractionIncomplete { field: "price" };
        assert!(!should_rotate_proxy(&err, 2, false));
    }
}
