//! Pooled browser pages with per-browser proxy binding.
//!
//! The pool owns at most one browser process at a time. Pages are checked out
//! for a single scrape attempt and recycled until they hit their use ceiling.
//! Rotating the proxy bumps a generation counter and relaunches the browser;
//! pages from an older generation are destroyed on release instead of being
//! re-pooled, so a page can never outlive the proxy it was fingerprinted
//! behind.

use anyhow::{Context, Result};
use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams as FetchEnableParams, EventAuthRequired,
    EventRequestPaused,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCacheParams, ClearBrowserCookiesParams, SetBlockedUrLsParams,
};
use futures::StreamExt;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::browser;
use crate::config::EngineConfig;
use crate::proxy::{ProxyCandidate, ProxyRotator};
use crate::stealth::{self, Fingerprint};

/// Ad/analytics endpoints and heavy assets that product pages render fine
/// without. Blocking them cuts per-page traffic and removes a class of
/// tracking beacons.
const BLOCKED_URL_PATTERNS: &[&str] = &[
    "*googletagmanager.com*",
    "*google-analytics.com*",
    "*doubleclick.net*",
    "*googlesyndication.com*",
    "*facebook.net*",
    "*facebook.com/tr*",
    "*hotjar.com*",
    "*segment.io*",
    "*criteo.com*",
    "*scorecardresearch.com*",
    "*adsystem.amazon*",
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.webp",
    "*.svg",
    "*.woff",
    "*.woff2",
    "*.mp4",
    "*.webm",
];

/// A page checked out of the pool for one scrape attempt.
pub struct PageHandle {
    pub page: Page,
    id: Uuid,
    uses: u32,
    generation: u64,
    auth_task: Option<JoinHandle<()>>,
}

impl PageHandle {
    fn destroy(mut self) -> Page {
        if let Some(task) = self.auth_task.take() {
            task.abort();
        }
        self.page
    }
}

struct BrowserHandle {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: PathBuf,
    proxy: Option<ProxyCandidate>,
}

struct PoolState {
    browser: Option<BrowserHandle>,
    idle: VecDeque<PageHandle>,
    generation: u64,
    checked_out: usize,
}

pub struct SessionPool {
    config: EngineConfig,
    rotator: Arc<ProxyRotator>,
    state: Mutex<PoolState>,
    closed: AtomicBool,
}

impl SessionPool {
    pub fn new(config: EngineConfig, rotator: Arc<ProxyRotator>) -> Arc<Self> {
        Arc::new(Self {
            config,
            rotator,
            state: Mutex::new(PoolState {
                browser: None,
                idle: VecDeque::new(),
                generation: 0,
                checked_out: 0,
            }),
            closed: AtomicBool::new(false),
        })
    }

    /// Check out a page, launching the browser on first use. Every fresh page
    /// gets a new fingerprint, tracker blocking and (when the bound proxy
    /// needs it) a fetch-domain auth responder before it navigates anywhere.
    pub async fn get_page(&self) -> Result<PageHandle> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("session pool is closed");
        }

        let mut state = self.state.lock().await;
        self.ensure_browser(&mut state).await?;

        while let Some(handle) = state.idle.pop_front() {
            if handle.generation != state.generation {
                handle.destroy();
                continue;
            }
            // Reset to a blank page so the next attempt starts from a known
            // document instead of whatever the previous job left behind.
            if handle.page.goto("about:blank").await.is_err() {
                debug!(page = %handle.id, "idle page no longer responsive, discarding");
                handle.destroy();
                continue;
            }
            state.checked_out += 1;
            trace!(page = %handle.id, uses = handle.uses, "reusing pooled page");
            return Ok(handle);
        }

        let browser_handle = state
            .browser
            .as_ref()
            .context("browser disappeared after launch")?;
        let proxy = browser_handle.proxy.clone();
        let page = browser_handle
            .browser
            .new_page("about:blank")
            .await
            .context("failed to open new page")?;

        let fingerprint = Fingerprint::random();
        if let Err(e) = stealth::apply(&page, &fingerprint).await {
            warn!("stealth setup failed, continuing with bare page: {e:#}");
        }

        if self.config.block_trackers {
            let patterns = BLOCKED_URL_PATTERNS.iter().map(|p| p.to_string()).collect();
            if let Err(e) = page.execute(SetBlockedUrLsParams::new(patterns)).await {
                debug!("tracker blocking setup failed: {e}");
            }
        }

        let auth_task = match proxy {
            Some(ref p) if p.has_credentials() => match install_proxy_auth(&page, p).await {
                Ok(task) => Some(task),
                Err(e) => {
                    warn!(proxy = %p.address(), "proxy auth responder setup failed: {e:#}");
                    None
                }
            },
            _ => None,
        };

        let handle = PageHandle {
            page,
            id: Uuid::new_v4(),
            uses: 0,
            generation: state.generation,
            auth_task,
        };
        state.checked_out += 1;
        debug!(page = %handle.id, "opened fresh page");
        Ok(handle)
    }

    /// Return a page after an attempt. The page is scrubbed and re-pooled
    /// unless it is stale, worn out or the idle queue is full.
    pub async fn release_page(&self, mut handle: PageHandle) {
        let mut state = self.state.lock().await;
        state.checked_out = state.checked_out.saturating_sub(1);
        handle.uses += 1;

        if !should_repool(
            handle.uses,
            self.config.max_page_uses,
            state.idle.len(),
            self.config.page_pool_capacity,
            handle.generation == state.generation,
        ) {
            trace!(page = %handle.id, uses = handle.uses, "retiring page");
            let page = handle.destroy();
            let _ = page.close().await;
            return;
        }

        // Scrub per-site state so jobs cannot observe each other's cookies.
        let cookies_ok = handle
            .page
            .execute(ClearBrowserCookiesParams::default())
            .await
            .is_ok();
        let cache_ok = handle
            .page
            .execute(ClearBrowserCacheParams::default())
            .await
            .is_ok();
        if !cookies_ok || !cache_ok {
            debug!(page = %handle.id, "state scrub failed, retiring page");
            let page = handle.destroy();
            let _ = page.close().await;
            return;
        }

        trace!(page = %handle.id, uses = handle.uses, "page returned to pool");
        state.idle.push_back(handle);
    }

    /// Tear down the current browser so the next `get_page` relaunches
    /// behind the next proxy. The relaunch is deferred rather than eager:
    /// callers that rotate but never check out another page (the relay path,
    /// shutdown races) must not pay for a browser launch. Outstanding pages
    /// keep working until released, at which point their stale generation
    /// retires them.
    pub async fn rotate_proxy(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("session pool is closed");
        }
        let mut state = self.state.lock().await;
        state.generation += 1;
        let idle: Vec<PageHandle> = state.idle.drain(..).collect();
        for handle in idle {
            handle.destroy();
        }
        if let Some(browser_handle) = state.browser.take() {
            info!(
                proxy = browser_handle.proxy.as_ref().map(|p| p.address()),
                "rotating away from current browser"
            );
            teardown_browser(browser_handle).await;
        }
        Ok(())
    }

    /// Address of the proxy the live browser is bound to, if any.
    pub async fn active_proxy_address(&self) -> Option<String> {
        let state = self.state.lock().await;
        state
            .browser
            .as_ref()
            .and_then(|b| b.proxy.as_ref())
            .map(|p| p.address())
    }

    /// Idempotent shutdown. Closes all pages and the browser process.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock().await;
        let idle: Vec<PageHandle> = state.idle.drain(..).collect();
        for handle in idle {
            handle.destroy();
        }
        if let Some(browser_handle) = state.browser.take() {
            teardown_browser(browser_handle).await;
        }
        info!("session pool closed");
    }

    async fn ensure_browser(&self, state: &mut PoolState) -> Result<()> {
        if state.browser.is_some() {
            return Ok(());
        }

        let mut last_err = None;
        for attempt in 0..self.config.launch_retries {
            // Last attempt goes proxy-less so a fully dead pool still yields
            // a usable browser.
            let is_last = attempt + 1 == self.config.launch_retries;
            let proxy = if is_last {
                None
            } else {
                self.rotator.get_next().await
            };

            match browser::launch(self.config.headless, proxy.as_ref()).await {
                Ok((b, handler, user_data_dir)) => {
                    info!(
                        attempt,
                        proxy = proxy.as_ref().map(|p| p.address()),
                        "browser launched"
                    );
                    state.browser = Some(BrowserHandle {
                        browser: b,
                        handler,
                        user_data_dir,
                        proxy,
                    });
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, "browser launch failed: {e:#}");
                    if let Some(ref p) = proxy {
                        self.rotator.mark_failed(&p.address()).await;
                    }
                    last_err = Some(e);
                    if !is_last {
                        tokio::time::sleep(std::time::Duration::from_millis(
                            self.config.launch_retry_pause_ms,
                        ))
                        .await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("browser launch retries exhausted")))
    }
}

async fn teardown_browser(mut handle: BrowserHandle) {
    if let Err(e) = handle.browser.close().await {
        debug!("browser close reported error: {e}");
    }
    let _ = handle.browser.wait().await;
    handle.handler.abort();
    if let Err(e) = std::fs::remove_dir_all(&handle.user_data_dir) {
        debug!(
            "failed to remove profile dir {}: {e}",
            handle.user_data_dir.display()
        );
    }
}

/// Answer proxy auth challenges over the CDP fetch domain. Chrome has no
/// flag for proxy credentials, so authenticated upstreams need an active
/// responder for the browser's 407 round-trip.
async fn install_proxy_auth(page: &Page, proxy: &ProxyCandidate) -> Result<JoinHandle<()>> {
    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .context("failed to subscribe to fetch pause events")?;
    let mut auth_required = page
        .event_listener::<EventAuthRequired>()
        .await
        .context("failed to subscribe to auth events")?;

    page.execute(FetchEnableParams {
        patterns: None,
        handle_auth_requests: Some(true),
    })
    .await
    .context("failed to enable fetch interception")?;

    let username = proxy.username.clone().unwrap_or_default();
    let password = proxy.password.clone().unwrap_or_default();
    let page = page.clone();

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                event = paused.next() => {
                    let Some(event) = event else { break };
                    let params = ContinueRequestParams::new(event.request_id.clone());
                    if page.execute(params).await.is_err() {
                        break;
                    }
                }
                event = auth_required.next() => {
                    let Some(event) = event else { break };
                    let params = ContinueWithAuthParams {
                        request_id: event.request_id.clone(),
                        auth_challenge_response: AuthChallengeResponse {
                            response: AuthChallengeResponseResponse::ProvideCredentials,
                            username: Some(username.clone()),
                            password: Some(password.clone()),
                        },
                    };
                    if page.execute(params).await.is_err() {
                        break;
                    }
                }
            }
        }
        trace!("proxy auth responder stopped");
    }))
}

/// Recycling decision for a released page, kept pure so the invariants are
/// testable without a browser.
fn should_repool(
    uses: u32,
    max_uses: u32,
    idle_len: usize,
    capacity: usize,
    same_generation: bool,
) -> bool {
    same_generation && uses < max_uses && idle_len < capacity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_retires_at_use_ceiling() {
        assert!(should_repool(19, 20, 0, 4, true));
        assert!(!should_repool(20, 20, 0, 4, true));
    }

    #[test]
    fn stale_generation_never_repools() {
        assert!(!should_repool(1, 20, 0, 4, false));
    }

    #[test]
    fn full_idle_queue_retires_page() {
        assert!(!should_repool(1, 20, 4, 4, true));
        assert!(should_repool(1, 20, 3, 4, true));
    }

    #[test]
    fn images_and_fonts_are_on_the_blocklist() {
        for pattern in ["*.png", "*.jpg", "*.webp", "*.woff2", "*.mp4"] {
            assert!(
                BLOCKED_URL_PATTERNS.contains(&pattern),
                "{pattern} should be blocked"
            );
        }
    }

    fn test_pool() -> Arc<SessionPool> {
        SessionPool::new(EngineConfig::default(), ProxyRotator::new())
    }

    // Rotation only tears down and bumps the generation. Without a live
    // browser there is nothing to tear down and no launch happens, so this
    // succeeds even on hosts with no Chrome installed.
    #[tokio::test]
    async fn rotation_without_a_browser_is_a_cheap_no_op() {
        let pool = test_pool();
        pool.rotate_proxy().await.unwrap();
        pool.rotate_proxy().await.unwrap();
        assert!(pool.active_proxy_address().await.is_none());
    }

    #[tokio::test]
    async fn closed_pool_refuses_rotation() {
        let pool = test_pool();
        pool.close().await;
        assert!(pool.rotate_proxy().await.is_err());
    }
}
