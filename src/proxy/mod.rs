//! Rotating pool of network egress identities.
//!
//! Candidates are either a single explicitly configured proxy (which takes
//! precedence) or a periodically refreshed harvest of free sources. No
//! candidate is ever evicted for failing, only deprioritized, and when the
//! whole pool is unhealthy every failure count is reset so `get_next()` never
//! degrades into "no proxy forever".

pub mod harvest;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ProxySettings;

/// A candidate is deprioritized once it accumulates this many failures.
const UNHEALTHY_THRESHOLD: u32 = 3;

/// One egress identity with its health bookkeeping.
#[derive(Debug, Clone)]
pub struct ProxyCandidate {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub success_count: u32,
    pub fail_count: u32,
    pub last_used: Option<Instant>,
}

impl ProxyCandidate {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: "http".to_string(),
            username: None,
            password: None,
            success_count: 0,
            fail_count: 0,
            last_used: None,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &ProxySettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            protocol: settings.protocol.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            success_count: 0,
            fail_count: 0,
            last_used: None,
        }
    }

    /// `host:port` key used for health bookkeeping.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Value for Chrome's `--proxy-server` flag.
    #[must_use]
    pub fn server_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.fail_count < UNHEALTHY_THRESHOLD
    }

    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.username.is_some()
    }
}

#[derive(Debug, Default)]
struct RotatorState {
    candidates: Vec<ProxyCandidate>,
    cursor: usize,
    /// Explicit proxy pins the pool; harvest refreshes are ignored.
    pinned: bool,
}

/// Round-robin rotator over the healthy subset of the pool.
#[derive(Debug)]
pub struct ProxyRotator {
    state: Mutex<RotatorState>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyRotator {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RotatorState::default()),
            refresh_task: Mutex::new(None),
        })
    }

    /// Pin the pool to a single explicitly configured proxy.
    pub async fn load_explicit(&self, settings: &ProxySettings) {
        let mut state = self.state.lock().await;
        state.candidates = vec![ProxyCandidate::from_settings(settings)];
        state.cursor = 0;
        state.pinned = true;
        info!(proxy = %settings.host, port = settings.port, "using explicitly configured proxy");
    }

    /// Add candidates (harvest results or tests). Existing stats survive for
    /// addresses already in the pool.
    pub async fn add_candidates(&self, incoming: Vec<ProxyCandidate>) {
        let mut state = self.state.lock().await;
        if state.pinned {
            return;
        }
        for candidate in incoming {
            if !state
                .candidates
                .iter()
                .any(|existing| existing.address() == candidate.address())
            {
                state.candidates.push(candidate);
            }
        }
    }

    /// Replace the harvested pool, carrying health stats over for survivors.
    pub async fn replace_harvested(&self, incoming: Vec<ProxyCandidate>) {
        let mut state = self.state.lock().await;
        if state.pinned {
            return;
        }
        let previous = std::mem::take(&mut state.candidates);
        state.candidates = incoming
            .into_iter()
            .map(|mut candidate| {
                if let Some(old) = previous
                    .iter()
                    .find(|old| old.address() == candidate.address())
                {
                    candidate.success_count = old.success_count;
                    candidate.fail_count = old.fail_count;
                    candidate.last_used = old.last_used;
                }
                candidate
            })
            .collect();
        state.cursor = 0;
        debug!(candidates = state.candidates.len(), "proxy pool refreshed");
    }

    /// Periodically re-harvest the free sources. Zero harvested candidates is
    /// not an error; the engine just runs proxy-less until the next refresh.
    pub async fn start_harvesting(
        self: &Arc<Self>,
        sources: Vec<String>,
        interval: Duration,
    ) {
        let rotator = Arc::clone(self);
        let task = tokio::spawn(async move {
            let client = harvest::client();
            loop {
                let harvested = harvest::harvest(&client, &sources).await;
                if harvested.is_empty() {
                    warn!("proxy harvest yielded no candidates; operating proxy-less");
                } else {
                    rotator.replace_harvested(harvested).await;
                }
                tokio::time::sleep(interval).await;
            }
        });
        *self.refresh_task.lock().await = Some(task);
    }

    pub async fn shutdown(&self) {
        if let Some(task) = self.refresh_task.lock().await.take() {
            task.abort();
        }
    }

    /// Next usable candidate, round-robin over the healthy subset.
    ///
    /// Returns `None` only while the pool has never held a candidate. When
    /// every candidate is unhealthy the whole pool is reset to healthy first,
    /// so rotation always proceeds.
    pub async fn get_next(&self) -> Option<ProxyCandidate> {
        let mut state = self.state.lock().await;
        if state.candidates.is_empty() {
            return None;
        }

        if !state.candidates.iter().any(ProxyCandidate::is_healthy) {
            warn!(
                candidates = state.candidates.len(),
                "all proxies unhealthy; resetting failure counts"
            );
            for candidate in &mut state.candidates {
                candidate.fail_count = 0;
            }
        }

        let len = state.candidates.len();
        for offset in 0..len {
            let idx = (state.cursor + offset) % len;
            if state.candidates[idx].is_healthy() {
                state.cursor = (idx + 1) % len;
                state.candidates[idx].last_used = Some(Instant::now());
                return Some(state.candidates[idx].clone());
            }
        }
        // Unreachable after the reset above, but rotation must never deadlock.
        None
    }

    /// Record a successful fetch through `address`. Failure count decays
    /// toward zero, never below.
    pub async fn mark_success(&self, address: &str) {
        let mut state = self.state.lock().await;
        if let Some(candidate) = state
            .candidates
            .iter_mut()
            .find(|c| c.address() == address)
        {
            candidate.success_count += 1;
            candidate.fail_count = candidate.fail_count.saturating_sub(1);
        }
    }

    pub async fn mark_failed(&self, address: &str) {
        let mut state = self.state.lock().await;
        if let Some(candidate) = state
            .candidates
            .iter_mut()
            .find(|c| c.address() == address)
        {
            candidate.fail_count += 1;
            debug!(
                proxy = address,
                fail_count = candidate.fail_count,
                "proxy marked failed"
            );
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.candidates.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.candidates.is_empty()
    }
}
