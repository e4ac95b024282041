//! Paid relay fetch path.
//!
//! Some marketplaces are cheaper to fetch through a commercial unblocking
//! relay than through our own browser fleet. The relay returns rendered
//! HTML, so extraction downstream is identical to the browser path.

use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::config::RelaySettings;
use crate::error::ScrapeError;
use crate::marketplaces::Marketplace;

pub struct RelayClient {
    client: Client,
    settings: RelaySettings,
}

impl RelayClient {
    pub fn new(settings: RelaySettings) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self { client, settings }
    }

    /// Whether this marketplace is routed through the relay.
    pub fn covers(&self, marketplace: Marketplace) -> bool {
        self.settings.marketplaces.contains(&marketplace)
    }

    /// Fetch rendered HTML for `url` through the relay. Relay failures are
    /// transient: the service is rate-limited and flaky by nature, and a
    /// later attempt may be served by a different exit.
    pub async fn fetch(&self, url: &str) -> Result<String, ScrapeError> {
        debug!(%url, "fetching through relay");
        let response = self
            .client
            .get(&self.settings.endpoint)
            .query(&[("url", url), ("render", "true")])
            .header("x-api-key", &self.settings.api_key)
            .send()
            .await
            .map_err(|e| ScrapeError::TransientNetwork(format!("relay request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::TransientNetwork(format!(
                "relay returned status {status} for {url}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| ScrapeError::TransientNetwork(format!("relay body read failed: {e}")))
    }
}
