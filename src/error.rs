//! Scrape failure taxonomy.
//!
//! Every failure in the fetch-extract path collapses into one of these
//! variants, and the variant alone decides what the worker does next:
//! whether the job is retried, and whether the proxy gets rotated first.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The marketplace served a challenge or denial page instead of the
    /// product. Retryable, and the strongest signal to rotate the proxy.
    #[error("blocked by marketplace: {0}")]
    Blocked(String),

    /// Network-level trouble: timeouts, resets, DNS. Retryable.
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// The page rendered but a required field could not be extracted.
    /// Retryable; partial renders and A/B layouts often resolve on a
    /// later attempt.
    #[error("extraction incomplete: missing {field}")]
    ExtractionIncomplete { field: &'static str },

    /// The input itself is unusable. Never retried.
    #[error("permanent parse failure: {0}")]
    PermanentParse(String),

    /// Browser-side failure outside the page itself. Retryable.
    #[error("browser failure: {0}")]
    Browser(String),
}

impl ScrapeError {
    /// Whether another attempt can plausibly succeed.
    pub fn retryable(&self) -> bool {
        !matches!(self, ScrapeError::PermanentParse(_))
    }

    /// Whether this failure alone justifies rotating to a new proxy.
    pub fn wants_proxy_rotation(&self) -> bool {
        matches!(self, ScrapeError::Blocked(_))
    }

    /// Stable short name, stored with failed jobs for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::Blocked(_) => "blocked",
            ScrapeError::TransientNetwork(_) => "transient_network",
            ScrapeError::ExtractionIncomplete { .. } => "extraction_incomplete",
            ScrapeError::PermanentParse(_) => "permanent_parse",
            ScrapeError::Browser(_) => "browser",
        }
    }

    /// Classify an error message bubbled up from the browser layer. CDP
    /// errors are stringly, so this sorts network-shaped messages into the
    /// transient bucket.
    pub fn from_browser_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        let network_shaped = lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("net::")
            || lower.contains("dns")
            || lower.contains("connection refused")
            || lower.contains("connection reset");
        if network_shaped {
            ScrapeError::TransientNetwork(message.to_string())
        } else {
            ScrapeError::Browser(message.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_parse_failures_are_terminal() {
        assert!(ScrapeError::Blocked("captcha".into()).retryable());
        assert!(ScrapeError::TransientNetwork("reset".into()).retryable());
        assert!(ScrapeError::ExtractionIncomplete { field: "price" }.retryable());
        assert!(ScrapeError::Browser("tab crashed".into()).retryable());
        assert!(!ScrapeError::PermanentParse("bad url".into()).retryable());
    }

    #[test]
    fn blocks_demand_rotation() {
        assert!(ScrapeError::Blocked("denied".into()).wants_proxy_rotation());
        assert!(!ScrapeError::TransientNetwork("reset".into()).wants_proxy_rotation());
    }

    #[test]
    fn browser_messages_classify_by_shape() {
        assert!(matches!(
            ScrapeError::from_browser_message("Navigation timed out"),
            ScrapeError::TransientNetwork(_)
        ));
        assert!(matches!(
            ScrapeError::from_browser_message("net::ERR_CONNECTION_RESET"),
            ScrapeError::TransientNetwork(_)
        ));
        assert!(matches!(
            ScrapeError::from_browser_message("Session closed"),
            ScrapeError::Browser(_)
        ));
    }
}
