//! Per-marketplace scraping protocols.
//!
//! Each marketplace implements [`MarketplaceScraper`]: URL recognition and
//! canonicalization, block detection and product extraction. Extraction is
//! pure over an HTML string, so the same scraper serves both the browser
//! path and the relay path and is testable against fixture markup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScrapeError;
use crate::product::ScrapedProduct;

mod amazon;
mod etsy;
mod otto;
pub(crate) mod parsing;

pub use amazon::AmazonScraper;
pub use etsy::EtsyScraper;
pub use otto::OttoScraper;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Marketplace {
    Amazon,
    Etsy,
    Otto,
}

impl Marketplace {
    pub const ALL: &'static [Marketplace] =
        &[Marketplace::Amazon, Marketplace::Etsy, Marketplace::Otto];

    pub fn as_str(&self) -> &'static str {
        match self {
            Marketplace::Amazon => "amazon",
            Marketplace::Etsy => "etsy",
            Marketplace::Otto => "otto",
        }
    }
}

impl fmt::Display for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Marketplace {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "amazon" => Ok(Marketplace::Amazon),
            "etsy" => Ok(Marketplace::Etsy),
            "otto" => Ok(Marketplace::Otto),
            other => Err(ScrapeError::PermanentParse(format!(
                "unknown marketplace: {other}"
            ))),
        }
    }
}

/// What a scraper learned from a product URL before any network traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeTarget {
    pub marketplace: Marketplace,
    /// Marketplace-native product identifier (ASIN, listing id, article number).
    pub marketplace_id: String,
    /// Regional storefront hint, e.g. the Amazon TLD. Drives currency
    /// fallbacks when the page omits a symbol.
    pub region: Option<String>,
    /// Cleaned URL with tracking parameters stripped.
    pub canonical_url: String,
}

/// Challenge-page phrases that appear across marketplaces.
pub(crate) const COMMON_BLOCK_PHRASES: &[&str] = &[
    "verify you are a human",
    "are you a robot",
    "unusual traffic",
    "access denied",
    "captcha",
    "pardon our interruption",
];

pub trait MarketplaceScraper: Send + Sync {
    fn marketplace(&self) -> Marketplace;

    /// Cheap URL test, used for routing before the full parse.
    fn recognizes(&self, url: &str) -> bool;

    /// Extract the product identity from a URL. A URL this marketplace can
    /// never serve is a permanent parse failure, not a retry candidate.
    fn parse_url(&self, url: &str) -> Result<ScrapeTarget, ScrapeError>;

    /// CSS selectors whose presence means the product content has rendered.
    fn content_markers(&self) -> &'static [&'static str];

    /// Inspect the landed URL and markup for challenge or block pages.
    /// Returns a short reason when blocked.
    fn detect_block(&self, current_url: &str, html: &str) -> Option<String>;

    /// Pull the product record out of rendered markup.
    fn extract(&self, target: &ScrapeTarget, html: &str) -> Result<ScrapedProduct, ScrapeError>;
}

/// Routing table from marketplace or raw URL to the scraper that owns it.
pub struct ScraperRegistry {
    scrapers: Vec<Box<dyn MarketplaceScraper>>,
}

impl ScraperRegistry {
    pub fn new(scrapers: Vec<Box<dyn MarketplaceScraper>>) -> Self {
        Self { scrapers }
    }

    pub fn with_default_marketplaces() -> Self {
        Self::new(vec![
            Box::new(AmazonScraper::new()),
            Box::new(EtsyScraper::new()),
            Box::new(OttoScraper::new()),
        ])
    }

    pub fn get(&self, marketplace: Marketplace) -> Option<&dyn MarketplaceScraper> {
        self.scrapers
            .iter()
            .find(|s| s.marketplace() == marketplace)
            .map(|s| s.as_ref())
    }

    pub fn match_url(&self, url: &str) -> Option<&dyn MarketplaceScraper> {
        self.scrapers
            .iter()
            .find(|s| s.recognizes(url))
            .map(|s| s.as_ref())
    }

    /// Validate and parse a URL against whichever scraper claims it.
    pub fn parse_any(&self, url: &str) -> Result<ScrapeTarget, ScrapeError> {
        url::Url::parse(url)
            .map_err(|e| ScrapeError::PermanentParse(format!("invalid url {url}: {e}")))?;
        match self.match_url(url) {
            Some(scraper) => scraper.parse_url(url),
            None => Err(ScrapeError::PermanentParse(format!(
                "no marketplace recognizes url: {url}"
            ))),
        }
    }
}
