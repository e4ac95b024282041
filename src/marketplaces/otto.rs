//! Otto.de product pages.

use chrono::Utc;
use regex::Regex;
use scraper::Html;
use std::sync::LazyLock;

use super::parsing::{
    classify_availability, parse_price, parse_rating, parse_review_count, select_first_attr,
    select_first_text,
};
use super::{COMMON_BLOCK_PHRASES, Marketplace, MarketplaceScraper, ScrapeTarget};
use crate::error::ScrapeError;
use crate::product::{Availability, ScrapedProduct, SellerType, truncate_description};

static PRODUCT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://(?:www\.)?otto\.de/p/(?:[a-z0-9-]+-)?(?P<id>\d{8,12})")
        .expect("valid otto url regex")
});

const TITLE_SELECTORS: &[&str] = &[
    "h1.pdp_short-info__main-name",
    "h1[data-qa=productName]",
    "h1",
];

const BRAND_SELECTORS: &[&str] = &[
    ".pdp_short-info__brand-link",
    "a[data-qa=brandLink]",
];

const PRICE_SELECTORS: &[&str] = &[
    ".pdp_price__retail-price",
    ".pdp_price__price span",
    "span[data-qa=retailPrice]",
];

const AVAILABILITY_SELECTORS: &[&str] = &[
    ".pdp_delivery-promise",
    "div[data-qa=availability]",
    ".pdp_short-info__availability",
];

const DESCRIPTION_SELECTORS: &[&str] = &[
    ".pdp_details__description",
    "div[data-qa=details]",
];

const SELLER_SELECTORS: &[&str] = &[
    ".pdp_seller-info__name",
    "span[data-qa=sellerName]",
];

const IMAGE_SELECTORS: &[&str] = &[
    ".pdp_main-image img",
    "img[data-qa=productImage]",
];

const RATING_SELECTORS: &[&str] = &[".pdp_cr-rating__average", "span[data-qa=ratingValue]"];

const REVIEW_COUNT_SELECTORS: &[&str] = &[".pdp_cr-rating__count", "span[data-qa=ratingCount]"];

pub struct OttoScraper;

impl OttoScraper {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OttoScraper {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketplaceScraper for OttoScraper {
    fn marketplace(&self) -> Marketplace {
        Marketplace::Otto
    }

    fn recognizes(&self, url: &str) -> bool {
        PRODUCT_URL.is_match(url)
    }

    fn parse_url(&self, url: &str) -> Result<ScrapeTarget, ScrapeError> {
        let caps = PRODUCT_URL
            .captures(url)
            .ok_or_else(|| ScrapeError::PermanentParse(format!("not an otto product url: {url}")))?;
        let id = caps["id"].to_string();
        Ok(ScrapeTarget {
            marketplace: Marketplace::Otto,
            canonical_url: format!("https://www.otto.de/p/{id}"),
            marketplace_id: id,
            region: Some("de".to_string()),
        })
    }

    fn content_markers(&self) -> &'static [&'static str] {
        &["h1.pdp_short-info__main-name", "h1[data-qa=productName]"]
    }

    fn detect_block(&self, _current_url: &str, html: &str) -> Option<String> {
        let lower = html.to_lowercase();
        if lower.contains("zugriff verweigert") || lower.contains("sicherheitsüberprüfung") {
            return Some("german-language challenge page".into());
        }
        COMMON_BLOCK_PHRASES
            .iter()
            .find(|p| lower.contains(*p))
            .map(|p| format!("challenge phrase in page: {p}"))
    }

    fn extract(&self, _target: &ScrapeTarget, html: &str) -> Result<ScrapedProduct, ScrapeError> {
        let doc = Html::parse_document(html);

        let title = select_first_text(&doc, TITLE_SELECTORS)
            .ok_or(ScrapeError::ExtractionIncomplete { field: "title" })?;

        let raw_price = select_first_text(&doc, PRICE_SELECTORS)
            .ok_or(ScrapeError::ExtractionIncomplete { field: "price" })?;
        let price = parse_price(&raw_price)
            .ok_or(ScrapeError::ExtractionIncomplete { field: "price" })?;

        let availability = select_first_text(&doc, AVAILABILITY_SELECTORS)
            .map(|text| classify_availability(&text))
            .unwrap_or(Availability::Unknown);

        let seller_name = select_first_text(&doc, SELLER_SELECTORS);
        let seller_type = match seller_name.as_deref() {
            None => SellerType::Marketplace,
            Some(name) if name.to_lowercase().contains("otto") => SellerType::Marketplace,
            Some(_) => SellerType::ThirdPartyNew,
        };

        Ok(ScrapedProduct {
            title,
            description: select_first_text(&doc, DESCRIPTION_SELECTORS)
                .map(|d| truncate_description(&d)),
            image_url: select_first_attr(&doc, IMAGE_SELECTORS, "src"),
            brand: select_first_text(&doc, BRAND_SELECTORS),
            category: None,
            price,
            // Otto is a single-country storefront.
            currency: "EUR".to_string(),
            availability,
            seller_type,
            seller_name,
            rating: select_first_text(&doc, RATING_SELECTORS).and_then(|t| parse_rating(&t)),
            review_count: select_first_text(&doc, REVIEW_COUNT_SELECTORS)
                .and_then(|t| parse_review_count(&t)),
            scraped_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slugged_and_bare_product_urls() {
        let scraper = OttoScraper::new();
        let t = scraper
            .parse_url("https://www.otto.de/p/some-cool-jacket-1234567890#variationId=x")
            .unwrap();
        assert_eq!(t.marketplace_id, "1234567890");
        assert_eq!(t.canonical_url, "https://www.otto.de/p/1234567890");
        assert!(scraper.recognizes("https://otto.de/p/987654321"));
    }

    #[test]
    fn rejects_category_urls() {
        let scraper = OttoScraper::new();
        assert!(scraper.parse_url("https://www.otto.de/damen/mode/").is_err());
    }
}
