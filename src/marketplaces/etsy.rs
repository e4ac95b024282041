//! Etsy listing pages.

use chrono::Utc;
use regex::Regex;
use scraper::Html;
use std::sync::LazyLock;

use super::parsing::{
    classify_availability, infer_currency, parse_price, parse_rating, parse_review_count,
    select_first_attr, select_first_text,
};
use super::{COMMON_BLOCK_PHRASES, Marketplace, MarketplaceScraper, ScrapeTarget};
use crate::error::ScrapeError;
use crate::product::{Availability, ScrapedProduct, SellerType, truncate_description};

static LISTING_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://(?:www\.)?etsy\.com/(?:[a-z]{2}/)?listing/(?P<id>\d+)")
        .expect("valid etsy url regex")
});

const TITLE_SELECTORS: &[&str] = &[
    "h1[data-buy-box-listing-title]",
    "h1.wt-text-body-01",
    "h1",
];

const PRICE_SELECTORS: &[&str] = &[
    "div[data-buy-box-region=price] .wt-text-title-larger",
    "div[data-buy-box-region=price] p",
    ".wt-text-title-larger",
];

const DESCRIPTION_SELECTORS: &[&str] = &[
    "div[data-product-details-description-text-content]",
    "#product-details-content-toggle",
];

const SELLER_SELECTORS: &[&str] = &[
    "a[aria-label*=shop] span",
    "div[data-appears-component-name*=shop_name]",
    "#listing-page-cart a[href*='/shop/']",
];

const IMAGE_SELECTORS: &[&str] = &[
    "img[data-carousel-first-image]",
    ".wt-max-width-full.carousel-image",
    "ul.carousel-pane-list img",
];

const AVAILABILITY_SELECTORS: &[&str] = &[
    "div[data-buy-box-region=quantity]",
    ".wt-text-caption.wt-text-red",
];

const RATING_SELECTORS: &[&str] = &["input[name=rating]", "span.wt-screen-reader-only"];

const REVIEW_COUNT_SELECTORS: &[&str] = &[
    "button#same-listing-reviews-tab span.wt-badge",
    "h2.wt-text-heading-small + span",
];

pub struct EtsyScraper;

impl EtsyScraper {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EtsyScraper {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketplaceScraper for EtsyScraper {
    fn marketplace(&self) -> Marketplace {
        Marketplace::Etsy
    }

    fn recognizes(&self, url: &str) -> bool {
        LISTING_URL.is_match(url)
    }

    fn parse_url(&self, url: &str) -> Result<ScrapeTarget, ScrapeError> {
        let caps = LISTING_URL
            .captures(url)
            .ok_or_else(|| ScrapeError::PermanentParse(format!("not an etsy listing url: {url}")))?;
        let id = caps["id"].to_string();
        Ok(ScrapeTarget {
            marketplace: Marketplace::Etsy,
            canonical_url: format!("https://www.etsy.com/listing/{id}"),
            marketplace_id: id,
            region: None,
        })
    }

    fn content_markers(&self) -> &'static [&'static str] {
        &["h1[data-buy-box-listing-title]", "div[data-buy-box-region=price]"]
    }

    fn detect_block(&self, current_url: &str, html: &str) -> Option<String> {
        if current_url.contains("etsy.com/captcha") {
            return Some("redirected to captcha page".into());
        }
        let lower = html.to_lowercase();
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
        // Etsy renders in the visitor's currency; USD when the page gives no
        // other signal.
        let currency = infer_currency(&raw_price).unwrap_or("USD").to_string();

        let availability = select_first_text(&doc, AVAILABILITY_SELECTORS)
            .map(|text| classify_availability(&text))
            .unwrap_or(Availability::InStock);

        Ok(ScrapedProduct {
            title,
            description: select_first_text(&doc, DESCRIPTION_SELECTORS)
                .map(|d| truncate_description(&d)),
            image_url: select_first_attr(&doc, IMAGE_SELECTORS, "src"),
            brand: None,
            category: None,
            price,
            currency,
            availability,
            // Every Etsy listing is sold by an independent shop.
            seller_type: SellerType::ThirdPartyNew,
            seller_name: select_first_text(&doc, SELLER_SELECTORS),
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
    fn parses_listing_urls_with_locale_prefix() {
        let scraper = EtsyScraper::new();
        let t = scraper
            .parse_url("https://www.etsy.com/de/listing/123456789/handmade-mug?click_key=x")
            .unwrap();
        assert_eq!(t.marketplace_id, "123456789");
        assert_eq!(t.canonical_url, "https://www.etsy.com/listing/123456789");
    }

    #[test]
    fn rejects_shop_urls() {
        let scraper = EtsyScraper::new();
        assert!(scraper.parse_url("https://www.etsy.com/shop/SomeShop").is_err());
    }
}
