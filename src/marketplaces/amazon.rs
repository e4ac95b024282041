//! Amazon product pages, across regional storefronts.

use chrono::Utc;
use regex::Regex;
use scraper::Html;
use std::sync::LazyLock;
use tracing::trace;

use super::parsing::{
    classify_availability, infer_currency, parse_price, parse_rating, parse_review_count,
    select_first_attr, select_first_text,
};
use super::{COMMON_BLOCK_PHRASES, Marketplace, MarketplaceScraper, ScrapeTarget};
use crate::error::ScrapeError;
use crate::product::{Availability, ScrapedProduct, SellerType, truncate_description};

static PRODUCT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)https?://(?:www\.)?amazon\.(?P<tld>com|de|co\.uk|fr|it|es|nl)/(?:[^/]+/)?(?:dp|gp/product)/(?P<asin>[A-Z0-9]{10})",
    )
    .expect("valid amazon url regex")
});

const TITLE_SELECTORS: &[&str] = &["#productTitle", "span#title", "h1.a-size-large"];

const PRICE_SELECTORS: &[&str] = &[
    "#corePriceDisplay_desktop_feature_div .a-price .a-offscreen",
    "#corePrice_feature_div .a-price .a-offscreen",
    ".a-price .a-offscreen",
    "#priceblock_ourprice",
    "#priceblock_dealprice",
    "#price_inside_buybox",
];

const AVAILABILITY_SELECTORS: &[&str] = &[
    "#availability span",
    "#availability",
    "#outOfStock .a-color-price",
];

const BRAND_SELECTORS: &[&str] = &["#bylineInfo", "a#brand", "#brand"];

const DESCRIPTION_SELECTORS: &[&str] = &[
    "#feature-bullets",
    "#productDescription",
    "#bookDescription_feature_div",
];

const SELLER_SELECTORS: &[&str] = &[
    "#sellerProfileTriggerId",
    "#merchant-info a",
    "#merchant-info",
];

const CATEGORY_SELECTORS: &[&str] = &[
    "#wayfinding-breadcrumbs_feature_div li:last-child a",
    "#nav-subnav .nav-a-content",
];

const IMAGE_SELECTORS: &[&str] = &["#landingImage", "#imgBlkFront", "#main-image"];

const RATING_SELECTORS: &[&str] = &["#acrPopover .a-icon-alt", "span[data-hook=rating-out-of-text]"];

const REVIEW_COUNT_SELECTORS: &[&str] = &["#acrCustomerReviewText", "#ratings-count"];

pub struct AmazonScraper;

impl AmazonScraper {
    pub fn new() -> Self {
        Self
    }

    fn currency_for_region(region: Option<&str>) -> &'static str {
        match region {
            Some("de") | Some("fr") | Some("it") | Some("es") | Some("nl") => "EUR",
            Some("co.uk") => "GBP",
            _ => "USD",
        }
    }
}

impl Default for AmazonScraper {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketplaceScraper for AmazonScraper {
    fn marketplace(&self) -> Marketplace {
        Marketplace::Amazon
    }

    fn recognizes(&self, url: &str) -> bool {
        PRODUCT_URL.is_match(url)
    }

    fn parse_url(&self, url: &str) -> Result<ScrapeTarget, ScrapeError> {
        let caps = PRODUCT_URL.captures(url).ok_or_else(|| {
            ScrapeError::PermanentParse(format!("not an amazon product url: {url}"))
        })?;
        let tld = caps["tld"].to_lowercase();
        let asin = caps["asin"].to_uppercase();
        Ok(ScrapeTarget {
            marketplace: Marketplace::Amazon,
            canonical_url: format!("https://www.amazon.{tld}/dp/{asin}"),
            marketplace_id: asin,
            region: Some(tld),
        })
    }

    fn content_markers(&self) -> &'static [&'static str] {
        &["#productTitle", "#dp-container"]
    }

    fn detect_block(&self, current_url: &str, html: &str) -> Option<String> {
        if current_url.contains("/errors/validateCaptcha") {
            return Some("redirected to captcha page".into());
        }
        let lower = html.to_lowercase();
        if lower.contains("type the characters you see in this image") {
            return Some("captcha challenge in page body".into());
        }
        COMMON_BLOCK_PHRASES
            .iter()
            .find(|p| lower.contains(*p))
            .map(|p| format!("challenge phrase in page: {p}"))
    }

    fn extract(&self, target: &ScrapeTarget, html: &str) -> Result<ScrapedProduct, ScrapeError> {
        let doc = Html::parse_document(html);

        let title = select_first_text(&doc, TITLE_SELECTORS)
            .ok_or(ScrapeError::ExtractionIncomplete { field: "title" })?;

        let raw_price = select_first_text(&doc, PRICE_SELECTORS)
            .ok_or(ScrapeError::ExtractionIncomplete { field: "price" })?;
        let price = parse_price(&raw_price)
            .ok_or(ScrapeError::ExtractionIncomplete { field: "price" })?;
        let currency = infer_currency(&raw_price)
            .unwrap_or_else(|| Self::currency_for_region(target.region.as_deref()))
            .to_string();

        let availability = select_first_text(&doc, AVAILABILITY_SELECTORS)
            .map(|text| classify_availability(&text))
            .unwrap_or(Availability::Unknown);

        let seller_name = select_first_text(&doc, SELLER_SELECTORS);
        let seller_type = match seller_name.as_deref() {
            None => SellerType::Marketplace,
            Some(name) if name.to_lowercase().contains("amazon") => SellerType::Marketplace,
            Some(_) => SellerType::ThirdPartyNew,
        };

        let rating = select_first_text(&doc, RATING_SELECTORS).and_then(|t| parse_rating(&t));
        let review_count =
            select_first_text(&doc, REVIEW_COUNT_SELECTORS).and_then(|t| parse_review_count(&t));

        trace!(asin = %target.marketplace_id, %price, "amazon extraction complete");

        Ok(ScrapedProduct {
            title,
            description: select_first_text(&doc, DESCRIPTION_SELECTORS)
                .map(|d| truncate_description(&d)),
            image_url: select_first_attr(&doc, IMAGE_SELECTORS, "src"),
            brand: select_first_text(&doc, BRAND_SELECTORS)
                .map(|b| b.trim_start_matches("Visit the ").trim_end_matches(" Store").to_string()),
            category: select_first_text(&doc, CATEGORY_SELECTORS),
            price,
            currency,
            availability,
            seller_type,
            seller_name,
            rating,
            review_count,
            scraped_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dp_and_gp_urls() {
        let scraper = AmazonScraper::new();
        let t = scraper
            .parse_url("https://www.amazon.de/some-product-name/dp/B07XJ8C8F5?ref=test")
            .unwrap();
        assert_eq!(t.marketplace_id, "B07XJ8C8F5");
        assert_eq!(t.region.as_deref(), Some("de"));
        assert_eq!(t.canonical_url, "https://www.amazon.de/dp/B07XJ8C8F5");

        let t = scraper
            .parse_url("https://amazon.com/gp/product/B000000001")
            .unwrap();
        assert_eq!(t.marketplace_id, "B000000001");
    }

    #[test]
    fn rejects_non_product_urls() {
        let scraper = AmazonScraper::new();
        assert!(scraper.parse_url("https://www.amazon.de/gp/cart").is_err());
        assert!(!scraper.recognizes("https://www.ebay.com/itm/12345"));
    }
}
