use pricetrawl::{
    Availability, Marketplace, MarketplaceScraper, ScrapeError, ScraperRegistry, SellerType,
};

fn registry() -> ScraperRegistry {
    ScraperRegistry::with_default_marketplaces()
}

const AMAZON_DE_PAGE: &str = r#"
<html><body>
  <div id="dp-container">
    <span id="productTitle"> Thermoskanne   500ml Edelstahl </span>
    <div id="bylineInfo">Visit the Emsa Store</div>
    <div id="corePriceDisplay_desktop_feature_div">
      <span class="a-price"><span class="a-offscreen">19,99&nbsp;€</span></span>
    </div>
    <div id="availability"><span> Auf Lager </span></div>
    <div id="merchant-info">Verkauf und Versand durch Amazon.</div>
    <div id="feature-bullets"><ul><li>Hält 12 Stunden warm</li></ul></div>
    <img id="landingImage" src="https://images.example/thermo.jpg"/>
    <span id="acrPopover"><span class="a-icon-alt">4,6 von 5 Sternen</span></span>
    <span id="acrCustomerReviewText">1.234 Sternebewertungen</span>
  </div>
</body></html>
"#;

#[test]
fn amazon_page_extracts_localized_price_and_availability() {
    let registry = registry();
    let scraper = registry.get(Marketplace::Amazon).expect("amazon scraper");
    let target = scraper
        .parse_url("https://www.amazon.de/dp/B07XJ8C8F5")
        .unwrap();

    let product = scraper.extract(&target, AMAZON_DE_PAGE).unwrap();
    assert_eq!(product.title, "Thermoskanne 500ml Edelstahl");
    assert_eq!(product.price, 19.99);
    assert_eq!(product.currency, "EUR");
    assert_eq!(product.availability, Availability::InStock);
    assert_eq!(product.seller_type, SellerType::Marketplace);
    assert_eq!(product.brand.as_deref(), Some("Emsa"));
    assert_eq!(product.rating, Some(4.6));
    assert_eq!(product.review_count, Some(1234));
    assert_eq!(
        product.image_url.as_deref(),
        Some("https://images.example/thermo.jpg")
    );
}

#[test]
fn amazon_stub_page_yields_normalized_product() {
    let registry = registry();
    let scraper = registry.get(Marketplace::Amazon).unwrap();
    let target = scraper
        .parse_url("https://www.amazon.de/dp/B00TESTB00")
        .unwrap();

    let html = r#"<html><body>
        <span id="productTitle">Foo</span>
        <span class="a-price"><span class="a-offscreen">€19,99</span></span>
        <div id="availability"><span>In Stock</span></div>
    </body></html>"#;

    let product = scraper.extract(&target, html).unwrap();
    assert_eq!(product.title, "Foo");
    assert_eq!(product.price, 19.99);
    assert_eq!(product.currency, "EUR");
    assert_eq!(product.availability, Availability::InStock);
}

#[test]
fn amazon_page_without_price_is_extraction_incomplete() {
    let registry = registry();
    let scraper = registry.get(Marketplace::Amazon).unwrap();
    let target = scraper
        .parse_url("https://www.amazon.com/dp/B000000001")
        .unwrap();

    let html = r#"<html><body><span id="productTitle">Mystery item</span></body></html>"#;
    match scraper.extract(&target, html) {
        Err(ScrapeError::ExtractionIncomplete { field }) => assert_eq!(field, "price"),
        other => panic!("expected incomplete extraction, got {other:?}"),
    }
}

#[test]
fn amazon_region_drives_currency_fallback() {
    let registry = registry();
    let scraper = registry.get(Marketplace::Amazon).unwrap();
    // Price text carries no symbol; the .de storefront implies EUR.
    let html = r#"<html><body>
        <span id="productTitle">Plain priced item</span>
        <span class="a-price"><span class="a-offscreen">12,50</span></span>
    </body></html>"#;

    let target = scraper.parse_url("https://www.amazon.de/dp/B000000002").unwrap();
    let product = scraper.extract(&target, html).unwrap();
    assert_eq!(product.currency, "EUR");

    let target = scraper.parse_url("https://www.amazon.co.uk/dp/B000000002").unwrap();
    let product = scraper.extract(&target, html).unwrap();
    assert_eq!(product.currency, "GBP");
}

#[test]
fn challenge_page_is_detected_as_block() {
    let registry = registry();
    let scraper = registry.get(Marketplace::Amazon).unwrap();

    let html = "<html><body><p>To continue, please verify you are a human.</p></body></html>";
    assert!(
        scraper
            .detect_block("https://www.amazon.com/dp/B000000001", html)
            .is_some()
    );
    assert!(
        scraper
            .detect_block(
                "https://www.amazon.com/errors/validateCaptcha",
                "<html></html>"
            )
            .is_some()
    );
    assert!(
        scraper
            .detect_block("https://www.amazon.com/dp/B000000001", AMAZON_DE_PAGE)
            .is_none()
    );
}

#[test]
fn etsy_listing_extracts_shop_as_third_party_seller() {
    let registry = registry();
    let scraper = registry.get(Marketplace::Etsy).expect("etsy scraper");
    let target = scraper
        .parse_url("https://www.etsy.com/listing/123456789/handmade-mug")
        .unwrap();

    let html = r#"<html><body>
        <h1 data-buy-box-listing-title="true">Handmade ceramic mug</h1>
        <div data-buy-box-region="price"><p class="wt-text-title-larger">$34.00</p></div>
        <a aria-label="Visit shop ClayWorks"><span>ClayWorks</span></a>
    </body></html>"#;

    let product = scraper.extract(&target, html).unwrap();
    assert_eq!(product.title, "Handmade ceramic mug");
    assert_eq!(product.price, 34.0);
    assert_eq!(product.currency, "USD");
    assert_eq!(product.seller_type, SellerType::ThirdPartyNew);
    assert_eq!(product.seller_name.as_deref(), Some("ClayWorks"));
}

#[test]
fn otto_page_extracts_german_availability() {
    let registry = registry();
    let scraper = registry.get(Marketplace::Otto).expect("otto scraper");
    let target = scraper
        .parse_url("https://www.otto.de/p/winterjacke-1234567890")
        .unwrap();

    let html = r#"<html><body>
        <h1 class="pdp_short-info__main-name">Winterjacke mit Kapuze</h1>
        <a class="pdp_short-info__brand-link">NorthPeak</a>
        <span class="pdp_price__retail-price">89,99&nbsp;€</span>
        <div class="pdp_delivery-promise">ausverkauft</div>
    </body></html>"#;

    let product = scraper.extract(&target, html).unwrap();
    assert_eq!(product.price, 89.99);
    assert_eq!(product.currency, "EUR");
    assert_eq!(product.availability, Availability::OutOfStock);
    assert_eq!(product.brand.as_deref(), Some("NorthPeak"));
}

#[test]
fn registry_routes_urls_to_the_owning_marketplace() {
    let registry = registry();
    assert_eq!(
        registry
            .match_url("https://www.amazon.de/dp/B07XJ8C8F5")
            .map(|s| s.marketplace()),
        Some(Marketplace::Amazon)
    );
    assert_eq!(
        registry
            .match_url("https://www.etsy.com/listing/42424242")
            .map(|s| s.marketplace()),
        Some(Marketplace::Etsy)
    );
    assert_eq!(
        registry
            .match_url("https://www.otto.de/p/12345678")
            .map(|s| s.marketplace()),
        Some(Marketplace::Otto)
    );
    assert!(registry.match_url("https://www.ebay.com/itm/1").is_none());
}

#[test]
fn unrecognized_url_is_a_permanent_parse_failure() {
    let registry = registry();
    match registry.parse_any("https://www.ebay.com/itm/12345") {
        Err(ScrapeError::PermanentParse(_)) => {}
        other => panic!("expected permanent parse failure, got {other:?}"),
    }
    match registry.parse_any("not a url at all") {
        Err(ScrapeError::PermanentParse(_)) => {}
        other => panic!("expected permanent parse failure, got {other:?}"),
    }
}
