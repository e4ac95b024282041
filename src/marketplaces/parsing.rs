//! Shared extraction helpers: selector cascades, price normalization,
//! availability classification.

use scraper::{Html, Selector};

use crate::product::Availability;

/// First non-empty text match across a cascade of selectors. Invalid
/// selectors in the cascade are skipped rather than failing the extraction.
pub fn select_first_text(doc: &Html, selectors: &[&str]) -> Option<String> {
    for sel in selectors {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        if let Some(element) = doc.select(&selector).next() {
            let text: String = element.text().collect::<Vec<_>>().join(" ");
            let text = squash_whitespace(&text);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// First non-empty attribute value across a cascade of selectors.
pub fn select_first_attr(doc: &Html, selectors: &[&str], attr: &str) -> Option<String> {
    for sel in selectors {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        if let Some(value) = doc
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr(attr))
        {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a displayed price into a float, handling both the dot-decimal and
/// comma-decimal conventions.
///
/// When both separators appear, the later one is the decimal separator
/// ("1.234,56" and "1,234.56" both parse to 1234.56). A lone separator
/// followed by exactly two digits is decimal; a lone separator followed by
/// three digits is a thousands grouping.
pub fn parse_price(raw: &str) -> Option<f64> {
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if digits.chars().all(|c| !c.is_ascii_digit()) {
        return None;
    }

    let last_dot = digits.rfind('.');
    let last_comma = digits.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (Some(d), Some(c)) => {
            if d > c {
                digits.replace(',', "")
            } else {
                digits.replace('.', "").replace(',', ".")
            }
        }
        (Some(d), None) => {
            let frac_len = digits.len() - d - 1;
            if frac_len == 3 && digits.matches('.').count() == 1 {
                digits.replace('.', "")
            } else {
                digits.clone()
            }
        }
        (None, Some(c)) => {
            let frac_len = digits.len() - c - 1;
            if frac_len == 3 && digits.matches(',').count() == 1 {
                digits.replace(',', "")
            } else {
                digits.replace(',', ".")
            }
        }
        (None, None) => digits.clone(),
    };

    normalized.parse::<f64>().ok().filter(|p| *p >= 0.0)
}

/// Guess the ISO currency code from symbols or codes present in the raw
/// price text. Returns None when the text carries no currency signal.
pub fn infer_currency(raw: &str) -> Option<&'static str> {
    let lower = raw.to_lowercase();
    if raw.contains('€') || lower.contains("eur") {
        Some("EUR")
    } else if raw.contains('£') || lower.contains("gbp") {
        Some("GBP")
    } else if raw.contains('$') || lower.contains("usd") {
        Some("USD")
    } else {
        None
    }
}

/// Map free-form availability text onto the coarse availability states.
/// Out-of-stock phrases win over in-stock phrases because marketplaces
/// routinely say "currently unavailable, usually in stock".
pub fn classify_availability(raw: &str) -> Availability {
    let lower = raw.to_lowercase();

    const OUT: &[&str] = &[
        "out of stock",
        "currently unavailable",
        "sold out",
        "ausverkauft",
        "nicht lieferbar",
        "derzeit nicht verfügbar",
    ];
    const LIMITED: &[&str] = &["only", "nur noch", "low stock"];
    const IN: &[&str] = &[
        "in stock",
        "available",
        "add to cart",
        "sofort lieferbar",
        "auf lager",
        "lieferbar",
    ];

    if OUT.iter().any(|p| lower.contains(p)) {
        Availability::OutOfStock
    } else if LIMITED.iter().any(|p| lower.contains(p)) {
        Availability::Limited
    } else if IN.iter().any(|p| lower.contains(p)) {
        Availability::InStock
    } else {
        Availability::Unknown
    }
}

/// Parse a star rating like "4.6 out of 5 stars" or "4,6 von 5".
pub fn parse_rating(raw: &str) -> Option<f64> {
    let token = raw.split_whitespace().next()?;
    let normalized = token.replace(',', ".");
    normalized.parse::<f64>().ok().filter(|r| (0.0..=5.0).contains(r))
}

/// Parse a review count like "1,234 ratings" or "1.234 Bewertungen".
pub fn parse_review_count(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u32>().ok()
}
