//! The scraped product record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Descriptions are stored truncated; marketplace description blobs run to
/// tens of kilobytes of markup-flavored filler.
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    InStock,
    OutOfStock,
    Limited,
    Unknown,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::InStock => "in_stock",
            Availability::OutOfStock => "out_of_stock",
            Availability::Limited => "limited",
            Availability::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellerType {
    /// Sold and shipped by the marketplace itself.
    Marketplace,
    ThirdPartyNew,
    ThirdPartyUsed,
}

impl SellerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SellerType::Marketplace => "marketplace",
            SellerType::ThirdPartyNew => "third_party_new",
            SellerType::ThirdPartyUsed => "third_party_used",
        }
    }
}

/// One successful observation of a product page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedProduct {
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub price: f64,
    /// ISO 4217 code, e.g. "EUR".
    pub currency: String,
    pub availability: Availability,
    pub seller_type: SellerType,
    pub seller_name: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub scraped_at: DateTime<Utc>,
}

/// Truncate at a char boundary, appending an ellipsis when text was cut.
pub fn truncate_description(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_DESCRIPTION_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_DESCRIPTION_CHARS - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_descriptions_pass_through() {
        assert_eq!(truncate_description("  plain text  "), "plain text");
    }

    #[test]
    fn long_descriptions_are_cut_on_char_boundaries() {
        let long = "ä".repeat(MAX_DESCRIPTION_CHARS + 50);
        let truncated = truncate_description(&long);
        assert_eq!(truncated.chars().count(), MAX_DESCRIPTION_CHARS);
        assert!(truncated.ends_with('…'));
    }
}
