//! Selector-driven extraction of product data from fetched pages.
//!
//! Everything here is synchronous and side-effect free: callers hand over page
//! content and get back a validated record or an [`ExtractionError`]. Parsed
//! documents are never held across an await point.

mod links;
mod price;

pub use links::extract_links;
pub use price::parse_price;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

use crate::config::RetailerConfig;
use crate::domain::{ProductRecord, ValidationError};

/// Extraction failures. None of them go away by retrying the same page.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("{field} selector '{selector}' matched no elements")]
    SelectorNotFound {
        field: &'static str,
        selector: String,
    },

    #[error("malformed price: {0}")]
    MalformedPrice(#[from] ValidationError),

    #[error("malformed content: {0}")]
    MalformedContent(String),
}

/// Image attributes checked in order; covers lazy-loading and meta tags.
const IMAGE_ATTRS: [&str; 5] = ["src", "data-src", "data-original", "content", "href"];

/// Extracts a product record from `page` using the retailer's selectors.
///
/// `product_url` is used to resolve relative image URLs; `scraped_at` becomes
/// the record's `last_scraped_at`.
pub fn extract_product(
    page: &str,
    retailer: &RetailerConfig,
    product_url: &str,
    scraped_at: DateTime<Utc>,
) -> Result<ProductRecord, ExtractionError> {
    if page.trim().is_empty() {
        return Err(ExtractionError::MalformedContent("page is empty".into()));
    }

    let document = Html::parse_document(page);

    let name_el = first_match(&document, "name", &retailer.name_selector)?;
    let name = element_text(&name_el);
    if name.is_empty() {
        return Err(ExtractionError::MalformedContent(format!(
            "name element '{}' has no text",
            retailer.name_selector
        )));
    }

    let price_el = first_match(&document, "price", &retailer.price_selector)?;
    let mut price_text = element_text(&price_el);
    if price_text.is_empty() {
        price_text = price_el
            .value()
            .attr("content")
            .or_else(|| price_el.value().attr("data-price"))
            .unwrap_or_default()
            .to_string();
    }
    let price = parse_price(&price_text)?;

    let image_el = first_match(&document, "image", &retailer.image_selector)?;
    let image_url = IMAGE_ATTRS
        .iter()
        .filter_map(|attr| image_el.value().attr(attr))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .and_then(|value| resolve_url(product_url, value));

    let product_identifier = retailer
        .identifier_selector
        .as_deref()
        .and_then(|selector| optional_text(&document, selector));

    let record = ProductRecord {
        id: None,
        retailer_id: retailer.id,
        product_identifier,
        name,
        price,
        image_url,
        product_url: product_url.to_string(),
        last_scraped_at: scraped_at,
    };
    record.validate().map_err(|e| match e {
        ValidationError::EmptyName => ExtractionError::MalformedContent(e.to_string()),
        other => ExtractionError::MalformedPrice(other),
    })?;

    Ok(record)
}

fn parse_selector(field: &'static str, selector: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(selector.trim()).map_err(|_| {
        ExtractionError::MalformedContent(format!("invalid {} selector '{}'", field, selector))
    })
}

fn first_match<'a>(
    document: &'a Html,
    field: &'static str,
    selector: &str,
) -> Result<ElementRef<'a>, ExtractionError> {
    let parsed = parse_selector(field, selector)?;
    document
        .select(&parsed)
        .next()
        .ok_or_else(|| ExtractionError::SelectorNotFound {
            field,
            selector: selector.to_string(),
        })
}

/// Text of the first element matching `selector`, falling back to its `content` attribute.
fn optional_text(document: &Html, selector: &str) -> Option<String> {
    let parsed = Selector::parse(selector.trim()).ok()?;
    let element = document.select(&parsed).next()?;
    let text = element_text(&element);
    if !text.is_empty() {
        return Some(text);
    }
    element
        .value()
        .attr("content")
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Concatenated text content with whitespace runs collapsed.
fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn resolve_url(base: &str, value: &str) -> Option<String> {
    if let Ok(url) = Url::parse(value) {
        return Some(url.to_string());
    }
    Url::parse(base).ok()?.join(value).ok().map(|u| u.to_string())
}
