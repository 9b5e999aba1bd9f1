//! Product link extraction for discovery pages.

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

use super::ExtractionError;

/// Returns absolute http(s) URLs of every element matching `selector`.
///
/// Links are resolved against `page_url`, fragments are stripped, and
/// duplicates are removed while keeping first-seen order.
pub fn extract_links(
    html: &str,
    page_url: &str,
    selector: &str,
) -> Result<Vec<String>, ExtractionError> {
    let base = Url::parse(page_url).map_err(|e| {
        ExtractionError::MalformedContent(format!("invalid page url '{}': {}", page_url, e))
    })?;
    let selector = Selector::parse(selector.trim()).map_err(|_| {
        ExtractionError::MalformedContent(format!("invalid link selector '{}'", selector))
    })?;

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&selector) {
        let href = match element
            .value()
            .attr("href")
            .or_else(|| element.value().attr("data-href"))
        {
            Some(h) => h.trim(),
            None => continue,
        };

        if href.is_empty() || href.starts_with('#') {
            continue;
        }

        let mut url = match base.join(href) {
            Ok(u) => u,
            Err(_) => continue,
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        url.set_fragment(None);

        let url = url.to_string();
        if seen.insert(url.clone()) {
            links.push(url);
        }
    }

    Ok(links)
}
