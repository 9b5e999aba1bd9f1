//! Retailer configuration: where to scrape and which selectors to apply.

use scraper::Selector;
use serde::Deserialize;
use url::Url;

use super::ConfigError;

/// A price source with its own extraction selectors and optional discovery page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetailerConfig {
    pub id: i64,
    pub name: String,
    /// Root URL of the storefront, used to resolve relative links.
    pub base_url: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub name_selector: String,
    #[serde(default)]
    pub price_selector: String,
    #[serde(default)]
    pub image_selector: String,
    /// Selector for a UPC/EAN/SKU element used as the cross-retailer correlation key.
    pub identifier_selector: Option<String>,
    /// Listing or category page scanned for new product links.
    pub discovery_url: Option<String>,
    /// Selector matching product anchors on the discovery page.
    pub product_link_selector: Option<String>,
    /// Product pages scraped every cycle whether or not discovery finds them.
    #[serde(default)]
    pub product_urls: Vec<String>,
}

fn default_active() -> bool {
    true
}

impl RetailerConfig {
    /// A retailer is scraped only when it is active and all three extraction selectors are set.
    pub fn is_eligible(&self) -> bool {
        self.active
            && !self.name_selector.trim().is_empty()
            && !self.price_selector.trim().is_empty()
            && !self.image_selector.trim().is_empty()
    }

    /// Returns `(discovery_url, product_link_selector)` when discovery is configured.
    pub fn discovery(&self) -> Option<(&str, &str)> {
        let url = self.discovery_url.as_deref().map(str::trim)?;
        let selector = self.product_link_selector.as_deref().map(str::trim)?;
        if url.is_empty() || selector.is_empty() {
            return None;
        }
        Some((url, selector))
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::retailer(self.id, "name is required"));
        }

        check_url(self.id, "base_url", &self.base_url)?;

        if self.active {
            for (field, value) in [
                ("name_selector", &self.name_selector),
                ("price_selector", &self.price_selector),
                ("image_selector", &self.image_selector),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::retailer(
                        self.id,
                        format!("{} is required for active retailers", field),
                    ));
                }
                check_selector(self.id, field, value)?;
            }
        }

        if let Some(ref selector) = self.identifier_selector {
            check_selector(self.id, "identifier_selector", selector)?;
        }

        match (&self.discovery_url, &self.product_link_selector) {
            (Some(url), Some(selector)) => {
                check_url(self.id, "discovery_url", url)?;
                check_selector(self.id, "product_link_selector", selector)?;
            }
            (Some(_), None) => {
                return Err(ConfigError::retailer(
                    self.id,
                    "discovery_url requires product_link_selector",
                ));
            }
            (None, Some(_)) => {
                return Err(ConfigError::retailer(
                    self.id,
                    "product_link_selector requires discovery_url",
                ));
            }
            (None, None) => {}
        }

        for url in &self.product_urls {
            check_url(self.id, "product_urls", url)?;
        }

        Ok(())
    }
}

fn check_selector(retailer_id: i64, field: &str, selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector.trim()).map(|_| ()).map_err(|_| {
        ConfigError::retailer(
            retailer_id,
            format!("{} '{}' is not a valid CSS selector", field, selector),
        )
    })
}

fn check_url(retailer_id: i64, field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value.trim()).map_err(|e| {
        ConfigError::retailer(retailer_id, format!("{} '{}' is invalid: {}", field, value, e))
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ConfigError::retailer(
            retailer_id,
            format!("{} must be http(s), got {}", field, scheme),
        )),
    }
}
