//! Shared fixtures and fakes for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::RetailerConfig;
use crate::events::{Event, EventHandler, HandlerError};
use crate::fetch::{FetchError, PageFetcher};

/// An eligible retailer without discovery.
pub fn retailer(id: i64) -> RetailerConfig {
    RetailerConfig {
        id,
        name: format!("Retailer {}", id),
        base_url: format!("https://shop{}.example.com", id),
        active: true,
        name_selector: "h1.title".to_string(),
        price_selector: ".price".to_string(),
        image_selector: "img.hero".to_string(),
        identifier_selector: Some(".sku".to_string()),
        discovery_url: None,
        product_link_selector: None,
        product_urls: Vec::new(),
    }
}

/// Same as [`retailer`] with a discovery page at `/catalog` linking `a.product`.
pub fn discovering_retailer(id: i64) -> RetailerConfig {
    let mut r = retailer(id);
    r.discovery_url = Some(format!("https://shop{}.example.com/catalog", id));
    r.product_link_selector = Some("a.product".to_string());
    r
}

/// Product page matching the [`retailer`] selectors.
pub fn product_page(name: &str, price: &str, image: &str) -> String {
    format!(
        r#"<html><body>
<h1 class="title">{}</h1>
<span class="price">{}</span>
<img class="hero" src="{}">
</body></html>"#,
        name, price, image
    )
}

/// Product page that also carries a correlation key.
pub fn product_page_with_sku(name: &str, price: &str, sku: &str) -> String {
    format!(
        r#"<html><body>
<h1 class="title">{}</h1>
<span class="price">{}</span>
<span class="sku">{}</span>
<img class="hero" src="/img/p.png">
</body></html>"#,
        name, price, sku
    )
}

/// Discovery page linking each path with `a.product`.
pub fn catalog_page(paths: &[&str]) -> String {
    let links: Vec<String> = paths
        .iter()
        .map(|p| format!(r#"<a class="product" href="{}">item</a>"#, p))
        .collect();
    format!("<html><body>{}</body></html>", links.join("\n"))
}

/// PageFetcher that replays scripted responses per URL.
///
/// Each call pops the next scripted result; once a URL's script is used up the
/// last result is repeated. Unknown URLs answer 404.
#[derive(Default)]
pub struct FakeFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, FetchError>>>>,
    last: Mutex<HashMap<String, Result<String, FetchError>>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn script(&self, url: &str, results: Vec<Result<String, FetchError>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), results.into());
    }

    pub fn page(&self, url: &str, body: String) {
        self.script(url, vec![Ok(body)]);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front());
        let mut last = self.last.lock().unwrap();
        match next {
            Some(result) => {
                last.insert(url.to_string(), result.clone());
                result
            }
            None => last
                .get(url)
                .cloned()
                .unwrap_or(Err(FetchError::Status { status: 404 })),
        }
    }
}

/// Handler that keeps every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn handle(&self, event: &Event) -> Result<Vec<Event>, HandlerError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(Vec::new())
    }
}

/// Polls `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
