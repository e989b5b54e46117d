use scraper::{Html, Selector};
use std::sync::{Arc, LazyLock};

use crate::config::ScraperConfig;
use crate::fetcher::ResilientFetcher;
use crate::query::{canonicalize_host, strip_fragment};

/// Text node the results page shows when the same-day filter has hits.
pub const FRESH_MARKER: &str = "Publicados hoy";
pub const LISTING_ANCHOR: &str = "a.poly-component__title";

static LISTING_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(LISTING_ANCHOR).expect("static selector"));

/// Turns a saved search into the listing URLs currently on its first page.
pub struct ListingScraper {
    fetcher: Arc<ResilientFetcher>,
    config: ScraperConfig,
}

impl ListingScraper {
    pub fn new(fetcher: Arc<ResilientFetcher>, config: ScraperConfig) -> Self {
        Self { fetcher, config }
    }

    /// Listing URLs in page order. Empty when the page has no same-day
    /// results or could not be fetched.
    pub async fn list(&self, query_url: &str) -> Vec<String> {
        let url = canonicalize_host(query_url);
        let headers = ResilientFetcher::browser_headers(&self.config.accept_language);
        let timeout = self.config.listing_timeout(self.fetcher.default_timeout());

        match self.fetcher.get(&url, &headers, timeout).await {
            Ok(page) => {
                let listings = parse_listings(&page.body);
                tracing::debug!("Found {} listings at {}", listings.len(), url);
                listings
            }
            Err(e) => {
                tracing::error!("Failed to fetch URL {}: {}", url, e);
                Vec::new()
            }
        }
    }
}

/// Freshness is all-or-nothing: without the marker nothing is returned.
pub fn parse_listings(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);

    let fresh = document.root_element().text().any(|text| text.trim() == FRESH_MARKER);
    if !fresh {
        tracing::debug!("Results page has no '{}' marker", FRESH_MARKER);
        return Vec::new();
    }

    document
        .select(&LISTING_SELECTOR)
        .filter_map(|anchor| anchor.value().attr("href"))
        .map(strip_fragment)
        .filter(|href| !href.is_empty())
        .map(str::to_string)
        .collect()
}
