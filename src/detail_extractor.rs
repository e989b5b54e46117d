use regex::Regex;
use scraper::{Html, Selector};
use std::sync::{Arc, LazyLock};

use crate::config::ScraperConfig;
use crate::fetcher::ResilientFetcher;
use crate::models::listing::{ListingDetail, NO_LOCATION, NO_MILEAGE, NO_PRICE, NO_TITLE, NO_YEAR};
use crate::query::canonicalize_host;
use crate::utils::pacing::Pacer;

pub const TITLE_SUFFIX: &str = " | MercadoLibre";

static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").expect("static selector"));
static PRICE_FRACTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".andes-money-amount__fraction").expect("static selector"));
static CURRENCY_SYMBOL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".andes-money-amount__currency-symbol").expect("static selector"));

/// `2015 | 120.000 km · Publicado hace 2 horas`
static YEAR_MILEAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})\s*\|\s*([\d.,]+)\s*km\s*·\s*Publicado").expect("static regex")
});
static LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""city":"([^"]+)","neighborhood":"([^"]+)","state":"([^"]+)""#).expect("static regex")
});

/// Fetches one listing page and pulls out what a notification needs.
pub struct DetailExtractor {
    fetcher: Arc<ResilientFetcher>,
    pacer: Pacer,
    config: ScraperConfig,
}

impl DetailExtractor {
    pub fn new(fetcher: Arc<ResilientFetcher>, pacer: Pacer, config: ScraperConfig) -> Self {
        Self { fetcher, pacer, config }
    }

    /// Never fails. An unreachable page yields `ListingDetail::unavailable`.
    pub async fn detail(&self, listing_url: &str) -> ListingDetail {
        let url = canonicalize_host(listing_url);
        self.pacer.pause().await;

        let headers = ResilientFetcher::browser_headers(&self.config.accept_language);
        let timeout = self.config.detail_timeout(self.fetcher.default_timeout());

        match self.fetcher.get(&url, &headers, timeout).await {
            Ok(page) => parse_detail(&page.body, &url),
            Err(e) => {
                tracing::error!("Failed to fetch car details from {}: {}", url, e);
                ListingDetail::unavailable(&url)
            }
        }
    }

    /// Page title of a search URL, or the URL itself when it can't be had.
    pub async fn page_title(&self, url: &str) -> String {
        let url = canonicalize_host(url);
        self.pacer.pause().await;

        let headers = ResilientFetcher::browser_headers(&self.config.accept_language);
        let timeout = self.config.title_timeout(self.fetcher.default_timeout());

        match self.fetcher.get(&url, &headers, timeout).await {
            Ok(page) => parse_page_title(&page.body).unwrap_or(url),
            Err(e) => {
                tracing::warn!("Failed to fetch title for {}: {}", url, e);
                url
            }
        }
    }
}

/// Each field is extracted independently and falls back to its placeholder.
pub fn parse_detail(html: &str, url: &str) -> ListingDetail {
    let document = Html::parse_document(html);
    let page_text: String = document.root_element().text().collect();

    let title = parse_title(&document).unwrap_or_else(|| NO_TITLE.to_string());
    let price = parse_price(&document).unwrap_or_else(|| NO_PRICE.to_string());

    let (year, mileage) = match YEAR_MILEAGE.captures(&page_text) {
        Some(caps) => (caps[1].to_string(), caps[2].to_string()),
        None => {
            tracing::debug!("No year/mileage fragment on {}", url);
            (NO_YEAR.to_string(), NO_MILEAGE.to_string())
        }
    };

    // Structured data lives inside <script>, so search the raw markup.
    let location = LOCATION
        .captures(html)
        .map(|caps| format!("{}, {}", &caps[1], &caps[3]))
        .unwrap_or_else(|| NO_LOCATION.to_string());

    ListingDetail {
        title,
        price,
        year,
        mileage,
        location,
        url: url.to_string(),
    }
}

/// `<title>` without the marketplace suffix, if non-empty.
pub fn parse_page_title(html: &str) -> Option<String> {
    parse_title(&Html::parse_document(html))
}

fn parse_title(document: &Html) -> Option<String> {
    let raw: String = document.select(&TITLE).next()?.text().collect();
    let title = raw.trim().replace(TITLE_SUFFIX, "");
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

fn parse_price(document: &Html) -> Option<String> {
    let fraction = first_text(document, &PRICE_FRACTION)?;
    match first_text(document, &CURRENCY_SYMBOL) {
        Some(currency) => Some(format!("{} {}", currency, fraction)),
        None => Some(fraction),
    }
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    let text: String = document.select(selector).next()?.text().collect();
    Some(text.trim().to_string())
}
