use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use crate::utils::error::{AppError, Result};

pub const CANONICAL_HOST: &str = "autos.mercadolibre.com.ar";
pub const ALIAS_HOSTS: [&str; 1] = ["listado.mercadolibre.com.ar"];
pub const FRESHNESS_SEGMENT: &str = "_PublishedToday_YES";

static SUPPORTED_QUERY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(listado|autos)\.mercadolibre\.com\.ar/.*").expect("static regex")
});

/// Trailing `_Key_Value` filter run of a search path.
static TRAILING_FILTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(_[A-Za-z0-9]+(?:_[A-Za-z0-9]+)*)$").expect("static regex"));

pub fn is_supported_query(url: &str) -> bool {
    SUPPORTED_QUERY.is_match(url.trim())
}

/// Maps alias category hosts onto the canonical one. Other hosts are left alone.
pub fn canonicalize_host(url: &str) -> String {
    let mut out = url.trim().to_string();
    for alias in ALIAS_HOSTS {
        out = out.replace(alias, CANONICAL_HOST);
    }
    out
}

/// Normalizes a search URL so it only returns same-day listings. Idempotent.
pub fn ensure_freshness_filter(url: &str) -> Result<String> {
    let canonical = canonicalize_host(url);
    let mut parsed = Url::parse(&canonical)
        .map_err(|e| AppError::Validation(format!("invalid search URL '{}': {}", url.trim(), e)))?;

    let path = parsed.path().to_string();
    if path.contains(FRESHNESS_SEGMENT) {
        return Ok(parsed.to_string());
    }

    let new_path = match TRAILING_FILTERS.find(&path) {
        Some(m) => format!("{}{}{}", &path[..m.start()], FRESHNESS_SEGMENT, &path[m.start()..]),
        None => format!("{}{}", path, FRESHNESS_SEGMENT),
    };
    parsed.set_path(&new_path);
    Ok(parsed.to_string())
}

/// Drops any in-page fragment from a listing href.
pub fn strip_fragment(href: &str) -> &str {
    href.split('#').next().unwrap_or(href)
}
