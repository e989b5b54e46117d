use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::{ProxyConfig, ProxySourceConfig, DEFAULT_USER_AGENT};
use crate::models::{Proxy, ProxyStatus};
use crate::utils::error::{FetchError, Result};

/// Used when every configured list source fails or comes back empty.
pub const FALLBACK_PROXIES: [&str; 5] = [
    "103.149.162.194:80",
    "103.149.162.195:80",
    "103.149.162.196:80",
    "103.149.162.197:80",
    "103.149.162.198:80",
];

const SOURCE_TIMEOUT: Duration = Duration::from_secs(10);
const JSON_SOURCE_LIMIT: usize = 10;

/// Where candidate proxies come from.
#[async_trait]
pub trait ProxyListSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self) -> std::result::Result<Vec<Proxy>, FetchError>;
}

/// What the fetcher needs from a proxy pool.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    /// Next candidate in rotation, or `None` when proxying is off or nothing is loaded.
    async fn next(&self) -> Option<Proxy>;

    /// Number of distinct candidates currently loaded, refreshing first when due.
    /// Zero when proxying is off.
    async fn candidate_count(&self) -> usize;

    /// Single GET through `proxy`; true on HTTP 200.
    async fn test(&self, proxy: &Proxy, probe_url: &str) -> bool;
}

/// `ip:port` per line.
pub struct TextListSource {
    url: String,
    client: Client,
}

impl TextListSource {
    pub fn new(url: impl Into<String>, client: Client) -> Self {
        Self { url: url.into(), client }
    }

    pub fn parse(body: &str) -> Vec<Proxy> {
        body.lines().filter_map(Proxy::parse).collect()
    }
}

#[async_trait]
impl ProxyListSource for TextListSource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> std::result::Result<Vec<Proxy>, FetchError> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        let body = response.text().await?;
        Ok(Self::parse(&body))
    }
}

#[derive(Debug, Deserialize)]
struct JsonProxyList {
    #[serde(default)]
    proxies: Vec<JsonProxyEntry>,
}

#[derive(Debug, Deserialize)]
struct JsonProxyEntry {
    ip: String,
    port: serde_json::Value,
}

/// `{"proxies": [{"ip": .., "port": ..}]}`; only the first ten entries are kept.
pub struct JsonListSource {
    url: String,
    client: Client,
}

impl JsonListSource {
    pub fn new(url: impl Into<String>, client: Client) -> Self {
        Self { url: url.into(), client }
    }

    pub fn parse(body: &str) -> std::result::Result<Vec<Proxy>, FetchError> {
        let list: JsonProxyList = serde_json::from_str(body)
            .map_err(|e| FetchError::Transport(format!("invalid proxy list JSON: {}", e)))?;

        Ok(list
            .proxies
            .into_iter()
            .take(JSON_SOURCE_LIMIT)
            .filter_map(|entry| {
                // Some lists send the port as a string.
                let port = match &entry.port {
                    serde_json::Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
                    serde_json::Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                }?;
                Some(Proxy::new(entry.ip, port))
            })
            .collect())
    }
}

#[async_trait]
impl ProxyListSource for JsonListSource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> std::result::Result<Vec<Proxy>, FetchError> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        let body = response.text().await?;
        Self::parse(&body)
    }
}

/// Fixed list; handy for pinning a known set of proxies.
pub struct StaticListSource {
    proxies: Vec<Proxy>,
}

impl StaticListSource {
    pub fn new(proxies: Vec<Proxy>) -> Self {
        Self { proxies }
    }
}

#[async_trait]
impl ProxyListSource for StaticListSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self) -> std::result::Result<Vec<Proxy>, FetchError> {
        Ok(self.proxies.clone())
    }
}

#[derive(Debug, Default)]
struct PoolState {
    proxies: Vec<Proxy>,
    cursor: usize,
    last_refresh: Option<Instant>,
}

/// Rotating set of candidate proxies, refreshed at most once per interval.
pub struct ProxyPool {
    config: ProxyConfig,
    sources: Vec<Box<dyn ProxyListSource>>,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(SOURCE_TIMEOUT)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;

        let sources = config
            .sources
            .iter()
            .map(|source| -> Box<dyn ProxyListSource> {
                match source {
                    ProxySourceConfig::Text { url } => Box::new(TextListSource::new(url, client.clone())),
                    ProxySourceConfig::Json { url } => Box::new(JsonListSource::new(url, client.clone())),
                }
            })
            .collect();

        Ok(Self::with_sources(config, sources))
    }

    pub fn with_sources(config: ProxyConfig, sources: Vec<Box<dyn ProxyListSource>>) -> Self {
        if !config.enabled {
            tracing::info!("Proxy usage is disabled - using direct connections");
        } else if !config.fallback_to_direct {
            tracing::info!("Proxy fallback is disabled - requests fail when no proxy works");
        }

        Self {
            config,
            sources,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Reloads the candidate list regardless of when it was last loaded.
    pub async fn refresh(&self) {
        if !self.config.enabled {
            return;
        }
        let mut state = self.state.lock().await;
        self.reload(&mut state).await;
    }

    pub async fn status(&self) -> ProxyStatus {
        let state = self.state.lock().await;
        ProxyStatus {
            enabled: self.config.enabled,
            fallback_to_direct: self.config.fallback_to_direct,
            refresh_interval_secs: self.config.refresh_interval_secs,
            total: state.proxies.len(),
            cursor: state.cursor,
            sample: state.proxies.iter().take(5).cloned().collect(),
        }
    }

    async fn reload(&self, state: &mut PoolState) {
        tracing::info!("Updating proxy list...");
        let mut loaded = Vec::new();

        for source in &self.sources {
            match source.fetch().await {
                Ok(proxies) if !proxies.is_empty() => {
                    tracing::debug!("Proxy source {} returned {} proxies", source.name(), proxies.len());
                    loaded = proxies;
                    break;
                }
                Ok(_) => {
                    tracing::debug!("Proxy source {} returned no proxies", source.name());
                }
                Err(e) => {
                    tracing::warn!("Failed to fetch proxies from {}: {}", source.name(), e);
                }
            }
        }

        if loaded.is_empty() {
            tracing::warn!("All proxy sources failed, using embedded fallback list");
            loaded = FALLBACK_PROXIES.iter().filter_map(|line| Proxy::parse(line)).collect();
        }

        tracing::info!("Fetched {} proxies", loaded.len());
        metrics::counter!("watcher_proxy_refreshes_total").increment(1);

        state.proxies = loaded;
        state.cursor = 0;
        state.last_refresh = Some(Instant::now());
    }

    fn refresh_due(&self, state: &PoolState) -> bool {
        match state.last_refresh {
            Some(at) => at.elapsed() >= self.config.refresh_interval(),
            None => true,
        }
    }
}

#[async_trait]
impl ProxyProvider for ProxyPool {
    async fn next(&self) -> Option<Proxy> {
        if !self.config.enabled {
            return None;
        }

        let mut state = self.state.lock().await;
        if self.refresh_due(&state) {
            self.reload(&mut state).await;
        }

        if state.proxies.is_empty() {
            if self.config.fallback_to_direct {
                tracing::warn!("No proxies available, using direct connection");
            } else {
                tracing::error!("No proxies available and fallback is disabled");
            }
            return None;
        }

        let proxy = state.proxies[state.cursor].clone();
        state.cursor = (state.cursor + 1) % state.proxies.len();
        Some(proxy)
    }

    async fn candidate_count(&self) -> usize {
        if !self.config.enabled {
            return 0;
        }

        let mut state = self.state.lock().await;
        if self.refresh_due(&state) {
            self.reload(&mut state).await;
        }
        state.proxies.len()
    }

    async fn test(&self, proxy: &Proxy, probe_url: &str) -> bool {
        if !self.config.enabled {
            return false;
        }

        let client = match reqwest::Proxy::all(proxy.url())
            .and_then(|p| Client::builder().proxy(p).timeout(self.config.probe_timeout()).build())
        {
            Ok(client) => client,
            Err(e) => {
                tracing::debug!("Could not build client for proxy {}: {}", proxy, e);
                return false;
            }
        };

        match client.get(probe_url).header("User-Agent", "Mozilla/5.0").send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                tracing::debug!("Proxy test failed for {}: {}", proxy, e);
                false
            }
        }
    }
}
