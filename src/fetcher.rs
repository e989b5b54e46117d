use rand::Rng;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, UPGRADE_INSECURE_REQUESTS};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_retry::Retry;

use crate::config::{FetcherConfig, ProxyConfig};
use crate::models::Proxy;
use crate::proxy_pool::ProxyProvider;
use crate::utils::error::{FetchError, Result};

/// Candidates probed per attempt before giving up on proxies.
pub const MAX_PROXY_CANDIDATES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    /// After redirects.
    pub final_url: String,
    pub body: String,
}

/// Single chokepoint for outbound GETs: proxy selection, direct fallback,
/// per-call timeout and jittered retries.
pub struct ResilientFetcher {
    proxies: Arc<dyn ProxyProvider>,
    use_proxy: bool,
    fallback_to_direct: bool,
    probe_url: String,
    config: FetcherConfig,
    direct: Client,
}

impl ResilientFetcher {
    pub fn new(proxies: Arc<dyn ProxyProvider>, proxy_config: &ProxyConfig, config: FetcherConfig) -> Result<Self> {
        let direct = Self::client_builder(&config).no_proxy().build()?;

        Ok(Self {
            proxies,
            use_proxy: proxy_config.enabled,
            fallback_to_direct: proxy_config.fallback_to_direct,
            probe_url: proxy_config.probe_url.clone(),
            config,
            direct,
        })
    }

    /// Browser-like headers the marketplace expects.
    pub fn browser_headers(accept_language: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        );
        if let Ok(value) = HeaderValue::from_str(accept_language) {
            headers.insert(ACCEPT_LANGUAGE, value);
        }
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
        headers
    }

    /// Per-call timeout for callers without their own.
    pub fn default_timeout(&self) -> Duration {
        self.config.timeout()
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// GETs `url`, retrying up to `max_retries` times. Every failure path
    /// ends in `FetchError::Exhausted`.
    pub async fn get(&self, url: &str, headers: &HeaderMap, timeout: Duration) -> std::result::Result<FetchedPage, FetchError> {
        let attempts = AtomicU32::new(0);
        let max_retries = self.config.max_retries.max(1);
        let backoff = (1..max_retries).map(|_| self.retry_delay());

        let result = Retry::spawn(backoff, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                self.attempt(url, headers, timeout, attempt).await.inspect_err(|e| {
                    tracing::warn!("Request failed (attempt {}/{}) for {}: {}", attempt, max_retries, url, e);
                })
            }
        })
        .await;

        result.map_err(|last| {
            tracing::error!("All request attempts failed for {}", url);
            metrics::counter!("watcher_fetch_exhausted_total").increment(1);
            FetchError::Exhausted {
                url: url.to_string(),
                attempts: attempts.load(Ordering::SeqCst),
                last_error: last.to_string(),
            }
        })
    }

    async fn attempt(&self, url: &str, headers: &HeaderMap, timeout: Duration, attempt: u32) -> std::result::Result<FetchedPage, FetchError> {
        metrics::counter!("watcher_fetch_attempts_total").increment(1);

        let client = if self.use_proxy {
            match self.working_proxy().await {
                Some(proxy) => {
                    tracing::debug!("Making request via proxy {} (attempt {})", proxy, attempt);
                    self.proxied_client(&proxy)?
                }
                None if self.fallback_to_direct => {
                    tracing::debug!("Making direct request (attempt {})", attempt);
                    self.direct.clone()
                }
                None => return Err(FetchError::NoRoute),
            }
        } else {
            tracing::debug!("Making direct request (attempt {})", attempt);
            self.direct.clone()
        };

        let response = client
            .get(url)
            .headers(headers.clone())
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let final_url = response.url().to_string();
        let body = response.text().await?;

        Ok(FetchedPage {
            status: status.as_u16(),
            final_url,
            body,
        })
    }

    /// First of up to five distinct rotated candidates that passes the probe.
    async fn working_proxy(&self) -> Option<Proxy> {
        let candidates = self.proxies.candidate_count().await.min(MAX_PROXY_CANDIDATES);
        for _ in 0..candidates {
            let proxy = self.proxies.next().await?;
            if self.proxies.test(&proxy, &self.probe_url).await {
                tracing::info!("Found working proxy: {}", proxy);
                return Some(proxy);
            }
        }
        tracing::warn!("No working proxies found");
        None
    }

    fn proxied_client(&self, proxy: &Proxy) -> std::result::Result<Client, FetchError> {
        let client = Self::client_builder(&self.config)
            .proxy(reqwest::Proxy::all(proxy.url())?)
            .build()?;
        Ok(client)
    }

    fn client_builder(config: &FetcherConfig) -> reqwest::ClientBuilder {
        Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .gzip(true)
            .brotli(true)
    }

    fn retry_delay(&self) -> Duration {
        let min = self.config.retry_delay_min_ms;
        let max = self.config.retry_delay_max_ms.max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}
