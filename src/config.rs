use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub poller: PollerConfig,
    pub proxy: ProxyConfig,
    pub fetcher: FetcherConfig,
    pub scraper: ScraperConfig,
    pub notifications: NotificationsConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    pub check_interval_secs: u64,
    pub request_delay_min_secs: u64,
    pub request_delay_max_secs: u64,
    /// Consecutive empty fetches before a watch is reported unhealthy.
    pub unhealthy_after: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub fallback_to_direct: bool,
    pub refresh_interval_secs: u64,
    pub probe_url: String,
    pub probe_timeout_secs: u64,
    pub sources: Vec<ProxySourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProxySourceConfig {
    /// Plain text, one `ip:port` per line.
    Text { url: String },
    /// JSON object with a `proxies` array of `{ip, port}`.
    Json { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub retry_delay_min_ms: u64,
    pub retry_delay_max_ms: u64,
    pub user_agent: String,
}

/// Per-page timeouts override `fetcher.timeout_secs` when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub listing_timeout_secs: Option<u64>,
    pub detail_timeout_secs: Option<u64>,
    pub title_timeout_secs: Option<u64>,
    pub accept_language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub token: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl PollerConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl ProxyConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl FetcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fallback_to_direct: true,
            refresh_interval_secs: 3600,
            probe_url: "https://httpbin.org/ip".to_string(),
            probe_timeout_secs: 10,
            sources: vec![
                ProxySourceConfig::Text {
                    url: "https://api.proxyscrape.com/v2/?request=get&protocol=http&timeout=10000&country=all&ssl=all&anonymity=all".to_string(),
                },
                ProxySourceConfig::Json {
                    url: "https://api.proxynova.com/proxy".to_string(),
                },
            ],
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_secs: 10,
            retry_delay_min_ms: 1000,
            retry_delay_max_ms: 3000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ScraperConfig {
    pub fn listing_timeout(&self, default: Duration) -> Duration {
        self.listing_timeout_secs.map(Duration::from_secs).unwrap_or(default)
    }

    pub fn detail_timeout(&self, default: Duration) -> Duration {
        self.detail_timeout_secs.map(Duration::from_secs).unwrap_or(default)
    }

    pub fn title_timeout(&self, default: Duration) -> Duration {
        self.title_timeout_secs.map(Duration::from_secs).unwrap_or(default)
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            listing_timeout_secs: None,
            detail_timeout_secs: None,
            title_timeout_secs: None,
            accept_language: "es-AR,es;q=0.9,en;q=0.8".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://watcher.db".to_string(),
                max_connections: 5,
            },
            poller: PollerConfig {
                check_interval_secs: 300,
                request_delay_min_secs: 3,
                request_delay_max_secs: 8,
                unhealthy_after: 10,
            },
            proxy: ProxyConfig::default(),
            fetcher: FetcherConfig::default(),
            scraper: ScraperConfig::default(),
            notifications: NotificationsConfig {
                telegram: TelegramConfig {
                    token: None,
                    api_base: "https://api.telegram.org".to_string(),
                },
            },
            metrics: MetricsConfig {
                enabled: false,
                port: 9001,
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(&|name| env::var(name).ok())
    }

    /// Layers defaults, config files, `WATCHER__*` variables and the flat
    /// variable names read through `var`.
    pub fn load(var: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let run_mode = var("RUN_MODE").unwrap_or_else(|| "development".into());
        let defaults = Config::try_from(&AppConfig::default())?;

        let builder = Config::builder()
            // Start with built-in defaults
            .add_source(defaults)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "WATCHER"
            .add_source(Environment::with_prefix("WATCHER").separator("__"));

        let config: AppConfig = Self::flat_overrides(builder, var)?.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Flat variable names understood by earlier deployments.
    fn flat_overrides(
        builder: ConfigBuilder<DefaultState>,
        var: &dyn Fn(&str) -> Option<String>,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        builder
            .set_override_option("poller.check_interval_secs", var("CHECK_INTERVAL"))?
            .set_override_option("poller.request_delay_min_secs", var("REQUEST_DELAY_MIN"))?
            .set_override_option("poller.request_delay_max_secs", var("REQUEST_DELAY_MAX"))?
            .set_override_option("proxy.enabled", var("USE_PROXY"))?
            .set_override_option("proxy.fallback_to_direct", var("PROXY_FALLBACK"))?
            .set_override_option("proxy.refresh_interval_secs", var("PROXY_UPDATE_INTERVAL"))?
            .set_override_option("fetcher.max_retries", var("PROXY_MAX_RETRIES"))?
            // One knob for both the request default and the proxy liveness probe.
            .set_override_option("fetcher.timeout_secs", var("PROXY_TIMEOUT"))?
            .set_override_option("proxy.probe_timeout_secs", var("PROXY_TIMEOUT"))?
            .set_override_option("database.url", var("DATABASE_URL"))?
            .set_override_option("notifications.telegram.token", var("TELEGRAM_TOKEN"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Message("Database max_connections must be greater than 0".into()));
        }

        if self.poller.check_interval_secs == 0 {
            return Err(ConfigError::Message("Poller check_interval_secs must be greater than 0".into()));
        }

        if self.poller.request_delay_min_secs > self.poller.request_delay_max_secs {
            return Err(ConfigError::Message("Poller request_delay_min_secs cannot exceed request_delay_max_secs".into()));
        }

        if self.fetcher.max_retries == 0 {
            return Err(ConfigError::Message("Fetcher max_retries must be greater than 0".into()));
        }

        if self.fetcher.timeout_secs == 0 {
            return Err(ConfigError::Message("Fetcher timeout_secs must be greater than 0".into()));
        }

        if self.fetcher.retry_delay_min_ms > self.fetcher.retry_delay_max_ms {
            return Err(ConfigError::Message("Fetcher retry_delay_min_ms cannot exceed retry_delay_max_ms".into()));
        }

        let scraper_timeouts = [
            self.scraper.listing_timeout_secs,
            self.scraper.detail_timeout_secs,
            self.scraper.title_timeout_secs,
        ];
        if scraper_timeouts.contains(&Some(0)) {
            return Err(ConfigError::Message("Scraper timeouts must be greater than 0".into()));
        }

        if self.proxy.enabled {
            if Url::parse(&self.proxy.probe_url).is_err() {
                return Err(ConfigError::Message("Invalid proxy probe_url format".into()));
            }
            if self.proxy.probe_timeout_secs == 0 {
                return Err(ConfigError::Message("Proxy probe_timeout_secs must be greater than 0".into()));
            }
        }

        if Url::parse(&self.notifications.telegram.api_base).is_err() {
            return Err(ConfigError::Message("Invalid Telegram api_base format".into()));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Message("Metrics port must be greater than 0".into()));
        }

        Ok(())
    }
}
