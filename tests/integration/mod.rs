// Integration tests for the listing watcher
// A wiremock server plays the marketplace; notifications are recorded in memory.

pub mod poll_tests;
pub mod watch_lifecycle_tests;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use listing_watcher::config::{AppConfig, DatabaseConfig, FetcherConfig, PollerConfig};
use listing_watcher::models::{NewWatch, Watch};
use listing_watcher::plugins::Notifier;
use listing_watcher::utils::error::DeliveryError;
use listing_watcher::utils::pacing::Pacer;
use listing_watcher::{
    DetailExtractor, ListingScraper, PollEngine, ProxyPool, ResilientFetcher, SqliteStore, WatchManager,
    WatchRepository,
};

/// Notifier that keeps every message it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

pub struct TestEnv {
    pub server: MockServer,
    pub store: Arc<SqliteStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: PollEngine,
    pub config: AppConfig,
    _dir: TempDir,
}

impl TestEnv {
    pub fn manager(&self) -> WatchManager {
        WatchManager::new(self.store.clone(), self.store.clone())
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    /// Registers a watch on a mock-server search path, bypassing URL validation.
    pub async fn watch(&self, subscriber: &str, search_path: &str) -> Watch {
        self.store
            .insert_watch(NewWatch {
                subscriber_id: subscriber.to_string(),
                query_url: self.url(search_path),
                title: None,
            })
            .await
            .expect("insert watch")
            .expect("watch is new")
    }
}

/// Test configuration: no pacing, one attempt per fetch, direct connections.
pub fn get_test_config(db_url: String) -> AppConfig {
    let defaults = AppConfig::default();
    AppConfig {
        database: DatabaseConfig {
            url: db_url,
            max_connections: 2,
        },
        poller: PollerConfig {
            check_interval_secs: 1,
            request_delay_min_secs: 0,
            request_delay_max_secs: 0,
            unhealthy_after: 3,
        },
        fetcher: FetcherConfig {
            max_retries: 1,
            timeout_secs: 5,
            retry_delay_min_ms: 0,
            retry_delay_max_ms: 0,
            ..defaults.fetcher.clone()
        },
        ..defaults
    }
}

pub async fn create_test_env() -> anyhow::Result<TestEnv> {
    let dir = TempDir::new()?;
    let config = get_test_config(format!("sqlite://{}", dir.path().join("watcher.db").display()));
    config.validate()?;

    let server = MockServer::start().await;
    let store = Arc::new(SqliteStore::connect(&config.database).await?);

    let pool = Arc::new(ProxyPool::new(config.proxy.clone())?);
    let fetcher = Arc::new(ResilientFetcher::new(pool, &config.proxy, config.fetcher.clone())?);
    let listings = Arc::new(ListingScraper::new(fetcher.clone(), config.scraper.clone()));
    let details = Arc::new(DetailExtractor::new(fetcher, Pacer::disabled(), config.scraper.clone()));
    let notifier = Arc::new(RecordingNotifier::default());

    let engine = PollEngine::new(
        store.clone(),
        store.clone(),
        listings,
        details,
        notifier.clone(),
        &config.poller,
    );

    Ok(TestEnv {
        server,
        store,
        notifier,
        engine,
        config,
        _dir: dir,
    })
}

/// Search results page listing `ids` as anchors on the mock server.
pub fn results_page(base: &str, ids: &[&str]) -> String {
    let anchors: String = ids
        .iter()
        .map(|id| {
            format!(
                r#"<li><a class="poly-component__title" href="{}/{}#position=1&type=item">{}</a></li>"#,
                base, id, id
            )
        })
        .collect();
    format!(
        r#"<html><body><aside><span class="ui-search-applied-filter">Publicados hoy</span></aside><ol>{}</ol></body></html>"#,
        anchors
    )
}

/// Listing detail page. `subtitle` carries the year/mileage fragment.
pub fn listing_page(title: &str, subtitle: &str) -> String {
    format!(
        r#"<html>
            <head><title>{} | MercadoLibre</title></head>
            <body>
                <p class="ui-pdp-subtitle">{}</p>
                <span class="andes-money-amount__currency-symbol">$</span>
                <span class="andes-money-amount__fraction">12.500.000</span>
                <script>{{"address":{{"city":"Rosario","neighborhood":"Centro","state":"Santa Fe"}}}}</script>
            </body>
        </html>"#,
        title, subtitle
    )
}

pub async fn mount_listing(server: &MockServer, id: &str, title: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/{}", id)))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(listing_page(title, "2018 | 85.000 km · Publicado hace 2 horas")),
        )
        .mount(server)
        .await;
}
