use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use listing_watcher::config::AppConfig;
use listing_watcher::models::{AddOutcome, RemoveOutcome};
use listing_watcher::plugins::{LogNotifier, Notifier, TelegramNotifier};
use listing_watcher::utils::pacing::Pacer;
use listing_watcher::{
    DetailExtractor, ListingScraper, PollEngine, ProxyPool, ResilientFetcher, SqliteStore, WatchManager,
};

#[derive(Parser)]
#[command(name = "listing-watcher", version, about = "Watches marketplace searches and notifies about new listings")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll every watch until interrupted
    Run,
    /// Run a single pass and print its stats
    Once,
    /// Manage a subscriber's watches
    Watch {
        #[command(subcommand)]
        action: WatchAction,
    },
    /// Stop notifications for a subscriber
    Pause { subscriber: String },
    /// Resume notifications for a subscriber
    Resume { subscriber: String },
    /// Forget every listing already sent to a subscriber
    ClearSeen { subscriber: String },
    /// Show the proxy pool and try one fetch through it
    ProxyStatus,
}

#[derive(Subcommand)]
enum WatchAction {
    Add {
        subscriber: String,
        #[arg(required = true)]
        urls: Vec<String>,
    },
    Remove { subscriber: String, url: String },
    List { subscriber: String },
}

/// Everything a command may need, built once from config.
struct App {
    config: AppConfig,
    store: Arc<SqliteStore>,
    pool: Arc<ProxyPool>,
    fetcher: Arc<ResilientFetcher>,
    details: Arc<DetailExtractor>,
}

impl App {
    async fn build(config: AppConfig) -> Result<Self> {
        let store = Arc::new(
            SqliteStore::connect(&config.database)
                .await
                .context("failed to open database")?,
        );
        let pool = Arc::new(ProxyPool::new(config.proxy.clone())?);
        let fetcher = Arc::new(ResilientFetcher::new(pool.clone(), &config.proxy, config.fetcher.clone())?);
        let pacer = Pacer::from_secs(config.poller.request_delay_min_secs, config.poller.request_delay_max_secs);
        let details = Arc::new(DetailExtractor::new(fetcher.clone(), pacer, config.scraper.clone()));

        Ok(Self {
            config,
            store,
            pool,
            fetcher,
            details,
        })
    }

    fn manager(&self) -> WatchManager {
        WatchManager::new(self.store.clone(), self.store.clone()).with_titles(self.details.clone())
    }

    fn notifier(&self) -> Arc<dyn Notifier> {
        let telegram = TelegramNotifier::new(&self.config.notifications.telegram);
        if telegram.is_configured() {
            Arc::new(telegram)
        } else {
            tracing::warn!("No Telegram token configured, notifications go to the log");
            Arc::new(LogNotifier)
        }
    }

    fn engine(&self) -> PollEngine {
        let listings = Arc::new(ListingScraper::new(self.fetcher.clone(), self.config.scraper.clone()));
        PollEngine::new(
            self.store.clone(),
            self.store.clone(),
            listings,
            self.details.clone(),
            self.notifier(),
            &self.config.poller,
        )
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let _guard = match init_tracing() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = execute(cli.command).await {
        tracing::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() -> Result<WorkerGuard> {
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("watcher")
        .filename_suffix("log")
        .max_log_files(3)
        .build("logs")
        .context("failed to create log directory")?;
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("listing_watcher=info"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    Ok(guard)
}

async fn execute(command: Command) -> Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;

    if config.metrics.enabled {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.metrics.port))
            .install()
            .context("failed to start metrics exporter")?;
        info!("Metrics available on port {}", config.metrics.port);
    }

    let app = App::build(config).await?;

    match command {
        Command::Run => {
            info!("Starting listing watcher...");
            let engine = Arc::new(app.engine());
            let shutdown = CancellationToken::new();

            tokio::spawn(wait_for_shutdown(shutdown.clone()));
            let handle = tokio::spawn({
                let engine = engine.clone();
                async move { engine.run(shutdown).await }
            });
            handle.await.context("poll loop panicked")?;

            let stats = engine.stats().await;
            info!("Shutting down after {} passes", stats.passes_completed);
        }
        Command::Once => {
            let engine = app.engine();
            let stats = engine.run_pass(&CancellationToken::new()).await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            for watch in engine.unhealthy_watches().await {
                println!("unhealthy: {} ({} empty checks)", watch.key, watch.consecutive_empty);
            }
        }
        Command::Watch { action } => run_watch_action(&app, action).await?,
        Command::Pause { subscriber } => {
            app.manager().pause(&subscriber).await?;
            println!("Paused notifications for {}", subscriber);
        }
        Command::Resume { subscriber } => {
            app.manager().resume(&subscriber).await?;
            println!("Resumed notifications for {}", subscriber);
        }
        Command::ClearSeen { subscriber } => {
            let cleared = app.manager().clear_seen(&subscriber).await?;
            println!("Cleared {} seen listings for {}", cleared, subscriber);
        }
        Command::ProxyStatus => proxy_status(&app).await?,
    }

    Ok(())
}

async fn run_watch_action(app: &App, action: WatchAction) -> Result<()> {
    let manager = app.manager();
    match action {
        WatchAction::Add { subscriber, urls } => {
            let outcomes = manager.add_many(&subscriber, &urls.join("\n")).await?;
            for (url, outcome) in outcomes {
                match outcome {
                    AddOutcome::Added(watch) => println!("added: {} ({})", watch.query_url, watch.display_title()),
                    AddOutcome::AlreadyExists => println!("already watching: {}", url),
                    AddOutcome::Invalid(reason) => println!("invalid: {} ({})", url, reason),
                }
            }
        }
        WatchAction::Remove { subscriber, url } => match manager.remove(&subscriber, &url).await? {
            RemoveOutcome::Removed => println!("removed: {}", url),
            RemoveOutcome::NotFound => println!("not watching: {}", url),
        },
        WatchAction::List { subscriber } => {
            let running = manager.is_running(&subscriber).await?;
            let watches = manager.list(&subscriber).await?;
            println!("{} ({})", subscriber, if running { "running" } else { "paused" });
            if watches.is_empty() {
                println!("  no watches");
            }
            for (i, watch) in watches.iter().enumerate() {
                println!("  {}. {}\n     {}", i + 1, watch.display_title(), watch.query_url);
            }
        }
    }
    Ok(())
}

async fn proxy_status(app: &App) -> Result<()> {
    app.pool.refresh().await;
    let status = app.pool.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    let probe = &app.config.proxy.probe_url;
    let headers = ResilientFetcher::browser_headers(&app.config.scraper.accept_language);
    match app.fetcher.get(probe, &headers, app.config.fetcher.timeout()).await {
        Ok(page) => println!("probe {}: HTTP {}", probe, page.status),
        Err(e) => println!("probe {}: {}", probe, e),
    }
    Ok(())
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown requested, finishing current fetch...");
    shutdown.cancel();
}
