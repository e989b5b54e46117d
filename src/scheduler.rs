use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::PollerConfig;
use crate::detail_extractor::DetailExtractor;
use crate::listing_scraper::ListingScraper;
use crate::models::{Watch, WatchKey};
use crate::plugins::traits::Notifier;
use crate::repository::{SeenStore, WatchRepository};
use crate::utils::pacing::Pacer;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PassStats {
    pub watches_total: usize,
    pub watches_skipped: usize,
    pub watches_failed: usize,
    pub listings_found: usize,
    pub new_listings: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    pub duration_ms: u64,
    /// Pass stopped early because shutdown was requested.
    pub interrupted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub started_at: DateTime<Utc>,
    pub passes_completed: u64,
    pub notifications_sent: u64,
    pub last_pass: Option<PassStats>,
    pub last_pass_at: Option<DateTime<Utc>>,
}

/// A watch that keeps coming back empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnhealthyWatch {
    pub key: WatchKey,
    pub consecutive_empty: u32,
}

/// Drives every active watch: list, diff against seen, enrich, notify.
pub struct PollEngine {
    watches: Arc<dyn WatchRepository>,
    seen: Arc<dyn SeenStore>,
    listings: Arc<ListingScraper>,
    details: Arc<DetailExtractor>,
    notifier: Arc<dyn Notifier>,
    pacer: Pacer,
    check_interval: Duration,
    unhealthy_after: u32,
    empty_streaks: Mutex<HashMap<WatchKey, u32>>,
    stats: RwLock<EngineStats>,
}

impl PollEngine {
    pub fn new(
        watches: Arc<dyn WatchRepository>,
        seen: Arc<dyn SeenStore>,
        listings: Arc<ListingScraper>,
        details: Arc<DetailExtractor>,
        notifier: Arc<dyn Notifier>,
        config: &PollerConfig,
    ) -> Self {
        Self {
            watches,
            seen,
            listings,
            details,
            notifier,
            pacer: Pacer::from_secs(config.request_delay_min_secs, config.request_delay_max_secs),
            check_interval: config.check_interval(),
            unhealthy_after: config.unhealthy_after,
            empty_streaks: Mutex::new(HashMap::new()),
            stats: RwLock::new(EngineStats {
                started_at: Utc::now(),
                passes_completed: 0,
                notifications_sent: 0,
                last_pass: None,
                last_pass_at: None,
            }),
        }
    }

    /// Replaces the delay taken between notifications of one watch.
    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    /// Runs passes until `shutdown` fires. Returns after the current
    /// in-flight fetch completes.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            "Poll loop started, checking every {}s",
            self.check_interval.as_secs()
        );

        while !shutdown.is_cancelled() {
            let stats = self.run_pass(&shutdown).await;
            tracing::info!(
                "Pass done in {}ms: {} watches ({} paused, {} failed), {} new listings, {} sent, {} failed deliveries",
                stats.duration_ms,
                stats.watches_total,
                stats.watches_skipped,
                stats.watches_failed,
                stats.new_listings,
                stats.notifications_sent,
                stats.notifications_failed
            );

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.check_interval) => {}
            }
        }

        tracing::info!("Poll loop stopped");
    }

    /// One sweep over every watch. Never fails; problems are counted and logged.
    pub async fn run_pass(&self, shutdown: &CancellationToken) -> PassStats {
        let started = Instant::now();
        let mut stats = PassStats::default();

        let watches = match self.watches.all_watches().await {
            Ok(watches) => watches,
            Err(e) => {
                tracing::error!("Failed to load watches: {}", e);
                stats.duration_ms = started.elapsed().as_millis() as u64;
                return stats;
            }
        };
        stats.watches_total = watches.len();
        self.forget_removed(&watches).await;

        for watch in &watches {
            if shutdown.is_cancelled() {
                stats.interrupted = true;
                break;
            }

            match self.watches.is_running(&watch.subscriber_id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!("Subscriber {} is paused, skipping {}", watch.subscriber_id, watch.query_url);
                    stats.watches_skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!("Watch {} failed: {}", watch.key(), e);
                    metrics::counter!("watcher_watch_errors_total").increment(1);
                    stats.watches_failed += 1;
                    continue;
                }
            }

            if !self.check_watch(watch, shutdown, &mut stats).await {
                stats.interrupted = true;
                break;
            }
        }

        stats.duration_ms = started.elapsed().as_millis() as u64;
        metrics::counter!("watcher_passes_total").increment(1);

        let mut engine = self.stats.write().await;
        engine.passes_completed += 1;
        engine.notifications_sent += stats.notifications_sent as u64;
        engine.last_pass = Some(stats.clone());
        engine.last_pass_at = Some(Utc::now());

        stats
    }

    /// Returns `false` when shutdown interrupted the watch.
    async fn check_watch(&self, watch: &Watch, shutdown: &CancellationToken, stats: &mut PassStats) -> bool {
        let listings = self.listings.list(&watch.query_url).await;
        self.record_health(watch, listings.is_empty()).await;
        stats.listings_found += listings.len();

        for listing in listings {
            if shutdown.is_cancelled() {
                return false;
            }

            // Marking first makes the seen check atomic and keeps a failed
            // delivery from being retried as a duplicate next pass.
            match self.seen.mark_seen(&watch.subscriber_id, &watch.query_url, &listing).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!("Ad already seen: {}", listing);
                    continue;
                }
                Err(e) => {
                    tracing::error!("Could not record {} for {}: {}", listing, watch.key(), e);
                    continue;
                }
            }
            stats.new_listings += 1;

            let detail = self.details.detail(&listing).await;
            match self.notifier.send(&watch.subscriber_id, &detail.render_message()).await {
                Ok(()) => {
                    stats.notifications_sent += 1;
                    metrics::counter!("watcher_notifications_sent_total").increment(1);
                }
                Err(e) => {
                    tracing::warn!("Failed to notify {} about {}: {}", watch.subscriber_id, listing, e);
                    stats.notifications_failed += 1;
                    metrics::counter!("watcher_notifications_failed_total").increment(1);
                }
            }

            if !self.pacer.pause_or_cancel(shutdown).await {
                return false;
            }
        }

        true
    }

    async fn record_health(&self, watch: &Watch, empty: bool) {
        let mut streaks = self.empty_streaks.lock().await;
        if !empty {
            streaks.remove(&watch.key());
            return;
        }

        let streak = streaks.entry(watch.key()).or_insert(0);
        *streak += 1;
        if self.unhealthy_after > 0 && *streak == self.unhealthy_after {
            tracing::warn!(
                "Watch {} returned no listings for {} consecutive checks",
                watch.key(),
                streak
            );
            metrics::counter!("watcher_unhealthy_watches_total").increment(1);
        }
    }

    async fn forget_removed(&self, watches: &[Watch]) {
        let live: HashSet<WatchKey> = watches.iter().map(Watch::key).collect();
        self.empty_streaks.lock().await.retain(|key, _| live.contains(key));
    }

    /// Watches whose empty streak reached the configured threshold.
    pub async fn unhealthy_watches(&self) -> Vec<UnhealthyWatch> {
        if self.unhealthy_after == 0 {
            return Vec::new();
        }
        let streaks = self.empty_streaks.lock().await;
        let mut unhealthy: Vec<UnhealthyWatch> = streaks
            .iter()
            .filter(|(_, count)| **count >= self.unhealthy_after)
            .map(|(key, count)| UnhealthyWatch {
                key: key.clone(),
                consecutive_empty: *count,
            })
            .collect();
        unhealthy.sort_by(|a, b| a.key.subscriber_id.cmp(&b.key.subscriber_id).then(a.key.query_url.cmp(&b.key.query_url)));
        unhealthy
    }

    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }
}
