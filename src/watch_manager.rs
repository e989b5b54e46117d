use std::sync::Arc;

use crate::detail_extractor::DetailExtractor;
use crate::models::{AddOutcome, NewWatch, RemoveOutcome, Watch};
use crate::query::{ensure_freshness_filter, is_supported_query};
use crate::repository::{SeenStore, WatchRepository};
use crate::utils::error::{AppError, Result};

/// Mutation surface for whatever talks to subscribers (chat bot, CLI).
pub struct WatchManager {
    watches: Arc<dyn WatchRepository>,
    seen: Arc<dyn SeenStore>,
    titles: Option<Arc<DetailExtractor>>,
}

impl WatchManager {
    pub fn new(watches: Arc<dyn WatchRepository>, seen: Arc<dyn SeenStore>) -> Self {
        Self {
            watches,
            seen,
            titles: None,
        }
    }

    /// Look up page titles for new watches.
    pub fn with_titles(mut self, extractor: Arc<DetailExtractor>) -> Self {
        self.titles = Some(extractor);
        self
    }

    pub async fn add(&self, subscriber_id: &str, query_url: &str) -> Result<AddOutcome> {
        let query_url = query_url.trim();
        if !is_supported_query(query_url) {
            return Ok(AddOutcome::Invalid(format!("unsupported search URL: {}", query_url)));
        }

        let normalized = match ensure_freshness_filter(query_url) {
            Ok(url) => url,
            Err(AppError::Validation(reason)) => return Ok(AddOutcome::Invalid(reason)),
            Err(e) => return Err(e),
        };

        if self.watches.find_watch(subscriber_id, &normalized).await?.is_some() {
            return Ok(AddOutcome::AlreadyExists);
        }

        let title = match &self.titles {
            Some(extractor) => Some(extractor.page_title(&normalized).await),
            None => None,
        };

        let new_watch = NewWatch {
            subscriber_id: subscriber_id.to_string(),
            query_url: normalized,
            title,
        };

        match self.watches.insert_watch(new_watch).await? {
            Some(watch) => {
                tracing::info!("Subscriber {} now watching {}", subscriber_id, watch.query_url);
                metrics::counter!("watcher_watches_added_total").increment(1);
                Ok(AddOutcome::Added(watch))
            }
            // Lost a race with a concurrent add of the same URL.
            None => Ok(AddOutcome::AlreadyExists),
        }
    }

    /// One URL per line; blank lines are ignored. A subscriber with no
    /// watches before the message is set running, whatever the outcomes.
    pub async fn add_many(&self, subscriber_id: &str, text: &str) -> Result<Vec<(String, AddOutcome)>> {
        let first_message = self.watches.watches_for(subscriber_id).await?.is_empty();

        let mut outcomes = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let outcome = self.add(subscriber_id, line).await?;
            outcomes.push((line.to_string(), outcome));
        }

        if first_message {
            self.watches.set_running(subscriber_id, true).await?;
        }
        Ok(outcomes)
    }

    /// Accepts the URL as the user typed it; it is normalized before lookup.
    pub async fn remove(&self, subscriber_id: &str, query_url: &str) -> Result<RemoveOutcome> {
        let Ok(normalized) = ensure_freshness_filter(query_url) else {
            return Ok(RemoveOutcome::NotFound);
        };

        if self.watches.remove_watch(subscriber_id, &normalized).await? {
            tracing::info!("Subscriber {} stopped watching {}", subscriber_id, normalized);
            Ok(RemoveOutcome::Removed)
        } else {
            Ok(RemoveOutcome::NotFound)
        }
    }

    pub async fn pause(&self, subscriber_id: &str) -> Result<()> {
        self.watches.set_running(subscriber_id, false).await?;
        tracing::info!("Paused subscriber {}", subscriber_id);
        Ok(())
    }

    pub async fn resume(&self, subscriber_id: &str) -> Result<()> {
        self.watches.set_running(subscriber_id, true).await?;
        tracing::info!("Resumed subscriber {}", subscriber_id);
        Ok(())
    }

    pub async fn clear_seen(&self, subscriber_id: &str) -> Result<u64> {
        let cleared = self.seen.clear_seen(subscriber_id).await?;
        tracing::info!("Cleared {} seen listings for subscriber {}", cleared, subscriber_id);
        Ok(cleared)
    }

    pub async fn list(&self, subscriber_id: &str) -> Result<Vec<Watch>> {
        self.watches.watches_for(subscriber_id).await
    }

    pub async fn is_running(&self, subscriber_id: &str) -> Result<bool> {
        self.watches.is_running(subscriber_id).await
    }

    /// Re-fetches and stores the cached title. `None` without a title source.
    pub async fn refresh_title(&self, subscriber_id: &str, query_url: &str) -> Result<Option<String>> {
        let Some(extractor) = &self.titles else {
            return Ok(None);
        };
        let normalized = ensure_freshness_filter(query_url)?;
        let watch = self
            .watches
            .find_watch(subscriber_id, &normalized)
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource: format!("watch {} @ {}", subscriber_id, normalized),
            })?;

        let title = extractor.page_title(&watch.query_url).await;
        self.watches.update_title(watch.id, &title).await?;
        Ok(Some(title))
    }
}
