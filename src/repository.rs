use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::models::{NewWatch, Watch};
use crate::utils::error::Result;

/// Watches and per-subscriber run state.
#[async_trait]
pub trait WatchRepository: Send + Sync {
    /// `None` when the subscriber already follows this URL. Adding a
    /// subscriber's first watch also marks them running.
    async fn insert_watch(&self, watch: NewWatch) -> Result<Option<Watch>>;

    /// Deletes the watch and its seen entries in one transaction.
    async fn remove_watch(&self, subscriber_id: &str, query_url: &str) -> Result<bool>;

    async fn find_watch(&self, subscriber_id: &str, query_url: &str) -> Result<Option<Watch>>;

    async fn watches_for(&self, subscriber_id: &str) -> Result<Vec<Watch>>;

    /// Every watch, in insertion order.
    async fn all_watches(&self) -> Result<Vec<Watch>>;

    async fn update_title(&self, watch_id: i64, title: &str) -> Result<bool>;

    async fn set_running(&self, subscriber_id: &str, running: bool) -> Result<()>;

    /// Subscribers with no run state yet are running.
    async fn is_running(&self, subscriber_id: &str) -> Result<bool>;
}

/// Listings already notified, scoped per watch.
#[async_trait]
pub trait SeenStore: Send + Sync {
    /// Insert-if-absent. Returns `true` only for the call that inserted.
    async fn mark_seen(&self, subscriber_id: &str, query_url: &str, listing_id: &str) -> Result<bool>;

    async fn is_seen(&self, subscriber_id: &str, query_url: &str, listing_id: &str) -> Result<bool>;

    /// Drops every seen entry of the subscriber, across all their watches.
    async fn clear_seen(&self, subscriber_id: &str) -> Result<u64>;

    async fn seen_count(&self, subscriber_id: &str, query_url: &str) -> Result<i64>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database in WAL mode and applies migrations.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database ready at {}", config.url);

        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl WatchRepository for SqliteStore {
    async fn insert_watch(&self, watch: NewWatch) -> Result<Option<Watch>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO watches (subscriber_id, query_url, title, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT (subscriber_id, query_url) DO NOTHING",
        )
        .bind(&watch.subscriber_id)
        .bind(&watch.query_url)
        .bind(&watch.title)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = sqlx::query_as::<_, Watch>(
            "SELECT id, subscriber_id, query_url, title, created_at FROM watches WHERE id = ?",
        )
        .bind(inserted.last_insert_rowid())
        .fetch_one(&mut *tx)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM watches WHERE subscriber_id = ?")
            .bind(&watch.subscriber_id)
            .fetch_one(&mut *tx)
            .await?;

        if total == 1 {
            sqlx::query(
                "INSERT INTO run_state (subscriber_id, running, updated_at) VALUES (?, 1, ?)
                 ON CONFLICT (subscriber_id) DO UPDATE SET running = 1, updated_at = excluded.updated_at",
            )
            .bind(&watch.subscriber_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(row))
    }

    async fn remove_watch(&self, subscriber_id: &str, query_url: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let seen = sqlx::query("DELETE FROM seen_listings WHERE subscriber_id = ? AND query_url = ?")
            .bind(subscriber_id)
            .bind(query_url)
            .execute(&mut *tx)
            .await?;

        let removed = sqlx::query("DELETE FROM watches WHERE subscriber_id = ? AND query_url = ?")
            .bind(subscriber_id)
            .bind(query_url)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(
            "Removed watch {} @ {} ({} seen entries)",
            subscriber_id,
            query_url,
            seen.rows_affected()
        );
        Ok(removed.rows_affected() > 0)
    }

    async fn find_watch(&self, subscriber_id: &str, query_url: &str) -> Result<Option<Watch>> {
        let watch = sqlx::query_as::<_, Watch>(
            "SELECT id, subscriber_id, query_url, title, created_at FROM watches
             WHERE subscriber_id = ? AND query_url = ?",
        )
        .bind(subscriber_id)
        .bind(query_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(watch)
    }

    async fn watches_for(&self, subscriber_id: &str) -> Result<Vec<Watch>> {
        let watches = sqlx::query_as::<_, Watch>(
            "SELECT id, subscriber_id, query_url, title, created_at FROM watches
             WHERE subscriber_id = ? ORDER BY id",
        )
        .bind(subscriber_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(watches)
    }

    async fn all_watches(&self) -> Result<Vec<Watch>> {
        let watches = sqlx::query_as::<_, Watch>(
            "SELECT id, subscriber_id, query_url, title, created_at FROM watches ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(watches)
    }

    async fn update_title(&self, watch_id: i64, title: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE watches SET title = ? WHERE id = ?")
            .bind(title)
            .bind(watch_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_running(&self, subscriber_id: &str, running: bool) -> Result<()> {
        sqlx::query(
            "INSERT INTO run_state (subscriber_id, running, updated_at) VALUES (?, ?, ?)
             ON CONFLICT (subscriber_id) DO UPDATE SET running = excluded.running, updated_at = excluded.updated_at",
        )
        .bind(subscriber_id)
        .bind(running)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_running(&self, subscriber_id: &str) -> Result<bool> {
        let running: Option<bool> = sqlx::query_scalar("SELECT running FROM run_state WHERE subscriber_id = ?")
            .bind(subscriber_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(running.unwrap_or(true))
    }
}

#[async_trait]
impl SeenStore for SqliteStore {
    async fn mark_seen(&self, subscriber_id: &str, query_url: &str, listing_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO seen_listings (subscriber_id, query_url, listing_id, seen_at) VALUES (?, ?, ?, ?)
             ON CONFLICT (subscriber_id, query_url, listing_id) DO NOTHING",
        )
        .bind(subscriber_id)
        .bind(query_url)
        .bind(listing_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_seen(&self, subscriber_id: &str, query_url: &str, listing_id: &str) -> Result<bool> {
        let seen: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM seen_listings WHERE subscriber_id = ? AND query_url = ? AND listing_id = ?)",
        )
        .bind(subscriber_id)
        .bind(query_url)
        .bind(listing_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(seen)
    }

    async fn clear_seen(&self, subscriber_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM seen_listings WHERE subscriber_id = ?")
            .bind(subscriber_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn seen_count(&self, subscriber_id: &str, query_url: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM seen_listings WHERE subscriber_id = ? AND query_url = ?")
                .bind(subscriber_id)
                .bind(query_url)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
