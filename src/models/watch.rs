use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A saved search followed by one subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Watch {
    pub id: i64,
    pub subscriber_id: String,
    /// Normalized search URL (canonical host, same-day filter applied).
    pub query_url: String,
    /// Cached page title, best-effort.
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWatch {
    pub subscriber_id: String,
    pub query_url: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct RunState {
    pub subscriber_id: String,
    pub running: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct SeenEntry {
    pub id: i64,
    pub subscriber_id: String,
    pub query_url: String,
    pub listing_id: String,
    pub seen_at: DateTime<Utc>,
}

impl Watch {
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => &self.query_url,
        }
    }

    pub fn key(&self) -> WatchKey {
        WatchKey {
            subscriber_id: self.subscriber_id.clone(),
            query_url: self.query_url.clone(),
        }
    }
}

/// Composite identity of a watch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchKey {
    pub subscriber_id: String,
    pub query_url: String,
}

impl std::fmt::Display for WatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.subscriber_id, self.query_url)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    Added(Watch),
    AlreadyExists,
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}
