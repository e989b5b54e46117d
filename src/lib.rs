pub mod config;
pub mod detail_extractor;
pub mod fetcher;
pub mod listing_scraper;
pub mod models;
pub mod plugins;
pub mod proxy_pool;
pub mod query;
pub mod repository;
pub mod scheduler;
pub mod utils;
pub mod watch_manager;

// Re-export commonly used types
pub use config::AppConfig;
pub use detail_extractor::DetailExtractor;
pub use fetcher::ResilientFetcher;
pub use listing_scraper::ListingScraper;
pub use proxy_pool::ProxyPool;
pub use repository::{SeenStore, SqliteStore, WatchRepository};
pub use scheduler::{PassStats, PollEngine};
pub use utils::error::AppError;
pub use watch_manager::WatchManager;

pub type Result<T> = std::result::Result<T, AppError>;
