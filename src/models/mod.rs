pub mod listing;
pub mod proxy;
pub mod watch;

// Re-exports for convenience
pub use listing::*;
pub use proxy::*;
pub use watch::*;
