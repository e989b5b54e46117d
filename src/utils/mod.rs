pub mod error;
pub mod pacing;

pub use error::{AppError, DeliveryError, FetchError, Result};
pub use pacing::Pacer;
