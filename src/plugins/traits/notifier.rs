use async_trait::async_trait;

use crate::utils::error::DeliveryError;

/// Outbound message transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError>;
}
