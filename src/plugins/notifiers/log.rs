use async_trait::async_trait;

use crate::plugins::traits::Notifier;
use crate::utils::error::DeliveryError;

/// Writes messages to the log instead of delivering them. Used for dry runs.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
        tracing::info!(chat_id, "Notification:\n{}", text);
        Ok(())
    }
}
