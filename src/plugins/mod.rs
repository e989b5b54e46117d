pub mod notifiers;
pub mod traits;

pub use notifiers::{LogNotifier, TelegramNotifier};
pub use traits::Notifier;
