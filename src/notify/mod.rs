pub mod format;
pub mod queue;
pub mod telegram;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::CandidateListing;

pub use queue::NotificationQueue;
pub use telegram::TelegramClient;

/// Outbound channel for one message segment.
///
/// A transient rate limit comes back as `AppError::RateLimited(retry_after)`;
/// every other error is permanent for that segment.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Accepts new-listing alerts without blocking the caller.
pub trait Notifier: Send + Sync {
    fn send_alert(&self, listing: &CandidateListing);
}
