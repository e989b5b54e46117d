use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Randomised delay between requests to the marketplace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacer {
    min: Duration,
    max: Duration,
}

impl Pacer {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn from_secs(min: u64, max: u64) -> Self {
        Self::new(Duration::from_secs(min), Duration::from_secs(max))
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Uniform sample in `[min, max]`.
    pub fn next_delay(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let millis = rand::rng().random_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(millis as u64)
    }

    pub async fn pause(&self) {
        let delay = self.next_delay();
        if delay.is_zero() {
            return;
        }
        tracing::debug!("Pacing for {:.2}s", delay.as_secs_f64());
        tokio::time::sleep(delay).await;
    }

    /// Like `pause`, but returns `false` if the token fired first.
    pub async fn pause_or_cancel(&self, shutdown: &CancellationToken) -> bool {
        let delay = self.next_delay();
        if delay.is_zero() {
            return !shutdown.is_cancelled();
        }
        tracing::debug!("Pacing for {:.2}s", delay.as_secs_f64());
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
