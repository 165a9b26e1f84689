//! Bounded retry-with-sleep polling.
//!
//! All waits on asynchronous external state (identifier files, HTTP
//! readiness) go through [`RetryPolicy::poll`] or [`RetryPolicy::poll_value`].
//! There is no unbounded wait anywhere in the harness.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Maximum attempts and the sleep between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of times the condition is evaluated. Zero is treated as one.
    pub max_attempts: u32,
    /// Sleep between consecutive attempts.
    #[serde(with = "millis")]
    pub interval: Duration,
}

impl RetryPolicy {
    /// Waiting for a container identifier file.
    pub const READINESS: Self = Self::new(10, Duration::from_secs(1));

    /// Waiting for an HTTP 200.
    pub const HTTP: Self = Self::new(30, Duration::from_secs(1));

    /// A single attempt, no sleeping.
    pub const ONCE: Self = Self::new(1, Duration::ZERO);

    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Upper bound of time spent sleeping between attempts.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts.max(1).saturating_sub(1)
    }

    /// Evaluates `condition` until it returns true or attempts run out.
    pub async fn poll<F, Fut>(&self, mut condition: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        self.poll_value(|| {
            let fut = condition();
            async move { fut.await.then_some(()) }
        })
        .await
        .is_some()
    }

    /// Evaluates `condition` until it yields a value or attempts run out.
    pub async fn poll_value<T, F, Fut>(&self, mut condition: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let attempts = self.max_attempts.max(1);

        for attempt in 1..=attempts {
            if let Some(value) = condition().await {
                tracing::trace!(attempt, "condition satisfied");
                return Some(value);
            }

            if attempt < attempts {
                tracing::trace!(attempt, max = attempts, "condition not met, sleeping");
                tokio::time::sleep(self.interval).await;
            }
        }

        tracing::debug!(attempts, "condition not met after all attempts");
        None
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::READINESS
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
