use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Redelivery with exponential backoff
// ============================================================================
//
// Stands in for the broker's redelivery of a consumed event: the dispatcher
// hands an event to the coordinator again while the failure is transient,
// waiting a little longer each time. Permanent failures are not retried.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RedeliveryPolicy {
    /// Total deliveries, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RedeliveryPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        let next = Duration::from_millis(((current.as_millis() as f64) * self.multiplier) as u64);
        next.min(self.max_delay)
    }
}

/// How a redelivered operation ended
#[derive(Debug)]
pub enum Delivery<T, E> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { error: E, attempts: u32 },
    Permanent { error: E, attempts: u32 },
}

impl<T, E> Delivery<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Delivery::Succeeded { attempts, .. }
            | Delivery::Exhausted { attempts, .. }
            | Delivery::Permanent { attempts, .. } => *attempts,
        }
    }
}

/// Errors that say whether trying again could help
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

pub async fn redeliver<F, Fut, T, E>(policy: &RedeliveryPolicy, mut operation: F) -> Delivery<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    let mut attempt = 0;
    let mut delay = policy.initial_delay;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Delivery succeeded after redelivery");
                }
                return Delivery::Succeeded { value, attempts: attempt };
            }
            Err(error) if !error.is_transient() => {
                tracing::warn!(attempt, error = %error, "Permanent failure, not redelivering");
                return Delivery::Permanent { error, attempts: attempt };
            }
            Err(error) if attempt >= policy.max_attempts.max(1) => {
                tracing::error!(attempt, error = %error, "Giving up after all redeliveries");
                return Delivery::Exhausted { error, attempts: attempt };
            }
            Err(error) => {
                tracing::warn!(
                    attempt,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, redelivering after delay"
                );
                sleep(delay).await;
                delay = policy.next_delay(delay);
            }
        }
    }
}
