use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker for the broker producer
// ============================================================================
//
// Closed   - publishes go through
// Open     - publishes fail fast until `open_for` has elapsed
// HalfOpen - probing; `close_after` successes close it, one failure reopens
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding used by the metrics module
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    pub trip_after: u32,
    pub open_for: Duration,
    pub close_after: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            trip_after: 5,
            open_for: Duration::from_secs(30),
            close_after: 3,
        }
    }
}

#[derive(Debug)]
struct Counters {
    state: CircuitState,
    consecutive_failures: u32,
    probe_successes: u32,
    opened_at: Option<Instant>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    counters: Arc<Mutex<Counters>>,
    config: CircuitBreakerConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open")]
    CircuitOpen,
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            counters: Arc::new(Mutex::new(Counters {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                probe_successes: 0,
                opened_at: None,
            })),
            config,
        }
    }

    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.admit().await?;

        match operation.await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(err) => {
                self.on_failure().await;
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    async fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut counters = self.counters.lock().await;
        if counters.state != CircuitState::Open {
            return Ok(());
        }

        let cooled_down = counters
            .opened_at
            .map(|at| at.elapsed() >= self.config.open_for)
            .unwrap_or(true);

        if cooled_down {
            tracing::info!("Circuit breaker half-open, probing broker");
            counters.state = CircuitState::HalfOpen;
            counters.probe_successes = 0;
            Ok(())
        } else {
            Err(CircuitBreakerError::CircuitOpen)
        }
    }

    async fn on_success(&self) {
        let mut counters = self.counters.lock().await;
        counters.consecutive_failures = 0;

        if counters.state == CircuitState::HalfOpen {
            counters.probe_successes += 1;
            if counters.probe_successes >= self.config.close_after {
                tracing::info!(probes = counters.probe_successes, "Circuit breaker closed");
                counters.state = CircuitState::Closed;
                counters.probe_successes = 0;
                counters.opened_at = None;
            }
        }
    }

    async fn on_failure(&self) {
        let mut counters = self.counters.lock().await;
        counters.consecutive_failures += 1;

        let trip = match counters.state {
            CircuitState::Closed => counters.consecutive_failures >= self.config.trip_after,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if trip {
            tracing::warn!(
                failures = counters.consecutive_failures,
                "Circuit breaker opened"
            );
            counters.state = CircuitState::Open;
            counters.opened_at = Some(Instant::now());
            counters.probe_successes = 0;
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.counters.lock().await.state
    }
}
