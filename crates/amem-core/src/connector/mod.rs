//! Resilient connector: every backend call goes through here.
//!
//! Execution controls per call:
//! - circuit breaker check (an open circuit rejects without calling)
//! - per-attempt timeout
//! - retry of transient failures with capped exponential backoff
//!
//! A non-transient error (bad query, conflict, missing row) proves the
//! backend answered, so it is returned as-is and counts as a success for
//! the breaker and for monitoring.

mod breaker;

pub use breaker::{Admission, BreakerSnapshot, CircuitBreaker, CircuitState, Transition};

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use graph_state::{StorageError, StorageResult};
use tokio::time::Instant;
use tracing::debug;

use crate::config::ConnectorConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::metrics::METRICS;
use crate::monitor::{Monitor, OperationKind};
use crate::obs;

#[derive(Debug)]
pub struct ResilientConnector {
    config: ConnectorConfig,
    breaker: Mutex<CircuitBreaker>,
    monitor: Arc<Monitor>,
}

impl ResilientConnector {
    pub fn new(config: ConnectorConfig, monitor: Arc<Monitor>) -> Self {
        Self {
            breaker: Mutex::new(CircuitBreaker::from_config(&config)),
            config,
            monitor,
        }
    }

    fn breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.breaker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn state(&self) -> CircuitState {
        self.breaker().state()
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        self.breaker().snapshot()
    }

    /// Force the circuit closed (operator action).
    pub fn reset(&self) {
        let transition = self.breaker().reset();
        self.report(transition);
    }

    /// Run `op` under the breaker, timeout and retry controls.
    ///
    /// `op` is invoked once per attempt, so it must be safe to repeat.
    pub async fn call<T, F, Fut>(&self, kind: OperationKind, op: F) -> MemoryResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let admission = self.breaker().admit(Instant::now());
        match admission {
            Admission::Rejected { retry_in } => {
                METRICS.inc_circuit_rejections();
                obs::emit_call_rejected(kind, retry_in);
                return Err(MemoryError::CircuitOpen { retry_in });
            }
            Admission::Allowed { transition } => self.report(transition),
        }

        let started = Instant::now();
        let attempt_timeout = self.config.attempt_timeout();
        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0;

        let outcome = loop {
            attempt += 1;
            METRICS.inc_backend_calls();

            let err = match tokio::time::timeout(attempt_timeout, op()).await {
                Ok(Ok(value)) => break Ok(value),
                Ok(Err(err)) => err,
                Err(_elapsed) => StorageError::Timeout(format!(
                    "{} attempt {} exceeded {:?}",
                    kind, attempt, attempt_timeout
                )),
            };

            if !err.is_transient() || attempt >= max_attempts {
                break Err(err);
            }

            METRICS.inc_retries();
            let delay = self.config.backoff(attempt);
            debug!(
                kind = %kind,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying transient backend failure"
            );
            tokio::time::sleep(delay).await;
        };

        let reached_backend = match &outcome {
            Ok(_) => true,
            Err(err) => !err.is_transient(),
        };

        let transition = {
            let mut breaker = self.breaker();
            if reached_backend {
                breaker.record_success()
            } else {
                breaker.record_failure(Instant::now())
            }
        };
        self.report(transition);

        if !reached_backend {
            METRICS.inc_backend_failures();
        }
        self.monitor
            .record_operation(kind, started.elapsed(), reached_backend);

        outcome.map_err(MemoryError::from)
    }

    fn report(&self, transition: Option<Transition>) {
        if let Some(Transition { from, to }) = transition {
            if to == CircuitState::Open {
                METRICS.inc_circuit_opens();
            }
            self.monitor.record_transition(from, to);
            obs::emit_circuit_transition(from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn connector(config: ConnectorConfig) -> ResilientConnector {
        ResilientConnector::new(config, Arc::new(Monitor::default()))
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let c = connector(ConnectorConfig::default());
        let value = c
            .call(OperationKind::Ping, || async { Ok::<_, StorageError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(c.state(), CircuitState::Closed);
        assert_eq!(c.monitor().sample_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_then_succeeds() {
        let c = connector(ConnectorConfig::default());
        let calls = AtomicU32::new(0);

        let value = c
            .call(OperationKind::Ping, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StorageError::Connection("refused".into()))
                    } else {
                        Ok("up")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "up");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(c.snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_non_transient_error_not_retried() {
        let c = connector(ConnectorConfig::default());
        let calls = AtomicU32::new(0);

        let err = c
            .call(OperationKind::InsertRecord, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StorageError::Conflict("dup".into())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, MemoryError::Conflict(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.snapshot().consecutive_failures, 0);
        assert_eq!(c.monitor().get_health().recent_failure_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let c = connector(ConnectorConfig {
            max_retries: 1,
            ..ConnectorConfig::default()
        });
        let calls = AtomicU32::new(0);

        let err = c
            .call(OperationKind::QueryRecords, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, StorageError>(())
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, MemoryError::Timeout(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(c.snapshot().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_open_circuit() {
        let c = connector(ConnectorConfig {
            failure_threshold: 1,
            max_retries: 0,
            ..ConnectorConfig::default()
        });
        let _ = c
            .call(OperationKind::Ping, || async {
                Err::<(), _>(StorageError::Connection("down".into()))
            })
            .await;
        assert_eq!(c.state(), CircuitState::Open);

        c.reset();
        assert_eq!(c.state(), CircuitState::Closed);
        assert_eq!(c.monitor().get_health().circuit_state, CircuitState::Closed);
    }
}
