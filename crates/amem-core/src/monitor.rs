//! Operation monitoring
//!
//! A bounded ring buffer of recent backend call outcomes plus the last
//! known circuit state. Recording never fails; reading is a pure view.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::connector::CircuitState;

/// Backend operation classes, one per connector call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Ping,
    AgentType,
    InsertRecord,
    GetRecord,
    QueryRecords,
    Invalidate,
    UpdateQuality,
    DecaySweep,
    Edge,
    Pattern,
    Occurrence,
    Stats,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::AgentType => "agent_type",
            Self::InsertRecord => "insert_record",
            Self::GetRecord => "get_record",
            Self::QueryRecords => "query_records",
            Self::Invalidate => "invalidate",
            Self::UpdateQuality => "update_quality",
            Self::DecaySweep => "decay_sweep",
            Self::Edge => "edge",
            Self::Pattern => "pattern",
            Self::Occurrence => "occurrence",
            Self::Stats => "stats",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Failed fraction of the samples in the window (0 with no samples)
    pub recent_failure_rate: f64,
    pub circuit_state: CircuitState,
    pub samples: usize,
}

/// Aggregates for one operation kind over the current window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub kind: OperationKind,
    pub count: usize,
    pub failures: usize,
    pub mean_duration_ms: f64,
    pub max_duration_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    kind: OperationKind,
    duration: Duration,
    success: bool,
}

#[derive(Debug)]
struct MonitorState {
    samples: VecDeque<Sample>,
    circuit_state: CircuitState,
    transitions: u64,
}

#[derive(Debug)]
pub struct Monitor {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        let window = config.window.max(1);
        Self {
            config,
            state: Mutex::new(MonitorState {
                samples: VecDeque::with_capacity(window),
                circuit_state: CircuitState::Closed,
                transitions: 0,
            }),
        }
    }

    // A panic elsewhere must not take monitoring down with it.
    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a sample, dropping the oldest when the window is full.
    pub fn record_operation(&self, kind: OperationKind, duration: Duration, success: bool) {
        let window = self.config.window.max(1);
        let mut state = self.lock();
        while state.samples.len() >= window {
            state.samples.pop_front();
        }
        state.samples.push_back(Sample {
            kind,
            duration,
            success,
        });
    }

    pub fn record_transition(&self, from: CircuitState, to: CircuitState) {
        let mut state = self.lock();
        state.circuit_state = to;
        state.transitions += 1;
        tracing::debug!(from = %from, to = %to, "Monitor observed circuit transition");
    }

    pub fn get_health(&self) -> HealthReport {
        let state = self.lock();
        let total = state.samples.len();
        let failures = state.samples.iter().filter(|s| !s.success).count();
        let rate = if total == 0 {
            0.0
        } else {
            failures as f64 / total as f64
        };

        let status = match state.circuit_state {
            CircuitState::Open => HealthStatus::Unhealthy,
            _ if rate >= self.config.unhealthy_failure_rate => HealthStatus::Unhealthy,
            CircuitState::HalfOpen => HealthStatus::Degraded,
            _ if rate >= self.config.degraded_failure_rate => HealthStatus::Degraded,
            CircuitState::Closed => HealthStatus::Healthy,
        };

        HealthReport {
            status,
            recent_failure_rate: rate,
            circuit_state: state.circuit_state,
            samples: total,
        }
    }

    /// Per-kind aggregates, ordered by kind.
    pub fn operation_stats(&self) -> Vec<OperationStats> {
        let state = self.lock();
        let mut by_kind: BTreeMap<OperationKind, (usize, usize, Duration, Duration)> =
            BTreeMap::new();
        for sample in &state.samples {
            let entry = by_kind
                .entry(sample.kind)
                .or_insert((0, 0, Duration::ZERO, Duration::ZERO));
            entry.0 += 1;
            if !sample.success {
                entry.1 += 1;
            }
            entry.2 += sample.duration;
            entry.3 = entry.3.max(sample.duration);
        }

        by_kind
            .into_iter()
            .map(|(kind, (count, failures, total, max))| OperationStats {
                kind,
                count,
                failures,
                mean_duration_ms: total.as_secs_f64() * 1000.0 / count as f64,
                max_duration_ms: max.as_millis() as u64,
            })
            .collect()
    }

    /// Number of circuit transitions observed.
    pub fn transitions(&self) -> u64 {
        self.lock().transitions
    }

    pub fn sample_count(&self) -> usize {
        self.lock().samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_empty_monitor_is_healthy() {
        let monitor = Monitor::default();
        let report = monitor.get_health();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.recent_failure_rate, 0.0);
        assert_eq!(report.circuit_state, CircuitState::Closed);
        assert_eq!(report.samples, 0);
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let monitor = Monitor::new(MonitorConfig {
            window: 4,
            ..MonitorConfig::default()
        });
        for _ in 0..4 {
            monitor.record_operation(OperationKind::Ping, ms(1), false);
        }
        for _ in 0..4 {
            monitor.record_operation(OperationKind::Ping, ms(1), true);
        }
        assert_eq!(monitor.sample_count(), 4);
        assert_eq!(monitor.get_health().recent_failure_rate, 0.0);
    }

    #[test]
    fn test_failure_rate_thresholds() {
        let monitor = Monitor::default();
        for i in 0..10 {
            monitor.record_operation(OperationKind::QueryRecords, ms(2), i != 0);
        }
        let report = monitor.get_health();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!((report.recent_failure_rate - 0.1).abs() < 1e-9);

        for _ in 0..10 {
            monitor.record_operation(OperationKind::QueryRecords, ms(2), false);
        }
        assert_eq!(monitor.get_health().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_circuit_state_drives_status() {
        let monitor = Monitor::default();
        monitor.record_operation(OperationKind::Ping, ms(1), true);

        monitor.record_transition(CircuitState::Closed, CircuitState::Open);
        assert_eq!(monitor.get_health().status, HealthStatus::Unhealthy);

        monitor.record_transition(CircuitState::Open, CircuitState::HalfOpen);
        let report = monitor.get_health();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.circuit_state, CircuitState::HalfOpen);

        monitor.record_transition(CircuitState::HalfOpen, CircuitState::Closed);
        assert_eq!(monitor.get_health().status, HealthStatus::Healthy);
        assert_eq!(monitor.transitions(), 3);
    }

    #[test]
    fn test_operation_stats_per_kind() {
        let monitor = Monitor::default();
        monitor.record_operation(OperationKind::InsertRecord, ms(10), true);
        monitor.record_operation(OperationKind::InsertRecord, ms(30), false);
        monitor.record_operation(OperationKind::Stats, ms(5), true);

        let stats = monitor.operation_stats();
        assert_eq!(stats.len(), 2);
        let insert = &stats[0];
        assert_eq!(insert.kind, OperationKind::InsertRecord);
        assert_eq!(insert.count, 2);
        assert_eq!(insert.failures, 1);
        assert!((insert.mean_duration_ms - 20.0).abs() < 1e-6);
        assert_eq!(insert.max_duration_ms, 30);
        assert_eq!(stats[1].kind, OperationKind::Stats);
    }
}
