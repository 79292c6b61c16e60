//! Structured observability events for memory operations.
//!
//! This module provides:
//! - A turn-scoped tracing span for agent hooks
//! - Emission functions for store, pattern and circuit events
//!
//! Events are emitted at `info!` level with an `event` field naming them;
//! degraded-mode and circuit-open events use `warn!`.

use std::time::Duration;

use tracing::{info, warn};

use crate::connector::CircuitState;
use crate::monitor::OperationKind;

/// Span covering one agent turn. Attach with `tracing::Instrument` so it
/// stays active across awaits.
///
/// ```ignore
/// work.instrument(turn_span("architect", Some("session-42"))).await;
/// // memory events inside carry agent_type and session
/// ```
pub fn turn_span(agent_type: &str, session: Option<&str>) -> tracing::Span {
    tracing::info_span!(
        "amem.turn",
        agent_type = %agent_type,
        session = session.unwrap_or("-"),
    )
}

pub fn emit_memory_remembered(id: &str, agent_type: &str, category: &str) {
    info!(event = "memory.remembered", id = %id, agent_type = %agent_type, category = %category);
}

pub fn emit_memory_recalled(agent_type: &str, candidates: usize, returned: usize, duration_ms: u64) {
    info!(
        event = "memory.recalled",
        agent_type = %agent_type,
        candidates = candidates,
        returned = returned,
        duration_ms = duration_ms,
    );
}

pub fn emit_memory_invalidated(id: &str, already_invalid: bool) {
    info!(event = "memory.invalidated", id = %id, already_invalid = already_invalid);
}

pub fn emit_quality_updated(id: &str, delta: f64, quality: f64) {
    info!(event = "memory.quality_updated", id = %id, delta = delta, quality = quality);
}

pub fn emit_decay_sweep(factor: f64, touched: usize) {
    info!(event = "memory.decay_sweep", factor = factor, touched = touched);
}

/// `created` is false when the signature already existed.
pub fn emit_pattern_upserted(signature: &str, project_id: &str, created: bool) {
    info!(
        event = "pattern.upserted",
        signature = %signature,
        project_id = %project_id,
        created = created,
    );
}

pub fn emit_circuit_transition(from: CircuitState, to: CircuitState) {
    if to == CircuitState::Open {
        warn!(event = "circuit.transition", from = %from, to = %to);
    } else {
        info!(event = "circuit.transition", from = %from, to = %to);
    }
}

pub fn emit_call_rejected(kind: OperationKind, retry_in: Duration) {
    warn!(
        event = "circuit.rejected",
        kind = %kind,
        retry_in_ms = retry_in.as_millis() as u64,
    );
}

/// Memory was unavailable and the caller continued without it.
pub fn emit_memory_degraded(operation: &str, error: &dyn std::fmt::Display) {
    warn!(event = "memory.degraded", operation = %operation, error = %error);
}
