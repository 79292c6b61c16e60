//! Pre- and post-turn memory hooks for agents.
//!
//! `before_turn` recalls what the agent type knows and renders it into a
//! size-bounded context block; `after_turn` stores what happened. Neither
//! hook ever fails the turn: any memory error is logged and the turn goes
//! ahead without memory.

use std::future::Future;

use graph_state::MemoryCategory;
use serde::{Deserialize, Serialize};
use tracing::{warn, Instrument};

use crate::advisory::AdvisoryMemory;
use crate::obs;
use crate::store::{NewMemory, RecallQuery, ScoredMemory};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    pub recall_limit: usize,
    pub min_quality: f64,
    /// Character budget for the rendered context block
    pub max_context_chars: usize,
    pub project_id: Option<String>,
    /// Confidence given to turn outcomes
    pub success_confidence: f64,
    pub failure_confidence: f64,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            recall_limit: 5,
            min_quality: 0.3,
            max_context_chars: 4_000,
            project_id: None,
            success_confidence: 0.7,
            failure_confidence: 0.5,
        }
    }
}

/// Memory handed to the agent before it acts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnContext {
    /// Memories that fit the budget, best first
    pub memories: Vec<ScoredMemory>,
    pub rendered: String,
    /// Recalled memories left out for lack of room
    pub dropped: usize,
}

impl TurnContext {
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }
}

/// What the agent reports after acting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub summary: String,
    pub success: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Reusable structure observed during the turn
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl TurnOutcome {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            success: true,
            tags: Vec::new(),
            pattern: None,
            session_id: None,
        }
    }

    pub fn failure(summary: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::success(summary)
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pattern(mut self, structure: impl Into<String>) -> Self {
        self.pattern = Some(structure.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Greedy packing of already-ranked memories into a character budget.
pub fn render_context(memories: Vec<ScoredMemory>, max_chars: usize) -> TurnContext {
    let mut kept = Vec::new();
    let mut rendered = String::new();
    let mut dropped = 0;

    for memory in memories {
        let line = format!(
            "- [{}] {} (quality {:.2})\n",
            memory.record.category, memory.record.content, memory.record.quality_score
        );
        if rendered.chars().count() + line.chars().count() <= max_chars {
            rendered.push_str(&line);
            kept.push(memory);
        } else {
            dropped += 1;
        }
    }

    TurnContext {
        memories: kept,
        rendered,
        dropped,
    }
}

#[derive(Clone)]
pub struct MemoryHooks {
    memory: AdvisoryMemory,
    config: HookConfig,
}

impl MemoryHooks {
    pub fn new(memory: AdvisoryMemory, config: HookConfig) -> Self {
        Self { memory, config }
    }

    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    pub async fn before_turn(&self, agent_type: &str, task: &str) -> TurnContext {
        let query = RecallQuery::new(agent_type)
            .with_context(task)
            .with_min_quality(self.config.min_quality)
            .with_limit(self.config.recall_limit);

        match self.memory.recall(query).await {
            Ok(memories) => render_context(memories, self.config.max_context_chars),
            Err(e) => {
                warn!(agent_type, error = %e, "Pre-turn recall failed, continuing without memory");
                TurnContext::default()
            }
        }
    }

    /// Store the outcome as an episodic memory, plus a pattern memory when
    /// the turn observed one. Returns the ids written.
    pub async fn after_turn(&self, agent_type: &str, outcome: &TurnOutcome) -> Vec<String> {
        let confidence = if outcome.success {
            self.config.success_confidence
        } else {
            self.config.failure_confidence
        };
        let status = if outcome.success { "succeeded" } else { "failed" };

        let mut writes = vec![self.new_memory(
            agent_type,
            format!("Turn {status}: {}", outcome.summary),
            MemoryCategory::Episodic,
            confidence,
            outcome,
        )];
        if let Some(structure) = &outcome.pattern {
            writes.push(
                self.new_memory(
                    agent_type,
                    outcome.summary.clone(),
                    MemoryCategory::Pattern,
                    confidence,
                    outcome,
                )
                .with_structure(structure.clone()),
            );
        }

        let mut ids = Vec::new();
        for memory in writes {
            match self.memory.remember(memory).await {
                Ok(Some(id)) => ids.push(id),
                Ok(None) => {}
                Err(e) => {
                    warn!(agent_type, error = %e, "Post-turn remember failed");
                }
            }
        }
        ids
    }

    /// Run one agent turn between the two hooks.
    ///
    /// `turn` receives the recalled context and returns its result together
    /// with the outcome to remember.
    pub async fn run_turn<T, F, Fut>(&self, agent_type: &str, task: &str, turn: F) -> T
    where
        F: FnOnce(TurnContext) -> Fut,
        Fut: Future<Output = (T, TurnOutcome)>,
    {
        let span = obs::turn_span(agent_type, None);
        async move {
            let context = self.before_turn(agent_type, task).await;
            let (result, outcome) = turn(context).await;
            self.after_turn(agent_type, &outcome).await;
            result
        }
        .instrument(span)
        .await
    }

    fn new_memory(
        &self,
        agent_type: &str,
        content: String,
        category: MemoryCategory,
        confidence: f64,
        outcome: &TurnOutcome,
    ) -> NewMemory {
        let mut memory =
            NewMemory::new(agent_type, content, category, confidence).with_tags(outcome.tags.clone());
        if let Some(project) = &self.config.project_id {
            memory = memory.with_project(project.clone());
        }
        if let Some(session) = &outcome.session_id {
            memory = memory.with_session(session.clone());
        }
        memory
    }
}
