//! Recall ranking
//!
//! `score = similarity(query, content) * type_weight(category) * confidence * recency(age)`
//!
//! Recency halves every `half_life_days` and never drops below the floor.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use graph_state::{MemoryCategory, MemoryRecord};
use serde::{Deserialize, Serialize};

use crate::config::RecallConfig;
use crate::error::{MemoryError, MemoryResult};

/// Text relevance between a query and a record's content, in [0, 1].
pub trait Similarity: Send + Sync {
    fn similarity(&self, query: &str, content: &str) -> f64;
}

/// Jaccard overlap of lowercase alphanumeric tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenOverlap;

pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl Similarity for TokenOverlap {
    fn similarity(&self, query: &str, content: &str) -> f64 {
        let wanted = tokenize(query);
        if wanted.is_empty() {
            return 1.0;
        }
        let have = tokenize(content);
        let shared = wanted.intersection(&have).count();
        let union = wanted.union(&have).count();
        if union == 0 {
            0.0
        } else {
            shared as f64 / union as f64
        }
    }
}

/// Per-category multiplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeWeights {
    pub episodic: f64,
    pub semantic: f64,
    pub procedural: f64,
    pub pattern: f64,
}

impl Default for TypeWeights {
    fn default() -> Self {
        Self {
            episodic: 0.7,
            semantic: 1.0,
            procedural: 0.9,
            pattern: 1.0,
        }
    }
}

impl TypeWeights {
    pub fn weight(&self, category: MemoryCategory) -> f64 {
        match category {
            MemoryCategory::Episodic => self.episodic,
            MemoryCategory::Semantic => self.semantic,
            MemoryCategory::Procedural => self.procedural,
            MemoryCategory::Pattern => self.pattern,
        }
    }

    pub fn validate(&self) -> MemoryResult<()> {
        for category in MemoryCategory::ALL {
            let w = self.weight(category);
            if !(w.is_finite() && w >= 0.0) {
                return Err(MemoryError::Config(format!(
                    "type weight for {category} must be a non-negative number"
                )));
            }
        }
        Ok(())
    }
}

/// `max(floor, 0.5^(age_days / half_life_days))`
pub fn recency_decay(age_days: f64, half_life_days: f64, floor: f64) -> f64 {
    let age = age_days.max(0.0);
    0.5f64.powf(age / half_life_days).max(floor)
}

/// A recalled record with its ranking score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub score: f64,
}

#[derive(Clone)]
pub struct Ranker {
    config: RecallConfig,
    similarity: Arc<dyn Similarity>,
}

impl std::fmt::Debug for Ranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ranker").field("config", &self.config).finish()
    }
}

impl Ranker {
    pub fn new(config: RecallConfig) -> Self {
        Self::with_similarity(config, Arc::new(TokenOverlap))
    }

    pub fn with_similarity(config: RecallConfig, similarity: Arc<dyn Similarity>) -> Self {
        Self { config, similarity }
    }

    pub fn score(&self, record: &MemoryRecord, query: Option<&str>, now: DateTime<Utc>) -> f64 {
        let relevance = match query.map(str::trim) {
            Some(q) if !q.is_empty() => self.similarity.similarity(q, &record.content),
            _ => 1.0,
        };
        let age_days = record.age_at(now).num_seconds() as f64 / 86_400.0;
        relevance
            * self.config.type_weights.weight(record.category)
            * record.confidence
            * recency_decay(age_days, self.config.half_life_days, self.config.recency_floor)
    }

    /// Score, order and truncate. Highest score first, then newest, then id.
    pub fn rank(
        &self,
        records: Vec<MemoryRecord>,
        query: Option<&str>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Vec<ScoredMemory> {
        let mut scored: Vec<ScoredMemory> = records
            .into_iter()
            .map(|record| ScoredMemory {
                score: self.score(&record, query, now),
                record,
            })
            .collect();

        scored.sort_by(compare_scored);
        scored.truncate(limit);
        scored
    }
}

/// Relative order used by [`Ranker::rank`], exposed for callers merging result sets.
pub fn compare_scored(a: &ScoredMemory, b: &ScoredMemory) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.record.created_at.cmp(&a.record.created_at))
        .then_with(|| a.record.id.cmp(&b.record.id))
}
