//! Decision and feedback envelopes.
//!
//! A [`ResponseDecisionContext`] is produced by [`crate::PolicyEngine::decide`]
//! and consumed (by value) by [`crate::PolicyEngine::close`]. It carries what
//! the feedback path needs to close the loop: the arm chosen per pillar, the
//! adopted modules, and the facts the quality checks read.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::arms::{Arm, Pillar, RetrieveMode};
use crate::knapsack::KnapsackResult;
use crate::quality::{QualityFacts, QualityFlags};

/// Observed value-per-token history for one module id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoricalVpt {
    pub mean: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_weight: Option<f64>,
}

/// Input to a decision call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub response_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub retrieve_mode: RetrieveMode,
    /// Detected emotional intensity, 0–10.
    #[serde(default)]
    pub detected_intensity: f64,
    #[serde(default)]
    pub memory_ids_used: Vec<String>,
    /// Keyed by module id (`language_full`, ...).
    #[serde(default)]
    pub historical_vpt: BTreeMap<String, HistoricalVpt>,
    /// Token cost per module id, overriding the arm default.
    #[serde(default)]
    pub module_token_overrides: BTreeMap<String, u32>,
    /// Overrides the configured additive budget for this call.
    #[serde(default)]
    pub budget_tokens: Option<u32>,
}

impl DecisionRequest {
    pub fn new(response_id: impl Into<String>) -> Self {
        Self {
            response_id: response_id.into(),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_retrieve_mode(mut self, mode: RetrieveMode) -> Self {
        self.retrieve_mode = mode;
        self
    }

    pub fn with_intensity(mut self, intensity: f64) -> Self {
        self.detected_intensity = intensity;
        self
    }

    pub fn with_memory_ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.memory_ids_used = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_history(mut self, module_id: impl Into<String>, vpt: HistoricalVpt) -> Self {
        self.historical_vpt.insert(module_id.into(), vpt);
        self
    }

    pub fn with_token_override(mut self, module_id: impl Into<String>, tokens: u32) -> Self {
        self.module_token_overrides.insert(module_id.into(), tokens);
        self
    }

    pub fn with_budget(mut self, budget_tokens: u32) -> Self {
        self.budget_tokens = Some(budget_tokens);
        self
    }
}

/// The arm drawn for one pillar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSelection {
    pub pillar: Pillar,
    pub arm: Arm,
    pub module_id: String,
    /// Catalog file for the arm's module variant.
    pub module_file: String,
    /// Winning posterior draw.
    pub sample: f64,
}

/// Audit notes describing how a decision was assembled.
///
/// Prefer adding new variants over changing existing semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "note", rename_all = "snake_case")]
pub enum DecisionNote {
    /// No history for the module; the neutral value estimate was used.
    DefaultValueEstimate { module_id: String, vpt: f64 },

    /// The request overrode the module's token cost.
    TokenOverride { module_id: String, tokens: u32 },

    /// The module was a candidate but did not fit (or had no cost).
    NotAdopted { module_id: String, tokens: u32 },
}

/// Everything decided for one response, threaded to feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseDecisionContext {
    pub response_id: String,
    pub user_id: Option<String>,
    pub retrieve_mode: RetrieveMode,
    pub detected_intensity: f64,
    pub memory_ids_used: Vec<String>,
    /// Fixed modules, always included; not chosen by the policy.
    pub base_module_ids: Vec<String>,
    /// One entry per pillar, in [`Pillar::ALL`] order.
    pub selections: Vec<ArmSelection>,
    pub knapsack: KnapsackResult,
    pub budget_tokens: u32,
    pub notes: Vec<DecisionNote>,
}

impl ResponseDecisionContext {
    pub fn additive_module_ids(&self) -> Vec<String> {
        self.knapsack.adopted_ids()
    }

    /// Base modules followed by the adopted additive modules.
    pub fn selected_module_ids(&self) -> Vec<String> {
        let mut ids = self.base_module_ids.clone();
        ids.extend(self.additive_module_ids());
        ids
    }

    pub fn tokens_additive(&self) -> u32 {
        self.knapsack.tokens_used
    }

    pub fn estimated_gain(&self) -> f64 {
        self.knapsack.estimated_gain
    }

    /// Selections whose module the knapsack adopted, in pillar order.
    pub fn adopted_selections(&self) -> impl Iterator<Item = &ArmSelection> + '_ {
        self.selections
            .iter()
            .filter(|s| self.knapsack.adopted.iter().any(|c| c.id == s.module_id))
    }

    pub fn arms_by_pillar(&self) -> BTreeMap<Pillar, Arm> {
        self.selections.iter().map(|s| (s.pillar, s.arm)).collect()
    }

    pub fn quality_facts(&self) -> QualityFacts {
        QualityFacts {
            detected_intensity: self.detected_intensity,
            memory_ids: self.memory_ids_used.clone(),
        }
    }
}

/// Input to a feedback call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Feedback {
    pub final_text: String,
    pub tokens_total: u64,
    #[serde(default)]
    pub first_byte_ms: Option<u64>,
    #[serde(default)]
    pub last_chunk_ms: Option<u64>,
}

impl Feedback {
    pub fn new(final_text: impl Into<String>, tokens_total: u64) -> Self {
        Self {
            final_text: final_text.into(),
            tokens_total,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, first_byte_ms: u64, last_chunk_ms: u64) -> Self {
        self.first_byte_ms = Some(first_byte_ms);
        self.last_chunk_ms = Some(last_chunk_ms);
        self
    }
}

/// Result of a feedback call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedbackOutcome {
    pub flags: QualityFlags,
    pub q: f64,
    pub reward: f64,
}
