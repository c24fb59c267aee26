//! Analytics port for decision and outcome records.
//!
//! Emission is best-effort: the engine logs sink errors and carries on.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::arms::{Arm, Pillar, RetrieveMode};
use crate::error::SinkError;
use crate::quality::QualityFlags;

/// One analytics record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PolicyEvent {
    /// An arm was drawn for a pillar.
    ArmPicked {
        response_id: String,
        pillar: Pillar,
        arm: Arm,
        module_id: String,
        sample: f64,
    },
    /// The knapsack chose the additive modules.
    KnapsackDecided {
        response_id: String,
        budget: u32,
        adopted: Vec<String>,
        estimated_gain: f64,
        tokens_additive: u32,
    },
    /// A finished response was scored.
    ResponseScored {
        response_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        retrieve_mode: RetrieveMode,
        q: f64,
        flags: QualityFlags,
        tokens_total: u64,
        tokens_additive: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        first_byte_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_chunk_ms: Option<u64>,
    },
    /// Streaming latency for a response.
    LatencySample {
        response_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        first_byte_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_chunk_ms: Option<u64>,
        tokens_total: u64,
    },
    /// Realized value of one adopted module.
    ModuleOutcome {
        response_id: String,
        module_id: String,
        tokens: u32,
        q: f64,
        /// `q / tokens`.
        vpt: Option<f64>,
    },
    /// A reward was applied to a pillar's arm.
    ArmRewarded {
        response_id: String,
        pillar: Pillar,
        arm: Arm,
        reward: f64,
    },
}

impl PolicyEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyEvent::ArmPicked { .. } => "arm_picked",
            PolicyEvent::KnapsackDecided { .. } => "knapsack_decided",
            PolicyEvent::ResponseScored { .. } => "response_scored",
            PolicyEvent::LatencySample { .. } => "latency_sample",
            PolicyEvent::ModuleOutcome { .. } => "module_outcome",
            PolicyEvent::ArmRewarded { .. } => "arm_rewarded",
        }
    }
}

/// Destination for [`PolicyEvent`]s.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &PolicyEvent) -> Result<(), SinkError>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn emit(&self, _event: &PolicyEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes each event as a structured `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn emit(&self, event: &PolicyEvent) -> Result<(), SinkError> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(target: "promptmux::events", event = event.name(), %payload);
        Ok(())
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<PolicyEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PolicyEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn emit(&self, event: &PolicyEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}
