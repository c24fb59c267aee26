//! Decision orchestration and feedback.
//!
//! [`PolicyEngine::decide`] draws one arm per pillar from the current
//! posteriors, prices the arms' modules, and packs them under the token
//! budget. It reads the bandit state and never mutates it.
//!
//! [`PolicyEngine::close`] scores the finished response, applies the reward
//! to every arm whose module was adopted, and persists the result. Arms
//! whose module did not fit the budget never reached the prompt and are
//! left untouched.
//!
//! Neither call fails: persistence and analytics errors are logged and the
//! best-effort result is returned.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::arms::Pillar;
use crate::config::PolicyConfig;
use crate::decision::{
    ArmSelection, DecisionNote, DecisionRequest, Feedback, FeedbackOutcome,
    ResponseDecisionContext,
};
use crate::knapsack::{self, Candidate};
use crate::quality::{self, QualityFlags};
use crate::sink::{EventSink, NoopSink, PolicyEvent};
use crate::store::BanditStore;
use crate::thompson::ThompsonSelector;

/// Prior weight applied when a module's history carries none.
const DEFAULT_PRIOR_WEIGHT: f64 = 1.0;

/// Orchestrator and feedback closer around one [`BanditStore`].
pub struct PolicyEngine {
    config: PolicyConfig,
    store: Arc<BanditStore>,
    selector: Mutex<ThompsonSelector>,
    sink: Arc<dyn EventSink>,
}

impl PolicyEngine {
    /// Engine over `store`, seeded from `config.seed`, emitting nowhere.
    pub fn new(config: PolicyConfig, store: Arc<BanditStore>) -> Self {
        let selector = ThompsonSelector::with_seed(config.seed);
        Self {
            config,
            store,
            selector: Mutex::new(selector),
            sink: Arc::new(NoopSink),
        }
    }

    /// Engine over a file store at `config.state_path`.
    pub fn from_config(config: PolicyConfig) -> Self {
        let store = Arc::new(BanditStore::file(config.state_path.clone()));
        Self::new(config, store)
    }

    /// [`from_config`](Self::from_config) with [`PolicyConfig::from_env`].
    pub fn from_env() -> Self {
        Self::from_config(PolicyConfig::from_env())
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_selector(mut self, selector: ThompsonSelector) -> Self {
        self.selector = Mutex::new(selector);
        self
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<BanditStore> {
        &self.store
    }

    /// Compose the modules for one response.
    pub async fn decide(&self, request: DecisionRequest) -> ResponseDecisionContext {
        let state = self.store.load().await;
        let budget_tokens = request.budget_tokens.unwrap_or(self.config.budget_tokens);

        let selections: Vec<ArmSelection> = {
            let mut selector = self.selector.lock().unwrap_or_else(PoisonError::into_inner);
            Pillar::ALL
                .iter()
                .map(|&pillar| {
                    let (arm, sample) = selector.pick_arm_explain(pillar, &state);
                    ArmSelection {
                        pillar,
                        arm,
                        module_id: pillar.module_id(arm),
                        module_file: pillar.module_file(arm),
                        sample,
                    }
                })
                .collect()
        };

        let mut notes = Vec::new();
        let candidates: Vec<Candidate> = selections
            .iter()
            .map(|sel| {
                let tokens = match request.module_token_overrides.get(&sel.module_id) {
                    Some(&tokens) => {
                        notes.push(DecisionNote::TokenOverride {
                            module_id: sel.module_id.clone(),
                            tokens,
                        });
                        tokens
                    }
                    None => sel.arm.default_tokens(),
                };
                match request.historical_vpt.get(&sel.module_id) {
                    Some(history) => {
                        let candidate = Candidate::new(
                            sel.module_id.clone(),
                            tokens,
                            history.prior_weight.unwrap_or(DEFAULT_PRIOR_WEIGHT),
                            history.mean,
                        );
                        match history.interval {
                            Some((lower, upper)) => candidate.with_interval(lower, upper),
                            None => candidate,
                        }
                    }
                    None => {
                        notes.push(DecisionNote::DefaultValueEstimate {
                            module_id: sel.module_id.clone(),
                            vpt: self.config.default_vpt,
                        });
                        Candidate::new(
                            sel.module_id.clone(),
                            tokens,
                            DEFAULT_PRIOR_WEIGHT,
                            self.config.default_vpt,
                        )
                    }
                }
            })
            .collect();

        let knapsack = knapsack::solve(budget_tokens, &candidates);
        let adopted = knapsack.adopted_ids();
        notes.extend(
            candidates
                .iter()
                .filter(|c| !adopted.contains(&c.id))
                .map(|c| DecisionNote::NotAdopted {
                    module_id: c.id.clone(),
                    tokens: c.tokens,
                }),
        );

        tracing::debug!(
            response_id = %request.response_id,
            budget_tokens,
            adopted = ?adopted,
            tokens_additive = knapsack.tokens_used,
            estimated_gain = knapsack.estimated_gain,
            "composed response modules"
        );

        let context = ResponseDecisionContext {
            response_id: request.response_id,
            user_id: request.user_id,
            retrieve_mode: request.retrieve_mode,
            detected_intensity: request.detected_intensity,
            memory_ids_used: request.memory_ids_used,
            base_module_ids: self.config.base_modules.clone(),
            selections,
            knapsack,
            budget_tokens,
            notes,
        };

        for sel in &context.selections {
            self.emit(PolicyEvent::ArmPicked {
                response_id: context.response_id.clone(),
                pillar: sel.pillar,
                arm: sel.arm,
                module_id: sel.module_id.clone(),
                sample: sel.sample,
            })
            .await;
        }
        self.emit(PolicyEvent::KnapsackDecided {
            response_id: context.response_id.clone(),
            budget: budget_tokens,
            adopted,
            estimated_gain: context.estimated_gain(),
            tokens_additive: context.tokens_additive(),
        })
        .await;

        context
    }

    /// Score the finished response and feed the reward back to the adopted arms.
    pub async fn close(
        &self,
        context: ResponseDecisionContext,
        feedback: Feedback,
    ) -> FeedbackOutcome {
        let flags = QualityFlags::evaluate(&feedback.final_text, &context.quality_facts());
        let q = quality::compute_q(&flags);
        let reward = quality::reward(q, feedback.tokens_total, self.config.lambda);

        self.store
            .update(|state| {
                for sel in context.adopted_selections() {
                    state.update_arm(sel.pillar, sel.arm, reward);
                }
            })
            .await;
        if let Err(error) = self.store.flush().await {
            tracing::warn!(
                %error,
                response_id = %context.response_id,
                "failed to persist bandit state"
            );
        }

        tracing::debug!(
            response_id = %context.response_id,
            q,
            reward,
            tokens_total = feedback.tokens_total,
            "closed response"
        );

        self.emit(PolicyEvent::ResponseScored {
            response_id: context.response_id.clone(),
            user_id: context.user_id.clone(),
            retrieve_mode: context.retrieve_mode,
            q,
            flags,
            tokens_total: feedback.tokens_total,
            tokens_additive: context.tokens_additive(),
            first_byte_ms: feedback.first_byte_ms,
            last_chunk_ms: feedback.last_chunk_ms,
        })
        .await;

        for sel in context.adopted_selections() {
            self.emit(PolicyEvent::ArmRewarded {
                response_id: context.response_id.clone(),
                pillar: sel.pillar,
                arm: sel.arm,
                reward,
            })
            .await;
        }

        if feedback.first_byte_ms.is_some() || feedback.last_chunk_ms.is_some() {
            self.emit(PolicyEvent::LatencySample {
                response_id: context.response_id.clone(),
                first_byte_ms: feedback.first_byte_ms,
                last_chunk_ms: feedback.last_chunk_ms,
                tokens_total: feedback.tokens_total,
            })
            .await;
        }

        for module in &context.knapsack.adopted {
            self.emit(PolicyEvent::ModuleOutcome {
                response_id: context.response_id.clone(),
                module_id: module.id.clone(),
                tokens: module.tokens,
                q,
                vpt: (module.tokens > 0).then(|| q / f64::from(module.tokens)),
            })
            .await;
        }

        FeedbackOutcome { flags, q, reward }
    }

    async fn emit(&self, event: PolicyEvent) {
        if let Err(error) = self.sink.emit(&event).await {
            tracing::warn!(%error, event = event.name(), "failed to emit policy event");
        }
    }
}

impl fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arms::Arm;
    use crate::decision::HistoricalVpt;
    use crate::error::SinkError;
    use crate::sink::MemorySink;
    use crate::store::MemoryBackend;
    use crate::thompson::BanditState;
    use async_trait::async_trait;

    const GOOD_TEXT: &str = "Contexto: você relatou cansaço.\n\
        Plano: reduzir a carga nas próximas semanas.\n\
        Ação: bloquear duas manhãs livres.";

    fn engine(backend: Arc<MemoryBackend>) -> PolicyEngine {
        let store = Arc::new(BanditStore::new(backend));
        PolicyEngine::new(PolicyConfig::default().with_seed(7), store)
    }

    fn all_module_ids() -> Vec<String> {
        Pillar::ALL
            .iter()
            .flat_map(|p| Arm::ALL.iter().map(move |a| p.module_id(*a)))
            .collect()
    }

    struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        async fn emit(&self, _event: &PolicyEvent) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn decide_picks_one_arm_per_pillar_without_mutating_state() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine(backend.clone());
        let ctx = engine.decide(DecisionRequest::new("r1")).await;

        let pillars: Vec<Pillar> = ctx.selections.iter().map(|s| s.pillar).collect();
        assert_eq!(pillars, Pillar::ALL.to_vec());
        for sel in &ctx.selections {
            assert_eq!(sel.module_id, sel.pillar.module_id(sel.arm));
            assert!((0.0..=1.0).contains(&sel.sample));
        }
        assert_eq!(ctx.budget_tokens, 800);
        assert!(ctx.tokens_additive() <= 800);
        assert_eq!(engine.store().load().await, BanditState::new());
        // Only the initial prior write.
        assert_eq!(backend.writes(), 1);
    }

    #[tokio::test]
    async fn roomy_budget_adopts_every_arm_module() {
        let engine = engine(Arc::new(MemoryBackend::new()));
        let ctx = engine.decide(DecisionRequest::new("r1").with_budget(1_000)).await;
        let expected: u32 = ctx.selections.iter().map(|s| s.arm.default_tokens()).sum();
        assert_eq!(ctx.tokens_additive(), expected);
        assert_eq!(ctx.additive_module_ids().len(), 3);
        assert!((ctx.estimated_gain() - 1.8).abs() < 1e-9);
        let defaults = ctx
            .notes
            .iter()
            .filter(|n| matches!(n, DecisionNote::DefaultValueEstimate { .. }))
            .count();
        assert_eq!(defaults, 3);
        assert_eq!(
            ctx.selected_module_ids()[..5],
            PolicyConfig::default().base_modules[..]
        );
    }

    #[tokio::test]
    async fn zero_budget_adopts_nothing() {
        let engine = engine(Arc::new(MemoryBackend::new()));
        let ctx = engine.decide(DecisionRequest::new("r1").with_budget(0)).await;
        assert!(ctx.additive_module_ids().is_empty());
        assert_eq!(ctx.tokens_additive(), 0);
        assert_eq!(ctx.estimated_gain(), 0.0);
        let not_adopted = ctx
            .notes
            .iter()
            .filter(|n| matches!(n, DecisionNote::NotAdopted { .. }))
            .count();
        assert_eq!(not_adopted, 3);
    }

    #[tokio::test]
    async fn overrides_and_history_shape_candidates() {
        let engine = engine(Arc::new(MemoryBackend::new()));
        let mut req = DecisionRequest::new("r1").with_budget(1_000);
        for id in all_module_ids() {
            req = req.with_token_override(id.clone(), 10).with_history(
                id,
                HistoricalVpt {
                    mean: 0.9,
                    interval: Some((0.8, 1.0)),
                    prior_weight: Some(0.5),
                },
            );
        }
        let ctx = engine.decide(req).await;
        assert_eq!(ctx.tokens_additive(), 30);
        assert!((ctx.estimated_gain() - 1.35).abs() < 1e-9);
        assert!(ctx
            .notes
            .iter()
            .all(|n| matches!(n, DecisionNote::TokenOverride { tokens: 10, .. })));
        assert_eq!(ctx.notes.len(), 3);
    }

    #[tokio::test]
    async fn close_rewards_adopted_arms_and_persists() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine(backend.clone());
        let ctx = engine.decide(DecisionRequest::new("r1").with_budget(1_000)).await;
        let arms = ctx.arms_by_pillar();

        let outcome = engine.close(ctx, Feedback::new(GOOD_TEXT, 1_000)).await;
        assert_eq!(outcome.q, 1.0);
        assert!((outcome.reward - 0.99).abs() < 1e-9);
        assert_eq!(outcome.flags.passed(), 3);

        let written: BanditState =
            serde_json::from_str(&backend.contents().unwrap()).unwrap();
        for (pillar, arm) in arms {
            let s = written.stats(pillar, arm);
            assert_eq!(s.pulls, 1);
            assert!((s.alpha - 1.99).abs() < 1e-9);
        }
        assert_eq!(written.total_pulls(), 3);
    }

    #[tokio::test]
    async fn zero_budget_close_leaves_posteriors_untouched() {
        let sink = Arc::new(MemorySink::new());
        let engine = engine(Arc::new(MemoryBackend::new())).with_sink(sink.clone());
        let ctx = engine.decide(DecisionRequest::new("r1").with_budget(0)).await;
        assert!(ctx.additive_module_ids().is_empty());

        engine.close(ctx, Feedback::new("texto livre", 100)).await;
        assert_eq!(engine.store().load().await.total_pulls(), 0);
        assert_eq!(sink.count("arm_rewarded"), 0);
        assert_eq!(sink.count("response_scored"), 1);
    }

    #[tokio::test]
    async fn arm_whose_module_did_not_fit_is_not_rewarded() {
        let engine = engine(Arc::new(MemoryBackend::new()));
        let mut req = DecisionRequest::new("r1").with_budget(1_000);
        for arm in Arm::ALL {
            req = req.with_token_override(Pillar::Closing.module_id(arm), 5_000);
        }
        let ctx = engine.decide(req).await;
        let adopted: Vec<Pillar> = ctx.adopted_selections().map(|s| s.pillar).collect();
        assert_eq!(adopted, vec![Pillar::Language, Pillar::Modulation]);

        engine.close(ctx, Feedback::new(GOOD_TEXT, 500)).await;
        let st = engine.store().load().await;
        assert_eq!(st.total_pulls(), 2);
        for arm in Arm::ALL {
            assert_eq!(st.stats(Pillar::Closing, arm), crate::thompson::ArmStats::PRIOR);
        }
    }

    #[tokio::test]
    async fn close_emits_outcome_records() {
        let sink = Arc::new(MemorySink::new());
        let engine = engine(Arc::new(MemoryBackend::new())).with_sink(sink.clone());
        let ctx = engine.decide(DecisionRequest::new("r1").with_budget(1_000)).await;
        assert_eq!(sink.count("arm_picked"), 3);
        assert_eq!(sink.count("knapsack_decided"), 1);

        engine.close(ctx.clone(), Feedback::new("texto livre", 400)).await;
        assert_eq!(sink.count("response_scored"), 1);
        assert_eq!(sink.count("arm_rewarded"), 3);
        assert_eq!(sink.count("module_outcome"), 3);
        assert_eq!(sink.count("latency_sample"), 0);

        engine
            .close(ctx, Feedback::new("texto livre", 400).with_latency(120, 900))
            .await;
        assert_eq!(sink.count("latency_sample"), 1);
    }

    #[tokio::test]
    async fn module_outcome_reports_value_per_token() {
        let sink = Arc::new(MemorySink::new());
        let engine = engine(Arc::new(MemoryBackend::new())).with_sink(sink.clone());
        let ctx = engine.decide(DecisionRequest::new("r1").with_budget(1_000)).await;
        let outcome = engine.close(ctx, Feedback::new(GOOD_TEXT, 0)).await;
        for event in sink.events() {
            if let PolicyEvent::ModuleOutcome { tokens, q, vpt, .. } = event {
                assert_eq!(q, outcome.q);
                assert_eq!(vpt, Some(q / f64::from(tokens)));
            }
        }
    }

    #[tokio::test]
    async fn sink_and_write_failures_do_not_fail_calls() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_fail_writes(true);
        let engine = engine(backend).with_sink(Arc::new(FailingSink));
        let ctx = engine.decide(DecisionRequest::new("r1").with_budget(1_000)).await;
        let outcome = engine.close(ctx, Feedback::new("", 0)).await;
        // Empty text fails only the structure check.
        assert!(!outcome.flags.structure_ok);
        assert!((outcome.q - 0.6667).abs() < 1e-12);
        // In-memory state still advanced.
        assert_eq!(engine.store().load().await.total_pulls(), 3);
    }
}
