//! End-to-end decide/close flows over real and in-memory backends.

use std::sync::Arc;

use promptmux::{
    BanditState, BanditStore, DecisionRequest, Feedback, MemoryBackend, MemorySink, PolicyConfig,
    PolicyEngine, PolicyEvent, RetrieveMode,
};

const REPLY: &str = "Contexto: a semana foi pesada.\n\
    Plano: proteger as manhãs.\n\
    Passos:\n- bloquear agenda\n- avisar a equipe";

fn memory_engine(seed: u64) -> (PolicyEngine, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let store = Arc::new(BanditStore::new(backend.clone()));
    let engine = PolicyEngine::new(PolicyConfig::default().with_seed(seed), store);
    (engine, backend)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_closes_lose_no_increment() {
    let (engine, backend) = memory_engine(11);
    let engine = Arc::new(engine);
    let n = 64;

    let mut handles = Vec::new();
    for i in 0..n {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let req = DecisionRequest::new(format!("r{i}")).with_budget(1_000);
            let ctx = engine.decide(req).await;
            engine.close(ctx, Feedback::new(REPLY, 600)).await
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let st = engine.store().load().await;
    assert_eq!(st.total_pulls(), n * 3);
    let written: BanditState = serde_json::from_str(&backend.contents().unwrap()).unwrap();
    assert_eq!(written, st);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_decides_read_state_once() {
    let (engine, backend) = memory_engine(3);
    let engine = Arc::new(engine);
    let handles: Vec<_> = (0..16)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.decide(DecisionRequest::new(format!("r{i}"))).await })
        })
        .collect();
    for h in handles {
        h.await.unwrap();
    }
    assert_eq!(backend.reads(), 1);
    assert_eq!(backend.writes(), 1);
}

#[tokio::test]
async fn decide_is_read_only() {
    let (engine, backend) = memory_engine(5);
    for i in 0..10 {
        engine.decide(DecisionRequest::new(format!("r{i}"))).await;
    }
    assert_eq!(engine.store().load().await, BanditState::new());
    assert_eq!(backend.writes(), 1);
}

#[tokio::test]
async fn corrupt_state_file_is_replaced_with_prior() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bandits.json");
    std::fs::write(&path, "{\"language\": [1, 2").unwrap();

    let config = PolicyConfig::default()
        .with_state_path(&path)
        .with_seed(1);
    let engine = PolicyEngine::from_config(config);
    let ctx = engine.decide(DecisionRequest::new("r1")).await;
    assert_eq!(ctx.selections.len(), 3);

    let raw = std::fs::read_to_string(&path).unwrap();
    let on_disk: BanditState = serde_json::from_str(&raw).unwrap();
    assert_eq!(on_disk, BanditState::new());
}

#[tokio::test]
async fn learned_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("bandits.json");
    let config = PolicyConfig::default().with_state_path(&path).with_seed(8);

    let first = PolicyEngine::from_config(config.clone());
    let ctx = first.decide(DecisionRequest::new("r1").with_budget(1_000)).await;
    let arms = ctx.arms_by_pillar();
    first.close(ctx, Feedback::new(REPLY, 500)).await;

    let second = PolicyEngine::from_config(config);
    let st = second.store().load().await;
    assert_eq!(st.total_pulls(), 3);
    for (pillar, arm) in arms {
        assert_eq!(st.stats(pillar, arm).pulls, 1);
    }
}

#[tokio::test]
async fn decision_and_outcome_records_reach_the_sink() {
    let (engine, _) = memory_engine(21);
    let sink = Arc::new(MemorySink::new());
    let engine = engine.with_sink(sink.clone());

    let req = DecisionRequest::new("r-42")
        .with_user("u-7")
        .with_retrieve_mode(RetrieveMode::Deep)
        .with_intensity(8.0)
        .with_memory_ids(["mem_abc123"])
        .with_budget(2_000);
    let ctx = engine.decide(req).await;
    let adopted = ctx.additive_module_ids();

    let outcome = engine
        .close(ctx, Feedback::new(REPLY, 900).with_latency(150, 2_400))
        .await;
    // Memory id never appears in the reply.
    assert!(!outcome.flags.memory_ok);
    assert!(outcome.flags.structure_ok && outcome.flags.technical_block_ok);

    let events = sink.events();
    let scored = events.iter().find_map(|e| match e {
        PolicyEvent::ResponseScored {
            user_id,
            retrieve_mode,
            q,
            tokens_total,
            first_byte_ms,
            ..
        } => Some((user_id.clone(), *retrieve_mode, *q, *tokens_total, *first_byte_ms)),
        _ => None,
    });
    assert_eq!(
        scored,
        Some((Some("u-7".to_string()), RetrieveMode::Deep, outcome.q, 900, Some(150)))
    );

    let outcome_ids: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            PolicyEvent::ModuleOutcome { module_id, .. } => Some(module_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(outcome_ids, adopted);
    assert_eq!(sink.count("latency_sample"), 1);
    assert_eq!(sink.count("arm_rewarded"), 3);
}
