//! `promptmux`: an online-learning policy for composing LLM prompts.
//!
//! Each response is assembled from a fixed set of base modules plus a few
//! additive modules. The additive part is learned: for every **pillar**
//! (language, closing, modulation) the policy keeps a Beta posterior per
//! **arm** (`full`, `mini`, `rules`), draws one arm per pillar by Thompson
//! sampling, and packs the chosen modules under a token budget. After the
//! response is streamed, cheap text heuristics score it and the score, minus
//! a token-cost penalty, is fed back to the arms that produced it.
//!
//! The loop has two halves:
//!
//! - [`PolicyEngine::decide`]: load the posteriors, pick arms, price them,
//!   run the greedy [`knapsack`], return a [`ResponseDecisionContext`].
//! - [`PolicyEngine::close`]: evaluate [`QualityFlags`], compute `q` and the
//!   reward, update every arm whose module was adopted, persist, and emit
//!   analytics.
//!
//! **Goals:**
//! - **Reproducible when seeded**: a seeded [`ThompsonSelector`] (Park–Miller
//!   [`Lcg`]) yields the same arm sequence for the same call sequence.
//! - **Never fails the response path**: corrupt state, write failures, and
//!   sink failures are logged and recovered.
//! - **No lost updates**: feedback mutates the shared [`BanditState`] inside
//!   a single-writer section; writes are serialized in submission order.
//!
//! **Non-goals:**
//! - Exact 0/1 knapsack optimization; the greedy pass is a documented
//!   approximation.
//! - Cross-process coordination: one [`BanditStore`] owns the state per
//!   persistence channel.
//! - Installing a `tracing` subscriber; embedding binaries do that.
//!
//! # Quick look
//!
//! ```
//! use promptmux::{knapsack, BanditState, Candidate, Pillar, ThompsonSelector};
//!
//! let mut selector = ThompsonSelector::with_seed(Some(42));
//! let state = BanditState::new();
//! let arm = selector.pick_arm(Pillar::Language, &state);
//!
//! let cands = vec![
//!     Candidate::new(Pillar::Language.module_id(arm), arm.default_tokens(), 1.0, 0.6),
//!     Candidate::new("closing_mini", 180, 1.0, 0.4),
//! ];
//! let picked = knapsack::solve(400, &cands);
//! assert!(picked.tokens_used <= 400);
//! ```
//!
//! # The reward
//!
//! `q` is the unweighted mean of the quality flags (structure, memory
//! grounding, technical block), rounded to 4 decimals. The reward is
//! `q − λ · tokens_total / 1000`. The arm update is asymmetric: the
//! magnitude `min(1, |reward|)` goes to `alpha` for a positive reward and to
//! `beta` for a negative one, and an exactly-neutral reward nudges `beta` by
//! [`NEUTRAL_DECAY`]. This is not the conjugate Beta–Bernoulli update; it
//! keeps the arithmetic bounded for rewards outside `[0, 1]`.

#![forbid(unsafe_code)]

mod arms;
pub use arms::*;

mod config;
pub use config::*;

mod decision;
pub use decision::*;

mod engine;
pub use engine::*;

mod error;
pub use error::*;

pub mod knapsack;
pub use knapsack::{Candidate, KnapsackResult};

pub mod quality;
pub use quality::{compute_q, QualityFacts, QualityFlags};

mod rng;
pub use rng::*;

mod sampling;
pub use sampling::*;

mod sink;
pub use sink::*;

mod store;
pub use store::*;

mod thompson;
pub use thompson::*;
