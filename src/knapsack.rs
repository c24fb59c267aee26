//! Token-budget module selection.
//!
//! Greedy, integral selection in descending `vpt_mean × prior_weight` order.
//! This is an approximation, not 0/1-knapsack optimality: a lower-ranked small
//! module can be left out even when it would have let two larger high-ranked
//! modules fit. Candidate counts are small (tens at most), so the greedy pass
//! is preferred for latency.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A selectable context module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    /// Token cost. Zero-cost candidates are never adopted.
    pub tokens: u32,
    pub prior_weight: f64,
    /// Estimated value per token.
    pub vpt_mean: f64,
    /// Optional `(lower, upper)` interval around `vpt_mean`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpt_interval: Option<(f64, f64)>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, tokens: u32, prior_weight: f64, vpt_mean: f64) -> Self {
        Self {
            id: id.into(),
            tokens,
            prior_weight,
            vpt_mean,
            vpt_interval: None,
        }
    }

    pub fn with_interval(mut self, lower: f64, upper: f64) -> Self {
        self.vpt_interval = Some((lower, upper));
        self
    }

    /// Ranking score and gain contribution: `vpt_mean × prior_weight`.
    pub fn score(&self) -> f64 {
        self.vpt_mean * self.prior_weight
    }

    /// Worst-case value estimate; the point estimate when no interval is known.
    fn lower_bound(&self) -> f64 {
        match self.vpt_interval {
            Some((lo, _)) if lo.is_finite() => lo,
            _ => self.vpt_mean,
        }
    }

    fn sanitized(&self) -> Option<Self> {
        let id = self.id.trim();
        if id.is_empty() || self.tokens == 0 {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            tokens: self.tokens,
            prior_weight: if self.prior_weight.is_finite() && self.prior_weight >= 0.0 {
                self.prior_weight
            } else {
                0.0
            },
            vpt_mean: if self.vpt_mean.is_finite() {
                self.vpt_mean
            } else {
                0.0
            },
            vpt_interval: self.vpt_interval,
        })
    }
}

/// Outcome of [`solve`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KnapsackResult {
    /// Adopted candidates in adoption order. Ids are unique.
    pub adopted: Vec<Candidate>,
    /// Sum of adopted scores, rounded to 4 decimals.
    pub estimated_gain: f64,
    /// Always `<= budget`.
    pub tokens_used: u32,
}

impl KnapsackResult {
    pub fn adopted_ids(&self) -> Vec<String> {
        self.adopted.iter().map(|c| c.id.clone()).collect()
    }
}

// Scores are compared on a 1e-9 grid so the ordering stays total.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    let grid = |x: f64| (x * 1e9).round();
    grid(b.score())
        .total_cmp(&grid(a.score()))
        .then_with(|| b.lower_bound().total_cmp(&a.lower_bound()))
}

/// Pick candidates under `budget_tokens`.
///
/// - Rank by score descending; near-equal scores prefer the higher interval
///   lower bound; remaining ties keep input order.
/// - Accept each ranked candidate whose cost fits in what is left.
/// - A zero budget or empty candidate list yields an empty result.
pub fn solve(budget_tokens: u32, candidates: &[Candidate]) -> KnapsackResult {
    if budget_tokens == 0 || candidates.is_empty() {
        return KnapsackResult::default();
    }

    let mut pool: Vec<Candidate> = candidates.iter().filter_map(Candidate::sanitized).collect();
    pool.sort_by(rank);

    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut remaining = budget_tokens;
    let mut gain = 0.0;
    let mut adopted = Vec::new();
    for c in pool {
        // Only the highest-ranked occurrence of an id is considered.
        if !seen.insert(c.id.clone()) || c.tokens > remaining {
            continue;
        }
        remaining -= c.tokens;
        gain += c.score();
        adopted.push(c);
        if remaining == 0 {
            break;
        }
    }

    KnapsackResult {
        adopted,
        estimated_gain: round4(gain),
        tokens_used: budget_tokens - remaining,
    }
}

pub(crate) fn round4(x: f64) -> f64 {
    if x.is_finite() {
        (x * 10_000.0).round() / 10_000.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn abc() -> Vec<Candidate> {
        vec![
            Candidate::new("A", 200, 0.9, 0.7),
            Candidate::new("B", 100, 1.1, 0.5),
            Candidate::new("C", 400, 0.4, 0.8),
        ]
    }

    #[test]
    fn single_slot_goes_to_best_score() {
        let r = solve(250, &abc());
        assert_eq!(r.adopted_ids(), vec!["A"]);
        assert_eq!(r.tokens_used, 200);
        assert!((r.estimated_gain - 0.63).abs() < 1e-9);
    }

    #[test]
    fn two_slots_in_rank_order() {
        let r = solve(600, &abc());
        assert_eq!(r.adopted_ids(), vec!["A", "B"]);
        assert_eq!(r.tokens_used, 300);
        assert!((r.estimated_gain - 1.18).abs() < 1e-9);
    }

    #[test]
    fn empty_inputs_are_not_errors() {
        assert_eq!(solve(0, &abc()), KnapsackResult::default());
        assert_eq!(solve(500, &[]), KnapsackResult::default());
    }

    #[test]
    fn zero_token_and_blank_candidates_are_skipped() {
        let cands = vec![
            Candidate::new("free", 0, 1.0, 10.0),
            Candidate::new("   ", 10, 1.0, 10.0),
            Candidate::new("ok", 10, 1.0, 0.1),
        ];
        let r = solve(100, &cands);
        assert_eq!(r.adopted_ids(), vec!["ok"]);
    }

    #[test]
    fn ties_prefer_stronger_lower_bound() {
        let cands = vec![
            Candidate::new("wide", 100, 1.0, 0.5).with_interval(0.1, 0.9),
            Candidate::new("tight", 100, 1.0, 0.5).with_interval(0.45, 0.55),
        ];
        let r = solve(100, &cands);
        assert_eq!(r.adopted_ids(), vec!["tight"]);
    }

    #[test]
    fn duplicate_ids_adopted_once() {
        let cands = vec![
            Candidate::new("x", 10, 1.0, 0.9),
            Candidate::new("x", 10, 1.0, 0.8),
        ];
        let r = solve(100, &cands);
        assert_eq!(r.adopted_ids(), vec!["x"]);
        assert_eq!(r.tokens_used, 10);
    }

    #[test]
    fn non_finite_values_rank_last() {
        let cands = vec![
            Candidate::new("nan", 10, 1.0, f64::NAN),
            Candidate::new("good", 10, 1.0, 0.2),
        ];
        let r = solve(10, &cands);
        assert_eq!(r.adopted_ids(), vec!["good"]);
    }

    proptest! {
        #[test]
        fn never_exceeds_budget(
            budget in 0u32..5_000,
            raw in proptest::collection::vec(
                ("[a-e]{1,2}", 0u32..2_000, -1.0f64..3.0, -1.0f64..3.0),
                0..20,
            ),
        ) {
            let cands: Vec<Candidate> = raw
                .into_iter()
                .map(|(id, t, w, v)| Candidate::new(id, t, w, v))
                .collect();
            let r = solve(budget, &cands);
            prop_assert!(r.tokens_used <= budget);
            let sum: u32 = r.adopted.iter().map(|c| c.tokens).sum();
            prop_assert_eq!(sum, r.tokens_used);
            let ids: BTreeSet<String> = r.adopted.iter().map(|c| c.id.clone()).collect();
            prop_assert_eq!(ids.len(), r.adopted.len());
        }
    }
}
