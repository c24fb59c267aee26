//! Thompson sampling over the pillar × arm grid.
//!
//! One Beta posterior per (pillar, arm). Selection samples every arm of a
//! pillar and keeps the maximum; feedback moves the posterior with a bounded,
//! asymmetric update (see [`BanditState::update_arm`]).
//!
//! Notes:
//! - The selector is **seedable** so arm sequences are reproducible in tests.
//! - Selection never mutates the state; only feedback does.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::arms::{Arm, Pillar};
use crate::rng::{uniform_source, UniformSource};
use crate::sampling::sample_beta;

/// Lower bound kept on every `alpha` / `beta`.
pub const MIN_SHAPE: f64 = 1e-6;

/// Increment applied to `beta` on an exactly-neutral reward.
pub const NEUTRAL_DECAY: f64 = 0.01;

/// Beta posterior state for one (pillar, arm) cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
    pub alpha: f64,
    pub beta: f64,
    pub pulls: u64,
}

impl ArmStats {
    /// Uniform prior: `Beta(1, 1)`, never pulled.
    pub const PRIOR: ArmStats = ArmStats {
        alpha: 1.0,
        beta: 1.0,
        pulls: 0,
    };

    /// Posterior mean, `0.5` when the denominator is degenerate.
    pub fn expected_value(&self) -> f64 {
        let denom = self.alpha + self.beta;
        if denom <= 0.0 || !denom.is_finite() {
            0.5
        } else {
            self.alpha / denom
        }
    }

    fn from_value(v: &Value) -> Option<Self> {
        let alpha = v.get("alpha")?.as_f64()?;
        let beta = v.get("beta")?.as_f64()?;
        let pulls = v.get("pulls")?.as_f64()?;
        let shape_ok = |x: f64| x.is_finite() && x > 0.0;
        if !shape_ok(alpha) || !shape_ok(beta) || !pulls.is_finite() || pulls < 0.0 {
            return None;
        }
        Some(Self {
            alpha: alpha.max(MIN_SHAPE),
            beta: beta.max(MIN_SHAPE),
            pulls: pulls.floor() as u64,
        })
    }
}

impl Default for ArmStats {
    fn default() -> Self {
        Self::PRIOR
    }
}

/// Posterior for every (pillar, arm) pair. Never sparse.
///
/// Serializes as `{ pillar: { arm: { alpha, beta, pulls } } }`. Deserialization
/// is lenient at the leaf level: a missing or invalid leaf is replaced by
/// [`ArmStats::PRIOR`] instead of rejecting the record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BanditState {
    cells: BTreeMap<Pillar, BTreeMap<Arm, ArmStats>>,
}

impl BanditState {
    /// Every cell at the uniform prior.
    pub fn new() -> Self {
        let cells = Pillar::ALL
            .into_iter()
            .map(|p| (p, Arm::ALL.into_iter().map(|a| (a, ArmStats::PRIOR)).collect()))
            .collect();
        Self { cells }
    }

    /// Rebuild a state from an arbitrary JSON value, repairing bad leaves.
    pub fn from_json_value(raw: &Value) -> Self {
        let mut state = Self::new();
        for pillar in Pillar::ALL {
            for arm in Arm::ALL {
                let leaf = raw
                    .get(pillar.as_str())
                    .and_then(|p| p.get(arm.as_str()))
                    .and_then(ArmStats::from_value);
                if let Some(stats) = leaf {
                    state.set(pillar, arm, stats);
                }
            }
        }
        state
    }

    pub fn stats(&self, pillar: Pillar, arm: Arm) -> ArmStats {
        self.cells
            .get(&pillar)
            .and_then(|arms| arms.get(&arm))
            .copied()
            .unwrap_or(ArmStats::PRIOR)
    }

    fn stats_mut(&mut self, pillar: Pillar, arm: Arm) -> &mut ArmStats {
        self.cells
            .entry(pillar)
            .or_default()
            .entry(arm)
            .or_insert(ArmStats::PRIOR)
    }

    /// Overwrite one cell, keeping the shape floor.
    pub fn set(&mut self, pillar: Pillar, arm: Arm, stats: ArmStats) {
        *self.stats_mut(pillar, arm) = ArmStats {
            alpha: floor_shape(stats.alpha),
            beta: floor_shape(stats.beta),
            pulls: stats.pulls,
        };
    }

    /// Iterate all cells in (pillar, arm) order.
    pub fn iter(&self) -> impl Iterator<Item = (Pillar, Arm, ArmStats)> + '_ {
        self.cells
            .iter()
            .flat_map(|(p, arms)| arms.iter().map(move |(a, s)| (*p, *a, *s)))
    }

    /// Sum of `pulls` over every cell.
    pub fn total_pulls(&self) -> u64 {
        self.iter().map(|(_, _, s)| s.pulls).sum()
    }

    /// Apply one reward to one arm.
    ///
    /// Magnitude is clamped: `normalized = min(1, max(0, |reward|))`.
    /// - `reward > 0`: `alpha += normalized`
    /// - `reward < 0`: `beta += normalized`
    /// - `reward == 0` (or NaN): `beta += NEUTRAL_DECAY`
    ///
    /// `pulls` always increments by one.
    ///
    /// This is not the conjugate Beta–Bernoulli update (`alpha += r`,
    /// `beta += 1 - r`): a positive reward never adds to `beta`, and negative
    /// rewards count as failures by magnitude.
    pub fn update_arm(&mut self, pillar: Pillar, arm: Arm, reward: f64) {
        let s = self.stats_mut(pillar, arm);
        if reward.is_nan() || reward == 0.0 {
            s.beta += NEUTRAL_DECAY;
        } else {
            let normalized = reward.abs().clamp(0.0, 1.0);
            if reward > 0.0 {
                s.alpha += normalized;
            } else {
                s.beta += normalized;
            }
        }
        s.alpha = floor_shape(s.alpha);
        s.beta = floor_shape(s.beta);
        s.pulls = s.pulls.saturating_add(1);
    }
}

fn floor_shape(x: f64) -> f64 {
    if x.is_finite() {
        x.max(MIN_SHAPE)
    } else if x > 0.0 {
        f64::MAX
    } else {
        MIN_SHAPE
    }
}

impl Default for BanditState {
    fn default() -> Self {
        Self::new()
    }
}

impl<'de> Deserialize<'de> for BanditState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(Self::from_json_value(&raw))
    }
}

/// Seedable Thompson-sampling arm selector.
pub struct ThompsonSelector {
    rng: Box<dyn UniformSource>,
}

impl ThompsonSelector {
    /// `None` or `Some(0)` draws from OS entropy; any other seed is reproducible.
    pub fn with_seed(seed: Option<u64>) -> Self {
        Self {
            rng: uniform_source(seed),
        }
    }

    /// Use a caller-supplied generator.
    pub fn with_source(rng: Box<dyn UniformSource>) -> Self {
        Self { rng }
    }

    /// Sample every arm's posterior and return the arm with the maximum draw.
    pub fn pick_arm(&mut self, pillar: Pillar, state: &BanditState) -> Arm {
        self.pick_arm_explain(pillar, state).0
    }

    /// Like [`pick_arm`](Self::pick_arm), also returning the winning sample.
    ///
    /// Exact ties keep the earlier arm in [`Arm::ALL`] order.
    pub fn pick_arm_explain(&mut self, pillar: Pillar, state: &BanditState) -> (Arm, f64) {
        let mut best = Arm::ALL[0];
        let mut best_sample = f64::NEG_INFINITY;
        for arm in Arm::ALL {
            let s = state.stats(pillar, arm);
            let x = sample_beta(self.rng.as_mut(), s.alpha, s.beta);
            if x > best_sample {
                best_sample = x;
                best = arm;
            }
        }
        (best, best_sample)
    }
}

impl Default for ThompsonSelector {
    fn default() -> Self {
        Self::with_seed(None)
    }
}

impl fmt::Debug for ThompsonSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThompsonSelector").finish_non_exhaustive()
    }
}
