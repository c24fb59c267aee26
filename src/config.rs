//! Policy configuration.
//!
//! Every field has a documented default. Environment overrides that fail to
//! parse are logged and replaced by the default, never rejected.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Env var for the additive token budget.
pub const ENV_BUDGET: &str = "ECO_BUDGET_ADDITIVE_TOKENS";
/// Older spelling of [`ENV_BUDGET`], read when the new one is unset.
pub const ENV_BUDGET_LEGACY: &str = "ECO_BUDGET_ADITIVO_TOKENS";
/// Env var for the reward token-cost regularizer λ.
pub const ENV_LAMBDA: &str = "BANDIT_LAMBDA";
/// Env var for the selector seed (`0` ⇒ entropy).
pub const ENV_SEED: &str = "BANDIT_SEED";
/// Env var for the state file path.
pub const ENV_STATE_PATH: &str = "BANDIT_STATE_PATH";

pub const DEFAULT_BUDGET_TOKENS: u32 = 800;
pub const DEFAULT_LAMBDA: f64 = 0.01;
/// Value-per-token assumed for a module with no history.
pub const DEFAULT_VPT: f64 = 0.6;
pub const DEFAULT_STATE_PATH: &str = ".cache/bandits.json";

/// Configuration for a [`crate::PolicyEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Token budget for additive modules.
    pub budget_tokens: u32,
    /// Reward penalty per 1000 total tokens (≥ 0).
    pub lambda: f64,
    /// Selector seed; `None` draws from OS entropy.
    pub seed: Option<u64>,
    /// State file used by [`crate::PolicyEngine::from_config`].
    pub state_path: PathBuf,
    /// Modules always included ahead of the additive ones.
    pub base_modules: Vec<String>,
    /// Neutral value-per-token estimate for modules without history.
    pub default_vpt: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            budget_tokens: DEFAULT_BUDGET_TOKENS,
            lambda: DEFAULT_LAMBDA,
            seed: None,
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            base_modules: [
                "IDENTITY_min",
                "RESPONSE_STRUCTURE_min",
                "MEMORY_USAGE",
                "TECHNICAL_BLOCK",
                "METHOD_LEAN_min",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            default_vpt: DEFAULT_VPT,
        }
    }
}

impl PolicyConfig {
    /// Defaults overridden from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        let budget = lookup(ENV_BUDGET)
            .map(|v| (ENV_BUDGET, v))
            .or_else(|| lookup(ENV_BUDGET_LEGACY).map(|v| (ENV_BUDGET_LEGACY, v)));
        if let Some((key, raw)) = budget {
            cfg.budget_tokens = parse_budget(&raw).unwrap_or_else(|| {
                tracing::warn!(
                    key,
                    value = %raw,
                    default = DEFAULT_BUDGET_TOKENS,
                    "invalid token budget, using default"
                );
                DEFAULT_BUDGET_TOKENS
            });
        }

        if let Some(raw) = lookup(ENV_LAMBDA) {
            cfg.lambda = parse_lambda(&raw).unwrap_or_else(|| {
                tracing::warn!(
                    key = ENV_LAMBDA,
                    value = %raw,
                    default = DEFAULT_LAMBDA,
                    "invalid lambda, using default"
                );
                DEFAULT_LAMBDA
            });
        }

        if let Some(raw) = lookup(ENV_SEED) {
            match raw.trim().parse::<u64>() {
                Ok(0) => cfg.seed = None,
                Ok(seed) => cfg.seed = Some(seed),
                Err(error) => {
                    tracing::warn!(
                        key = ENV_SEED,
                        value = %raw,
                        %error,
                        "invalid seed, using entropy"
                    );
                }
            }
        }

        if let Some(raw) = lookup(ENV_STATE_PATH) {
            let raw = raw.trim();
            if !raw.is_empty() {
                cfg.state_path = PathBuf::from(raw);
            }
        }

        cfg
    }

    pub fn with_budget(mut self, budget_tokens: u32) -> Self {
        self.budget_tokens = budget_tokens;
        self
    }

    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = if lambda.is_finite() && lambda >= 0.0 {
            lambda
        } else {
            DEFAULT_LAMBDA
        };
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = (seed != 0).then_some(seed);
        self
    }

    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = path.into();
        self
    }

    pub fn with_base_modules(
        mut self,
        modules: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.base_modules = modules.into_iter().map(Into::into).collect();
        self
    }
}

// Fractional values are truncated.
fn parse_budget(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u32>() {
        return Some(n);
    }
    let x = raw.parse::<f64>().ok()?;
    (x.is_finite() && x >= 0.0 && x <= u32::MAX as f64).then(|| x.floor() as u32)
}

fn parse_lambda(raw: &str) -> Option<f64> {
    let x = raw.trim().parse::<f64>().ok()?;
    (x.is_finite() && x >= 0.0).then_some(x)
}
