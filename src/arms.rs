//! Decision axes (pillars), their variants (arms), and module naming.
//!
//! Both enumerations are closed: the bandit grid is `Pillar::ALL × Arm::ALL`
//! and every cell always exists in [`crate::BanditState`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// An independent axis of response composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pillar {
    /// Language register.
    Language,
    /// Closing behavior.
    Closing,
    /// Tone/register modulation technique.
    Modulation,
}

impl Pillar {
    /// All pillars, in decision order.
    pub const ALL: [Pillar; 3] = [Pillar::Language, Pillar::Closing, Pillar::Modulation];

    pub fn as_str(self) -> &'static str {
        match self {
            Pillar::Language => "language",
            Pillar::Closing => "closing",
            Pillar::Modulation => "modulation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }

    /// Catalog file holding the pillar's base module text.
    pub fn base_module(self) -> &'static str {
        match self {
            Pillar::Language => "NATURAL_LANGUAGE.txt",
            Pillar::Closing => "SENSITIVE_CLOSING.txt",
            Pillar::Modulation => "TONE_REGISTER_MODULATION.txt",
        }
    }

    /// Module id used for knapsack candidates and value-per-token history.
    pub fn module_id(self, arm: Arm) -> String {
        format!("{}_{}", self.as_str(), arm.as_str())
    }

    /// Catalog file for the arm variant of this pillar's base module.
    pub fn module_file(self, arm: Arm) -> String {
        arm_module_file(self.base_module(), arm)
    }
}

impl fmt::Display for Pillar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A variant strategy available on every pillar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arm {
    Full,
    Mini,
    Rules,
}

impl Arm {
    /// All arms, in tie-break priority order (earlier wins exact ties).
    pub const ALL: [Arm; 3] = [Arm::Full, Arm::Mini, Arm::Rules];

    pub fn as_str(self) -> &'static str {
        match self {
            Arm::Full => "full",
            Arm::Mini => "mini",
            Arm::Rules => "rules",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }

    /// Token cost assumed for an arm's module when no override is supplied.
    pub fn default_tokens(self) -> u32 {
        match self {
            Arm::Full => 320,
            Arm::Mini => 180,
            Arm::Rules => 120,
        }
    }
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memory retrieval mode the response was produced under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RetrieveMode {
    #[default]
    Fast,
    Deep,
}

/// Insert the arm suffix before the file extension of `base`.
///
/// `"NATURAL_LANGUAGE.txt"` + `Full` → `"NATURAL_LANGUAGE_full.txt"`.
/// Names without an extension get the suffix appended; blank names are
/// returned unchanged.
pub fn arm_module_file(base: &str, arm: Arm) -> String {
    let trimmed = base.trim();
    if trimmed.is_empty() {
        return base.to_string();
    }
    match trimmed.rfind('.') {
        Some(dot) => format!("{}_{}{}", &trimmed[..dot], arm.as_str(), &trimmed[dot..]),
        None => format!("{}_{}", trimmed, arm.as_str()),
    }
}
