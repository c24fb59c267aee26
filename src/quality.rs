//! Cheap text-quality heuristics and the scalar reward derived from them.
//!
//! Three independent pass/fail checks feed an unweighted mean `q ∈ [0, 1]`.
//! Adding a check means adding a field to [`QualityFlags`] and to
//! [`QualityFlags::as_array`]; the mean divisor follows the array length.

use serde::{Deserialize, Serialize};

use crate::knapsack::round4;

/// Intensity (0–10 scale) at or above which a technical block is expected.
pub const TECHNICAL_BLOCK_INTENSITY: f64 = 7.0;

/// Normalized length above which a response counts as substantive even
/// without a context/diagnosis section.
pub const MIN_SUBSTANTIVE_CHARS: usize = 80;

/// Trailing characters of a memory id accepted as a trace of that id.
pub const MEMORY_TAIL_CHARS: usize = 6;

const CONTEXT_KEYWORDS: &[&str] = &[
    "contexto",
    "fundamentacao",
    "analise",
    "diagnostico",
    "context",
    "analysis",
    "diagnosis",
];
const PLAN_KEYWORDS: &[&str] = &[
    "plano",
    "estrategia",
    "proposta",
    "plan",
    "strategy",
    "proposal",
];
const ACTION_KEYWORDS: &[&str] = &[
    "acao",
    "passos",
    "next steps",
    "plano de acao",
    "action",
    "steps",
];

/// Facts about the response that the checks need besides its text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityFacts {
    /// Detected emotional intensity, 0–10.
    pub detected_intensity: f64,
    /// Memory ids the response was expected to draw on.
    pub memory_ids: Vec<String>,
}

/// Independent pass/fail checks for one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QualityFlags {
    pub structure_ok: bool,
    pub memory_ok: bool,
    pub technical_block_ok: bool,
}

impl QualityFlags {
    /// Run every check against `text`.
    pub fn evaluate(text: &str, facts: &QualityFacts) -> Self {
        Self {
            structure_ok: check_structure(text),
            memory_ok: check_memory(text, &facts.memory_ids),
            technical_block_ok: check_technical_block(text, facts.detected_intensity),
        }
    }

    pub fn as_array(&self) -> [bool; 3] {
        [self.structure_ok, self.memory_ok, self.technical_block_ok]
    }

    pub fn passed(&self) -> usize {
        self.as_array().iter().filter(|&&f| f).count()
    }
}

/// Unweighted mean of the flags, rounded to 4 decimals.
pub fn compute_q(flags: &QualityFlags) -> f64 {
    let all = flags.as_array();
    round4(flags.passed() as f64 / all.len() as f64)
}

/// `q − λ · tokens_total / 1000`, rounded to 4 decimals.
///
/// A negative or non-finite `lambda` is treated as zero.
pub fn reward(q: f64, tokens_total: u64, lambda: f64) -> f64 {
    let lambda = if lambda.is_finite() && lambda > 0.0 {
        lambda
    } else {
        0.0
    };
    round4(q - lambda * (tokens_total as f64 / 1000.0))
}

fn fold_diacritic(c: char) -> Option<char> {
    let base = match c {
        '\u{0300}'..='\u{036f}' => return None,
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        'ñ' => 'n',
        'Ñ' => 'N',
        other => other,
    };
    Some(base)
}

/// Strip diacritics from text.
///
/// Combining marks (U+0300–U+036F) are always removed. Precomposed letters
/// are folded only for the Portuguese/Spanish set: `á à â ã ä å é è ê ë í ì
/// î ï ó ò ô õ ö ú ù û ü ç ñ` and their capitals. Other precomposed letters
/// such as `ý`, `ś` or `ł` pass through unchanged; write them decomposed to
/// have their marks stripped.
pub fn strip_diacritics(text: &str) -> String {
    text.chars().filter_map(fold_diacritic).collect()
}

/// Diacritics stripped, lower-cased.
pub fn normalize(text: &str) -> String {
    strip_diacritics(text).to_lowercase()
}

fn alphanumeric_only(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

fn strip_line_markers(line: &str) -> &str {
    let line = line.trim_start_matches(|c: char| c.is_whitespace() || "#*_>-•".contains(c));
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(|c: char| c == '.' || c == ')') {
            return rest.trim_start();
        }
    }
    line
}

fn line_opens_section(normalized: &str, keywords: &[&str], whole_word: bool) -> bool {
    normalized.lines().map(strip_line_markers).any(|line| {
        keywords.iter().any(|kw| match line.strip_prefix(*kw) {
            Some(rest) => !whole_word || !rest.starts_with(|c: char| c.is_alphanumeric()),
            None => false,
        })
    })
}

/// Requires a plan section and an action section, plus either a
/// context/diagnosis section or a substantive length.
///
/// Sections are recognized by keyword at the start of a line (after optional
/// markdown heading/list markers), diacritics and case ignored.
pub fn check_structure(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    let normalized = normalize(text);
    let has_plan = line_opens_section(&normalized, PLAN_KEYWORDS, true);
    let has_action = line_opens_section(&normalized, ACTION_KEYWORDS, false);
    let has_context = line_opens_section(&normalized, CONTEXT_KEYWORDS, true);
    has_plan
        && has_action
        && (has_context || normalized.chars().count() > MIN_SUBSTANTIVE_CHARS)
}

/// Passes when no (non-blank) memory ids were supplied; otherwise requires a
/// literal trace of at least one id: the id itself, its alphanumeric-only
/// form, or its last [`MEMORY_TAIL_CHARS`] characters.
pub fn check_memory(text: &str, memory_ids: &[String]) -> bool {
    let ids: Vec<String> = memory_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(normalize)
        .collect();
    if ids.is_empty() {
        return true;
    }

    let haystack = normalize(text);
    let haystack_alnum = alphanumeric_only(&haystack);
    ids.iter().any(|id| {
        if haystack.contains(id.as_str()) {
            return true;
        }
        let id_alnum = alphanumeric_only(id);
        if !id_alnum.is_empty() && haystack_alnum.contains(&id_alnum) {
            return true;
        }
        let n = id.chars().count();
        let tail: String = id.chars().skip(n.saturating_sub(MEMORY_TAIL_CHARS)).collect();
        tail.chars().count() >= 3 && haystack.contains(&tail)
    })
}

fn is_list_item(line: &str) -> bool {
    let line = line.trim_start();
    if let Some(rest) = line.strip_prefix(|c: char| matches!(c, '-' | '*' | '•')) {
        return rest.starts_with(char::is_whitespace);
    }
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    digits > 0
        && line[digits..]
            .strip_prefix(|c: char| c == '.' || c == ')')
            .is_some_and(|rest| rest.starts_with(char::is_whitespace))
}

fn has_block_header(text: &str) -> bool {
    let upper = strip_diacritics(text).to_uppercase();
    let words: Vec<&str> = upper
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .collect();
    words.windows(2).any(|pair| {
        matches!(
            (pair[0], pair[1]),
            ("BLOCO", "TECNICO") | ("TECHNICAL", "BLOCK")
        )
    })
}

/// Below [`TECHNICAL_BLOCK_INTENSITY`] this always passes. At or above it the
/// response must carry a technical block header, a fenced code block, or a
/// bulleted/numbered list.
pub fn check_technical_block(text: &str, detected_intensity: f64) -> bool {
    if !(detected_intensity >= TECHNICAL_BLOCK_INTENSITY) {
        return true;
    }
    if text.trim().is_empty() {
        return false;
    }
    has_block_header(text) || text.contains("```") || text.lines().any(is_list_item)
}
