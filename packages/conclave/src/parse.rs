//! Critic output parsing and confidence scoring.
//!
//! Critics respond with a block of `- Label: value` lines. The parser is
//! deliberately forgiving: case-insensitive labels, tolerated whitespace,
//! aliases, and defaults for anything missing. It never fails: a critic
//! that rambles instead of following the format yields a zero-filled
//! judgment rather than an error.

use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};

use crate::judgment::CriticJudgment;

/// Phrases that lower the heuristic confidence estimate.
pub const UNCERTAINTY_TERMS: &[&str] = &[
    "uncertain",
    "not sure",
    "unknown",
    "unclear",
    "ambiguous",
    "may",
    "might",
    "could",
    "possibly",
    "perhaps",
];

/// Explicit self-reported low-confidence markers; penalized harder.
pub const LOW_CONFIDENCE_MARKERS: &[&str] = &[
    "not confident",
    "low confidence",
    "guess",
    "speculative",
    "estimate",
];

/// Protected-class terms scanned by the rights conflict check.
pub const PROTECTED_CLASSES: &[&str] = &[
    "race",
    "ethnicity",
    "gender",
    "sex",
    "sexual orientation",
    "religion",
    "faith",
    "disability",
    "age",
    "nationality",
    "origin",
    "immigration",
    "pregnancy",
    "veteran",
];

lazy_static! {
    static ref CLAIM_RE: Regex = label_regex("Claim");
    static ref EVIDENCE_RE: Regex = label_regex("Evidence");
    static ref PRINCIPLE_RE: Regex = label_regex("Constitutional Principle");
    static ref PRINCIPLE_SHORT_RE: Regex = label_regex("Principle");
    static ref CONFIDENCE_RE: Regex = label_regex("Confidence");
    static ref MITIGATION_RE: Regex = label_regex("Mitigation");
    static ref SCORE_RE: Regex = label_regex("Score");
    static ref VIOLATION_RE: Regex = label_regex("Violation");
    static ref NUMBER_RE: Regex = Regex::new(r"[0-9]*\.?[0-9]+").expect("static regex");
}

fn label_regex(label: &str) -> Regex {
    RegexBuilder::new(&format!(r"-\s*{}\s*:\s*(.*)", regex::escape(label)))
        .case_insensitive(true)
        .build()
        .expect("static regex")
}

fn extract(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First numeric substring of `raw`, or 0.0.
fn first_number(raw: &str) -> f64 {
    NUMBER_RE
        .find(raw)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Parse a critic's accumulated text into a judgment.
///
/// Recognized labels: `Claim`, `Evidence`, `Constitutional Principle`
/// (alias `Principle`, default `None`), `Confidence` (first numeric
/// substring), `Mitigation`, and optionally `Score` and `Violation` for
/// critics that report them inline.
pub fn parse_critic_output(text: &str) -> CriticJudgment {
    let principle = extract(&PRINCIPLE_RE, text)
        .or_else(|| extract(&PRINCIPLE_SHORT_RE, text))
        .unwrap_or_else(|| "None".to_string());

    let confidence = extract(&CONFIDENCE_RE, text)
        .map(|raw| first_number(&raw))
        .unwrap_or(0.0);

    let score = extract(&SCORE_RE, text)
        .map(|raw| first_number(&raw))
        .unwrap_or(0.0);

    let violation = extract(&VIOLATION_RE, text)
        .map(|raw| {
            let lowered = raw.to_lowercase();
            lowered.starts_with("yes") || lowered.starts_with("true") || lowered.starts_with('1')
        })
        .unwrap_or(false);

    CriticJudgment {
        score,
        confidence,
        violation,
        rationale: String::new(),
        claim: extract(&CLAIM_RE, text).unwrap_or_default(),
        evidence: extract(&EVIDENCE_RE, text).unwrap_or_default(),
        principle,
        mitigation: extract(&MITIGATION_RE, text).unwrap_or_default(),
    }
    .clamped()
}

/// Confidence from per-token log-probabilities: `exp(mean)`, clipped to
/// `[0, 0.99]`. Empty input scores zero.
pub fn confidence_from_logprobs(logprobs: &[f64]) -> f64 {
    if logprobs.is_empty() {
        return 0.0;
    }
    let mean = logprobs.iter().sum::<f64>() / logprobs.len() as f64;
    mean.exp().clamp(0.0, 0.99)
}

/// Heuristic confidence when logprobs are unavailable.
///
/// Longer coherent text earns a modest bonus; hedging phrases and explicit
/// low-confidence markers are penalized. Clipped to `[0, 0.9]`.
pub fn heuristic_confidence(text: &str, base: f64) -> f64 {
    let lowered = text.to_lowercase();
    let penalty = UNCERTAINTY_TERMS
        .iter()
        .filter(|term| lowered.contains(*term))
        .count() as f64
        * 0.05
        + LOW_CONFIDENCE_MARKERS
            .iter()
            .filter(|term| lowered.contains(*term))
            .count() as f64
            * 0.07;
    let length_bonus = (text.len() as f64 / 500.0 * 0.1).min(0.15);
    (base + length_bonus - penalty).clamp(0.0, 0.9)
}
