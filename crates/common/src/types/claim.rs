use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::evidence::Evidence;

pub const NO_CONCLUSIVE_EVIDENCE: &str = "No conclusive evidence found.";
pub const NOTHING_TO_CHECK: &str = "Nothing to check.";

/// Checkworthiness verdict for one claim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckworthyDecision {
    pub claim: String,
    pub checkworthy: bool,
    /// The model's answer, prefixed with "Yes" or "No".
    pub reason: String,
}

/// Search queries for one claim. The first query is always the claim itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClaimQueries {
    pub claim: String,
    pub queries: Vec<String>,
}

impl ClaimQueries {
    /// Queries consisting only of the claim text.
    pub fn claim_only(claim: impl Into<String>) -> Self {
        let claim = claim.into();
        Self {
            queries: vec![claim.clone()],
            claim,
        }
    }

    pub fn primary(&self) -> &str {
        self.queries.first().map(String::as_str).unwrap_or(&self.claim)
    }
}

/// Per-claim factuality: a score in [0, 1] or one of two sentinels.
///
/// Serialized as a bare number or the sentinel's message string.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Factuality {
    Score(f64),
    NoConclusiveEvidence,
    NothingToCheck,
}

impl Factuality {
    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Score(s) => Some(*s),
            _ => None,
        }
    }
}

impl fmt::Display for Factuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Score(s) => write!(f, "{s}"),
            Self::NoConclusiveEvidence => f.write_str(NO_CONCLUSIVE_EVIDENCE),
            Self::NothingToCheck => f.write_str(NOTHING_TO_CHECK),
        }
    }
}

impl Serialize for Factuality {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Score(s) => serializer.serialize_f64(*s),
            Self::NoConclusiveEvidence => serializer.serialize_str(NO_CONCLUSIVE_EVIDENCE),
            Self::NothingToCheck => serializer.serialize_str(NOTHING_TO_CHECK),
        }
    }
}

impl<'de> Deserialize<'de> for Factuality {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self::Score(n)),
            Raw::Text(t) if t == NO_CONCLUSIVE_EVIDENCE => Ok(Self::NoConclusiveEvidence),
            Raw::Text(t) if t == NOTHING_TO_CHECK => Ok(Self::NothingToCheck),
            Raw::Text(t) => Err(serde::de::Error::custom(format!(
                "unknown factuality sentinel: {t}"
            ))),
        }
    }
}

/// Aggregated verification record for a single claim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClaimDetail {
    /// 1-based position in the deduplicated claim list.
    pub id: usize,
    pub claim: String,
    pub checkworthy: bool,
    pub checkworthy_reason: String,
    pub queries: Vec<String>,
    pub evidences: Vec<Evidence>,
    pub factuality: Factuality,
}
