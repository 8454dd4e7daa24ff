use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::LessonId;

/// Coarse reputation class of an information source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    High,
    Neutral,
    Low,
    #[default]
    Unknown,
}

impl TrustLevel {
    /// Map a factual-reporting rating ("VERY HIGH", "mostly factual", ...) to a tier.
    pub fn from_credibility(credibility: &str) -> Self {
        match credibility.trim().to_uppercase().as_str() {
            "VERY HIGH" | "HIGH" => Self::High,
            "LOW" | "VERY LOW" => Self::Low,
            "" | "UNKNOWN" | "N/A" => Self::Unknown,
            _ => Self::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Neutral => "neutral",
            Self::Low => "low",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reputation record for a single domain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Registered domain without scheme or leading "www.".
    pub domain: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bias: String,
    /// Uppercased factual-reporting rating.
    pub credibility: String,
    #[serde(default)]
    pub country: String,
}

impl SourceRecord {
    pub fn trust_level(&self) -> TrustLevel {
        TrustLevel::from_credibility(&self.credibility)
    }
}

/// Coarse label learned from past pipeline runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisorLabel {
    Opinion,
    Verifiable,
    NoClaims,
}

impl AdvisorLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opinion => "opinion",
            Self::Verifiable => "verifiable",
            Self::NoClaims => "no_claims",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "opinion" => Some(Self::Opinion),
            "verifiable" => Some(Self::Verifiable),
            "no_claims" => Some(Self::NoClaims),
            _ => None,
        }
    }
}

/// Majority label among semantically similar past documents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdvisorPrior {
    pub label: AdvisorLabel,
    /// Neighbours that voted for `label`.
    pub votes: usize,
    /// Neighbours consulted.
    pub neighbours: usize,
    pub nearest_distance: f64,
}

/// Outcome of the screening gate.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScreeningVerdict {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub trust_level: TrustLevel,
    pub sensationalism: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisor_prior: Option<AdvisorPrior>,
    /// Set when the document is screened out; carries the user-facing warning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ScreeningVerdict {
    pub fn is_early_exit(&self) -> bool {
        self.warning.is_some()
    }
}

/// A finished pipeline run, fed back into the screening advisor's memory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScreeningLesson {
    pub id: LessonId,
    pub text: String,
    pub label: AdvisorLabel,
    pub recorded_at: DateTime<Utc>,
}

impl ScreeningLesson {
    pub fn new(text: impl Into<String>, label: AdvisorLabel) -> Self {
        Self {
            id: LessonId::new(),
            text: text.into(),
            label,
            recorded_at: Utc::now(),
        }
    }
}
