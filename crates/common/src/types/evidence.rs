use serde::{Deserialize, Serialize};

use super::screening::TrustLevel;

/// How a piece of evidence bears on its claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relationship {
    Supports,
    Refutes,
    Irrelevant,
    /// Reused from a previously verified claim; counts toward neither side.
    Cached,
}

impl Relationship {
    /// Case-insensitive parse of a label produced by the verifier model.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "SUPPORTS" | "SUPPORT" => Some(Self::Supports),
            "REFUTES" | "REFUTE" => Some(Self::Refutes),
            "IRRELEVANT" => Some(Self::Irrelevant),
            "CACHED" => Some(Self::Cached),
            _ => None,
        }
    }
}

/// A passage retrieved for a claim.
///
/// The position of an evidence item within its claim's list is stable from
/// retrieval through verification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub claim: String,
    pub text: String,
    pub url: String,
    pub trust_level: TrustLevel,
    /// Unset until the verifier has labeled the item.
    #[serde(default)]
    pub relationship: Option<Relationship>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl Evidence {
    pub fn new(
        claim: impl Into<String>,
        text: impl Into<String>,
        url: impl Into<String>,
        trust_level: TrustLevel,
    ) -> Self {
        Self {
            claim: claim.into(),
            text: text.into(),
            url: url.into(),
            trust_level,
            relationship: None,
            reasoning: None,
        }
    }

    pub fn label(&mut self, relationship: Relationship, reasoning: impl Into<String>) {
        self.relationship = Some(relationship);
        self.reasoning = Some(reasoning.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_parse() {
        assert_eq!(Relationship::parse("supports"), Some(Relationship::Supports));
        assert_eq!(Relationship::parse(" REFUTES "), Some(Relationship::Refutes));
        assert_eq!(Relationship::parse("Irrelevant"), Some(Relationship::Irrelevant));
        assert_eq!(Relationship::parse("maybe"), None);
    }

    #[test]
    fn test_evidence_serializes_upper_relationship() {
        let mut ev = Evidence::new("c", "t", "https://a.org", TrustLevel::High);
        ev.label(Relationship::Refutes, "contradicts");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["relationship"], "REFUTES");
        assert_eq!(json["trust_level"], "high");
    }
}
