use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::claim::ClaimDetail;
use super::graph::ArgumentGraph;
use super::screening::ScreeningVerdict;
use crate::ids::DocumentId;

/// Warning recorded when checkworthiness classification never produced a valid answer.
pub const WARNING_CHECKWORTHY_FAILED: &str = "checkworthy_failed";

/// Document-level factuality: mean of verified claims, "N/A", or a screening message.
#[derive(Clone, Debug, PartialEq)]
pub enum SummaryFactuality {
    Score(f64),
    NotApplicable,
    Message(String),
}

impl Serialize for SummaryFactuality {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Score(s) => serializer.serialize_f64(*s),
            Self::NotApplicable => serializer.serialize_str("N/A"),
            Self::Message(m) => serializer.serialize_str(m),
        }
    }
}

impl<'de> Deserialize<'de> for SummaryFactuality {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Self::Score(n),
            Raw::Text(t) if t == "N/A" => Self::NotApplicable,
            Raw::Text(t) => Self::Message(t),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub num_claims: usize,
    pub num_checkworthy_claims: usize,
    pub num_verified_claims: usize,
    pub num_supported_claims: usize,
    pub num_refuted_claims: usize,
    pub num_controversial_claims: usize,
    pub factuality: SummaryFactuality,
}

impl DocumentSummary {
    /// Summary for a document that was never decomposed.
    pub fn empty(factuality: SummaryFactuality) -> Self {
        Self {
            num_claims: 0,
            num_checkworthy_claims: 0,
            num_verified_claims: 0,
            num_supported_claims: 0,
            num_refuted_claims: 0,
            num_controversial_claims: 0,
            factuality,
        }
    }
}

/// Token usage of one pipeline stage.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageUsage {
    #[serde(default)]
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl StageUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineUsage {
    pub screening: StageUsage,
    pub decomposer: StageUsage,
    pub checkworthy: StageUsage,
    pub query_generator: StageUsage,
    pub evidence_crawler: StageUsage,
    pub claimverify: StageUsage,
}

impl PipelineUsage {
    pub fn total(&self) -> u64 {
        [
            &self.screening,
            &self.decomposer,
            &self.checkworthy,
            &self.query_generator,
            &self.evidence_crawler,
            &self.claimverify,
        ]
        .iter()
        .map(|u| u.total())
        .sum()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Completed,
    ScreenedOut,
}

/// Final result of fact-checking one document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FactCheckReport {
    pub document_id: DocumentId,
    pub raw_text: String,
    pub token_count: usize,
    pub usage: PipelineUsage,
    pub claim_detail: Vec<ClaimDetail>,
    pub summary: DocumentSummary,
    pub sag: ArgumentGraph,
    pub status: ReportStatus,
    pub screening: ScreeningVerdict,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_factuality_serialization() {
        assert_eq!(serde_json::to_value(SummaryFactuality::Score(0.25)).unwrap(), 0.25);
        assert_eq!(serde_json::to_value(SummaryFactuality::NotApplicable).unwrap(), "N/A");
        let parsed: SummaryFactuality = serde_json::from_str("\"Early Warning\"").unwrap();
        assert_eq!(parsed, SummaryFactuality::Message("Early Warning".into()));
    }

    #[test]
    fn test_pipeline_usage_total() {
        let usage = PipelineUsage {
            decomposer: StageUsage {
                model: "gpt-4o-mini".into(),
                prompt_tokens: 10,
                completion_tokens: 5,
            },
            claimverify: StageUsage {
                model: "gpt-4o-mini".into(),
                prompt_tokens: 1,
                completion_tokens: 1,
            },
            ..PipelineUsage::default()
        };
        assert_eq!(usage.total(), 17);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(ReportStatus::ScreenedOut).unwrap(),
            "SCREENED_OUT"
        );
    }
}
