use serde::{Deserialize, Serialize};

/// Coarse pipeline stage reported on the progress channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Screening,
    Coreference,
    Decomposing,
    Checkworthy,
    QueryGeneration,
    Retrieval,
    Verification,
    Aggregation,
    Done,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Screening => "screening",
            Self::Coreference => "coreference",
            Self::Decomposing => "decomposing",
            Self::Checkworthy => "checkworthy",
            Self::QueryGeneration => "query_generation",
            Self::Retrieval => "retrieval",
            Self::Verification => "verification",
            Self::Aggregation => "aggregation",
            Self::Done => "done",
        }
    }
}

/// `(stage, human message)` emitted as the pipeline advances.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}
