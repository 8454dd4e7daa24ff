use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::DocumentId;

/// A document submitted for fact-checking. Immutable once ingested.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: DocumentId,
    pub text: String,
    /// Where the text was published, if the caller knows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl RawDocument {
    pub fn new(text: impl Into<String>, source_url: Option<String>) -> Self {
        Self {
            id: DocumentId::new(),
            text: text.into(),
            source_url: source_url.filter(|u| !u.trim().is_empty()),
            received_at: Utc::now(),
        }
    }

    pub fn token_count(&self) -> usize {
        estimate_tokens(&self.text)
    }
}

/// Rough BPE token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_blank_source_url_dropped() {
        let doc = RawDocument::new("text", Some("  ".into()));
        assert!(doc.source_url.is_none());
    }
}
