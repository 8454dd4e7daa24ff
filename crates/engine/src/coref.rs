use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;

use crate::config::render_prompt;
use crate::llm::{AttemptError, ParseError, StageClient, UsageMeter};

const PRONOUNS: &[&str] = &[
    "he", "she", "it", "they", "him", "her", "them", "his", "its", "their", "hers", "theirs",
];

const POSSESSIVES: &[&str] = &["his", "its", "their", "hers", "theirs"];

/// Words that follow object-case "her" but never a possessive "her".
const NON_NOUN_FOLLOWERS: &[&str] = &[
    "a", "an", "the", "this", "that", "these", "those", "and", "or", "but", "nor", "so", "to",
    "in", "on", "at", "of", "for", "with", "from", "by", "about", "into", "as", "than", "up",
    "down", "out", "off", "over", "back", "again", "away", "yesterday", "today", "tomorrow",
    "later", "now", "then", "there", "here", "once", "twice", "too", "very", "well", "if",
    "when", "while", "because", "after", "before", "until", "since", "he", "she", "it", "they",
    "we", "i", "you", "his", "their", "my", "your", "our", "is", "was", "were", "be", "had",
    "has", "have", "not",
];

/// Byte range of a mention in the source text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Source of coreference clusters: each cluster lists the spans of one
/// entity's mentions in text order.
pub trait MentionClusterer: Send + Sync {
    fn clusters<'a>(
        &'a self,
        text: &'a str,
        meter: &'a UsageMeter,
    ) -> BoxFuture<'a, Result<Vec<Vec<Span>>, AttemptError>>;
}

#[derive(Deserialize)]
struct ClusterResponse {
    clusters: Vec<Vec<String>>,
}

/// LLM-backed clusterer. The model returns mention strings, which are
/// located in the text in order of appearance at word boundaries.
pub struct LlmClusterer {
    llm: Arc<StageClient>,
    prompt: String,
    attempts: u32,
}

impl LlmClusterer {
    pub fn new(llm: Arc<StageClient>, prompt: impl Into<String>, attempts: u32) -> Self {
        Self {
            llm,
            prompt: prompt.into(),
            attempts,
        }
    }
}

impl MentionClusterer for LlmClusterer {
    fn clusters<'a>(
        &'a self,
        text: &'a str,
        meter: &'a UsageMeter,
    ) -> BoxFuture<'a, Result<Vec<Vec<Span>>, AttemptError>> {
        Box::pin(async move {
            let prompt = render_prompt(&self.prompt, &[("document", text)]);
            let response: ClusterResponse = self
                .llm
                .complete_json("", &prompt, self.attempts, meter)
                .await?;
            Ok(response
                .clusters
                .iter()
                .map(|mentions| locate_mentions(text, mentions))
                .filter(|spans| spans.len() >= 2)
                .collect())
        })
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Find each mention at or after the previous one, at word boundaries.
/// Mentions that cannot be found are skipped.
fn locate_mentions(text: &str, mentions: &[String]) -> Vec<Span> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut cursor = 0;

    for mention in mentions {
        let mention = mention.trim();
        if mention.is_empty() {
            continue;
        }
        let mut from = cursor;
        while let Some(offset) = text[from..].find(mention) {
            let start = from + offset;
            let end = start + mention.len();
            let left_ok = start == 0 || !is_word_byte(bytes[start - 1]);
            let right_ok = end == bytes.len() || !is_word_byte(bytes[end]);
            if left_ok && right_ok {
                spans.push(Span { start, end });
                cursor = end;
                break;
            }
            from = start + mention.chars().next().map_or(1, char::len_utf8);
        }
    }
    spans
}

fn is_pronoun(mention: &str) -> bool {
    PRONOUNS.contains(&mention.to_lowercase().as_str())
}

/// Replaces pronouns and short mentions with their cluster's canonical
/// mention. Never fails: any clusterer error returns the text unchanged.
pub struct CoreferenceResolver {
    clusterer: Option<Arc<dyn MentionClusterer>>,
}

impl CoreferenceResolver {
    pub fn new(clusterer: Option<Arc<dyn MentionClusterer>>) -> Self {
        Self { clusterer }
    }

    pub async fn resolve(&self, text: &str, meter: &UsageMeter) -> String {
        let Some(clusterer) = &self.clusterer else {
            return text.to_string();
        };
        if text.trim().is_empty() {
            return text.to_string();
        }

        match clusterer.clusters(text, meter).await {
            Ok(clusters) => {
                let resolved = apply_clusters(text, &clusters);
                tracing::info!(clusters = clusters.len(), "Coreference resolved");
                resolved
            }
            Err(e) => {
                tracing::warn!(error = %e, "Coreference resolution failed, using original text");
                text.to_string()
            }
        }
    }
}

/// "her" directly followed by a word that can head a noun phrase, as in
/// "her research" but not "I met her" or "told her the news".
fn her_is_determiner(text: &str, end: usize) -> bool {
    let rest = &text[end..];
    if !rest.starts_with(' ') {
        return false;
    }
    let next: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '-')
        .collect::<String>()
        .to_lowercase();
    !next.is_empty() && !NON_NOUN_FOLLOWERS.contains(&next.as_str())
}

/// Splice canonical mentions into `text`, last span first so earlier
/// offsets stay valid. Overlapping or out-of-range spans are dropped.
pub fn apply_clusters(text: &str, clusters: &[Vec<Span>]) -> String {
    let valid = |s: &Span| {
        s.start < s.end
            && s.end <= text.len()
            && text.is_char_boundary(s.start)
            && text.is_char_boundary(s.end)
    };

    let mut replacements: Vec<(Span, String)> = Vec::new();
    for cluster in clusters {
        let spans: Vec<Span> = cluster.iter().copied().filter(valid).collect();
        let Some(first) = spans.first() else {
            continue;
        };

        let first_text = &text[first.start..first.end];
        let canonical = if is_pronoun(first_text) {
            spans
                .iter()
                .map(|s| &text[s.start..s.end])
                .filter(|m| !is_pronoun(m))
                .max_by_key(|m| m.len())
        } else {
            Some(first_text)
        };
        let Some(canonical) = canonical else {
            continue;
        };

        for span in &spans {
            let mention = &text[span.start..span.end];
            if mention == canonical {
                continue;
            }
            let lowered = mention.to_lowercase();
            let possessive = POSSESSIVES.contains(&lowered.as_str())
                || (lowered == "her" && her_is_determiner(text, span.end));
            let replacement = if possessive {
                format!("{canonical}'s")
            } else if mention.len() < canonical.len() || is_pronoun(mention) {
                canonical.to_string()
            } else {
                continue;
            };
            replacements.push((*span, replacement));
        }
    }

    replacements.sort_by(|a, b| b.0.start.cmp(&a.0.start));

    let mut out = text.to_string();
    let mut floor = usize::MAX;
    for (span, replacement) in replacements {
        if span.end > floor {
            continue;
        }
        out.replace_range(span.start..span.end, &replacement);
        floor = span.start;
    }
    out
}
