use serde::de::DeserializeOwned;

/// A structured model response that failed strict schema validation.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("malformed model response: {0}")]
pub struct ParseError(pub String);

impl From<ParseError> for claimcheck_common::ClaimCheckError {
    fn from(e: ParseError) -> Self {
        claimcheck_common::ClaimCheckError::Parse(e.0)
    }
}

/// Remove a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Strictly deserialize a JSON object from model output.
///
/// Accepts either a bare object or one wrapped in a code fence or surrounded by
/// prose. The located object must match `T` exactly; nothing is evaluated.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let body = strip_code_fences(text);
    if body.is_empty() {
        return Err(ParseError("empty response".into()));
    }

    match serde_json::from_str::<T>(body) {
        Ok(value) => Ok(value),
        Err(first) => {
            let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) else {
                return Err(ParseError(first.to_string()));
            };
            if end <= start {
                return Err(ParseError(first.to_string()));
            }
            serde_json::from_str::<T>(&body[start..=end]).map_err(|e| ParseError(e.to_string()))
        }
    }
}
