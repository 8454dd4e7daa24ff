use serde::{Deserialize, Serialize};

/// POST /check request. The response body is a `FactCheckReport`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}
