use serde::{Deserialize, Serialize};

use super::EmbeddingError;


#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: u32,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    usage: EmbeddingUsage,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Deserialize)]
struct EmbeddingUsage {
    total_tokens: u64,
}

#[derive(Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

/// Call an OpenAI-compatible /embeddings endpoint.
pub async fn call_openai_embeddings(
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    dimensions: u32,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let start = std::time::Instant::now();

    let request = EmbeddingRequest {
        model,
        input: texts,
        dimensions,
    };

    let url = format!("{}/embeddings", base_url.trim_end_matches('/'));
    let response = http
        .post(&url)
        .bearer_auth(api_key)
        .json(&request)
        .send()
        .await
        .map_err(|e| EmbeddingError::Http(e.to_string()))?;

    let status = response.status();
    let latency = start.elapsed().as_secs_f64();
    metrics::histogram!("embedding.api.latency").record(latency);

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return Err(EmbeddingError::Auth(format!("{}: {}", status, body)));
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return Err(EmbeddingError::RateLimited { retry_after });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let msg = serde_json::from_str::<OpenAiError>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        return Err(EmbeddingError::Api(format!("{}: {}", status, msg)));
    }

    let body: EmbeddingResponse = response
        .json()
        .await
        .map_err(|e| EmbeddingError::Api(format!("Failed to parse response: {}", e)))?;

    metrics::counter!("embedding.api.tokens").increment(body.usage.total_tokens);

    if body.data.len() != texts.len() {
        return Err(EmbeddingError::Api(format!(
            "Expected {} embeddings, got {}",
            texts.len(),
            body.data.len()
        )));
    }

    // Sort by index to maintain input order.
    let mut sorted = body.data;
    sorted.sort_by_key(|d| d.index);

    // Validate dimensions.
    for item in &sorted {
        if item.embedding.len() != dimensions as usize {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimensions,
                got: item.embedding.len(),
            });
        }
    }

    Ok(sorted.into_iter().map(|d| d.embedding).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let json = r#"{
            "data": [
                {"embedding": [0.0, 1.0], "index": 1},
                {"embedding": [1.0, 0.0], "index": 0}
            ],
            "usage": {"total_tokens": 7}
        }"#;
        let body: EmbeddingResponse = serde_json::from_str(json).unwrap();
        let mut sorted = body.data;
        sorted.sort_by_key(|d| d.index);
        assert_eq!(sorted[0].embedding, vec![1.0, 0.0]);
        assert_eq!(body.usage.total_tokens, 7);
    }

    #[test]
    fn test_request_serialization() {
        let texts = vec!["a".to_string()];
        let req = EmbeddingRequest {
            model: "text-embedding-3-small",
            input: &texts,
            dimensions: 1536,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["input"][0], "a");
        assert_eq!(json["dimensions"], 1536);
    }
}
