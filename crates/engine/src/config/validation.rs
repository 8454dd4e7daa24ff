use claimcheck_common::config::{LlmRoleConfig, RetryConfig};

use super::loader::{ConfigError, EngineConfig};
use super::REQUIRED_PROMPTS;

/// Validate the complete engine configuration.
///
/// Collects every range violation and missing prompt, then fails with all of
/// them at once. The engine refuses to start on validation failure.
pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_llm(config, &mut errors);
    validate_embeddings(config, &mut errors);
    validate_retry(config, &mut errors);
    validate_pipeline(config, &mut errors);
    validate_screening(config, &mut errors);
    validate_retrieval(config, &mut errors);
    validate_cache(config, &mut errors);
    validate_prompts(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.join("; ")))
    }
}

fn validate_llm(config: &EngineConfig, errors: &mut Vec<String>) {
    let validate_role = |role: &LlmRoleConfig, name: &str, errors: &mut Vec<String>| {
        if role.provider.is_empty() {
            errors.push(format!("llm.{}.provider must not be empty", name));
        }
        if role.model.is_empty() {
            errors.push(format!("llm.{}.model must not be empty", name));
        }
        if role.max_tokens == 0 {
            errors.push(format!("llm.{}.max_tokens must be > 0", name));
        }
        if role.timeout_seconds == 0 {
            errors.push(format!("llm.{}.timeout_seconds must be > 0", name));
        }
        if let Some(temp) = role.temperature {
            if !(0.0..=2.0).contains(&temp) {
                errors.push(format!(
                    "llm.{}.temperature must be between 0.0 and 2.0",
                    name
                ));
            }
        }
    };

    let llm = &config.system.llm;
    validate_role(&llm.decompose, "decompose", errors);
    validate_role(&llm.checkworthy, "checkworthy", errors);
    validate_role(&llm.query_generation, "query_generation", errors);
    validate_role(&llm.claim_verify, "claim_verify", errors);
    validate_role(&llm.screening, "screening", errors);

    let r = &config.system.rate_limit;
    if r.llm_max_requests == 0 {
        errors.push("rate_limit.llm_max_requests must be > 0".into());
    }
    if r.llm_window_seconds == 0 {
        errors.push("rate_limit.llm_window_seconds must be > 0".into());
    }
}

fn validate_embeddings(config: &EngineConfig, errors: &mut Vec<String>) {
    let e = &config.system.embeddings;

    if e.provider.is_empty() {
        errors.push("embeddings.provider must not be empty".into());
    }
    if e.model.is_empty() {
        errors.push("embeddings.model must not be empty".into());
    }
    if e.dimensions == 0 {
        errors.push("embeddings.dimensions must be > 0".into());
    }
    if e.batch_size == 0 {
        errors.push("embeddings.batch_size must be > 0".into());
    }
}

fn validate_retry(config: &EngineConfig, errors: &mut Vec<String>) {
    let validate_one = |rc: &RetryConfig, name: &str, errors: &mut Vec<String>| {
        if rc.max_attempts == 0 {
            errors.push(format!("retry.{}.max_attempts must be > 0", name));
        }
        if rc.initial_backoff_ms == 0 {
            errors.push(format!("retry.{}.initial_backoff_ms must be > 0", name));
        }
        if rc.max_backoff_ms < rc.initial_backoff_ms {
            errors.push(format!(
                "retry.{}.max_backoff_ms must be >= initial_backoff_ms",
                name
            ));
        }
        if rc.backoff_multiplier < 1.0 {
            errors.push(format!("retry.{}.backoff_multiplier must be >= 1.0", name));
        }
    };

    validate_one(&config.system.retry.llm_api, "llm_api", errors);
    validate_one(&config.system.retry.embeddings, "embeddings", errors);
    validate_one(
        &config.system.retry.external_modules,
        "external_modules",
        errors,
    );
}

fn validate_pipeline(config: &EngineConfig, errors: &mut Vec<String>) {
    let p = &config.system.pipeline;

    if p.num_seed_retries == 0 {
        errors.push("pipeline.num_seed_retries must be > 0".into());
    }
    if p.max_queries_per_claim == 0 {
        errors.push("pipeline.max_queries_per_claim must be > 0".into());
    }
    if !(0.0..=1.0).contains(&p.dedup_threshold) {
        errors.push("pipeline.dedup_threshold must be between 0.0 and 1.0".into());
    }
    if p.max_concurrency == 0 {
        errors.push("pipeline.max_concurrency must be > 0".into());
    }
}

fn validate_screening(config: &EngineConfig, errors: &mut Vec<String>) {
    let s = &config.system.screening;

    if s.sensationalism_threshold < 0.0 {
        errors.push("screening.sensationalism_threshold must be >= 0".into());
    }
    for (name, w) in [
        ("uppercase_weight", s.uppercase_weight),
        ("keyword_weight", s.keyword_weight),
        ("entropy_weight", s.entropy_weight),
        ("concentration_weight", s.concentration_weight),
    ] {
        if w < 0.0 {
            errors.push(format!("screening.{} must be >= 0", name));
        }
    }
    if s.entropy_std <= 0.0 {
        errors.push("screening.entropy_std must be > 0".into());
    }
    if s.top_k_terms == 0 {
        errors.push("screening.top_k_terms must be > 0".into());
    }
    if s.advisor_neighbors == 0 {
        errors.push("screening.advisor_neighbors must be > 0".into());
    }
    if !(0.0..=2.0).contains(&s.advisor_max_distance) {
        errors.push("screening.advisor_max_distance must be between 0.0 and 2.0".into());
    }
    if let Some(path) = &s.idf_path {
        let resolved = config.resolve_path(path);
        if !resolved.exists() {
            errors.push(format!(
                "screening.idf_path {} does not exist",
                resolved.display()
            ));
        }
    }
}

fn validate_retrieval(config: &EngineConfig, errors: &mut Vec<String>) {
    let r = &config.system.retrieval;

    if !(0.0..=2.0).contains(&r.cache_distance_threshold) {
        errors.push("retrieval.cache_distance_threshold must be between 0.0 and 2.0".into());
    }
    if r.sentences_per_passage == 0 {
        errors.push("retrieval.sentences_per_passage must be > 0".into());
    }
    if r.sliding_distance == 0 || r.sliding_distance >= r.sentences_per_passage {
        errors.push(
            "retrieval.sliding_distance must be > 0 and < sentences_per_passage".into(),
        );
    }
    if r.max_passages_per_url == 0 {
        errors.push("retrieval.max_passages_per_url must be > 0".into());
    }
    if r.max_passages_per_claim == 0 {
        errors.push("retrieval.max_passages_per_claim must be > 0".into());
    }
    if r.max_search_results_per_query == 0 {
        errors.push("retrieval.max_search_results_per_query must be > 0".into());
    }
    if r.min_sentence_chars > r.max_sentence_chars {
        errors.push("retrieval.min_sentence_chars must be <= max_sentence_chars".into());
    }
    if r.fetch_timeout_ms == 0 {
        errors.push("retrieval.fetch_timeout_ms must be > 0".into());
    }
    if r.fetch_attempts == 0 {
        errors.push("retrieval.fetch_attempts must be > 0".into());
    }
}

fn validate_cache(config: &EngineConfig, errors: &mut Vec<String>) {
    let c = &config.system.cache;

    if !(0.0..=2.0).contains(&c.verdict_distance_threshold) {
        errors.push("cache.verdict_distance_threshold must be between 0.0 and 2.0".into());
    }
    for (name, value) in [
        ("passages_collection", &c.passages_collection),
        ("verdicts_collection", &c.verdicts_collection),
        ("advisor_collection", &c.advisor_collection),
    ] {
        if value.is_empty() {
            errors.push(format!("cache.{} must not be empty", name));
        }
    }
}

fn validate_prompts(config: &EngineConfig, errors: &mut Vec<String>) {
    for name in REQUIRED_PROMPTS {
        if !config.prompts.contains_key(*name) {
            errors.push(format!("missing prompt template prompts/{}.md", name));
        }
    }
}
