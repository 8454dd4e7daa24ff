mod loader;
mod validation;

pub use loader::{load_config, ConfigError, EngineConfig};
pub use validation::validate;

/// Prompt templates the engine cannot run without.
pub const REQUIRED_PROMPTS: &[&str] = &[
    "decompose",
    "checkworthy",
    "query_generation",
    "claim_verify",
    "source_credibility",
    "coreference",
];

/// Substitute `{{name}}` placeholders in a prompt template.
pub fn render_prompt(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{{{name}}}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_prompt() {
        let rendered = render_prompt(
            "Claim: {{claim}}\nEvidence: {{evidence}} ({{claim}})",
            &[("claim", "Sky is blue"), ("evidence", "[]")],
        );
        assert_eq!(rendered, "Claim: Sky is blue\nEvidence: [] (Sky is blue)");
    }

    #[test]
    fn test_unknown_placeholder_left_in_place() {
        assert_eq!(render_prompt("{{missing}}", &[]), "{{missing}}");
    }
}
