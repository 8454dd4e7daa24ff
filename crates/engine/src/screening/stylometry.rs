use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use claimcheck_common::config::ScreeningConfig;
use regex::Regex;
use serde::Serialize;

use crate::config::ConfigError;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+(?:[-'][a-z0-9]+)*").expect("valid token regex"));

/// Minimum token count before the entropy z-score is trusted.
const MIN_TOKENS_FOR_ENTROPY: usize = 50;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "for", "from", "had", "has",
    "have", "he", "her", "his", "i", "if", "in", "into", "is", "it", "its", "not", "of", "on",
    "or", "our", "she", "so", "than", "that", "the", "their", "them", "there", "they", "this",
    "to", "was", "we", "were", "what", "when", "which", "who", "will", "with", "would", "you",
];

/// Component scores behind a sensationalism verdict.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StyleReport {
    pub uppercase_ratio: f64,
    pub keyword_ratio: f64,
    pub entropy: f64,
    pub entropy_anomaly: f64,
    pub concentration: f64,
    pub score: f64,
}

/// Statistical sensationalism scoring of raw text.
pub struct StylometryAnalyzer {
    uppercase_weight: f64,
    keyword_weight: f64,
    entropy_weight: f64,
    concentration_weight: f64,
    entropy_mean: f64,
    entropy_std: f64,
    top_k: usize,
    keywords: HashSet<String>,
    idf: HashMap<String, f64>,
}

impl StylometryAnalyzer {
    pub fn new(config: &ScreeningConfig, idf: HashMap<String, f64>) -> Self {
        Self {
            uppercase_weight: config.uppercase_weight,
            keyword_weight: config.keyword_weight,
            entropy_weight: config.entropy_weight,
            concentration_weight: config.concentration_weight,
            entropy_mean: config.entropy_mean,
            entropy_std: config.entropy_std,
            top_k: config.top_k_terms,
            keywords: config
                .sensational_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            idf,
        }
    }

    /// Build from config, loading the IDF table when one is configured.
    pub fn from_config(config: &ScreeningConfig, config_dir: &Path) -> Result<Self, ConfigError> {
        let idf = match &config.idf_path {
            Some(path) => {
                let path = PathBuf::from(path);
                let path = if path.is_absolute() {
                    path
                } else {
                    config_dir.join(path)
                };
                load_idf(&path)?
            }
            None => HashMap::new(),
        };
        tracing::info!(idf_terms = idf.len(), "Stylometry analyzer ready");
        Ok(Self::new(config, idf))
    }

    pub fn analyze(&self, text: &str) -> StyleReport {
        let letters = text.chars().filter(|c| c.is_alphabetic()).count();
        if letters == 0 {
            return StyleReport::default();
        }
        let uppercase = text.chars().filter(|c| c.is_uppercase()).count();
        let uppercase_ratio = uppercase as f64 / letters as f64;

        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = TOKEN_RE.find_iter(&lowered).map(|m| m.as_str()).collect();
        if tokens.is_empty() {
            let score = self.uppercase_weight * uppercase_ratio;
            return StyleReport {
                uppercase_ratio,
                score,
                ..StyleReport::default()
            };
        }

        let keyword_hits = tokens.iter().filter(|t| self.keywords.contains(**t)).count();
        let keyword_ratio = keyword_hits as f64 / tokens.len() as f64;

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for token in &tokens {
            *counts.entry(token).or_default() += 1;
        }

        let entropy = shannon_entropy(&counts, tokens.len());
        let entropy_anomaly = if tokens.len() >= MIN_TOKENS_FOR_ENTROPY && self.entropy_std > 0.0 {
            let z = (entropy - self.entropy_mean) / self.entropy_std;
            (z.abs() / 3.0).min(1.0)
        } else {
            0.0
        };

        let concentration = self.term_concentration(&counts);

        let score = self.uppercase_weight * uppercase_ratio
            + self.keyword_weight * keyword_ratio
            + self.entropy_weight * entropy_anomaly
            + self.concentration_weight * concentration;

        StyleReport {
            uppercase_ratio,
            keyword_ratio,
            entropy,
            entropy_anomaly,
            concentration,
            score,
        }
    }

    /// Excess share of tf-idf mass held by the top-k terms over what a
    /// uniform distribution would give them, in [0, 1].
    fn term_concentration(&self, counts: &HashMap<&str, usize>) -> f64 {
        let mut weights: Vec<f64> = counts
            .iter()
            .filter(|(term, _)| !STOPWORDS.contains(*term))
            .map(|(term, tf)| *tf as f64 * self.idf.get(*term).copied().unwrap_or(1.0))
            .collect();

        let distinct = weights.len();
        if distinct <= self.top_k || self.top_k == 0 {
            return 0.0;
        }

        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }

        weights.sort_by(|a, b| b.total_cmp(a));
        let top: f64 = weights.iter().take(self.top_k).sum();
        let share = top / total;
        let uniform = self.top_k as f64 / distinct as f64;
        ((share - uniform) / (1.0 - uniform)).clamp(0.0, 1.0)
    }
}

fn shannon_entropy(counts: &HashMap<&str, usize>, total: usize) -> f64 {
    let total = total as f64;
    counts
        .values()
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Read a `term<TAB>idf` table. Blank lines and `#` comments are skipped.
pub fn load_idf(path: &Path) -> Result<HashMap<String, f64>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut table = HashMap::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed = line
            .split_once('\t')
            .and_then(|(term, idf)| Some((term.trim(), idf.trim().parse::<f64>().ok()?)));
        match parsed {
            Some((term, idf)) if !term.is_empty() => {
                table.insert(term.to_lowercase(), idf);
            }
            _ => {
                return Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    detail: format!("line {}: expected term<TAB>idf", lineno + 1),
                })
            }
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ScreeningConfig {
        ScreeningConfig {
            sensationalism_threshold: 0.5,
            uppercase_weight: 2.0,
            keyword_weight: 5.0,
            entropy_weight: 0.25,
            concentration_weight: 0.25,
            entropy_mean: 7.0,
            entropy_std: 0.9,
            top_k_terms: 3,
            idf_path: None,
            sensational_keywords: vec!["shocking".into(), "cover-up".into(), "exposed".into()],
            advisor_neighbors: 5,
            advisor_max_distance: 0.3,
        }
    }

    #[test]
    fn test_calm_text_scores_low() {
        let analyzer = StylometryAnalyzer::new(&config(), HashMap::new());
        let report = analyzer.analyze("The council approved the budget on Tuesday after a short debate.");
        assert!(report.score < 0.5, "score {}", report.score);
        assert_eq!(report.keyword_ratio, 0.0);
        assert_eq!(report.entropy_anomaly, 0.0);
    }

    #[test]
    fn test_shouting_keywords_score_high() {
        let analyzer = StylometryAnalyzer::new(&config(), HashMap::new());
        let report = analyzer.analyze("SHOCKING COVER-UP EXPOSED!!! They lied to you");
        assert!(report.uppercase_ratio > 0.6);
        assert!((report.keyword_ratio - 3.0 / 7.0).abs() < 1e-9);
        assert!(report.score > 0.5);
    }

    #[test]
    fn test_empty_text_is_neutral() {
        let analyzer = StylometryAnalyzer::new(&config(), HashMap::new());
        assert_eq!(analyzer.analyze("   123 !!! "), StyleReport::default());
    }

    #[test]
    fn test_entropy_anomaly_on_repetitive_long_text() {
        let analyzer = StylometryAnalyzer::new(&config(), HashMap::new());
        let text = "vote now ".repeat(40);
        let report = analyzer.analyze(&text);
        assert!((report.entropy - 1.0).abs() < 1e-9);
        assert_eq!(report.entropy_anomaly, 1.0);
    }

    #[test]
    fn test_concentration_uses_idf() {
        let text = "alpha alpha alpha alpha beta gamma delta epsilon zeta";
        let uniform = StylometryAnalyzer::new(&config(), HashMap::new());
        let weighted = StylometryAnalyzer::new(
            &config(),
            HashMap::from([("alpha".to_string(), 0.01)]),
        );
        let u = uniform.analyze(text).concentration;
        let w = weighted.analyze(text).concentration;
        assert!(u > 0.0);
        assert!(w < u);
    }

    #[test]
    fn test_concentration_zero_with_few_terms() {
        let analyzer = StylometryAnalyzer::new(&config(), HashMap::new());
        assert_eq!(analyzer.analyze("red red blue").concentration, 0.0);
    }

    #[test]
    fn test_load_idf() {
        let dir = std::env::temp_dir().join(format!("idf-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("idf.tsv");
        std::fs::write(&path, "# term\tidf\nthe\t0.1\n\nBombshell\t6.5\n").unwrap();

        let table = load_idf(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table["bombshell"], 6.5);

        std::fs::write(&path, "broken line\n").unwrap();
        assert!(matches!(load_idf(&path), Err(ConfigError::Parse { .. })));
        std::fs::remove_dir_all(&dir).ok();
    }
}
