mod advisor;
mod metadata;
mod stylometry;

use std::sync::Arc;

use claimcheck_common::types::{RawDocument, ScreeningVerdict, TrustLevel};

use crate::llm::UsageMeter;

pub use advisor::{infer_label, ScreeningAdvisor};
pub use metadata::{domain_of_url, extract_domain, MetadataAnalyzer};
pub use stylometry::{load_idf, StyleReport, StylometryAnalyzer};

/// Early-exit gate in front of the pipeline.
///
/// A document is screened out when its source resolves to low trust and its
/// sensationalism score exceeds the threshold. Every sub-analyzer degrades
/// to a neutral signal on failure.
pub struct ScreeningGate {
    metadata: Arc<MetadataAnalyzer>,
    stylometry: StylometryAnalyzer,
    advisor: Option<Arc<ScreeningAdvisor>>,
    threshold: f64,
}

impl ScreeningGate {
    pub fn new(
        metadata: Arc<MetadataAnalyzer>,
        stylometry: StylometryAnalyzer,
        advisor: Option<Arc<ScreeningAdvisor>>,
        threshold: f64,
    ) -> Self {
        Self {
            metadata,
            stylometry,
            advisor,
            threshold,
        }
    }

    pub async fn screen(&self, document: &RawDocument, meter: &UsageMeter) -> ScreeningVerdict {
        let prior = async {
            match &self.advisor {
                Some(advisor) => advisor.prior(&document.text).await,
                None => None,
            }
        };
        let ((domain, trust_level), advisor_prior) = tokio::join!(
            self.metadata
                .analyze(&document.text, document.source_url.as_deref(), meter),
            prior,
        );

        let style = self.stylometry.analyze(&document.text);

        let warning = (trust_level == TrustLevel::Low && style.score > self.threshold).then(|| {
            metrics::counter!("pipeline.early_exit").increment(1);
            early_warning(domain.as_deref().unwrap_or("unknown"), style.score)
        });

        tracing::info!(
            domain = domain.as_deref().unwrap_or("-"),
            trust = %trust_level,
            sensationalism = style.score,
            advisor = advisor_prior.as_ref().map(|p| p.label.as_str()).unwrap_or("-"),
            screened_out = warning.is_some(),
            "Screening complete"
        );

        ScreeningVerdict {
            domain,
            trust_level,
            sensationalism: style.score,
            advisor_prior,
            warning,
        }
    }
}

fn early_warning(domain: &str, score: f64) -> String {
    format!(
        "Early Warning: This content originates from a low-trust source ('{domain}') and \
         exhibits a highly sensationalist writing style (score: {score:.2}). \
         There is a high probability of misinformation."
    )
}
