use claimcheck_common::types::{
    CheckworthyDecision, ClaimDetail, DocumentSummary, Evidence, Factuality, Relationship,
    SummaryFactuality,
};

/// Per-claim factuality at or above this counts as supported.
pub const SUPPORTED_AT: f64 = 0.75;
/// Per-claim factuality at or below this counts as refuted.
pub const REFUTED_AT: f64 = 0.25;

/// `supports / (supports + refutes)`, or the no-conclusive-evidence sentinel
/// when no item was resolved either way. CACHED and IRRELEVANT items count
/// toward neither side.
pub fn claim_factuality(evidences: &[Evidence]) -> Factuality {
    let (supports, refutes) = evidences.iter().fold((0usize, 0usize), |(s, r), e| {
        match e.relationship {
            Some(Relationship::Supports) => (s + 1, r),
            Some(Relationship::Refutes) => (s, r + 1),
            _ => (s, r),
        }
    });
    if supports + refutes == 0 {
        Factuality::NoConclusiveEvidence
    } else {
        Factuality::Score(supports as f64 / (supports + refutes) as f64)
    }
}

/// Checking state of one claim by the time results are merged.
pub enum ClaimOutcome {
    /// Classified as not checkworthy; never searched.
    Skipped,
    /// Retrieved and verified.
    Verified {
        queries: Vec<String>,
        evidences: Vec<Evidence>,
    },
    /// Reused from the verified-fact knowledge base.
    Reused { evidence: Evidence, factuality: f64 },
}

/// One detail record per claim, ids 1-based in claim order.
pub fn build_details(
    decisions: &[CheckworthyDecision],
    outcomes: Vec<ClaimOutcome>,
) -> Vec<ClaimDetail> {
    decisions
        .iter()
        .zip(outcomes)
        .enumerate()
        .map(|(i, (decision, outcome))| {
            let (queries, evidences, factuality) = match outcome {
                ClaimOutcome::Skipped => (Vec::new(), Vec::new(), Factuality::NothingToCheck),
                ClaimOutcome::Verified { queries, evidences } => {
                    let factuality = claim_factuality(&evidences);
                    (queries, evidences, factuality)
                }
                ClaimOutcome::Reused {
                    evidence,
                    factuality,
                } => (Vec::new(), vec![evidence], Factuality::Score(factuality)),
            };
            ClaimDetail {
                id: i + 1,
                claim: decision.claim.clone(),
                checkworthy: decision.checkworthy,
                checkworthy_reason: decision.reason.clone(),
                queries,
                evidences,
                factuality,
            }
        })
        .collect()
}

/// Document summary over the detail records. Only numeric factualities are
/// counted as verified; the document factuality is their mean.
pub fn summarize(details: &[ClaimDetail]) -> DocumentSummary {
    let scores: Vec<f64> = details.iter().filter_map(|d| d.factuality.score()).collect();

    let supported = scores.iter().filter(|s| **s >= SUPPORTED_AT).count();
    let refuted = scores.iter().filter(|s| **s <= REFUTED_AT).count();
    let controversial = scores
        .iter()
        .filter(|s| **s > REFUTED_AT && **s < SUPPORTED_AT)
        .count();

    let factuality = if scores.is_empty() {
        SummaryFactuality::NotApplicable
    } else {
        SummaryFactuality::Score(scores.iter().sum::<f64>() / scores.len() as f64)
    };

    DocumentSummary {
        num_claims: details.len(),
        num_checkworthy_claims: details
            .iter()
            .filter(|d| d.factuality != Factuality::NothingToCheck)
            .count(),
        num_verified_claims: scores.len(),
        num_supported_claims: supported,
        num_refuted_claims: refuted,
        num_controversial_claims: controversial,
        factuality,
    }
}
