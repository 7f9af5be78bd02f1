//! Continuous field: per-claim ranked evidence over every paragraph and
//! statement, independent of the competitive assignment.
//!
//! The field is what the compare views consume, and it is the fallback
//! signal when competitive assignment collapses (degenerate geometry or
//! an under-separated claim set). Disagreements between the field's
//! arg-max and the competitive winner are surfaced per claim.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::EmbeddingStore;
use crate::semantic::{Claim, ClaimId, ClaimType};
use crate::shadow::{ParagraphId, Shadow, Stance, StatementId};
use crate::stats;

/// One statement's standing against a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEntry {
    pub statement_id: StatementId,
    pub sim_claim: f64,
    /// `sim_claim` scaled by stance agreement with the claim type.
    pub evidence_score: f64,
}

/// One paragraph's standing against a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParagraphFieldEntry {
    pub paragraph_id: ParagraphId,
    pub sim_claim: f64,
    pub evidence_score: f64,
}

/// Per-claim continuous field over statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimField {
    pub claim_id: ClaimId,
    /// Every statement, ranked by similarity descending.
    pub field: Vec<FieldEntry>,
    /// Paragraphs whose similarity clears one standard deviation above
    /// the claim's mean similarity.
    pub core_set_size: usize,
    /// True when some statement's field arg-max is this claim but the
    /// competitive winner differs.
    pub disagreement_with_competitive: bool,
}

/// Per-claim ranked paragraph similarities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParagraphField {
    pub claim_id: ClaimId,
    pub ranked: Vec<ParagraphFieldEntry>,
}

/// Stage G output: both views, claims in map order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuousField {
    pub claims: Vec<ClaimField>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParagraphSimilarityField {
    pub claims: Vec<ParagraphField>,
}

impl ContinuousField {
    pub fn claim(&self, id: &ClaimId) -> Option<&ClaimField> {
        self.claims.iter().find(|c| &c.claim_id == id)
    }
}

/// Stance agreement between a paragraph/statement stance and a claim type:
/// 1.0 inside the matching family, 0.5 outside.
pub fn stance_agreement(stance: Stance, claim_type: ClaimType) -> f64 {
    let matches = match claim_type {
        ClaimType::Factual => stance == Stance::Assertive,
        ClaimType::Prescriptive => stance == Stance::Prescriptive,
        ClaimType::Conditional => {
            stance == Stance::Prerequisite || stance == Stance::Dependent
        }
        ClaimType::Contested => stance == Stance::Cautionary,
        ClaimType::Speculative => stance == Stance::Uncertain,
    };
    if matches {
        1.0
    } else {
        0.5
    }
}

/// Compute both field views.
///
/// `claim_embeddings` comes from [`crate::provenance::claim_embeddings`];
/// `winners` is the competitive winner per statement (empty when the
/// provenance stage did not run).
pub fn compute_fields(
    shadow: &Shadow,
    claims: &[Claim],
    store: &EmbeddingStore,
    paragraph_slot: &BTreeMap<ParagraphId, usize>,
    claim_embeddings: &[Option<Vec<f32>>],
    winners: &BTreeMap<StatementId, ClaimId>,
) -> (ContinuousField, ParagraphSimilarityField) {
    if claims.is_empty() {
        return (ContinuousField::default(), ParagraphSimilarityField::default());
    }

    // Paragraph similarities per claim, reused for the statement field.
    let paragraph_sims: Vec<BTreeMap<ParagraphId, f64>> = claim_embeddings
        .iter()
        .map(|embedding| {
            shadow
                .paragraphs
                .iter()
                .map(|paragraph| {
                    let sim = match (embedding, paragraph_slot.get(&paragraph.id)) {
                        (Some(e), Some(&slot)) => stats::dot(e, store.get(slot)) as f64,
                        _ => 0.0,
                    };
                    (paragraph.id.clone(), sim)
                })
                .collect()
        })
        .collect();

    // Field arg-max per statement, for disagreement detection.
    let mut field_winner: BTreeMap<StatementId, usize> = BTreeMap::new();
    for statement in &shadow.statements {
        let pid = ParagraphId::new(statement.model_index, statement.paragraph_index);
        let mut best = 0usize;
        let mut best_sim = f64::NEG_INFINITY;
        for (index, sims) in paragraph_sims.iter().enumerate() {
            let sim = sims.get(&pid).copied().unwrap_or(0.0);
            if sim > best_sim {
                best_sim = sim;
                best = index;
            }
        }
        field_winner.insert(statement.id.clone(), best);
    }

    let mut continuous = Vec::with_capacity(claims.len());
    let mut paragraph_fields = Vec::with_capacity(claims.len());

    for (index, claim) in claims.iter().enumerate() {
        let sims = &paragraph_sims[index];

        let mut ranked: Vec<ParagraphFieldEntry> = shadow
            .paragraphs
            .iter()
            .map(|paragraph| {
                let sim = sims.get(&paragraph.id).copied().unwrap_or(0.0);
                ParagraphFieldEntry {
                    paragraph_id: paragraph.id.clone(),
                    sim_claim: sim,
                    evidence_score: sim
                        * stance_agreement(paragraph.dominant_stance, claim.claim_type),
                }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.sim_claim
                .partial_cmp(&a.sim_claim)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.paragraph_id.cmp(&b.paragraph_id))
        });

        let sim_values: Vec<f64> = ranked.iter().map(|e| e.sim_claim).collect();
        let (mu, sigma) = stats::mean_stddev(&sim_values);
        let core_set_size = sim_values.iter().filter(|s| **s >= mu + sigma).count();

        let mut field: Vec<FieldEntry> = shadow
            .statements
            .iter()
            .map(|statement| {
                let pid = ParagraphId::new(statement.model_index, statement.paragraph_index);
                let sim = sims.get(&pid).copied().unwrap_or(0.0);
                FieldEntry {
                    statement_id: statement.id.clone(),
                    sim_claim: sim,
                    evidence_score: sim * stance_agreement(statement.stance, claim.claim_type),
                }
            })
            .collect();
        field.sort_by(|a, b| {
            b.sim_claim
                .partial_cmp(&a.sim_claim)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.statement_id.cmp(&b.statement_id))
        });

        let disagreement_with_competitive = shadow.statements.iter().any(|statement| {
            field_winner.get(&statement.id) == Some(&index)
                && winners
                    .get(&statement.id)
                    .map(|winner| winner != &claim.id)
                    .unwrap_or(false)
        });

        continuous.push(ClaimField {
            claim_id: claim.id.clone(),
            field,
            core_set_size,
            disagreement_with_competitive,
        });
        paragraph_fields.push(ParagraphField {
            claim_id: claim.id.clone(),
            ranked,
        });
    }

    debug!(claims = claims.len(), "continuous field computed");
    (
        ContinuousField { claims: continuous },
        ParagraphSimilarityField {
            claims: paragraph_fields,
        },
    )
}
