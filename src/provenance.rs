//! Competitive provenance: soft-max assignment of statements to claims.
//!
//! Every statement distributes one unit of assignment mass across the
//! claim set via a temperature-scaled soft-max over embedding similarity.
//! Claims accumulate bulk, entropy and exclusivity from the mass they win;
//! the statement-side view records how contested each statement is.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::embedding::EmbeddingStore;
use crate::geometry::SimilarityMatrix;
use crate::semantic::{Claim, ClaimId};
use crate::shadow::{ParagraphId, Shadow, StatementId};
use crate::stats;

/// Per-claim provenance output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub claim_id: ClaimId,
    /// Assigned statements with their weights, heaviest first.
    pub direct_statement_provenance: Vec<(StatementId, f64)>,
    /// Sum of assigned weights: the claim's evidence mass.
    pub provenance_bulk: f64,
    /// Shannon entropy (bits) of the claim's normalized weight vector.
    pub entropy: f64,
    /// Share of assigned statements this claim wins outright
    /// (weight >= 0.5 and arg-max).
    pub exclusivity_ratio: f64,
    /// Minimal set of paragraphs carrying more than half the bulk,
    /// heaviest first.
    pub dominant_paragraph_ids: Vec<ParagraphId>,
    /// Mean pairwise similarity of the claim's source paragraphs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_coherence: Option<f64>,
}

/// Histogram of how many claims each assigned statement feeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntropyHistogram {
    pub one: usize,
    pub two: usize,
    pub three_plus: usize,
}

/// Statement-side view of the competitive assignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatementAllocation {
    /// Number of claims each statement was assigned to (0 allowed).
    pub assignment_counts: BTreeMap<StatementId, usize>,
    pub entropy: EntropyHistogram,
    /// Winning claim per statement (arg-max weight; ties go to the
    /// earlier claim in map order).
    pub winners: BTreeMap<StatementId, ClaimId>,
    /// Set when statements feeding two or more claims exceed 15% of the
    /// assigned population; hints the claim set is under-separated.
    pub dual_coordinate_flag: bool,
}

/// Full output of the provenance engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimProvenance {
    /// One record per claim, in map order.
    pub records: Vec<ProvenanceRecord>,
    pub allocation: StatementAllocation,
}

impl ClaimProvenance {
    pub fn record(&self, id: &ClaimId) -> Option<&ProvenanceRecord> {
        self.records.iter().find(|r| &r.claim_id == id)
    }
}

/// Fraction of assigned statements that may be multi-assigned before the
/// dual-coordinate flag trips.
const DUAL_COORDINATE_FRACTION: f64 = 0.15;
/// Arg-max weight floor for an exclusive win.
const EXCLUSIVE_WEIGHT: f64 = 0.5;
/// Bulk share that defines the dominant paragraph set.
const DOMINANT_BULK_SHARE: f64 = 0.5;

/// Competitive assignment engine.
#[derive(Debug, Clone)]
pub struct ProvenanceEngine {
    temperature: f64,
    min_weight: f64,
    max_claims: usize,
}

impl ProvenanceEngine {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            temperature: config.softmax_temperature,
            min_weight: config.assignment_min_weight,
            max_claims: config.assignment_max_claims,
        }
    }

    /// Run the assignment.
    ///
    /// `paragraph_slot` maps paragraph ids to embedding-arena slots;
    /// `claim_text_embeddings` holds pre-embedded claim texts for claims
    /// with no resolvable sources.
    pub fn assign(
        &self,
        shadow: &Shadow,
        claims: &[Claim],
        store: &EmbeddingStore,
        paragraph_slot: &BTreeMap<ParagraphId, usize>,
        sim: &SimilarityMatrix,
        claim_text_embeddings: &BTreeMap<ClaimId, Vec<f32>>,
    ) -> ClaimProvenance {
        if claims.is_empty() || shadow.statements.is_empty() {
            return ClaimProvenance::default();
        }

        let claim_embeddings =
            claim_embeddings(claims, shadow, store, paragraph_slot, claim_text_embeddings);

        // Per-claim accumulators, indexed like `claims`.
        let mut assigned: Vec<Vec<(StatementId, f64)>> = vec![Vec::new(); claims.len()];
        let mut allocation = StatementAllocation::default();
        let mut unique_winners: BTreeSet<StatementId> = BTreeSet::new();
        let mut assigned_statements = 0usize;
        let mut multi_assigned = 0usize;

        for statement in &shadow.statements {
            let paragraph_id = ParagraphId::new(statement.model_index, statement.paragraph_index);
            let Some(&slot) = paragraph_slot.get(&paragraph_id) else {
                continue;
            };
            let statement_embedding = store.get(slot);
            let scores: Vec<f64> = claim_embeddings
                .iter()
                .map(|emb| match emb {
                    Some(e) => stats::dot(statement_embedding, e) as f64,
                    None => 0.0,
                })
                .collect();
            let weights = stats::softmax(&scores, self.temperature);

            // Winner: arg-max with earlier claim winning ties. A tied
            // maximum is never an exclusive win.
            let mut winner = 0usize;
            for (i, w) in weights.iter().enumerate() {
                if *w > weights[winner] {
                    winner = i;
                }
            }
            let unique_max = weights
                .iter()
                .enumerate()
                .all(|(i, w)| i == winner || *w < weights[winner]);
            if unique_max {
                unique_winners.insert(statement.id.clone());
            }
            allocation
                .winners
                .insert(statement.id.clone(), claims[winner].id.clone());

            // Assignment: weight floor, then cap at the heaviest few.
            let mut candidates: Vec<(usize, f64)> = weights
                .iter()
                .copied()
                .enumerate()
                .filter(|(_, w)| *w >= self.min_weight)
                .collect();
            candidates.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.0.cmp(&b.0))
            });
            candidates.truncate(self.max_claims);

            let count = candidates.len();
            allocation
                .assignment_counts
                .insert(statement.id.clone(), count);
            if count >= 1 {
                assigned_statements += 1;
                match count {
                    1 => allocation.entropy.one += 1,
                    2 => allocation.entropy.two += 1,
                    _ => allocation.entropy.three_plus += 1,
                }
                if count >= 2 {
                    multi_assigned += 1;
                }
            }
            for (claim_index, weight) in candidates {
                assigned[claim_index].push((statement.id.clone(), weight));
            }
        }

        allocation.dual_coordinate_flag = assigned_statements > 0
            && (multi_assigned as f64) > DUAL_COORDINATE_FRACTION * assigned_statements as f64;

        let paragraph_index: BTreeMap<&ParagraphId, usize> = shadow
            .paragraphs
            .iter()
            .enumerate()
            .map(|(i, p)| (&p.id, i))
            .collect();

        let records = claims
            .iter()
            .zip(assigned)
            .map(|(claim, mut provenance)| {
                provenance.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.0.cmp(&b.0))
                });
                let bulk: f64 = provenance.iter().map(|(_, w)| w).sum();
                let weights: Vec<f64> = provenance.iter().map(|(_, w)| *w).collect();
                let exclusive = provenance
                    .iter()
                    .filter(|(id, w)| {
                        *w >= EXCLUSIVE_WEIGHT
                            && unique_winners.contains(id)
                            && allocation.winners.get(id) == Some(&claim.id)
                    })
                    .count();
                let exclusivity_ratio = if provenance.is_empty() {
                    0.0
                } else {
                    exclusive as f64 / provenance.len() as f64
                };
                ProvenanceRecord {
                    claim_id: claim.id.clone(),
                    dominant_paragraph_ids: dominant_paragraphs(&provenance, bulk, shadow),
                    entropy: stats::shannon_entropy_bits(&weights),
                    exclusivity_ratio,
                    provenance_bulk: bulk,
                    direct_statement_provenance: provenance,
                    source_coherence: source_coherence(claim, shadow, &paragraph_index, sim),
                }
            })
            .collect();

        debug!(
            claims = claims.len(),
            assigned_statements,
            multi_assigned,
            "competitive assignment done"
        );
        ClaimProvenance {
            records,
            allocation,
        }
    }

}

/// One embedding per claim: the normalized mean of its source statements'
/// paragraph embeddings, else the pre-embedded claim text. Shared by the
/// provenance engine and the continuous field so both see the same claim
/// geometry.
pub fn claim_embeddings(
    claims: &[Claim],
    shadow: &Shadow,
    store: &EmbeddingStore,
    paragraph_slot: &BTreeMap<ParagraphId, usize>,
    claim_text_embeddings: &BTreeMap<ClaimId, Vec<f32>>,
) -> Vec<Option<Vec<f32>>> {
    claims
        .iter()
        .map(|claim| {
            let slots: BTreeSet<usize> = claim
                .source_statement_ids
                .iter()
                .filter_map(|sid| shadow.statement(sid))
                .filter_map(|s| {
                    paragraph_slot
                        .get(&ParagraphId::new(s.model_index, s.paragraph_index))
                        .copied()
                })
                .collect();
            if !slots.is_empty() {
                let vectors: Vec<&[f32]> = slots.iter().map(|&slot| store.get(slot)).collect();
                let mut mean = stats::mean_vector(&vectors)?;
                stats::l2_normalize(&mut mean);
                Some(mean)
            } else {
                claim_text_embeddings.get(&claim.id).cloned()
            }
        })
        .collect()
}

/// Minimal prefix of paragraphs, heaviest contribution first, carrying
/// more than half the claim's bulk.
fn dominant_paragraphs(
    provenance: &[(StatementId, f64)],
    bulk: f64,
    shadow: &Shadow,
) -> Vec<ParagraphId> {
    if bulk <= 0.0 {
        return Vec::new();
    }
    let mut by_paragraph: BTreeMap<ParagraphId, f64> = BTreeMap::new();
    for (statement_id, weight) in provenance {
        if let Some(statement) = shadow.statement(statement_id) {
            let pid = ParagraphId::new(statement.model_index, statement.paragraph_index);
            *by_paragraph.entry(pid).or_insert(0.0) += weight;
        }
    }
    let mut ranked: Vec<(ParagraphId, f64)> = by_paragraph.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    let mut out = Vec::new();
    let mut cumulative = 0.0;
    for (pid, contribution) in ranked {
        if cumulative > DOMINANT_BULK_SHARE * bulk {
            break;
        }
        cumulative += contribution;
        out.push(pid);
    }
    out
}

/// Mean pairwise similarity of the claim's distinct source paragraphs.
/// One paragraph is perfectly coherent; no resolvable sources is `None`.
fn source_coherence(
    claim: &Claim,
    shadow: &Shadow,
    paragraph_index: &BTreeMap<&ParagraphId, usize>,
    sim: &SimilarityMatrix,
) -> Option<f64> {
    let indexes: BTreeSet<usize> = claim
        .source_statement_ids
        .iter()
        .filter_map(|sid| shadow.statement(sid))
        .filter_map(|s| {
            paragraph_index
                .get(&ParagraphId::new(s.model_index, s.paragraph_index))
                .copied()
        })
        .collect();
    match indexes.len() {
        0 => None,
        1 => Some(1.0),
        _ => {
            let list: Vec<usize> = indexes.into_iter().collect();
            let mut total = 0.0f64;
            let mut pairs = 0usize;
            for i in 0..list.len() {
                for j in (i + 1)..list.len() {
                    total += sim.at(list[i], list[j]) as f64;
                    pairs += 1;
                }
            }
            Some(total / pairs as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::ClaimType;
    use crate::shadow::ShadowExtractor;

    /// Shadow with four single-statement paragraphs across three models.
    fn fixture() -> (Shadow, EmbeddingStore, BTreeMap<ParagraphId, usize>, SimilarityMatrix) {
        let shadow = ShadowExtractor::new().extract(&[
            (1, "The queue batches writes.\n\nThe queue also retries."),
            (2, "A stream complicates operations."),
            (3, "Both work at small scale."),
        ]);
        // p_1_0, p_1_1 near one pole; p_2_0 at the other; p_3_0 leaning
        // toward the stream pole.
        let vectors = vec![
            vec![1.0, 0.0],
            vec![0.995, 0.0998],
            vec![0.0, 1.0],
            vec![0.6, 0.8],
        ];
        let slots: BTreeMap<ParagraphId, usize> = shadow
            .paragraphs
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        let store = EmbeddingStore::from_vectors(vectors).unwrap();
        let slot_list: Vec<usize> = (0..shadow.paragraphs.len()).collect();
        let sim = SimilarityMatrix::from_store(&store, &slot_list);
        (shadow, store, slots, sim)
    }

    fn claim(id: &str, sources: &[StatementId]) -> Claim {
        Claim {
            id: ClaimId::new(id),
            label: id.to_string(),
            text: format!("claim {}", id),
            claim_type: ClaimType::Factual,
            role: None,
            source_statement_ids: sources.iter().cloned().collect(),
            supporters: BTreeSet::new(),
            provenance_bulk: None,
            source_coherence: None,
        }
    }

    fn engine() -> ProvenanceEngine {
        ProvenanceEngine::new(&PipelineConfig::default())
    }

    #[test]
    fn test_bulk_equals_sum_of_assigned_weights() {
        let (shadow, store, slots, sim) = fixture();
        let claims = vec![
            claim("c1", &[StatementId::new(1, 0, 0)]),
            claim("c2", &[StatementId::new(2, 0, 0)]),
        ];
        let provenance = engine().assign(&shadow, &claims, &store, &slots, &sim, &BTreeMap::new());
        for record in &provenance.records {
            let sum: f64 = record
                .direct_statement_provenance
                .iter()
                .map(|(_, w)| w)
                .sum();
            assert!((sum - record.provenance_bulk).abs() < 1e-9);
        }
    }

    #[test]
    fn test_weights_sorted_descending() {
        let (shadow, store, slots, sim) = fixture();
        let claims = vec![
            claim("c1", &[StatementId::new(1, 0, 0)]),
            claim("c2", &[StatementId::new(2, 0, 0)]),
        ];
        let provenance = engine().assign(&shadow, &claims, &store, &slots, &sim, &BTreeMap::new());
        for record in &provenance.records {
            let weights: Vec<f64> = record
                .direct_statement_provenance
                .iter()
                .map(|(_, w)| *w)
                .collect();
            for pair in weights.windows(2) {
                assert!(pair[0] >= pair[1]);
            }
        }
    }

    #[test]
    fn test_clear_separation_gives_high_exclusivity() {
        let (shadow, store, slots, sim) = fixture();
        let claims = vec![
            claim("c1", &[StatementId::new(1, 0, 0)]),
            claim("c2", &[StatementId::new(2, 0, 0)]),
        ];
        let provenance = engine().assign(&shadow, &claims, &store, &slots, &sim, &BTreeMap::new());
        let c1 = provenance.record(&ClaimId::new("c1")).unwrap();
        // The two queue paragraphs land on c1 decisively.
        assert!(c1.provenance_bulk > 1.5);
        assert!((0.0..=1.0).contains(&c1.exclusivity_ratio));
        assert!(c1.exclusivity_ratio >= 0.99);
        // Statement-side: every statement sums to one winner.
        for count in provenance.allocation.assignment_counts.values() {
            assert!(*count <= 2);
        }
        assert!(!provenance.allocation.dual_coordinate_flag);
    }

    #[test]
    fn test_identical_claims_trip_dual_coordinate_flag() {
        let (shadow, store, slots, sim) = fixture();
        // Two claims with the same source: every statement splits evenly.
        let claims = vec![
            claim("c1", &[StatementId::new(1, 0, 0)]),
            claim("c2", &[StatementId::new(1, 0, 0)]),
        ];
        let provenance = engine().assign(&shadow, &claims, &store, &slots, &sim, &BTreeMap::new());
        assert!(provenance.allocation.dual_coordinate_flag);
        assert!(provenance.allocation.entropy.two > 0);
        // A tied maximum is not an exclusive win for either claim.
        for record in &provenance.records {
            assert!(record.exclusivity_ratio < 0.01);
        }
    }

    #[test]
    fn test_claim_text_fallback_embedding() {
        let (shadow, store, slots, sim) = fixture();
        let mut fallbacks = BTreeMap::new();
        fallbacks.insert(ClaimId::new("c_orphan"), vec![0.0, 1.0]);
        let claims = vec![
            claim("c1", &[StatementId::new(1, 0, 0)]),
            claim("c_orphan", &[]),
        ];
        let provenance = engine().assign(&shadow, &claims, &store, &slots, &sim, &fallbacks);
        let orphan = provenance.record(&ClaimId::new("c_orphan")).unwrap();
        // The stream paragraph aligns with the fallback embedding.
        assert!(orphan
            .direct_statement_provenance
            .iter()
            .any(|(id, _)| id == &StatementId::new(2, 0, 0)));
    }

    #[test]
    fn test_dominant_paragraphs_cover_majority_of_bulk() {
        let (shadow, store, slots, sim) = fixture();
        let claims = vec![
            claim("c1", &[StatementId::new(1, 0, 0)]),
            claim("c2", &[StatementId::new(2, 0, 0)]),
        ];
        let provenance = engine().assign(&shadow, &claims, &store, &slots, &sim, &BTreeMap::new());
        let c1 = provenance.record(&ClaimId::new("c1")).unwrap();
        assert!(!c1.dominant_paragraph_ids.is_empty());
        let covered: f64 = c1
            .direct_statement_provenance
            .iter()
            .filter(|(id, _)| {
                let statement = shadow.statement(id).unwrap();
                let pid = ParagraphId::new(statement.model_index, statement.paragraph_index);
                c1.dominant_paragraph_ids.contains(&pid)
            })
            .map(|(_, w)| w)
            .sum();
        assert!(covered > 0.5 * c1.provenance_bulk);
    }

    #[test]
    fn test_source_coherence_bounds() {
        let (shadow, store, slots, sim) = fixture();
        let claims = vec![
            claim("c_two", &[StatementId::new(1, 0, 0), StatementId::new(1, 1, 0)]),
            claim("c_one", &[StatementId::new(2, 0, 0)]),
            claim("c_none", &[]),
        ];
        let provenance = engine().assign(&shadow, &claims, &store, &slots, &sim, &BTreeMap::new());
        let two = provenance.record(&ClaimId::new("c_two")).unwrap();
        assert!(two.source_coherence.unwrap() > 0.9);
        let one = provenance.record(&ClaimId::new("c_one")).unwrap();
        assert_eq!(one.source_coherence, Some(1.0));
        let none = provenance.record(&ClaimId::new("c_none")).unwrap();
        assert_eq!(none.source_coherence, None);
    }

    #[test]
    fn test_no_claims_or_statements_is_empty() {
        let (shadow, store, slots, sim) = fixture();
        let provenance = engine().assign(&shadow, &[], &store, &slots, &sim, &BTreeMap::new());
        assert!(provenance.records.is_empty());
        assert!(provenance.allocation.winners.is_empty());
    }
}
