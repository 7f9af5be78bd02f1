//! The cognitive artifact and its assembler.
//!
//! Assembly is a pure merge of stage outputs into the canonical shape,
//! plus two guarantees: every cross-reference resolves (offending items
//! are dropped with an observation, never a crash), and every float in the
//! output is finite (non-finite values are scrubbed with an observation).
//! Absent optional sections stay `None`; nothing is fabricated.

use serde::{Deserialize, Serialize};

use crate::field::{ContinuousField, ParagraphSimilarityField};
use crate::geometry::{BasinInversion, Substrate};
use crate::observe::{codes, Observation, PipelineObservability};
use crate::provenance::{ClaimProvenance, ProvenanceRecord, StatementAllocation};
use crate::relevance::QueryRelevance;
use crate::semantic::SemanticMap;
use crate::shadow::Shadow;
use crate::structure::StructuralAnalysis;
use crate::survey::{BlastRadiusFilter, SurveyGates};

const STAGE: &str = "assembly";

/// Snapshot of the pre-semantic region layout, for consumers that only
/// need the coarse geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreSemanticSummary {
    pub paragraph_count: usize,
    pub component_count: usize,
    pub region_count: usize,
    pub patch_count: usize,
    /// `(components - 1) / (nodes - 1)`, 0 for trivial substrates.
    pub fragmentation: f64,
}

impl PreSemanticSummary {
    pub fn from_substrate(substrate: &Substrate) -> Self {
        let nodes = substrate.nodes.len();
        let components = substrate.components.len();
        Self {
            paragraph_count: nodes,
            component_count: components,
            region_count: substrate.regions.len(),
            patch_count: substrate
                .regions
                .iter()
                .filter(|r| r.kind == crate::geometry::RegionKind::Patch)
                .count(),
            fragmentation: if nodes <= 1 {
                0.0
            } else {
                components.saturating_sub(1) as f64 / (nodes - 1) as f64
            },
        }
    }
}

/// Geometric sub-artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometrySection {
    pub substrate: Substrate,
    pub basin_inversion: BasinInversion,
    pub pre_semantic: PreSemanticSummary,
}

/// The immutable output of one pipeline run.
///
/// JSON-serializable; all floats finite. Re-running on identical inputs
/// with the same embedder/mapper reproduces it byte-for-byte except the
/// observability timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveArtifact {
    pub query: String,
    pub shadow: Shadow,
    pub geometry: Option<GeometrySection>,
    pub semantic: Option<SemanticMap>,
    pub claim_provenance: Option<Vec<ProvenanceRecord>>,
    pub statement_allocation: Option<StatementAllocation>,
    pub continuous_field: Option<ContinuousField>,
    pub paragraph_similarity_field: Option<ParagraphSimilarityField>,
    pub query_relevance: Option<QueryRelevance>,
    pub blast_radius_filter: Option<BlastRadiusFilter>,
    pub survey_gates: Option<SurveyGates>,
    pub structural_analysis: Option<StructuralAnalysis>,
    pub observability: PipelineObservability,
}

impl CognitiveArtifact {
    /// Compact JSON form.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Pretty-printed JSON form.
    pub fn to_json_pretty(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Everything the stages produced, ready for the final merge.
#[derive(Debug, Clone, Default)]
pub struct StageOutputs {
    pub query: String,
    pub shadow: Shadow,
    pub geometry: Option<GeometrySection>,
    pub semantic: Option<SemanticMap>,
    pub provenance: Option<ClaimProvenance>,
    pub continuous_field: Option<ContinuousField>,
    pub paragraph_similarity_field: Option<ParagraphSimilarityField>,
    pub query_relevance: Option<QueryRelevance>,
    pub blast_radius_filter: Option<BlastRadiusFilter>,
    pub survey_gates: Option<SurveyGates>,
    pub structural_analysis: Option<StructuralAnalysis>,
}

/// Pure merge of stage outputs into the canonical artifact.
///
/// Running it twice on the same outputs yields the same artifact.
pub fn assemble(
    outputs: StageOutputs,
    mut observability: PipelineObservability,
) -> CognitiveArtifact {
    let StageOutputs {
        query,
        shadow,
        geometry,
        mut semantic,
        provenance,
        continuous_field,
        paragraph_similarity_field,
        query_relevance,
        blast_radius_filter,
        survey_gates,
        structural_analysis,
    } = outputs;

    let mut notes: Vec<Observation> = Vec::new();
    if let Some(map) = semantic.as_mut() {
        validate_semantic(map, &shadow, &mut notes);
    }
    let (claim_provenance, statement_allocation) = match provenance {
        Some(p) => {
            let (records, allocation) = validate_provenance(p, semantic.as_ref(), &mut notes);
            (Some(records), Some(allocation))
        }
        None => (None, None),
    };

    let mut artifact = CognitiveArtifact {
        query,
        shadow,
        geometry,
        semantic,
        claim_provenance,
        statement_allocation,
        continuous_field,
        paragraph_similarity_field,
        query_relevance,
        blast_radius_filter,
        survey_gates,
        structural_analysis,
        observability: PipelineObservability::default(),
    };

    let scrubbed = scrub_non_finite(&mut artifact);
    if scrubbed > 0 {
        notes.push(
            Observation::warning(
                STAGE,
                codes::NON_FINITE_SCRUBBED,
                format!("replaced {} non-finite values", scrubbed),
            )
            .with_metadata("count", scrubbed as i64),
        );
    }

    observability.extend_observations(notes);
    artifact.observability = observability;
    artifact
}

/// Drop dangling statement references and edges with missing endpoints.
fn validate_semantic(map: &mut SemanticMap, shadow: &Shadow, notes: &mut Vec<Observation>) {
    let statement_ids = shadow.statement_id_set();
    for claim in map.claims.iter_mut() {
        let before = claim.source_statement_ids.len();
        claim
            .source_statement_ids
            .retain(|sid| statement_ids.contains(sid));
        let dropped = before - claim.source_statement_ids.len();
        if dropped > 0 {
            notes.push(
                Observation::warning(
                    STAGE,
                    codes::DANGLING_REFERENCE_DROPPED,
                    format!(
                        "claim '{}': dropped {} unknown statement reference(s)",
                        claim.id, dropped
                    ),
                )
                .with_metadata("claim", claim.id.as_str()),
            );
        }
    }
    let claim_ids: std::collections::BTreeSet<_> =
        map.claims.iter().map(|c| c.id.clone()).collect();
    let before = map.edges.len();
    map.edges
        .retain(|e| claim_ids.contains(&e.source) && claim_ids.contains(&e.target));
    if map.edges.len() < before {
        notes.push(Observation::warning(
            STAGE,
            codes::DANGLING_REFERENCE_DROPPED,
            format!("dropped {} edge(s) with missing endpoints", before - map.edges.len()),
        ));
    }
    for conditional in map.conditionals.iter_mut() {
        conditional.claims.retain(|id| claim_ids.contains(id));
    }
    // Narrative citations should point at real model indexes.
    let models: std::collections::BTreeSet<u32> =
        shadow.paragraphs.iter().map(|p| p.model_index).collect();
    for citation in map.narrative_citations() {
        if !models.contains(&citation) {
            notes.push(Observation::info(
                STAGE,
                codes::NARRATIVE_UNKNOWN_CITATION,
                format!("narrative cites unknown response [{}]", citation),
            ));
        }
    }
}

/// Drop provenance records for claims the semantic layer no longer holds.
fn validate_provenance(
    provenance: ClaimProvenance,
    semantic: Option<&SemanticMap>,
    notes: &mut Vec<Observation>,
) -> (Vec<ProvenanceRecord>, StatementAllocation) {
    let ClaimProvenance {
        mut records,
        allocation,
    } = provenance;
    if let Some(map) = semantic {
        let claim_ids: std::collections::BTreeSet<_> =
            map.claims.iter().map(|c| c.id.clone()).collect();
        let before = records.len();
        records.retain(|r| claim_ids.contains(&r.claim_id));
        if records.len() < before {
            notes.push(Observation::warning(
                STAGE,
                codes::DANGLING_REFERENCE_DROPPED,
                format!(
                    "dropped {} provenance record(s) for unknown claims",
                    before - records.len()
                ),
            ));
        }
    }
    (records, allocation)
}

fn fix_f64(value: &mut f64, count: &mut usize) {
    if !value.is_finite() {
        *value = 0.0;
        *count += 1;
    }
}

fn fix_f32(value: &mut f32, count: &mut usize) {
    if !value.is_finite() {
        *value = 0.0;
        *count += 1;
    }
}

fn fix_opt(value: &mut Option<f64>, count: &mut usize) {
    if let Some(v) = value {
        if !v.is_finite() {
            *value = None;
            *count += 1;
        }
    }
}

/// Replace non-finite floats: required fields become 0, optional fields
/// become `None`. Returns the replacement count.
fn scrub_non_finite(artifact: &mut CognitiveArtifact) -> usize {
    let mut n = 0usize;

    for statement in artifact.shadow.statements.iter_mut() {
        fix_f64(&mut statement.confidence, &mut n);
    }
    if let Some(geometry) = artifact.geometry.as_mut() {
        for node in geometry.substrate.nodes.iter_mut() {
            fix_f32(&mut node.top1_sim, &mut n);
            fix_f32(&mut node.avg_topk_sim, &mut n);
            fix_f32(&mut node.isolation_score, &mut n);
        }
        for edge in geometry
            .substrate
            .knn_edges
            .iter_mut()
            .chain(geometry.substrate.mutual_edges.iter_mut())
            .chain(geometry.substrate.strong_edges.iter_mut())
        {
            fix_f32(&mut edge.similarity, &mut n);
        }
        let basin = &mut geometry.basin_inversion;
        fix_f64(&mut basin.mu, &mut n);
        fix_f64(&mut basin.sigma, &mut n);
        fix_f64(&mut basin.p10, &mut n);
        fix_f64(&mut basin.p90, &mut n);
        fix_f64(&mut basin.discrimination_range, &mut n);
        fix_f64(&mut basin.valley_threshold, &mut n);
        fix_f64(&mut geometry.pre_semantic.fragmentation, &mut n);
    }
    if let Some(map) = artifact.semantic.as_mut() {
        for claim in map.claims.iter_mut() {
            fix_opt(&mut claim.provenance_bulk, &mut n);
            fix_opt(&mut claim.source_coherence, &mut n);
        }
        for edge in map.edges.iter_mut() {
            fix_f64(&mut edge.weight, &mut n);
        }
    }
    if let Some(records) = artifact.claim_provenance.as_mut() {
        for record in records.iter_mut() {
            for (_, weight) in record.direct_statement_provenance.iter_mut() {
                fix_f64(weight, &mut n);
            }
            fix_f64(&mut record.provenance_bulk, &mut n);
            fix_f64(&mut record.entropy, &mut n);
            fix_f64(&mut record.exclusivity_ratio, &mut n);
            fix_opt(&mut record.source_coherence, &mut n);
        }
    }
    if let Some(field) = artifact.continuous_field.as_mut() {
        for claim in field.claims.iter_mut() {
            for entry in claim.field.iter_mut() {
                fix_f64(&mut entry.sim_claim, &mut n);
                fix_f64(&mut entry.evidence_score, &mut n);
            }
        }
    }
    if let Some(field) = artifact.paragraph_similarity_field.as_mut() {
        for claim in field.claims.iter_mut() {
            for entry in claim.ranked.iter_mut() {
                fix_f64(&mut entry.sim_claim, &mut n);
                fix_f64(&mut entry.evidence_score, &mut n);
            }
        }
    }
    if let Some(relevance) = artifact.query_relevance.as_mut() {
        fix_f64(&mut relevance.cuts.0, &mut n);
        fix_f64(&mut relevance.cuts.1, &mut n);
        for score in relevance.statements.iter_mut() {
            fix_f64(&mut score.composite_relevance, &mut n);
            fix_f64(&mut score.query_similarity, &mut n);
            fix_f64(&mut score.novelty, &mut n);
        }
    }
    if let Some(filter) = artifact.blast_radius_filter.as_mut() {
        fix_f64(&mut filter.convergence_ratio, &mut n);
        for score in filter.scores.iter_mut() {
            fix_f64(&mut score.composite, &mut n);
            fix_f64(&mut score.raw_composite, &mut n);
            fix_f64(&mut score.components.cascade_breadth, &mut n);
            fix_f64(&mut score.components.exclusive_evidence, &mut n);
            fix_f64(&mut score.components.leverage, &mut n);
            fix_f64(&mut score.components.query_relevance, &mut n);
            fix_f64(&mut score.components.articulation_point, &mut n);
        }
    }
    if let Some(gates) = artifact.survey_gates.as_mut() {
        for gate in gates.gates.iter_mut() {
            fix_f64(&mut gate.blast_radius, &mut n);
        }
    }
    if let Some(structure) = artifact.structural_analysis.as_mut() {
        for claim in structure.claims.iter_mut() {
            fix_f64(&mut claim.support_ratio, &mut n);
            fix_f64(&mut claim.contested_ratio, &mut n);
            fix_f64(&mut claim.cascade_breadth, &mut n);
            fix_f64(&mut claim.leverage, &mut n);
            fix_f64(&mut claim.keystone_score, &mut n);
        }
        fix_f64(&mut structure.shape.confidence, &mut n);
        for value in structure.shape.signals.values_mut() {
            fix_f64(value, &mut n);
        }
    }
    n
}
