//! Blast radius filter and survey gate generation.
//!
//! Claims are scored for follow-up impact from five normalized components;
//! thin-evidence claims are suppressed outright. Surviving claims are
//! clustered over conflict edges into decision axes, and each axis becomes
//! one deterministic yes/no question.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::geometry::substrate::connected_components;
use crate::provenance::ClaimProvenance;
use crate::relevance::QueryRelevance;
use crate::semantic::{Claim, ClaimId, SemanticEdge};
use crate::structure::StructuralAnalysis;

/// Blast-radius composite weights.
const CASCADE_WEIGHT: f64 = 0.30;
const EXCLUSIVE_WEIGHT: f64 = 0.25;
const LEVERAGE_WEIGHT: f64 = 0.20;
const RELEVANCE_WEIGHT: f64 = 0.15;
const ARTICULATION_WEIGHT: f64 = 0.10;

/// The five normalized blast-radius components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlastRadiusComponents {
    pub cascade_breadth: f64,
    pub exclusive_evidence: f64,
    pub leverage: f64,
    pub query_relevance: f64,
    /// 1.0 iff the claim is an articulation point of the semantic graph.
    pub articulation_point: f64,
}

/// Per-claim blast radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlastRadiusScore {
    pub claim_id: ClaimId,
    /// `raw_composite`, or 0 when suppressed.
    pub composite: f64,
    pub raw_composite: f64,
    pub components: BlastRadiusComponents,
    pub suppressed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppression_reason: Option<String>,
}

/// Stage I filter output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlastRadiusFilter {
    /// One score per claim, in map order.
    pub scores: Vec<BlastRadiusScore>,
    pub skip_survey: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Agreeing claim pairs over all connected claim pairs.
    pub convergence_ratio: f64,
    pub question_ceiling: usize,
}

impl BlastRadiusFilter {
    pub fn score(&self, id: &ClaimId) -> Option<&BlastRadiusScore> {
        self.scores.iter().find(|s| &s.claim_id == id)
    }
}

/// A generated yes/no follow-up question separating one decision axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyGate {
    pub id: String,
    pub question: String,
    pub affected_claims: BTreeSet<ClaimId>,
    /// Highest composite among the affected claims.
    pub blast_radius: f64,
    pub reasoning: String,
}

/// Stage I gate output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyGates {
    pub gates: Vec<SurveyGate>,
}

/// Compute blast radii, suppression, and survey gates.
pub fn blast_radius_and_gates(
    claims: &[Claim],
    edges: &[SemanticEdge],
    provenance: &ClaimProvenance,
    structure: &StructuralAnalysis,
    relevance: &QueryRelevance,
    config: &PipelineConfig,
) -> (BlastRadiusFilter, SurveyGates) {
    if claims.is_empty() {
        return (
            BlastRadiusFilter {
                skip_survey: true,
                skip_reason: Some("insufficient axes".to_string()),
                question_ceiling: 0,
                ..Default::default()
            },
            SurveyGates::default(),
        );
    }

    let scores: Vec<BlastRadiusScore> = claims
        .iter()
        .map(|claim| {
            let record = provenance.record(&claim.id);
            let claim_structure = structure.claim(&claim.id);
            let components = BlastRadiusComponents {
                cascade_breadth: claim_structure.map(|s| s.cascade_breadth).unwrap_or(0.0),
                exclusive_evidence: record.map(|r| r.exclusivity_ratio).unwrap_or(0.0),
                leverage: claim_structure.map(|s| s.leverage).unwrap_or(0.0).clamp(0.0, 1.0),
                query_relevance: record
                    .and_then(|r| {
                        relevance.mean_composite(
                            r.direct_statement_provenance.iter().map(|(id, _)| id),
                        )
                    })
                    .unwrap_or(0.0)
                    .clamp(0.0, 1.0),
                articulation_point: if claim_structure.map(|s| s.articulation_point).unwrap_or(false)
                {
                    1.0
                } else {
                    0.0
                },
            };
            let raw_composite = CASCADE_WEIGHT * components.cascade_breadth
                + EXCLUSIVE_WEIGHT * components.exclusive_evidence
                + LEVERAGE_WEIGHT * components.leverage
                + RELEVANCE_WEIGHT * components.query_relevance
                + ARTICULATION_WEIGHT * components.articulation_point;
            let bulk = record.map(|r| r.provenance_bulk).unwrap_or(0.0);
            let suppressed = bulk < config.blast_radius_suppression_bulk;
            BlastRadiusScore {
                claim_id: claim.id.clone(),
                composite: if suppressed { 0.0 } else { raw_composite },
                raw_composite,
                components,
                suppressed,
                suppression_reason: suppressed.then(|| "insufficient evidence".to_string()),
            }
        })
        .collect();

    let unsuppressed: Vec<&BlastRadiusScore> = scores.iter().filter(|s| !s.suppressed).collect();
    let convergence_ratio = convergence_ratio(edges);
    let question_ceiling = (1
        + (convergence_ratio * 4.0).floor() as usize)
        .min(config.question_ceiling_cap);

    if unsuppressed.len() < 2 {
        debug!(unsuppressed = unsuppressed.len(), "survey skipped");
        return (
            BlastRadiusFilter {
                scores,
                skip_survey: true,
                skip_reason: Some("insufficient axes".to_string()),
                convergence_ratio,
                question_ceiling,
            },
            SurveyGates::default(),
        );
    }

    let gates = extract_gates(claims, edges, &scores, question_ceiling);
    let skip_survey = gates.is_empty();
    let filter = BlastRadiusFilter {
        scores,
        skip_survey,
        skip_reason: skip_survey.then(|| "no conflict axes".to_string()),
        convergence_ratio,
        question_ceiling,
    };
    (filter, SurveyGates { gates })
}

/// Agreeing pairs (supports/elaborates) over all claim pairs connected by
/// any edge; zero when the graph has no edges.
fn convergence_ratio(edges: &[SemanticEdge]) -> f64 {
    let mut agreeing: BTreeSet<(ClaimId, ClaimId)> = BTreeSet::new();
    let mut all: BTreeSet<(ClaimId, ClaimId)> = BTreeSet::new();
    for edge in edges {
        let pair = if edge.source < edge.target {
            (edge.source.clone(), edge.target.clone())
        } else {
            (edge.target.clone(), edge.source.clone())
        };
        if matches!(
            edge.kind,
            crate::semantic::EdgeKind::Supports | crate::semantic::EdgeKind::Elaborates
        ) {
            agreeing.insert(pair.clone());
        }
        all.insert(pair);
    }
    if all.is_empty() {
        0.0
    } else {
        agreeing.len() as f64 / all.len() as f64
    }
}

/// Cluster unsuppressed claims over conflict edges; one gate per axis,
/// highest blast radius first, capped at the ceiling.
fn extract_gates(
    claims: &[Claim],
    edges: &[SemanticEdge],
    scores: &[BlastRadiusScore],
    ceiling: usize,
) -> Vec<SurveyGate> {
    let suppressed: BTreeSet<&ClaimId> = scores
        .iter()
        .filter(|s| s.suppressed)
        .map(|s| &s.claim_id)
        .collect();
    let composite_of: BTreeMap<&ClaimId, f64> =
        scores.iter().map(|s| (&s.claim_id, s.composite)).collect();
    let label_of: BTreeMap<&ClaimId, &str> =
        claims.iter().map(|c| (&c.id, c.label.as_str())).collect();

    // Conflict subgraph over surviving claims.
    let survivors: Vec<&ClaimId> = claims
        .iter()
        .map(|c| &c.id)
        .filter(|id| !suppressed.contains(id))
        .collect();
    let index_of: BTreeMap<&ClaimId, usize> =
        survivors.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let conflict_edges: Vec<&SemanticEdge> = edges
        .iter()
        .filter(|e| e.kind.is_conflict())
        .filter(|e| index_of.contains_key(&e.source) && index_of.contains_key(&e.target))
        .collect();
    let pairs: BTreeSet<(usize, usize)> = conflict_edges
        .iter()
        .map(|e| {
            let a = index_of[&e.source];
            let b = index_of[&e.target];
            (a.min(b), a.max(b))
        })
        .collect();
    let component_of = connected_components(survivors.len(), &pairs);

    // Axes are conflict components with at least two members.
    let mut axes: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (node, &component) in component_of.iter().enumerate() {
        axes.entry(component).or_default().push(node);
    }
    let mut gates: Vec<SurveyGate> = axes
        .values()
        .filter(|members| members.len() >= 2)
        .filter_map(|members| {
            let member_ids: BTreeSet<ClaimId> =
                members.iter().map(|&m| survivors[m].clone()).collect();
            // The axis poles: endpoints of the heaviest-impact conflict
            // edge inside the axis.
            let pole_edge = conflict_edges
                .iter()
                .filter(|e| member_ids.contains(&e.source) && member_ids.contains(&e.target))
                .max_by(|a, b| {
                    let impact = |e: &SemanticEdge| {
                        composite_of.get(&e.source).copied().unwrap_or(0.0)
                            + composite_of.get(&e.target).copied().unwrap_or(0.0)
                    };
                    impact(a)
                        .partial_cmp(&impact(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| (&b.source, &b.target).cmp(&(&a.source, &a.target)))
                })?;
            let side_a = label_of.get(&pole_edge.source).copied().unwrap_or("");
            let side_b = label_of.get(&pole_edge.target).copied().unwrap_or("");
            let blast_radius = member_ids
                .iter()
                .filter_map(|id| composite_of.get(id))
                .fold(0.0f64, |a, &b| a.max(b));
            Some(SurveyGate {
                id: String::new(),
                question: format!(
                    "Should \"{}\" take precedence over \"{}\" for this decision?",
                    side_a, side_b
                ),
                affected_claims: member_ids,
                blast_radius,
                reasoning: format!(
                    "\"{}\" and \"{}\" sit on opposite sides of a {} relation; answering collapses the axis.",
                    side_a, side_b, pole_edge.kind
                ),
            })
        })
        .collect();

    gates.sort_by(|a, b| {
        b.blast_radius
            .partial_cmp(&a.blast_radius)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.affected_claims.cmp(&b.affected_claims))
    });
    gates.truncate(ceiling);
    for (index, gate) in gates.iter_mut().enumerate() {
        gate.id = format!("gate_{}", index);
    }
    gates
}
