//! Structural analysis of the claim graph: leverage, keystones, conflict
//! inventory, and the overall shape prior.
//!
//! Shape classification blends edge-kind shares with the pre-semantic
//! region layout; the winning signal's margin over the runner-up is the
//! confidence.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::substrate::connected_components;
use crate::geometry::Substrate;
use crate::semantic::{Claim, ClaimId, EdgeKind, SemanticEdge};
use crate::shadow::{ParagraphId, Shadow};

/// Leverage blend weights.
const LEVERAGE_SUPPORT: f64 = 0.5;
const LEVERAGE_CASCADE: f64 = 0.3;
const LEVERAGE_UNCONTESTED: f64 = 0.2;
/// Keystone multiplier for articulation points.
const ARTICULATION_BOOST: f64 = 1.5;

/// Per-claim structural scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimStructure {
    pub claim_id: ClaimId,
    /// Supporting models over total models.
    pub support_ratio: f64,
    /// Share of the claim's source statements living in contested
    /// paragraphs.
    pub contested_ratio: f64,
    /// Count of refutes edges touching the claim.
    pub conflict_degree: usize,
    /// Edge degree over the maximum degree in the graph.
    pub cascade_breadth: f64,
    pub leverage: f64,
    /// True iff removing the claim disconnects the semantic edge graph.
    pub articulation_point: bool,
    pub keystone_score: f64,
}

/// Overall shape of the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Convergent,
    Divergent,
    Tradeoff,
    Fragmented,
    Parallel,
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Convergent => "convergent",
            Self::Divergent => "divergent",
            Self::Tradeoff => "tradeoff",
            Self::Fragmented => "fragmented",
            Self::Parallel => "parallel",
        };
        write!(f, "{}", s)
    }
}

/// Shape verdict with its full signal vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapePrior {
    pub shape: Shape,
    /// Top signal minus runner-up.
    pub confidence: f64,
    /// All five signals, keyed by canonical shape name.
    pub signals: BTreeMap<String, f64>,
}

/// Stage J output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralAnalysis {
    /// One entry per claim, in map order.
    pub claims: Vec<ClaimStructure>,
    /// All refutes edges.
    pub conflicts: Vec<SemanticEdge>,
    /// All tradeoff edges.
    pub tradeoffs: Vec<SemanticEdge>,
    pub shape: ShapePrior,
}

impl StructuralAnalysis {
    pub fn claim(&self, id: &ClaimId) -> Option<&ClaimStructure> {
        self.claims.iter().find(|c| &c.claim_id == id)
    }
}

/// Run the structural analysis.
pub fn analyze_structure(
    shadow: &Shadow,
    claims: &[Claim],
    edges: &[SemanticEdge],
    substrate: &Substrate,
) -> StructuralAnalysis {
    let model_count = shadow.model_indexes().len().max(1);
    let degree = degree_map(claims, edges);
    let max_degree = degree.values().copied().max().unwrap_or(0).max(1);
    let articulation = articulation_points(claims, edges);

    let claim_structures: Vec<ClaimStructure> = claims
        .iter()
        .map(|claim| {
            let support_ratio = claim.supporters.len() as f64 / model_count as f64;
            let contested_ratio = contested_ratio(claim, shadow);
            let cascade_breadth =
                degree.get(&claim.id).copied().unwrap_or(0) as f64 / max_degree as f64;
            let conflict_degree = edges
                .iter()
                .filter(|e| {
                    e.kind == EdgeKind::Refutes && (e.source == claim.id || e.target == claim.id)
                })
                .count();
            let leverage = LEVERAGE_SUPPORT * support_ratio
                + LEVERAGE_CASCADE * cascade_breadth
                + LEVERAGE_UNCONTESTED * (1.0 - contested_ratio);
            let articulation_point = articulation.contains(&claim.id);
            ClaimStructure {
                claim_id: claim.id.clone(),
                support_ratio,
                contested_ratio,
                conflict_degree,
                cascade_breadth,
                leverage,
                articulation_point,
                keystone_score: leverage
                    * if articulation_point {
                        ARTICULATION_BOOST
                    } else {
                        1.0
                    },
            }
        })
        .collect();

    let shape = classify_shape(&claim_structures, edges, substrate);
    debug!(shape = %shape.shape, confidence = shape.confidence, "structure analyzed");

    StructuralAnalysis {
        claims: claim_structures,
        conflicts: edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Refutes)
            .cloned()
            .collect(),
        tradeoffs: edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Tradeoff)
            .cloned()
            .collect(),
        shape,
    }
}

/// Undirected edge degree per claim.
fn degree_map(claims: &[Claim], edges: &[SemanticEdge]) -> BTreeMap<ClaimId, usize> {
    let mut degree: BTreeMap<ClaimId, usize> = claims.iter().map(|c| (c.id.clone(), 0)).collect();
    for edge in edges {
        if let Some(d) = degree.get_mut(&edge.source) {
            *d += 1;
        }
        if let Some(d) = degree.get_mut(&edge.target) {
            *d += 1;
        }
    }
    degree
}

fn contested_ratio(claim: &Claim, shadow: &Shadow) -> f64 {
    let sources: Vec<_> = claim
        .source_statement_ids
        .iter()
        .filter_map(|sid| shadow.statement(sid))
        .collect();
    if sources.is_empty() {
        return 0.0;
    }
    let contested = sources
        .iter()
        .filter(|s| {
            shadow
                .paragraph(&ParagraphId::new(s.model_index, s.paragraph_index))
                .map(|p| p.contested)
                .unwrap_or(false)
        })
        .count();
    contested as f64 / sources.len() as f64
}

/// Claims whose removal increases the component count of the semantic
/// graph (isolated claims never qualify).
fn articulation_points(claims: &[Claim], edges: &[SemanticEdge]) -> BTreeSet<ClaimId> {
    let n = claims.len();
    if n < 3 {
        return BTreeSet::new();
    }
    let index: BTreeMap<&ClaimId, usize> = claims.iter().map(|c| &c.id).enumerate().map(|(i, id)| (id, i)).collect();
    let pairs: BTreeSet<(usize, usize)> = edges
        .iter()
        .filter_map(|e| {
            let a = *index.get(&e.source)?;
            let b = *index.get(&e.target)?;
            Some((a.min(b), a.max(b)))
        })
        .collect();
    let baseline = component_count(n, &pairs, None);
    claims
        .iter()
        .enumerate()
        .filter(|(i, _)| component_count(n, &pairs, Some(*i)) > baseline)
        .map(|(_, c)| c.id.clone())
        .collect()
}

/// Component count over the claim graph, optionally with one node removed.
/// The removed node does not count as a component of its own.
fn component_count(n: usize, pairs: &BTreeSet<(usize, usize)>, removed: Option<usize>) -> usize {
    let kept: Vec<usize> = (0..n).filter(|i| Some(*i) != removed).collect();
    let relabel: BTreeMap<usize, usize> = kept.iter().enumerate().map(|(new, &old)| (old, new)).collect();
    let filtered: BTreeSet<(usize, usize)> = pairs
        .iter()
        .filter_map(|&(a, b)| {
            let ra = *relabel.get(&a)?;
            let rb = *relabel.get(&b)?;
            Some((ra.min(rb), ra.max(rb)))
        })
        .collect();
    let labels = connected_components(kept.len(), &filtered);
    labels.iter().collect::<BTreeSet<_>>().len()
}

/// Blend the five shape signals and pick the winner.
fn classify_shape(
    claims: &[ClaimStructure],
    edges: &[SemanticEdge],
    substrate: &Substrate,
) -> ShapePrior {
    let total_edges = edges.len();
    let share = |kind: EdgeKind| {
        if total_edges == 0 {
            0.0
        } else {
            edges.iter().filter(|e| e.kind == kind).count() as f64 / total_edges as f64
        }
    };
    let refutes_share = share(EdgeKind::Refutes);
    let conflict_share = refutes_share + share(EdgeKind::Tradeoff);

    let nodes = substrate.nodes.len();
    let fragmentation = if nodes <= 1 {
        0.0
    } else {
        (substrate.components.len().saturating_sub(1)) as f64 / (nodes - 1) as f64
    };

    let avg_support = if claims.is_empty() {
        0.0
    } else {
        claims.iter().map(|c| c.support_ratio).sum::<f64>() / claims.len() as f64
    };
    // 1.0 when support splits evenly across models, 0.0 at unanimity or
    // total absence.
    let balance = if claims.is_empty() {
        0.0
    } else {
        1.0 - claims
            .iter()
            .map(|c| (c.support_ratio - 0.5).abs() * 2.0)
            .sum::<f64>()
            / claims.len() as f64
    };

    let component_count = substrate.components.len();
    let mut signals = BTreeMap::new();
    signals.insert(
        Shape::Convergent.to_string(),
        0.5 * avg_support + 0.3 * (1.0 - fragmentation) + 0.2 * (1.0 - conflict_share),
    );
    signals.insert(
        Shape::Divergent.to_string(),
        0.5 * refutes_share + 0.3 * fragmentation + 0.2 * (1.0 - avg_support),
    );
    signals.insert(
        Shape::Tradeoff.to_string(),
        0.6 * conflict_share + 0.4 * balance,
    );
    signals.insert(
        Shape::Fragmented.to_string(),
        0.7 * fragmentation + 0.3 * (1.0 - avg_support),
    );
    signals.insert(
        Shape::Parallel.to_string(),
        0.5 * ((component_count.saturating_sub(1)) as f64 / 2.0).min(1.0)
            + 0.5 * (1.0 - conflict_share) * (1.0 - avg_support),
    );

    // Fixed evaluation order; first wins ties.
    let order = [
        Shape::Convergent,
        Shape::Divergent,
        Shape::Tradeoff,
        Shape::Fragmented,
        Shape::Parallel,
    ];
    let mut best = order[0];
    for shape in order.iter().skip(1) {
        if signals[&shape.to_string()] > signals[&best.to_string()] {
            best = *shape;
        }
    }
    let best_value = signals[&best.to_string()];
    let runner_up = order
        .iter()
        .filter(|s| **s != best)
        .map(|s| signals[&s.to_string()])
        .fold(f64::NEG_INFINITY, f64::max);
    ShapePrior {
        shape: best,
        confidence: (best_value - runner_up).max(0.0),
        signals,
    }
}
