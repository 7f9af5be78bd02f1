//! Types for the geometric substrate over paragraph embeddings.

use serde::{Deserialize, Serialize};

use crate::shadow::{ParagraphId, Stance};

/// One node per paragraph in the substrate graph.
///
/// The raw embedding stays in the run's [`crate::embedding::EmbeddingStore`]
/// arena; nodes carry the slot index. 2-D coordinates are advisory layout
/// output and never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstrateNode {
    pub paragraph_id: ParagraphId,
    pub model_index: u32,
    /// Slot of this paragraph's embedding in the run arena.
    pub embedding_slot: usize,
    pub mutual_degree: usize,
    pub strong_degree: usize,
    pub top1_sim: f32,
    pub avg_topk_sim: f32,
    /// `1 - avg_topk_sim`: how far this paragraph sits from its neighbors.
    pub isolation_score: f32,
    /// Index into the substrate's component list.
    pub component_id: usize,
    /// Id of the region this node finally landed in.
    pub region_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
}

/// Classification of a substrate edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeClass {
    Knn,
    Mutual,
    Strong,
}

impl std::fmt::Display for EdgeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Knn => "knn",
            Self::Mutual => "mutual",
            Self::Strong => "strong",
        };
        write!(f, "{}", s)
    }
}

/// Undirected substrate edge, canonicalized so `source < target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstrateEdge {
    pub source: ParagraphId,
    pub target: ParagraphId,
    pub similarity: f32,
    pub kind: EdgeClass,
}

/// Kind of a region. Legacy payloads sometimes said `cluster`; that is
/// accepted as an alias of `patch` on ingest and never emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Component,
    #[serde(alias = "cluster")]
    Patch,
}

/// Lightweight interpretation profile of a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionProfile {
    pub size: usize,
    /// Distinct model indexes contributing paragraphs.
    pub model_spread: usize,
    /// Modal dominant stance over member paragraphs.
    pub dominant_stance: Stance,
}

/// A set of paragraphs treated as one interpretation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub kind: RegionKind,
    /// Member paragraph ids, sorted.
    pub node_ids: Vec<ParagraphId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<RegionProfile>,
}

/// The assembled substrate graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Substrate {
    pub nodes: Vec<SubstrateNode>,
    pub knn_edges: Vec<SubstrateEdge>,
    pub mutual_edges: Vec<SubstrateEdge>,
    pub strong_edges: Vec<SubstrateEdge>,
    /// Weakly-connected components of the mutual graph, as regions of kind
    /// `component`.
    pub components: Vec<Region>,
    /// Final interpretation units: small components verbatim, oversized
    /// components split into `patch` regions.
    pub regions: Vec<Region>,
}

impl Substrate {
    pub fn node(&self, id: &ParagraphId) -> Option<&SubstrateNode> {
        self.nodes.iter().find(|n| &n.paragraph_id == id)
    }
}

/// Health of the geometric signal derived from mutual-edge similarities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasinStatus {
    /// Discrimination range >= 0.10: geometry is trustworthy.
    Ok,
    /// Range in [0.05, 0.10): weak signal, prefer semantic evidence.
    Undifferentiated,
    /// Range below 0.05 (or no edges at all): ignore geometry.
    Degenerate,
}

impl std::fmt::Display for BasinStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Undifferentiated => "undifferentiated",
            Self::Degenerate => "degenerate",
        };
        write!(f, "{}", s)
    }
}

/// Distribution statistics over mutual-edge similarities plus the derived
/// valley threshold and basin count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasinInversion {
    pub mu: f64,
    pub sigma: f64,
    pub p10: f64,
    pub p90: f64,
    /// `p90 - p10`; proxy for geometric signal strength.
    pub discrimination_range: f64,
    /// `p10 + 0.25 * discrimination_range`; separates intra-basin from
    /// inter-basin edges.
    pub valley_threshold: f64,
    pub basin_count: usize,
    pub status: BasinStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_kind_cluster_alias() {
        let kind: RegionKind = serde_json::from_str("\"cluster\"").unwrap();
        assert_eq!(kind, RegionKind::Patch);
        // Never emitted as cluster.
        assert_eq!(serde_json::to_string(&RegionKind::Patch).unwrap(), "\"patch\"");
    }

    #[test]
    fn test_basin_status_canonical_form() {
        assert_eq!(BasinStatus::Ok.to_string(), "ok");
        assert_eq!(
            serde_json::to_string(&BasinStatus::Undifferentiated).unwrap(),
            "\"undifferentiated\""
        );
    }

    #[test]
    fn test_edge_class_canonical_form() {
        assert_eq!(EdgeClass::Mutual.to_string(), "mutual");
        assert_eq!(serde_json::to_string(&EdgeClass::Knn).unwrap(), "\"knn\"");
    }
}
