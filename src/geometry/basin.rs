//! Basin inversion: distribution statistics over mutual-edge similarities
//! and the valley threshold separating intra-basin from inter-basin edges.
//!
//! When the discrimination range collapses, downstream consumers treat the
//! whole geometric signal as weak and fall back to semantic evidence; the
//! status field carries that verdict.

use std::collections::BTreeSet;

use tracing::debug;

use crate::stats;

use super::substrate::connected_components;
use super::types::{BasinInversion, BasinStatus, Substrate};

/// Discrimination range at or above this is a healthy geometric signal.
pub const OK_RANGE: f64 = 0.10;
/// Below `OK_RANGE` but at or above this, the signal is undifferentiated.
pub const UNDIFFERENTIATED_RANGE: f64 = 0.05;
/// Valley position as a fraction of the discrimination range above p10.
pub const VALLEY_FRACTION: f64 = 0.25;

/// Compute the basin inversion for a built substrate.
pub fn invert_basins(substrate: &Substrate) -> BasinInversion {
    let similarities: Vec<f64> = substrate
        .mutual_edges
        .iter()
        .map(|e| e.similarity as f64)
        .collect();

    let (mu, sigma) = stats::mean_stddev(&similarities);
    let p10 = stats::percentile(&similarities, 10.0);
    let p90 = stats::percentile(&similarities, 90.0);
    let discrimination_range = (p90 - p10).max(0.0);
    let valley_threshold = p10 + VALLEY_FRACTION * discrimination_range;

    let status = if similarities.is_empty() {
        BasinStatus::Degenerate
    } else if discrimination_range >= OK_RANGE {
        BasinStatus::Ok
    } else if discrimination_range >= UNDIFFERENTIATED_RANGE {
        BasinStatus::Undifferentiated
    } else {
        BasinStatus::Degenerate
    };

    let basin_count = count_basins(substrate, valley_threshold);
    debug!(
        mu,
        sigma,
        discrimination_range,
        valley_threshold,
        basin_count,
        status = %status,
        "basin inversion computed"
    );
    BasinInversion {
        mu,
        sigma,
        p10,
        p90,
        discrimination_range,
        valley_threshold,
        basin_count,
        status,
    }
}

/// Basins are connected components of the mutual sub-graph restricted to
/// edges with similarity at or above the valley threshold. Nodes with no
/// qualifying edge are singleton basins.
fn count_basins(substrate: &Substrate, valley_threshold: f64) -> usize {
    let n = substrate.nodes.len();
    if n == 0 {
        return 0;
    }
    let index_of = |id: &crate::shadow::ParagraphId| {
        substrate
            .nodes
            .iter()
            .position(|node| &node.paragraph_id == id)
    };
    let mut pairs: BTreeSet<(usize, usize)> = BTreeSet::new();
    for edge in &substrate.mutual_edges {
        if (edge.similarity as f64) >= valley_threshold {
            if let (Some(a), Some(b)) = (index_of(&edge.source), index_of(&edge.target)) {
                pairs.insert((a.min(b), a.max(b)));
            }
        }
    }
    let component_of = connected_components(n, &pairs);
    component_of.iter().collect::<BTreeSet<_>>().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::embedding::EmbeddingStore;
    use crate::geometry::substrate::SubstrateBuilder;
    use crate::shadow::{Paragraph, ParagraphId, Stance};

    fn paragraph(model: u32, index: u32) -> Paragraph {
        Paragraph {
            id: ParagraphId::new(model, index),
            model_index: model,
            paragraph_index: index,
            statement_ids: Vec::new(),
            dominant_stance: Stance::Assertive,
            contested: false,
            text: String::new(),
        }
    }

    fn build(vectors: Vec<Vec<f32>>, k: usize) -> Substrate {
        let paragraphs: Vec<Paragraph> =
            (0..vectors.len()).map(|i| paragraph(1, i as u32)).collect();
        let slots: Vec<usize> = (0..vectors.len()).collect();
        let store = EmbeddingStore::from_vectors(vectors).unwrap();
        let config = PipelineConfig::default().with_knn_k(k);
        SubstrateBuilder::new(&config).build(&paragraphs, &store, &slots).0
    }

    #[test]
    fn test_single_node_is_degenerate() {
        let substrate = build(vec![vec![1.0, 0.0]], 8);
        let basin = invert_basins(&substrate);
        assert_eq!(basin.status, BasinStatus::Degenerate);
        assert_eq!(basin.discrimination_range, 0.0);
        assert_eq!(basin.basin_count, 1);
    }

    #[test]
    fn test_near_identical_paragraphs_are_degenerate() {
        // Five paragraphs in a tight cone: every mutual similarity is
        // nearly 1, so p90 - p10 < 0.05.
        let vectors: Vec<Vec<f32>> = (0..5)
            .map(|i| {
                let angle = 0.002 * i as f32;
                vec![angle.cos(), angle.sin()]
            })
            .collect();
        let substrate = build(vectors, 8);
        let basin = invert_basins(&substrate);
        assert!(basin.discrimination_range < 0.05);
        assert_eq!(basin.status, BasinStatus::Degenerate);
        // Everything above the valley threshold: a single basin.
        assert_eq!(basin.basin_count, 1);
        assert_eq!(substrate.components.len(), 1);
    }

    #[test]
    fn test_spread_similarities_are_ok() {
        // A chain with stretched spacing produces a wide similarity spread
        // across mutual edges.
        let vectors: Vec<Vec<f32>> = (0..8)
            .map(|i| {
                let angle = 0.12 * (i * i) as f32 / 8.0;
                vec![angle.cos(), angle.sin()]
            })
            .collect();
        let substrate = build(vectors, 3);
        let basin = invert_basins(&substrate);
        assert!(basin.discrimination_range >= 0.0);
        assert_eq!(
            basin.discrimination_range,
            (basin.p90 - basin.p10).max(0.0)
        );
        assert!(basin.valley_threshold >= basin.p10);
    }

    #[test]
    fn test_two_well_separated_basins() {
        // Two tight triples with an in-between spread wide enough for the
        // valley threshold to sever the weak cross links.
        let mut vectors = Vec::new();
        for i in 0..3 {
            let angle = 0.06 * i as f32;
            vectors.push(vec![angle.cos(), angle.sin()]);
        }
        for i in 0..3 {
            let angle = 0.5 + 0.06 * i as f32;
            vectors.push(vec![angle.cos(), angle.sin()]);
        }
        let substrate = build(vectors, 3);
        let basin = invert_basins(&substrate);
        assert!(basin.basin_count >= 2);
    }

    #[test]
    fn test_discrimination_range_never_negative() {
        let substrate = build(vec![vec![1.0, 0.0], vec![0.9, 0.43589]], 8);
        let basin = invert_basins(&substrate);
        assert!(basin.discrimination_range >= 0.0);
    }
}
