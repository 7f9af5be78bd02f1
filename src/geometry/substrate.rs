//! Substrate construction: k-NN graph, mutual and strong edges, weakly
//! connected components, and patch partitioning of oversized components.
//!
//! The full cosine-similarity matrix is built once (O(n^2 * d), n is
//! typically well under 200) and shared read-only with the basin, the
//! provenance engine, and the continuous field.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::PipelineConfig;
use crate::embedding::EmbeddingStore;
use crate::shadow::{Paragraph, Stance};
use crate::stats;

use super::types::{
    EdgeClass, Region, RegionKind, RegionProfile, Substrate, SubstrateEdge, SubstrateNode,
};

/// Dense symmetric similarity matrix over paragraph embeddings.
///
/// Built once per run; read by the basin inversion, the provenance engine
/// and the continuous field. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    n: usize,
    data: Vec<f32>,
}

impl SimilarityMatrix {
    /// Build from the given arena slots. Vectors are unit length (the
    /// embedding adapter guarantees it), so dot product is cosine.
    pub fn from_store(store: &EmbeddingStore, slots: &[usize]) -> Self {
        let n = slots.len();
        let mut data = vec![0.0f32; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
            for j in (i + 1)..n {
                let sim = stats::dot(store.get(slots[i]), store.get(slots[j])).clamp(-1.0, 1.0);
                data[i * n + j] = sim;
                data[j * n + i] = sim;
            }
        }
        Self { n, data }
    }

    pub fn at(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.n + j]
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }
}

/// Builds the substrate graph for one run.
#[derive(Debug, Clone)]
pub struct SubstrateBuilder {
    k: usize,
    strong_threshold: f32,
    region_max_size: usize,
}

impl SubstrateBuilder {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            k: config.knn_k,
            strong_threshold: config.strong_threshold,
            region_max_size: config.region_max_size,
        }
    }

    /// Assemble the substrate. `slots[i]` is the arena slot of
    /// `paragraphs[i]`; paragraph order defines node order.
    pub fn build(
        &self,
        paragraphs: &[Paragraph],
        store: &EmbeddingStore,
        slots: &[usize],
    ) -> (Substrate, SimilarityMatrix) {
        let n = paragraphs.len();
        let sim = SimilarityMatrix::from_store(store, slots);
        if n == 0 {
            return (Substrate::default(), sim);
        }

        let k = self.k.min(n.saturating_sub(1));
        let neighbors = self.top_k_neighbors(paragraphs, &sim, k);

        // Undirected k-NN pairs: either endpoint listing the other.
        let mut knn_pairs: BTreeSet<(usize, usize)> = BTreeSet::new();
        for (i, list) in neighbors.iter().enumerate() {
            for &j in list {
                knn_pairs.insert((i.min(j), i.max(j)));
            }
        }
        let mutual_pairs: BTreeSet<(usize, usize)> = knn_pairs
            .iter()
            .copied()
            .filter(|&(a, b)| neighbors[a].contains(&b) && neighbors[b].contains(&a))
            .collect();
        let strong_pairs: BTreeSet<(usize, usize)> = knn_pairs
            .iter()
            .copied()
            .filter(|&(a, b)| sim.at(a, b) >= self.strong_threshold)
            .collect();

        let component_of = connected_components(n, &mutual_pairs);
        let component_members = group_by_component(&component_of);

        let components: Vec<Region> = component_members
            .iter()
            .enumerate()
            .map(|(idx, members)| {
                make_region(format!("component_{}", idx), RegionKind::Component, members, paragraphs)
            })
            .collect();

        // Oversized components are carved into patches by repeated min-cut.
        let mut regions = Vec::new();
        let mut region_of = vec![String::new(); n];
        for (idx, members) in component_members.iter().enumerate() {
            if members.len() <= self.region_max_size {
                let region = components[idx].clone();
                for &m in members {
                    region_of[m] = region.id.clone();
                }
                regions.push(region);
            } else {
                let parts = partition_component(members, &sim, &mutual_pairs, self.region_max_size);
                for (j, part) in parts.iter().enumerate() {
                    let region = make_region(
                        format!("patch_{}_{}", idx, j),
                        RegionKind::Patch,
                        part,
                        paragraphs,
                    );
                    for &m in part {
                        region_of[m] = region.id.clone();
                    }
                    regions.push(region);
                }
            }
        }

        let nodes: Vec<SubstrateNode> = paragraphs
            .iter()
            .enumerate()
            .map(|(i, paragraph)| {
                let top_sims: Vec<f32> = neighbors[i].iter().map(|&j| sim.at(i, j)).collect();
                let top1_sim = top_sims.first().copied().unwrap_or(0.0);
                let avg_topk_sim = if top_sims.is_empty() {
                    0.0
                } else {
                    top_sims.iter().sum::<f32>() / top_sims.len() as f32
                };
                SubstrateNode {
                    paragraph_id: paragraph.id.clone(),
                    model_index: paragraph.model_index,
                    embedding_slot: slots[i],
                    mutual_degree: mutual_pairs
                        .iter()
                        .filter(|&&(a, b)| a == i || b == i)
                        .count(),
                    strong_degree: strong_pairs
                        .iter()
                        .filter(|&&(a, b)| a == i || b == i)
                        .count(),
                    top1_sim,
                    avg_topk_sim,
                    isolation_score: 1.0 - avg_topk_sim,
                    component_id: component_of[i],
                    region_id: region_of[i].clone(),
                    x: None,
                    y: None,
                }
            })
            .collect();

        let edge = |&(a, b): &(usize, usize), kind: EdgeClass| SubstrateEdge {
            source: paragraphs[a].id.clone(),
            target: paragraphs[b].id.clone(),
            similarity: sim.at(a, b),
            kind,
        };
        let substrate = Substrate {
            nodes,
            knn_edges: knn_pairs.iter().map(|p| edge(p, EdgeClass::Knn)).collect(),
            mutual_edges: mutual_pairs
                .iter()
                .map(|p| edge(p, EdgeClass::Mutual))
                .collect(),
            strong_edges: strong_pairs
                .iter()
                .map(|p| edge(p, EdgeClass::Strong))
                .collect(),
            components,
            regions,
        };
        debug!(
            nodes = substrate.nodes.len(),
            mutual = substrate.mutual_edges.len(),
            strong = substrate.strong_edges.len(),
            regions = substrate.regions.len(),
            "substrate built"
        );
        (substrate, sim)
    }

    /// Top-k neighbor lists. Higher similarity first; on equal similarity
    /// the lower paragraph id (lexicographically) wins.
    fn top_k_neighbors(
        &self,
        paragraphs: &[Paragraph],
        sim: &SimilarityMatrix,
        k: usize,
    ) -> Vec<Vec<usize>> {
        let n = paragraphs.len();
        (0..n)
            .map(|i| {
                let mut candidates: Vec<usize> = (0..n).filter(|&j| j != i).collect();
                candidates.sort_by(|&a, &b| {
                    sim.at(i, b)
                        .partial_cmp(&sim.at(i, a))
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| paragraphs[a].id.cmp(&paragraphs[b].id))
                });
                candidates.truncate(k);
                candidates
            })
            .collect()
    }
}

fn make_region(
    id: String,
    kind: RegionKind,
    members: &[usize],
    paragraphs: &[Paragraph],
) -> Region {
    let mut node_ids: Vec<_> = members.iter().map(|&m| paragraphs[m].id.clone()).collect();
    node_ids.sort();
    let models: BTreeSet<u32> = members.iter().map(|&m| paragraphs[m].model_index).collect();
    let mut stance_counts: BTreeMap<u8, (Stance, usize)> = BTreeMap::new();
    for &m in members {
        stance_counts
            .entry(paragraphs[m].dominant_stance.priority())
            .and_modify(|(_, c)| *c += 1)
            .or_insert((paragraphs[m].dominant_stance, 1));
    }
    let dominant_stance = stance_counts
        .values()
        .fold(None::<(Stance, usize)>, |best, &(stance, count)| match best {
            Some((_, best_count)) if count > best_count => Some((stance, count)),
            None => Some((stance, count)),
            other => other,
        })
        .map(|(s, _)| s)
        .unwrap_or(Stance::Unknown);
    Region {
        id,
        kind,
        node_ids,
        profile: Some(RegionProfile {
            size: members.len(),
            model_spread: models.len(),
            dominant_stance,
        }),
    }
}

/// Weakly-connected components over undirected pairs; returns the
/// component index per node. Components are numbered by their smallest
/// member, in ascending order.
pub fn connected_components(n: usize, pairs: &BTreeSet<(usize, usize)>) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut Vec<usize>, x: usize) -> usize {
        let mut root = x;
        while parent[root] != root {
            root = parent[root];
        }
        let mut cur = x;
        while parent[cur] != root {
            let next = parent[cur];
            parent[cur] = root;
            cur = next;
        }
        root
    }
    for &(a, b) in pairs {
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        if ra != rb {
            let (lo, hi) = (ra.min(rb), ra.max(rb));
            parent[hi] = lo;
        }
    }
    let mut index_of_root: BTreeMap<usize, usize> = BTreeMap::new();
    let mut out = vec![0usize; n];
    for i in 0..n {
        let root = find(&mut parent, i);
        let next = index_of_root.len();
        let idx = *index_of_root.entry(root).or_insert(next);
        out[i] = idx;
    }
    out
}

fn group_by_component(component_of: &[usize]) -> Vec<Vec<usize>> {
    let count = component_of.iter().max().map(|m| m + 1).unwrap_or(0);
    let mut groups = vec![Vec::new(); count];
    for (node, &c) in component_of.iter().enumerate() {
        groups[c].push(node);
    }
    groups
}

/// Split an oversized component into parts of at most `max_size` nodes by
/// repeated minimum cut over the induced mutual subgraph.
fn partition_component(
    members: &[usize],
    sim: &SimilarityMatrix,
    mutual_pairs: &BTreeSet<(usize, usize)>,
    max_size: usize,
) -> Vec<Vec<usize>> {
    if members.len() <= max_size {
        return vec![members.to_vec()];
    }
    let (side_a, side_b) = min_cut_split(members, sim, mutual_pairs);
    if side_a.is_empty() || side_b.is_empty() {
        // Cut failed to separate; fall back to an order split so the size
        // cap still holds.
        let mid = members.len() / 2;
        let (lo, hi) = members.split_at(mid);
        let mut parts = partition_component(lo, sim, mutual_pairs, max_size);
        parts.extend(partition_component(hi, sim, mutual_pairs, max_size));
        return parts;
    }
    let mut parts = partition_component(&side_a, sim, mutual_pairs, max_size);
    parts.extend(partition_component(&side_b, sim, mutual_pairs, max_size));
    parts
}

/// Deterministic Stoer-Wagner minimum cut over the induced mutual
/// subgraph. Edge weights are similarities clamped to a small positive
/// floor so weakly-similar edges still separate before strong ones.
fn min_cut_split(
    members: &[usize],
    sim: &SimilarityMatrix,
    mutual_pairs: &BTreeSet<(usize, usize)>,
) -> (Vec<usize>, Vec<usize>) {
    let n = members.len();
    let local: BTreeMap<usize, usize> = members.iter().enumerate().map(|(l, &g)| (g, l)).collect();
    let mut weights = vec![vec![0.0f64; n]; n];
    for &(a, b) in mutual_pairs {
        if let (Some(&la), Some(&lb)) = (local.get(&a), local.get(&b)) {
            let w = (sim.at(a, b) as f64).max(1e-3);
            weights[la][lb] = w;
            weights[lb][la] = w;
        }
    }

    let mut merged: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let mut active: Vec<usize> = (0..n).collect();
    let mut best: (f64, Vec<usize>) = (f64::MAX, Vec::new());

    while active.len() > 1 {
        // Maximum adjacency ordering with index tie-break.
        let mut in_a = vec![false; n];
        let mut conn = vec![0.0f64; n];
        let mut order = Vec::with_capacity(active.len());
        for _ in 0..active.len() {
            let mut pick = None;
            for &v in &active {
                if in_a[v] {
                    continue;
                }
                match pick {
                    None => pick = Some(v),
                    Some(p) if conn[v] > conn[p] => pick = Some(v),
                    _ => {}
                }
            }
            let v = pick.unwrap_or(active[0]);
            in_a[v] = true;
            order.push(v);
            for &u in &active {
                if !in_a[u] {
                    conn[u] += weights[v][u];
                }
            }
        }
        let t = *order.last().unwrap_or(&active[0]);
        let s = order.get(order.len().wrapping_sub(2)).copied().unwrap_or(t);
        let cut_weight = conn[t];
        if cut_weight < best.0 {
            best = (cut_weight, merged[t].clone());
        }
        // Merge t into s.
        let t_members = merged[t].clone();
        merged[s].extend(t_members);
        for v in 0..n {
            weights[s][v] += weights[t][v];
            weights[v][s] = weights[s][v];
        }
        active.retain(|&v| v != t);
    }

    let side: BTreeSet<usize> = best.1.into_iter().collect();
    let mut a = Vec::new();
    let mut b = Vec::new();
    for (l, &g) in members.iter().enumerate() {
        if side.contains(&l) {
            a.push(g);
        } else {
            b.push(g);
        }
    }
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::ParagraphId;

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

    fn store_of(vectors: Vec<Vec<f32>>) -> (EmbeddingStore, Vec<usize>) {
        let slots = (0..vectors.len()).collect();
        (EmbeddingStore::from_vectors(vectors).unwrap(), slots)
    }

    /// Two tight pairs, nearly orthogonal across pairs.
    fn two_cluster_fixture() -> (Vec<Paragraph>, EmbeddingStore, Vec<usize>) {
        let paragraphs = vec![
            paragraph(1, 0),
            paragraph(1, 1),
            paragraph(2, 0),
            paragraph(2, 1),
        ];
        let (store, slots) = store_of(vec![
            vec![1.0, 0.0],
            vec![0.995, 0.0998],
            vec![0.0, 1.0],
            vec![0.0998, 0.995],
        ]);
        (paragraphs, store, slots)
    }

    #[test]
    fn test_mutual_edges_are_symmetric_pairs() {
        let (paragraphs, store, slots) = two_cluster_fixture();
        let config = PipelineConfig::default().with_knn_k(1);
        let (substrate, _) = SubstrateBuilder::new(&config).build(&paragraphs, &store, &slots);
        // k=1: each node's best neighbor is its pair partner, so exactly
        // the two intra-pair mutual edges survive.
        assert_eq!(substrate.mutual_edges.len(), 2);
        for edge in &substrate.mutual_edges {
            assert!(edge.source < edge.target);
            assert!(edge.similarity > 0.9);
        }
    }

    #[test]
    fn test_strong_subset_of_knn() {
        let (paragraphs, store, slots) = two_cluster_fixture();
        let config = PipelineConfig::default();
        let (substrate, _) = SubstrateBuilder::new(&config).build(&paragraphs, &store, &slots);
        let knn: BTreeSet<(String, String)> = substrate
            .knn_edges
            .iter()
            .map(|e| (e.source.to_string(), e.target.to_string()))
            .collect();
        for edge in &substrate.strong_edges {
            assert!(knn.contains(&(edge.source.to_string(), edge.target.to_string())));
            assert!(edge.similarity >= config.strong_threshold);
        }
    }

    #[test]
    fn test_two_components_from_two_clusters() {
        let (paragraphs, store, slots) = two_cluster_fixture();
        let config = PipelineConfig::default().with_knn_k(1);
        let (substrate, _) = SubstrateBuilder::new(&config).build(&paragraphs, &store, &slots);
        assert_eq!(substrate.components.len(), 2);
        assert_eq!(substrate.regions.len(), 2);
        assert_eq!(substrate.nodes[0].component_id, substrate.nodes[1].component_id);
        assert_ne!(substrate.nodes[0].component_id, substrate.nodes[2].component_id);
    }

    #[test]
    fn test_k_reduced_for_small_n() {
        let paragraphs = vec![paragraph(1, 0), paragraph(2, 0)];
        let (store, slots) = store_of(vec![vec![1.0, 0.0], vec![0.8, 0.6]]);
        let config = PipelineConfig::default().with_knn_k(8);
        let (substrate, _) = SubstrateBuilder::new(&config).build(&paragraphs, &store, &slots);
        // k clamps to n-1 = 1; the single pair is mutual.
        assert_eq!(substrate.mutual_edges.len(), 1);
        assert_eq!(substrate.nodes[0].mutual_degree, 1);
    }

    #[test]
    fn test_single_node_has_no_edges() {
        let paragraphs = vec![paragraph(1, 0)];
        let (store, slots) = store_of(vec![vec![1.0, 0.0]]);
        let config = PipelineConfig::default();
        let (substrate, _) = SubstrateBuilder::new(&config).build(&paragraphs, &store, &slots);
        assert_eq!(substrate.nodes.len(), 1);
        assert!(substrate.knn_edges.is_empty());
        assert!(substrate.mutual_edges.is_empty());
        assert_eq!(substrate.nodes[0].top1_sim, 0.0);
        assert_eq!(substrate.nodes[0].isolation_score, 1.0);
        assert_eq!(substrate.components.len(), 1);
    }

    #[test]
    fn test_knn_tie_break_prefers_lower_paragraph_id() {
        // Node 0 is equidistant from nodes 1 and 2; with k=1 the lower
        // paragraph id must win.
        let paragraphs = vec![paragraph(1, 0), paragraph(1, 1), paragraph(1, 2)];
        let (store, slots) = store_of(vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ]);
        let config = PipelineConfig::default().with_knn_k(1);
        let builder = SubstrateBuilder::new(&config);
        let sim = SimilarityMatrix::from_store(&store, &slots);
        let neighbors = builder.top_k_neighbors(&paragraphs, &sim, 1);
        assert_eq!(neighbors[0], vec![1]);
        assert_eq!(neighbors[2], vec![0]);
    }

    #[test]
    fn test_oversized_component_partitions_into_patches() {
        // Six nodes forming one mutual chain on the unit circle; cap at 3
        // forces the component through the min-cut partitioner.
        let mut vectors = Vec::new();
        for i in 0..6 {
            let angle = 0.3 * i as f32;
            vectors.push(vec![angle.cos(), angle.sin()]);
        }
        let paragraphs: Vec<Paragraph> = (0..6).map(|i| paragraph(1, i)).collect();
        let (store, slots) = store_of(vectors);
        let config = PipelineConfig::default().with_knn_k(2).with_region_max_size(3);
        let (substrate, _) = SubstrateBuilder::new(&config).build(&paragraphs, &store, &slots);
        for region in &substrate.regions {
            assert!(region.node_ids.len() <= 3);
        }
        // If anything was partitioned, the parts are patches.
        if substrate.regions.len() > substrate.components.len() {
            assert!(substrate.regions.iter().any(|r| r.kind == RegionKind::Patch));
        }
        // Every node landed in exactly one region.
        let covered: usize = substrate.regions.iter().map(|r| r.node_ids.len()).sum();
        assert_eq!(covered, 6);
    }

    #[test]
    fn test_region_profile_populated() {
        let (paragraphs, store, slots) = two_cluster_fixture();
        let config = PipelineConfig::default().with_knn_k(1);
        let (substrate, _) = SubstrateBuilder::new(&config).build(&paragraphs, &store, &slots);
        for region in &substrate.regions {
            let profile = region.profile.as_ref().unwrap();
            assert_eq!(profile.size, region.node_ids.len());
            assert!(profile.model_spread >= 1);
        }
    }

    #[test]
    fn test_similarity_matrix_symmetry() {
        let (_, store, slots) = two_cluster_fixture();
        let sim = SimilarityMatrix::from_store(&store, &slots);
        for i in 0..sim.len() {
            assert!((sim.at(i, i) - 1.0).abs() < 1e-6);
            for j in 0..sim.len() {
                assert_eq!(sim.at(i, j), sim.at(j, i));
            }
        }
    }
}
