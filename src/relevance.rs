//! Query relevance: tier classification of statements against the query.
//!
//! Each statement (through its paragraph embedding) gets a composite of
//! query similarity, novelty among peers, and cross-model corroboration;
//! the population's own percentiles cut the tiers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::embedding::EmbeddingStore;
use crate::geometry::{SimilarityMatrix, Substrate};
use crate::shadow::{ParagraphId, Shadow, Stance, StatementId};
use crate::stats;

/// Composite blend weights.
const QUERY_WEIGHT: f64 = 0.55;
const NOVELTY_WEIGHT: f64 = 0.25;
const CORROBORATION_WEIGHT: f64 = 0.20;
/// Paragraph similarity at or above this corroborates across models.
const CORROBORATION_SIM: f32 = 0.70;
/// Corroborating models that saturate the corroboration term.
const CORROBORATION_SATURATION: f64 = 3.0;

/// Relevance tier of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceTier {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for RelevanceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{}", s)
    }
}

/// Context alongside a relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceMeta {
    /// Distinct models speaking near this statement (itself included).
    pub model_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dominant_stance: Option<Stance>,
}

/// Per-statement relevance output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRelevanceScore {
    pub statement_id: StatementId,
    pub composite_relevance: f64,
    pub query_similarity: f64,
    pub novelty: f64,
    pub sub_consensus_corroboration: usize,
    pub tier: RelevanceTier,
    pub meta: RelevanceMeta,
}

/// Stage H output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRelevance {
    /// One score per statement, in statement order.
    pub statements: Vec<QueryRelevanceScore>,
    /// The percentile cuts the tiers were computed with (low, high).
    pub cuts: (f64, f64),
}

impl QueryRelevance {
    pub fn score(&self, id: &StatementId) -> Option<&QueryRelevanceScore> {
        self.statements.iter().find(|s| &s.statement_id == id)
    }

    /// Mean composite over a set of statements; `None` when none match.
    pub fn mean_composite<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a StatementId>,
    ) -> Option<f64> {
        let composites: Vec<f64> = ids
            .into_iter()
            .filter_map(|id| self.score(id))
            .map(|s| s.composite_relevance)
            .collect();
        if composites.is_empty() {
            None
        } else {
            Some(composites.iter().sum::<f64>() / composites.len() as f64)
        }
    }
}

/// Score every statement against the query embedding.
pub fn score_relevance(
    shadow: &Shadow,
    store: &EmbeddingStore,
    paragraph_slot: &BTreeMap<ParagraphId, usize>,
    query_embedding: &[f32],
    sim: &SimilarityMatrix,
    substrate: &Substrate,
    config: &PipelineConfig,
) -> QueryRelevance {
    if shadow.statements.is_empty() {
        return QueryRelevance::default();
    }

    let paragraph_index: BTreeMap<&ParagraphId, usize> = shadow
        .paragraphs
        .iter()
        .enumerate()
        .map(|(i, p)| (&p.id, i))
        .collect();
    let statement_count_of: Vec<usize> = shadow
        .paragraphs
        .iter()
        .map(|p| p.statement_ids.len())
        .collect();
    let total_models = shadow.model_indexes().len();

    struct Raw {
        statement_id: StatementId,
        paragraph: usize,
        query_similarity: f64,
        novelty: f64,
        corroboration: usize,
        composite: f64,
    }

    let mut raw = Vec::with_capacity(shadow.statements.len());
    for statement in &shadow.statements {
        let pid = ParagraphId::new(statement.model_index, statement.paragraph_index);
        let Some(&pi) = paragraph_index.get(&pid) else {
            continue;
        };
        let query_similarity = paragraph_slot
            .get(&pid)
            .map(|&slot| stats::dot(query_embedding, store.get(slot)) as f64)
            .unwrap_or(0.0);

        // Nearest peer: any other statement, so a shared paragraph means
        // similarity one and novelty zero.
        let mut nearest = f64::NEG_INFINITY;
        for (pj, &count) in statement_count_of.iter().enumerate() {
            if count == 0 {
                continue;
            }
            if pj == pi {
                if count >= 2 {
                    nearest = nearest.max(1.0);
                }
            } else {
                nearest = nearest.max(sim.at(pi, pj) as f64);
            }
        }
        let novelty = if nearest.is_finite() {
            (1.0 - nearest).max(0.0)
        } else {
            1.0
        };

        let corroborating: BTreeSet<u32> = shadow
            .paragraphs
            .iter()
            .enumerate()
            .filter(|(pj, p)| {
                p.model_index != statement.model_index && sim.at(pi, *pj) >= CORROBORATION_SIM
            })
            .map(|(_, p)| p.model_index)
            .collect();
        let corroboration = corroborating.len();

        let composite = QUERY_WEIGHT * query_similarity
            + NOVELTY_WEIGHT * novelty
            + CORROBORATION_WEIGHT
                * (corroboration as f64 / CORROBORATION_SATURATION).min(1.0);

        raw.push(Raw {
            statement_id: statement.id.clone(),
            paragraph: pi,
            query_similarity,
            novelty,
            corroboration,
            composite,
        });
    }

    let composites: Vec<f64> = raw.iter().map(|r| r.composite).collect();
    let (low_pct, high_pct) = config.tier_percentiles;
    let low_cut = stats::percentile(&composites, low_pct);
    let high_cut = stats::percentile(&composites, high_pct);

    let statements = raw
        .into_iter()
        .map(|r| {
            let tier = if r.composite >= high_cut {
                RelevanceTier::High
            } else if r.composite <= low_cut {
                RelevanceTier::Low
            } else {
                RelevanceTier::Medium
            };
            let paragraph = &shadow.paragraphs[r.paragraph];
            QueryRelevanceScore {
                statement_id: r.statement_id,
                composite_relevance: r.composite,
                query_similarity: r.query_similarity,
                novelty: r.novelty,
                sub_consensus_corroboration: r.corroboration,
                tier,
                meta: RelevanceMeta {
                    model_count: (r.corroboration + 1).min(total_models.max(1)),
                    region_id: substrate.node(&paragraph.id).map(|n| n.region_id.clone()),
                    dominant_stance: Some(paragraph.dominant_stance),
                },
            }
        })
        .collect();

    debug!(low_cut, high_cut, "query relevance scored");
    QueryRelevance {
        statements,
        cuts: (low_cut, high_cut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SubstrateBuilder;
    use crate::shadow::ShadowExtractor;

    fn fixture(
        texts: &[(u32, &str)],
        vectors: Vec<Vec<f32>>,
        query: Vec<f32>,
    ) -> QueryRelevance {
        let shadow = ShadowExtractor::new().extract(texts);
        let store = EmbeddingStore::from_vectors(vectors).unwrap();
        let slots: BTreeMap<ParagraphId, usize> = shadow
            .paragraphs
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        let slot_list: Vec<usize> = (0..shadow.paragraphs.len()).collect();
        let config = PipelineConfig::default();
        let (substrate, sim) =
            SubstrateBuilder::new(&config).build(&shadow.paragraphs, &store, &slot_list);
        score_relevance(&shadow, &store, &slots, &query, &sim, &substrate, &config)
    }

    #[test]
    fn test_tier_agrees_with_percentile_cut() {
        let relevance = fixture(
            &[
                (1, "Queues batch writes."),
                (2, "Streams scale reads."),
                (3, "Caches cut latency."),
                (4, "Indexes speed lookups."),
            ],
            vec![
                vec![1.0, 0.0],
                vec![0.8, 0.6],
                vec![0.0, 1.0],
                vec![-0.6, 0.8],
            ],
            vec![1.0, 0.0],
        );
        let (low_cut, high_cut) = relevance.cuts;
        for score in &relevance.statements {
            match score.tier {
                RelevanceTier::High => assert!(score.composite_relevance >= high_cut),
                RelevanceTier::Low => assert!(score.composite_relevance <= low_cut),
                RelevanceTier::Medium => {
                    assert!(score.composite_relevance > low_cut);
                    assert!(score.composite_relevance < high_cut);
                }
            }
        }
        // The query-aligned paragraph lands in the high tier.
        assert_eq!(
            relevance.score(&StatementId::new(1, 0, 0)).unwrap().tier,
            RelevanceTier::High
        );
    }

    #[test]
    fn test_same_paragraph_statements_have_zero_novelty() {
        let relevance = fixture(
            &[(1, "The queue batches. The queue retries."), (2, "Unrelated topic entirely.")],
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            vec![1.0, 0.0],
        );
        // Two statements share paragraph p_1_0, so each has a peer at
        // similarity 1.0.
        let first = relevance.score(&StatementId::new(1, 0, 0)).unwrap();
        let second = relevance.score(&StatementId::new(1, 0, 1)).unwrap();
        assert_eq!(first.novelty, 0.0);
        assert_eq!(second.novelty, 0.0);
        // The lone statement's nearest peer is the orthogonal paragraph.
        let lone = relevance.score(&StatementId::new(2, 0, 0)).unwrap();
        assert!((lone.novelty - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_corroboration_counts_other_models_only() {
        let relevance = fixture(
            &[
                (1, "Use a queue."),
                (2, "A queue fits well."),
                (3, "Queues all the way."),
            ],
            // All three nearly identical: every statement corroborated by
            // the two other models.
            vec![vec![1.0, 0.0], vec![0.999, 0.0447], vec![0.998, 0.0632]],
            vec![1.0, 0.0],
        );
        for score in &relevance.statements {
            assert_eq!(score.sub_consensus_corroboration, 2);
            assert_eq!(score.meta.model_count, 3);
        }
    }

    #[test]
    fn test_single_response_still_produces_relevance() {
        let relevance = fixture(
            &[(1, "Only one response here.")],
            vec![vec![1.0, 0.0]],
            vec![0.6, 0.8],
        );
        assert_eq!(relevance.statements.len(), 1);
        let only = &relevance.statements[0];
        assert_eq!(only.sub_consensus_corroboration, 0);
        // Sole statement: no peer at all, novelty defaults to 1.
        assert_eq!(only.novelty, 1.0);
        assert_eq!(only.tier, RelevanceTier::High);
        assert!(only.meta.region_id.is_some());
    }

    #[test]
    fn test_empty_shadow_yields_empty_relevance() {
        let relevance = fixture(&[(1, "")], vec![], vec![1.0, 0.0]);
        assert!(relevance.statements.is_empty());
    }
}
