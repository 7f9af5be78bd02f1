//! Pipeline configuration with documented defaults.

use serde::{Deserialize, Serialize};

/// Tunable parameters for a pipeline run.
///
/// Every field has a documented default matching the reference behavior;
/// construct with [`PipelineConfig::default`] and override with the builder
/// setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Neighbors per node in the k-NN graph (default: 8). Reduced to
    /// `min(k, n - 1)` when there are `n <= k` paragraphs.
    pub knn_k: usize,
    /// Similarity floor for a k-NN edge to count as strong (default: 0.75).
    pub strong_threshold: f32,
    /// Components larger than this are partitioned into patches (default: 40).
    pub region_max_size: usize,
    /// Temperature for the competitive soft-max assignment (default: 0.08).
    pub softmax_temperature: f64,
    /// Minimum soft-max weight for a statement to count as assigned
    /// (default: 0.25).
    pub assignment_min_weight: f64,
    /// A statement contributes to at most this many claims (default: 3).
    pub assignment_max_claims: usize,
    /// (low, high) percentile cuts for relevance tiers (default: (25, 75)).
    pub tier_percentiles: (f64, f64),
    /// Claims with provenance bulk below this are suppressed from the blast
    /// radius filter (default: 0.5).
    pub blast_radius_suppression_bulk: f64,
    /// Hard cap on generated survey questions (default: 5).
    pub question_ceiling_cap: usize,
    /// Texts per embedder call (default: 64).
    pub embed_batch_size: usize,
    /// Timeout for a single embedder call in ms (default: 60_000).
    pub embedder_timeout_ms: u64,
    /// Timeout for the mapper call in ms (default: 60_000).
    pub mapper_timeout_ms: u64,
    /// Per-stage deadline in ms (default: 120_000).
    pub stage_timeout_ms: u64,
    /// Whether callers should persist regenerated artifacts (default: false).
    /// The core itself never persists; this flag rides along for callers.
    pub regenerate_persist: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            knn_k: 8,
            strong_threshold: 0.75,
            region_max_size: 40,
            softmax_temperature: 0.08,
            assignment_min_weight: 0.25,
            assignment_max_claims: 3,
            tier_percentiles: (25.0, 75.0),
            blast_radius_suppression_bulk: 0.5,
            question_ceiling_cap: 5,
            embed_batch_size: 64,
            embedder_timeout_ms: 60_000,
            mapper_timeout_ms: 60_000,
            stage_timeout_ms: 120_000,
            regenerate_persist: false,
        }
    }
}

impl PipelineConfig {
    /// Set the k-NN neighbor count.
    pub fn with_knn_k(mut self, k: usize) -> Self {
        self.knn_k = k;
        self
    }

    /// Set the strong-edge similarity threshold.
    pub fn with_strong_threshold(mut self, threshold: f32) -> Self {
        self.strong_threshold = threshold;
        self
    }

    /// Set the region size cap.
    pub fn with_region_max_size(mut self, size: usize) -> Self {
        self.region_max_size = size;
        self
    }

    /// Set the soft-max temperature.
    pub fn with_softmax_temperature(mut self, tau: f64) -> Self {
        self.softmax_temperature = tau;
        self
    }

    /// Set the assignment weight floor.
    pub fn with_assignment_min_weight(mut self, weight: f64) -> Self {
        self.assignment_min_weight = weight;
        self
    }

    /// Set the relevance tier percentile cuts.
    pub fn with_tier_percentiles(mut self, low: f64, high: f64) -> Self {
        self.tier_percentiles = (low, high);
        self
    }

    /// Set the suppression bulk floor.
    pub fn with_blast_radius_suppression_bulk(mut self, bulk: f64) -> Self {
        self.blast_radius_suppression_bulk = bulk;
        self
    }

    /// Set the embedder batch size.
    pub fn with_embed_batch_size(mut self, size: usize) -> Self {
        self.embed_batch_size = size;
        self
    }

    /// Set per-call and per-stage timeouts in one go.
    pub fn with_timeouts(mut self, embedder_ms: u64, mapper_ms: u64, stage_ms: u64) -> Self {
        self.embedder_timeout_ms = embedder_ms;
        self.mapper_timeout_ms = mapper_ms;
        self.stage_timeout_ms = stage_ms;
        self
    }

    /// Validate parameter ranges; called once by the pipeline before stage A.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.knn_k == 0 {
            return Err(crate::error::Error::Config("knn_k must be >= 1".into()));
        }
        if self.softmax_temperature <= 0.0 {
            return Err(crate::error::Error::Config(
                "softmax_temperature must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.assignment_min_weight) {
            return Err(crate::error::Error::Config(
                "assignment_min_weight must be in [0, 1]".into(),
            ));
        }
        let (low, high) = self.tier_percentiles;
        if !(0.0..=100.0).contains(&low) || !(0.0..=100.0).contains(&high) || low > high {
            return Err(crate::error::Error::Config(
                "tier_percentiles must satisfy 0 <= low <= high <= 100".into(),
            ));
        }
        if self.region_max_size == 0 || self.embed_batch_size == 0 {
            return Err(crate::error::Error::Config(
                "region_max_size and embed_batch_size must be >= 1".into(),
            ));
        }
        Ok(())
    }
}
