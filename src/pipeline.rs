//! Pipeline orchestrator: stage sequencing, timing, blocking policy,
//! cancellation, and partial-artifact assembly.
//!
//! Stages A (shadow), B (embedding) and C (substrate) are blocking: their
//! failure aborts the run. Everything after degrades to an absent
//! sub-artifact plus observations. Cancellation is cooperative at stage
//! boundaries; in-flight embedder/mapper calls are raced against the
//! token.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::artifact::{
    assemble, CognitiveArtifact, GeometrySection, PreSemanticSummary, StageOutputs,
};
use crate::config::PipelineConfig;
use crate::embedding::{BatchedEmbedder, Embedder, EmbeddingStore};
use crate::error::{Error, Result};
use crate::field::compute_fields;
use crate::geometry::{invert_basins, BasinStatus, SubstrateBuilder};
use crate::observe::{codes, now_ms, Observation, PipelineObservability, StageReport};
use crate::provenance::{claim_embeddings, ClaimProvenance, ProvenanceEngine};
use crate::relevance::score_relevance;
use crate::semantic::{parse_envelope, ClaimId, Mapper, MapperAdapter, SemanticMap};
use crate::shadow::{ParagraphId, ShadowExtractor};
use crate::structure::analyze_structure;
use crate::survey::blast_radius_and_gates;

/// Canonical stage names used in observability.
pub mod stages {
    pub const SHADOW: &str = "shadow";
    pub const EMBEDDING: &str = "embedding";
    pub const SUBSTRATE: &str = "substrate";
    pub const BASIN: &str = "basin";
    pub const MAPPER: &str = "mapper";
    pub const PROVENANCE: &str = "provenance";
    pub const CONTINUOUS_FIELD: &str = "continuous_field";
    pub const QUERY_RELEVANCE: &str = "query_relevance";
    pub const STRUCTURAL: &str = "structural";
    pub const BLAST_RADIUS: &str = "blast_radius";
}

/// Cooperative cancellation handle. Cheap to clone; `cancel()` is sticky.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation triggers (immediately if it already has).
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// One free-text model response, tagged with its stable index.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub model_index: u32,
    pub text: String,
}

impl ModelResponse {
    pub fn new(model_index: u32, text: impl Into<String>) -> Self {
        Self {
            model_index,
            text: text.into(),
        }
    }
}

/// Input to one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineInput {
    pub query: String,
    pub responses: Vec<ModelResponse>,
}

impl PipelineInput {
    pub fn new(query: impl Into<String>, responses: Vec<ModelResponse>) -> Self {
        Self {
            query: query.into(),
            responses,
        }
    }
}

struct StageTimer {
    started_at_ms: i64,
    start: Instant,
}

impl StageTimer {
    fn start() -> Self {
        Self {
            started_at_ms: now_ms(),
            start: Instant::now(),
        }
    }

    fn ok(&self) -> StageReport {
        StageReport {
            started_at_ms: self.started_at_ms,
            time_ms: self.start.elapsed().as_millis() as u64,
            ok: true,
            error: None,
        }
    }

    fn err(&self, error: &Error) -> StageReport {
        StageReport {
            started_at_ms: self.started_at_ms,
            time_ms: self.start.elapsed().as_millis() as u64,
            ok: false,
            error: Some(error.to_string()),
        }
    }
}

/// The cognitive mapping pipeline.
///
/// Owns the pluggable embedder and mapper plus the run configuration;
/// each [`Pipeline::run`] produces one immutable [`CognitiveArtifact`].
pub struct Pipeline {
    embedder: Arc<dyn Embedder>,
    mapper: Arc<dyn Mapper>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(embedder: Arc<dyn Embedder>, mapper: Arc<dyn Mapper>) -> Self {
        Self {
            embedder,
            mapper,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline to completion.
    pub async fn run(&self, input: PipelineInput) -> Result<CognitiveArtifact> {
        self.run_with_cancel(input, &CancelToken::new()).await
    }

    /// Run with a cancellation token. On cancellation the current stage
    /// finishes (or aborts its I/O) and a partial artifact comes back
    /// with `aborted = true`.
    pub async fn run_with_cancel(
        &self,
        input: PipelineInput,
        cancel: &CancelToken,
    ) -> Result<CognitiveArtifact> {
        self.config.validate()?;
        validate_input(&input)?;
        let run_timer = Instant::now();
        let stage_deadline = Duration::from_millis(self.config.stage_timeout_ms);
        let mut obs = PipelineObservability::default();
        info!(responses = input.responses.len(), "pipeline run started");

        // A: shadow extraction (blocking, pure).
        let timer = StageTimer::start();
        let response_refs: Vec<(u32, &str)> = input
            .responses
            .iter()
            .map(|r| (r.model_index, r.text.as_str()))
            .collect();
        let shadow = ShadowExtractor::new().extract(&response_refs);
        obs.record_stage(stages::SHADOW, timer.ok());

        if cancel.is_cancelled() {
            obs.observe(cancel_observation(stages::SHADOW));
            let outputs = StageOutputs {
                query: input.query,
                shadow,
                ..Default::default()
            };
            return Ok(finish(outputs, obs, run_timer, true));
        }

        // B: embedding (blocking). Paragraph texts plus the query, one
        // arena, deterministic order.
        let timer = StageTimer::start();
        let adapter = BatchedEmbedder::new(
            self.embedder.clone(),
            self.config.embed_batch_size,
            self.config.embedder_timeout_ms,
        );
        let mut texts: Vec<String> = shadow.paragraphs.iter().map(|p| p.text.clone()).collect();
        texts.push(input.query.clone());
        let mut vectors = match timeout(stage_deadline, adapter.embed_all(&texts, cancel)).await {
            Ok(Ok(vectors)) => {
                obs.record_stage(stages::EMBEDDING, timer.ok());
                vectors
            }
            Ok(Err(e @ Error::Cancelled { .. })) => {
                obs.record_stage(stages::EMBEDDING, timer.err(&e));
                obs.observe(cancel_observation(stages::EMBEDDING));
                let outputs = StageOutputs {
                    query: input.query,
                    shadow,
                    ..Default::default()
                };
                return Ok(finish(outputs, obs, run_timer, true));
            }
            Ok(Err(e)) => {
                obs.record_stage(stages::EMBEDDING, timer.err(&e));
                error!(error = %e, "embedding stage failed; aborting run");
                return Err(e);
            }
            Err(_) => {
                let e = Error::embedding(
                    format!("stage deadline of {}ms exceeded", self.config.stage_timeout_ms),
                    0,
                );
                obs.record_stage(stages::EMBEDDING, timer.err(&e));
                return Err(e);
            }
        };
        let query_embedding = vectors.pop().unwrap_or_default();
        let store = EmbeddingStore::from_vectors(vectors).map_err(|e| {
            Error::embedding(format!("inconsistent embedder output: {}", e), 1)
        })?;
        let paragraph_slot: BTreeMap<ParagraphId, usize> = shadow
            .paragraphs
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        let slot_list: Vec<usize> = (0..shadow.paragraphs.len()).collect();

        // C: substrate (blocking, sync).
        let timer = StageTimer::start();
        let (substrate, sim) =
            SubstrateBuilder::new(&self.config).build(&shadow.paragraphs, &store, &slot_list);
        obs.record_stage(stages::SUBSTRATE, timer.ok());

        // D: basin inversion (non-blocking, sync).
        let timer = StageTimer::start();
        let basin = invert_basins(&substrate);
        if basin.status != BasinStatus::Ok {
            obs.observe(Observation::info(
                stages::BASIN,
                codes::GEOMETRY_WEAK_FALLBACK,
                format!(
                    "geometric signal is {}; semantic evidence is primary",
                    basin.status
                ),
            ));
        }
        obs.record_stage(stages::BASIN, timer.ok());
        let geometry = GeometrySection {
            pre_semantic: PreSemanticSummary::from_substrate(&substrate),
            basin_inversion: basin,
            substrate,
        };

        if cancel.is_cancelled() {
            obs.observe(cancel_observation(stages::BASIN));
            let outputs = StageOutputs {
                query: input.query,
                shadow,
                geometry: Some(geometry),
                ..Default::default()
            };
            return Ok(finish(outputs, obs, run_timer, true));
        }

        // E: mapper invocation + parse (non-blocking).
        let timer = StageTimer::start();
        let mapper_adapter = MapperAdapter::new(self.mapper.clone(), self.config.mapper_timeout_ms);
        let numbered: Vec<(u32, String)> = input
            .responses
            .iter()
            .map(|r| (r.model_index, r.text.clone()))
            .collect();
        let known_statements = shadow.statement_id_set();
        let mut semantic: Option<SemanticMap> = None;
        match timeout(
            stage_deadline,
            mapper_adapter.invoke(&input.query, &numbered, cancel),
        )
        .await
        {
            Ok(Ok(raw)) => match parse_envelope(&raw, &known_statements) {
                Ok(parsed) => {
                    obs.extend_observations(parsed.notes);
                    obs.record_stage(stages::MAPPER, timer.ok());
                    semantic = Some(parsed.map);
                }
                Err(e) => {
                    obs.record_stage(stages::MAPPER, timer.err(&e));
                    let mut observation =
                        Observation::error(stages::MAPPER, codes::MAPPER_PARSE_FAILED, e.to_string());
                    if let Error::Mapper { raw: Some(raw), .. } = &e {
                        observation = observation.with_metadata("raw_text", raw.clone());
                    }
                    obs.observe(observation);
                }
            },
            Ok(Err(e @ Error::Cancelled { .. })) => {
                obs.record_stage(stages::MAPPER, timer.err(&e));
                obs.observe(cancel_observation(stages::MAPPER));
                let outputs = StageOutputs {
                    query: input.query,
                    shadow,
                    geometry: Some(geometry),
                    ..Default::default()
                };
                return Ok(finish(outputs, obs, run_timer, true));
            }
            Ok(Err(e)) => {
                obs.record_stage(stages::MAPPER, timer.err(&e));
                obs.observe(Observation::error(
                    stages::MAPPER,
                    codes::STAGE_FAILED,
                    e.to_string(),
                ));
            }
            Err(_) => {
                let e = Error::stage_timeout(stages::MAPPER, self.config.stage_timeout_ms);
                obs.record_stage(stages::MAPPER, timer.err(&e));
                obs.observe(Observation::error(
                    stages::MAPPER,
                    codes::STAGE_FAILED,
                    e.to_string(),
                ));
            }
        }

        // F: competitive provenance (non-blocking; needs claims).
        let has_claims = semantic
            .as_ref()
            .map(|m| !m.claims.is_empty())
            .unwrap_or(false);
        let mut fallback_embeddings: BTreeMap<ClaimId, Vec<f32>> = BTreeMap::new();
        let mut provenance: Option<ClaimProvenance> = None;
        if has_claims {
            let timer = StageTimer::start();
            // Claims with no resolvable sources fall back to their own
            // text embedding.
            let orphans: Vec<(ClaimId, String)> = semantic
                .as_ref()
                .map(|m| {
                    m.claims
                        .iter()
                        .filter(|c| c.source_statement_ids.is_empty())
                        .map(|c| (c.id.clone(), c.text.clone()))
                        .collect()
                })
                .unwrap_or_default();
            let mut stage_failed = false;
            if !orphans.is_empty() {
                let texts: Vec<String> = orphans.iter().map(|(_, text)| text.clone()).collect();
                match timeout(stage_deadline, adapter.embed_all(&texts, cancel)).await {
                    Ok(Ok(vectors)) => {
                        for ((claim_id, _), vector) in orphans.iter().zip(vectors) {
                            fallback_embeddings.insert(claim_id.clone(), vector);
                        }
                    }
                    Ok(Err(e @ Error::Cancelled { .. })) => {
                        obs.record_stage(stages::PROVENANCE, timer.err(&e));
                        obs.observe(cancel_observation(stages::PROVENANCE));
                        let outputs = StageOutputs {
                            query: input.query,
                            shadow,
                            geometry: Some(geometry),
                            semantic,
                            ..Default::default()
                        };
                        return Ok(finish(outputs, obs, run_timer, true));
                    }
                    Ok(Err(e)) => {
                        obs.record_stage(stages::PROVENANCE, timer.err(&e));
                        obs.observe(Observation::error(
                            stages::PROVENANCE,
                            codes::STAGE_FAILED,
                            e.to_string(),
                        ));
                        stage_failed = true;
                    }
                    Err(_) => {
                        let e = Error::stage_timeout(
                            stages::PROVENANCE,
                            self.config.stage_timeout_ms,
                        );
                        obs.record_stage(stages::PROVENANCE, timer.err(&e));
                        obs.observe(Observation::error(
                            stages::PROVENANCE,
                            codes::STAGE_FAILED,
                            e.to_string(),
                        ));
                        stage_failed = true;
                    }
                }
            }
            if !stage_failed {
                if let Some(map) = semantic.as_ref() {
                    let engine = ProvenanceEngine::new(&self.config);
                    let result = engine.assign(
                        &shadow,
                        &map.claims,
                        &store,
                        &paragraph_slot,
                        &sim,
                        &fallback_embeddings,
                    );
                    obs.record_stage(stages::PROVENANCE, timer.ok());
                    provenance = Some(result);
                }
            }
        } else {
            obs.observe(Observation::info(
                stages::PROVENANCE,
                codes::STAGE_SKIPPED_MISSING_INPUT,
                "no claims available; provenance skipped",
            ));
        }

        // Enrich claims with their provenance-derived fields.
        if let (Some(map), Some(p)) = (semantic.as_mut(), provenance.as_ref()) {
            for claim in map.claims.iter_mut() {
                if let Some(record) = p.record(&claim.id) {
                    claim.provenance_bulk = Some(record.provenance_bulk);
                    claim.source_coherence = record.source_coherence;
                }
            }
        }

        // G (continuous field) and H (query relevance) fork on disjoint
        // read-only data.
        let winners = provenance
            .as_ref()
            .map(|p| p.allocation.winners.clone())
            .unwrap_or_default();
        let ((continuous_field, paragraph_similarity_field, field_report), (query_relevance, relevance_report)) = tokio::join!(
            async {
                let map = match semantic.as_ref() {
                    Some(map) if !map.claims.is_empty() => map,
                    _ => return (None, None, None),
                };
                let timer = StageTimer::start();
                let embeddings = claim_embeddings(
                    &map.claims,
                    &shadow,
                    &store,
                    &paragraph_slot,
                    &fallback_embeddings,
                );
                let (continuous, paragraphs) = compute_fields(
                    &shadow,
                    &map.claims,
                    &store,
                    &paragraph_slot,
                    &embeddings,
                    &winners,
                );
                (Some(continuous), Some(paragraphs), Some(timer.ok()))
            },
            async {
                let timer = StageTimer::start();
                let relevance = score_relevance(
                    &shadow,
                    &store,
                    &paragraph_slot,
                    &query_embedding,
                    &sim,
                    &geometry.substrate,
                    &self.config,
                );
                (relevance, timer.ok())
            }
        );
        match field_report {
            Some(report) => obs.record_stage(stages::CONTINUOUS_FIELD, report),
            None => obs.observe(Observation::info(
                stages::CONTINUOUS_FIELD,
                codes::STAGE_SKIPPED_MISSING_INPUT,
                "no claims available; continuous field skipped",
            )),
        }
        obs.record_stage(stages::QUERY_RELEVANCE, relevance_report);

        // J: structural analysis (needs claims).
        let mut structural_analysis = None;
        if let Some(map) = semantic.as_ref().filter(|m| !m.claims.is_empty()) {
            let timer = StageTimer::start();
            structural_analysis = Some(analyze_structure(
                &shadow,
                &map.claims,
                &map.edges,
                &geometry.substrate,
            ));
            obs.record_stage(stages::STRUCTURAL, timer.ok());
        } else {
            obs.observe(Observation::info(
                stages::STRUCTURAL,
                codes::STAGE_SKIPPED_MISSING_INPUT,
                "no claims available; structural analysis skipped",
            ));
        }

        // I: blast radius + survey gates (needs claims, provenance and
        // structure).
        let mut blast_radius_filter = None;
        let mut survey_gates = None;
        match (
            semantic.as_ref().filter(|m| !m.claims.is_empty()),
            provenance.as_ref(),
            structural_analysis.as_ref(),
        ) {
            (Some(map), Some(p), Some(structure)) => {
                let timer = StageTimer::start();
                let (filter, gates) = blast_radius_and_gates(
                    &map.claims,
                    &map.edges,
                    p,
                    structure,
                    &query_relevance,
                    &self.config,
                );
                for score in filter.scores.iter().filter(|s| s.suppressed) {
                    obs.observe(
                        Observation::info(
                            stages::BLAST_RADIUS,
                            codes::CLAIM_SUPPRESSED,
                            format!("claim '{}' suppressed: insufficient evidence", score.claim_id),
                        )
                        .with_metadata("claim", score.claim_id.as_str()),
                    );
                }
                if filter.skip_survey {
                    obs.observe(Observation::info(
                        stages::BLAST_RADIUS,
                        codes::SURVEY_SKIPPED,
                        filter
                            .skip_reason
                            .clone()
                            .unwrap_or_else(|| "survey skipped".to_string()),
                    ));
                }
                obs.record_stage(stages::BLAST_RADIUS, timer.ok());
                blast_radius_filter = Some(filter);
                survey_gates = Some(gates);
            }
            _ => {
                obs.observe(Observation::info(
                    stages::BLAST_RADIUS,
                    codes::STAGE_SKIPPED_MISSING_INPUT,
                    "claims, provenance or structure missing; blast radius skipped",
                ));
            }
        }

        let outputs = StageOutputs {
            query: input.query,
            shadow,
            geometry: Some(geometry),
            semantic,
            provenance,
            continuous_field,
            paragraph_similarity_field,
            query_relevance: Some(query_relevance),
            blast_radius_filter,
            survey_gates,
            structural_analysis,
        };
        debug!("pipeline stages complete; assembling artifact");
        Ok(finish(outputs, obs, run_timer, false))
    }
}

fn cancel_observation(stage: &str) -> Observation {
    Observation::warning(stage, codes::RUN_CANCELLED, "run cancelled; partial artifact")
}

fn finish(
    outputs: StageOutputs,
    mut obs: PipelineObservability,
    run_timer: Instant,
    aborted: bool,
) -> CognitiveArtifact {
    obs.aborted = aborted;
    obs.completed = !aborted && obs.stages.values().all(|r| r.ok);
    obs.total_time_ms = run_timer.elapsed().as_millis() as u64;
    assemble(outputs, obs)
}

fn validate_input(input: &PipelineInput) -> Result<()> {
    if input.query.trim().is_empty() {
        return Err(Error::input("query must not be empty"));
    }
    if input.responses.is_empty() {
        return Err(Error::input("at least one model response is required"));
    }
    let mut seen = std::collections::BTreeSet::new();
    for response in &input.responses {
        if response.model_index == 0 {
            return Err(Error::input("model_index must be a positive integer"));
        }
        if !seen.insert(response.model_index) {
            return Err(Error::input(format!(
                "duplicate model_index {}",
                response.model_index
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relevance::RelevanceTier;
    use crate::semantic::EdgeKind;
    use crate::structure::Shape;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Embedder scripted by exact text lookup; unknown texts get the
    /// default vector. The adapter normalizes, so raw vectors suffice.
    struct StaticEmbedder {
        vectors: HashMap<String, Vec<f32>>,
        default: Vec<f32>,
        delay: Duration,
    }

    impl StaticEmbedder {
        fn new(entries: &[(&str, Vec<f32>)]) -> Self {
            Self {
                vectors: entries
                    .iter()
                    .map(|(t, v)| (t.to_string(), v.clone()))
                    .collect(),
                default: vec![0.1, 0.1],
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Embedder for StaticEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            Ok(texts
                .iter()
                .map(|t| self.vectors.get(t).cloned().unwrap_or(self.default.clone()))
                .collect())
        }

        fn model_id(&self) -> &str {
            "static-test"
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::embedding("connection refused", 1))
        }

        fn model_id(&self) -> &str {
            "failing-test"
        }
    }

    struct StaticMapper {
        envelope: String,
    }

    impl StaticMapper {
        fn new(envelope: impl Into<String>) -> Self {
            Self {
                envelope: envelope.into(),
            }
        }
    }

    #[async_trait]
    impl Mapper for StaticMapper {
        async fn map(&self, _query: &str, _responses: &[(u32, String)]) -> Result<String> {
            Ok(self.envelope.clone())
        }

        fn model_id(&self) -> &str {
            "static-mapper-test"
        }
    }

    // -----------------------------------------------------------------
    // Scenario: three responses, clear convergence.
    // -----------------------------------------------------------------

    fn convergent_pipeline() -> (Pipeline, PipelineInput) {
        let m1 = "Use a queue; it batches well.";
        let m2 = "A queue fits this workload.";
        let m3 = "A stream is wrong here; use a queue.";
        let query = "Should we use a queue or a stream?";
        let embedder = StaticEmbedder::new(&[
            (m1, vec![1.0, 0.0]),
            (m2, vec![0.999, 0.0447]),
            (m3, vec![0.995, 0.0998]),
            (query, vec![1.0, 0.0]),
        ]);
        let envelope = r#"<map>
  <claim id="c_queue" label="Use a queue" type="prescriptive" sources="stmt_1_0_0,stmt_2_0_0,stmt_3_0_0">A queue is the right choice for this workload.</claim>
</map>
<narrative>
All three responses recommend a queue [1][2][3].
</narrative>"#;
        let pipeline = Pipeline::new(
            Arc::new(embedder),
            Arc::new(StaticMapper::new(envelope)),
        );
        let input = PipelineInput::new(
            query,
            vec![
                ModelResponse::new(1, m1),
                ModelResponse::new(2, m2),
                ModelResponse::new(3, m3),
            ],
        );
        (pipeline, input)
    }

    #[tokio::test]
    async fn test_scenario_convergent_queue() {
        let (pipeline, input) = convergent_pipeline();
        let artifact = pipeline.run(input).await.unwrap();

        let map = artifact.semantic.as_ref().unwrap();
        assert_eq!(map.claims.len(), 1);
        let claim = &map.claims[0];
        assert_eq!(
            claim.supporters.iter().copied().collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let records = artifact.claim_provenance.as_ref().unwrap();
        assert!(records[0].exclusivity_ratio >= 0.8);
        assert!(records[0].provenance_bulk > 2.5);
        assert_eq!(claim.provenance_bulk, Some(records[0].provenance_bulk));

        let structure = artifact.structural_analysis.as_ref().unwrap();
        assert_eq!(structure.shape.shape, Shape::Convergent);
        assert!(structure.shape.confidence >= 0.4);

        let filter = artifact.blast_radius_filter.as_ref().unwrap();
        assert!(filter.skip_survey);
        assert_eq!(filter.skip_reason.as_deref(), Some("insufficient axes"));
        assert!(artifact.survey_gates.as_ref().unwrap().gates.is_empty());

        assert!(artifact.observability.completed);
        assert!(!artifact.observability.aborted);
    }

    #[tokio::test]
    async fn test_scenario_convergent_softmax_normalization() {
        let (pipeline, input) = convergent_pipeline();
        let artifact = pipeline.run(input).await.unwrap();
        // Single claim: every statement's whole unit of mass lands on it.
        let allocation = artifact.statement_allocation.as_ref().unwrap();
        for count in allocation.assignment_counts.values() {
            assert_eq!(*count, 1);
        }
        let records = artifact.claim_provenance.as_ref().unwrap();
        let total: f64 = records[0]
            .direct_statement_provenance
            .iter()
            .map(|(_, w)| w)
            .sum();
        assert!((total - artifact.shadow.statements.len() as f64).abs() < 1e-9);
    }

    // -----------------------------------------------------------------
    // Scenario: two responses, direct tradeoff.
    // -----------------------------------------------------------------

    fn tradeoff_pipeline() -> (Pipeline, PipelineInput) {
        let m1 = "Option A is faster.";
        let m2 = "Option B is safer; A is fragile.";
        let query = "Choose between option A and option B.";
        let embedder = StaticEmbedder::new(&[
            (m1, vec![1.0, 0.0]),
            (m2, vec![0.0, 1.0]),
            (query, vec![0.7071, 0.7071]),
        ]);
        let envelope = r#"<map>
  <claim id="c_a" label="Option A is faster" type="factual" sources="stmt_1_0_0">Option A wins on speed.</claim>
  <claim id="c_b" label="Option B is safer" type="factual" sources="stmt_2_0_0">Option B wins on safety.</claim>
  <edge source="c_a" target="c_b" kind="tradeoff" weight="0.8" reason="speed versus safety"/>
</map>
<narrative>
The responses disagree on the axis of speed versus safety [1][2].
</narrative>"#;
        let pipeline = Pipeline::new(
            Arc::new(embedder),
            Arc::new(StaticMapper::new(envelope)),
        );
        let input = PipelineInput::new(
            query,
            vec![ModelResponse::new(1, m1), ModelResponse::new(2, m2)],
        );
        (pipeline, input)
    }

    #[tokio::test]
    async fn test_scenario_tradeoff_axis() {
        let (pipeline, input) = tradeoff_pipeline();
        let artifact = pipeline.run(input).await.unwrap();

        let map = artifact.semantic.as_ref().unwrap();
        assert!(map.claims.len() >= 2);
        assert_eq!(map.edges.len(), 1);
        assert_eq!(map.edges[0].kind, EdgeKind::Tradeoff);

        let structure = artifact.structural_analysis.as_ref().unwrap();
        assert_eq!(structure.shape.shape, Shape::Tradeoff);
        assert_eq!(structure.tradeoffs.len(), 1);

        let filter = artifact.blast_radius_filter.as_ref().unwrap();
        assert!(!filter.skip_survey);
        let gates = artifact.survey_gates.as_ref().unwrap();
        assert_eq!(gates.gates.len(), 1);
        let gate = &gates.gates[0];
        assert!(gate.question.contains("Option A is faster"));
        assert!(gate.question.contains("Option B is safer"));
        assert_eq!(gate.affected_claims.len(), 2);
    }

    #[tokio::test]
    async fn test_determinism_modulo_timings() {
        fn normalized(mut artifact: CognitiveArtifact) -> String {
            for report in artifact.observability.stages.values_mut() {
                report.started_at_ms = 0;
                report.time_ms = 0;
            }
            artifact.observability.total_time_ms = 0;
            artifact.to_json().unwrap()
        }
        let (pipeline, input) = tradeoff_pipeline();
        let a = pipeline.run(input.clone()).await.unwrap();
        let b = pipeline.run(input).await.unwrap();
        assert_eq!(normalized(a), normalized(b));
    }

    // -----------------------------------------------------------------
    // Scenario: degenerate substrate.
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn test_scenario_degenerate_substrate() {
        let texts: Vec<String> = (0..5)
            .map(|i| format!("Nearly identical answer number {}.", i))
            .collect();
        let mut entries: Vec<(&str, Vec<f32>)> = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let angle = 0.002 * i as f32;
            entries.push((text.as_str(), vec![angle.cos(), angle.sin()]));
        }
        entries.push(("The question?", vec![1.0, 0.0]));
        let envelope = r#"<map>
  <claim id="c1" label="Same answer" sources="stmt_1_0_0">Every response says the same thing.</claim>
</map>"#;
        let pipeline = Pipeline::new(
            Arc::new(StaticEmbedder::new(&entries)),
            Arc::new(StaticMapper::new(envelope)),
        );
        let responses = texts
            .iter()
            .enumerate()
            .map(|(i, t)| ModelResponse::new(i as u32 + 1, t.clone()))
            .collect();
        let artifact = pipeline
            .run(PipelineInput::new("The question?", responses))
            .await
            .unwrap();

        let geometry = artifact.geometry.as_ref().unwrap();
        assert!(geometry.basin_inversion.discrimination_range < 0.05);
        assert_eq!(geometry.basin_inversion.status, BasinStatus::Degenerate);
        assert_eq!(geometry.substrate.components.len(), 1);
        assert_eq!(geometry.substrate.regions.len(), 1);
        // The weak-geometry fallback is announced.
        assert!(artifact
            .observability
            .observations
            .iter()
            .any(|o| o.code == codes::GEOMETRY_WEAK_FALLBACK));
        // The continuous field is still present as the primary signal.
        assert!(artifact.continuous_field.is_some());
    }

    // -----------------------------------------------------------------
    // Scenario: mapper failure.
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn test_scenario_mapper_failure() {
        let m1 = "Use a queue; it batches well.";
        let embedder = StaticEmbedder::new(&[(m1, vec![1.0, 0.0]), ("q?", vec![1.0, 0.0])]);
        let pipeline = Pipeline::new(
            Arc::new(embedder),
            Arc::new(StaticMapper::new("I could not produce a map, sorry.")),
        );
        let artifact = pipeline
            .run(PipelineInput::new(
                "q?",
                vec![
                    ModelResponse::new(1, m1),
                    ModelResponse::new(2, "A queue fits this workload."),
                ],
            ))
            .await
            .unwrap();

        assert!(artifact.semantic.is_none());
        assert!(!artifact.observability.stage_ok(stages::MAPPER));
        let parse_failure = artifact
            .observability
            .observations
            .iter()
            .find(|o| o.code == codes::MAPPER_PARSE_FAILED)
            .unwrap();
        // Raw mapper output preserved for retry with a different mapper.
        assert!(parse_failure
            .metadata
            .as_ref()
            .unwrap()
            .get("raw_text")
            .unwrap()
            .as_str()
            .unwrap()
            .contains("sorry"));

        // Claim-dependent stages are skipped with observations.
        let skipped: Vec<&str> = artifact
            .observability
            .observations
            .iter()
            .filter(|o| o.code == codes::STAGE_SKIPPED_MISSING_INPUT)
            .map(|o| o.stage.as_str())
            .collect();
        assert!(skipped.contains(&stages::PROVENANCE));
        assert!(skipped.contains(&stages::STRUCTURAL));
        assert!(skipped.contains(&stages::BLAST_RADIUS));
        assert!(artifact.claim_provenance.is_none());
        assert!(artifact.structural_analysis.is_none());
        assert!(artifact.blast_radius_filter.is_none());

        // Geometry and query relevance still came through.
        assert!(artifact.geometry.is_some());
        let relevance = artifact.query_relevance.as_ref().unwrap();
        assert_eq!(relevance.statements.len(), artifact.shadow.statements.len());
        assert!(!artifact.observability.completed);
        assert!(!artifact.observability.aborted);
    }

    // -----------------------------------------------------------------
    // Scenario: cancellation mid-embed.
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn test_scenario_cancellation_mid_embed() {
        let m1 = "Use a queue; it batches well.";
        let embedder = StaticEmbedder::new(&[(m1, vec![1.0, 0.0])])
            .with_delay(Duration::from_secs(30));
        let pipeline = Pipeline::new(
            Arc::new(embedder),
            Arc::new(StaticMapper::new("<map></map>")),
        );
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let artifact = pipeline
            .run_with_cancel(
                PipelineInput::new("q?", vec![ModelResponse::new(1, m1)]),
                &cancel,
            )
            .await
            .unwrap();

        assert!(artifact.observability.aborted);
        assert!(!artifact.observability.stage_ok(stages::EMBEDDING));
        assert!(artifact.geometry.is_none());
        assert!(artifact.semantic.is_none());
        assert!(artifact
            .observability
            .observations
            .iter()
            .any(|o| o.code == codes::RUN_CANCELLED));
        // The shadow had already been carved before the cancel hit.
        assert!(!artifact.shadow.statements.is_empty());
    }

    // -----------------------------------------------------------------
    // Boundary: single response, identical responses, bad input.
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn test_single_response_boundary() {
        let m1 = "Only one answer exists here.";
        let embedder = StaticEmbedder::new(&[(m1, vec![1.0, 0.0]), ("q?", vec![1.0, 0.0])]);
        let envelope = r#"<map>
  <claim id="c1" label="Only answer" sources="stmt_1_0_0">The one answer.</claim>
</map>"#;
        let pipeline = Pipeline::new(
            Arc::new(embedder),
            Arc::new(StaticMapper::new(envelope)),
        );
        let artifact = pipeline
            .run(PipelineInput::new("q?", vec![ModelResponse::new(1, m1)]))
            .await
            .unwrap();

        let geometry = artifact.geometry.as_ref().unwrap();
        assert_eq!(geometry.substrate.nodes.len(), 1);
        assert!(geometry.substrate.knn_edges.is_empty());
        assert_eq!(geometry.basin_inversion.status, BasinStatus::Degenerate);
        // Query relevance still produced; no survey gates.
        let relevance = artifact.query_relevance.as_ref().unwrap();
        assert_eq!(relevance.statements.len(), 1);
        assert_eq!(relevance.statements[0].tier, RelevanceTier::High);
        assert!(artifact.survey_gates.as_ref().unwrap().gates.is_empty());
        assert!(artifact.blast_radius_filter.as_ref().unwrap().skip_survey);
    }

    #[tokio::test]
    async fn test_identical_responses_boundary() {
        let text = "The answer is the same everywhere.";
        let embedder = StaticEmbedder::new(&[(text, vec![1.0, 0.0]), ("q?", vec![1.0, 0.0])]);
        // Four interchangeable claims over the same evidence.
        let envelope = r#"<map>
  <claim id="c1" label="Same a" sources="stmt_1_0_0">Same thing.</claim>
  <claim id="c2" label="Same b" sources="stmt_1_0_0">Same thing.</claim>
  <claim id="c3" label="Same c" sources="stmt_1_0_0">Same thing.</claim>
  <claim id="c4" label="Same d" sources="stmt_1_0_0">Same thing.</claim>
</map>"#;
        let pipeline = Pipeline::new(
            Arc::new(embedder),
            Arc::new(StaticMapper::new(envelope)),
        );
        let responses = (1..=3)
            .map(|i| ModelResponse::new(i, text))
            .collect();
        let artifact = pipeline
            .run(PipelineInput::new("q?", responses))
            .await
            .unwrap();

        let geometry = artifact.geometry.as_ref().unwrap();
        // Mutual edges saturate between identical paragraphs.
        assert_eq!(geometry.substrate.mutual_edges.len(), 3);
        for edge in &geometry.substrate.mutual_edges {
            assert!(edge.similarity > 0.999);
        }
        let allocation = artifact.statement_allocation.as_ref().unwrap();
        assert!(allocation.dual_coordinate_flag);
        let records = artifact.claim_provenance.as_ref().unwrap();
        for record in records {
            assert!(record.exclusivity_ratio < 1e-9);
        }
        // The claim beyond the per-statement cap starves and is
        // suppressed.
        let filter = artifact.blast_radius_filter.as_ref().unwrap();
        assert!(filter.scores.iter().any(|s| s.suppressed));
    }

    #[tokio::test]
    async fn test_input_validation() {
        let pipeline = Pipeline::new(
            Arc::new(StaticEmbedder::new(&[])),
            Arc::new(StaticMapper::new("<map></map>")),
        );
        let err = pipeline
            .run(PipelineInput::new("  ", vec![ModelResponse::new(1, "x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Input(_)));

        let err = pipeline
            .run(PipelineInput::new("q", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Input(_)));

        let err = pipeline
            .run(PipelineInput::new(
                "q",
                vec![ModelResponse::new(2, "a"), ModelResponse::new(2, "b")],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Input(_)));

        let err = pipeline
            .run(PipelineInput::new("q", vec![ModelResponse::new(0, "a")]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[tokio::test]
    async fn test_embedding_failure_aborts_run() {
        let pipeline = Pipeline::new(
            Arc::new(FailingEmbedder),
            Arc::new(StaticMapper::new("<map></map>")),
        );
        let err = pipeline
            .run(PipelineInput::new(
                "q",
                vec![ModelResponse::new(1, "some answer text")],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding { .. }));
    }

    #[tokio::test]
    async fn test_empty_response_text_is_not_an_error() {
        let embedder = StaticEmbedder::new(&[("q?", vec![1.0, 0.0])]);
        let envelope = "<map></map>";
        let pipeline = Pipeline::new(
            Arc::new(embedder),
            Arc::new(StaticMapper::new(envelope)),
        );
        let artifact = pipeline
            .run(PipelineInput::new("q?", vec![ModelResponse::new(1, "")]))
            .await
            .unwrap();
        assert!(artifact.shadow.statements.is_empty());
        assert!(artifact.geometry.as_ref().unwrap().substrate.nodes.is_empty());
    }
}
