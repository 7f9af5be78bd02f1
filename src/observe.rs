//! Observability for pipeline runs.
//!
//! Every stage leaves a timing report, and noteworthy events along the way
//! (dropped edges, partial parses, suppressions, scrubbed values) become
//! leveled observations with stable codes. Callers render these however
//! they like; the core only collects.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Stable observation codes emitted by the core.
pub mod codes {
    pub const MAPPER_PARSE_FAILED: &str = "mapper_parse_failed";
    pub const MAPPER_PARTIAL_PARSE: &str = "mapper_partial_parse";
    pub const EDGE_ENDPOINT_UNRESOLVED: &str = "edge_endpoint_unresolved";
    pub const UNKNOWN_SOURCE_STATEMENT: &str = "unknown_source_statement";
    pub const CLAIM_DROPPED: &str = "claim_dropped";
    pub const EDGE_DROPPED: &str = "edge_dropped";
    pub const CONDITIONAL_DROPPED: &str = "conditional_dropped";
    pub const DUPLICATE_CLAIM_ID: &str = "duplicate_claim_id";
    pub const EMBEDDING_FAILURE: &str = "embedding_failure";
    pub const STAGE_FAILED: &str = "stage_failed";
    pub const STAGE_SKIPPED_MISSING_INPUT: &str = "stage_skipped_missing_input";
    pub const CLAIM_SUPPRESSED: &str = "claim_suppressed";
    pub const SURVEY_SKIPPED: &str = "survey_skipped";
    pub const NON_FINITE_SCRUBBED: &str = "non_finite_scrubbed";
    pub const NARRATIVE_UNKNOWN_CITATION: &str = "narrative_unknown_citation";
    pub const DANGLING_REFERENCE_DROPPED: &str = "dangling_reference_dropped";
    pub const GEOMETRY_WEAK_FALLBACK: &str = "geometry_weak_fallback";
    pub const RUN_CANCELLED: &str = "run_cancelled";
}

/// Severity of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationLevel {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for ObservationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// One diagnostic event recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub level: ObservationLevel,
    /// Name of the stage that emitted the observation.
    pub stage: String,
    /// Stable machine-readable code from [`codes`].
    pub code: String,
    /// Human-readable detail.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl Observation {
    pub fn new(
        level: ObservationLevel,
        stage: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            stage: stage.into(),
            code: code.into(),
            message: message.into(),
            metadata: None,
        }
    }

    pub fn info(stage: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ObservationLevel::Info, stage, code, message)
    }

    pub fn warning(
        stage: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ObservationLevel::Warning, stage, code, message)
    }

    pub fn error(
        stage: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ObservationLevel::Error, stage, code, message)
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Timing and outcome of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// Wall-clock start in epoch milliseconds.
    pub started_at_ms: i64,
    /// Stage duration in milliseconds.
    pub time_ms: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Collected observability for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineObservability {
    /// Per-stage reports keyed by stage name; BTreeMap keeps output order
    /// deterministic.
    pub stages: BTreeMap<String, StageReport>,
    pub observations: Vec<Observation>,
    pub total_time_ms: u64,
    /// True when the run stopped at a stage boundary after cancellation.
    pub aborted: bool,
    /// True when every scheduled stage ran to completion.
    pub completed: bool,
}

impl PipelineObservability {
    pub fn record_stage(&mut self, name: impl Into<String>, report: StageReport) {
        self.stages.insert(name.into(), report);
    }

    pub fn observe(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    pub fn extend_observations(&mut self, observations: impl IntoIterator<Item = Observation>) {
        self.observations.extend(observations);
    }

    /// Whether a stage ran and succeeded.
    pub fn stage_ok(&self, name: &str) -> bool {
        self.stages.get(name).map(|r| r.ok).unwrap_or(false)
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
