//! # cogmap
//!
//! A deterministic multi-stage analysis engine that turns a small set of
//! free-text model responses to one query into a structured *cognitive
//! artifact*: a claim graph with competitive provenance, a geometric
//! substrate over paragraph embeddings, query-relevance tiers, blast-radius
//! scores with survey gates, and per-stage observability.
//!
//! ## Core Components
//!
//! - **Shadow**: pre-semantic decomposition into tagged statements and
//!   paragraphs
//! - **Geometry**: k-NN substrate, mutual/strong edges, regions, basin
//!   inversion
//! - **Semantic**: mapper invocation and envelope parsing into claims and
//!   edges
//! - **Provenance**: competitive soft-max assignment of statements to
//!   claims
//! - **Pipeline**: stage sequencing, blocking policy, cancellation,
//!   artifact assembly
//!
//! ## Example
//!
//! ```rust,ignore
//! use cogmap::{HashingEmbedder, ModelResponse, Pipeline, PipelineInput};
//! use std::sync::Arc;
//!
//! let pipeline = Pipeline::new(Arc::new(HashingEmbedder::default()), Arc::new(my_mapper));
//! let artifact = pipeline
//!     .run(PipelineInput::new(
//!         "Queue or stream?",
//!         vec![ModelResponse::new(1, "Use a queue; it batches well.")],
//!     ))
//!     .await?;
//! println!("{}", artifact.to_json_pretty()?);
//! ```

pub mod artifact;
pub mod config;
pub mod embedding;
pub mod error;
pub mod field;
pub mod geometry;
pub mod observe;
pub mod pipeline;
pub mod provenance;
pub mod relevance;
pub mod semantic;
pub mod shadow;
pub mod stats;
pub mod structure;
pub mod survey;

// Re-exports for convenience
pub use artifact::{
    assemble, CognitiveArtifact, GeometrySection, PreSemanticSummary, StageOutputs,
};
pub use config::PipelineConfig;
pub use embedding::{offline::HashingEmbedder, BatchedEmbedder, Embedder, EmbeddingStore};
pub use error::{Error, Result};
pub use field::{
    compute_fields, ClaimField, ContinuousField, FieldEntry, ParagraphField,
    ParagraphSimilarityField,
};
pub use geometry::{
    invert_basins, BasinInversion, BasinStatus, EdgeClass, Region, RegionKind, SimilarityMatrix,
    Substrate, SubstrateBuilder, SubstrateEdge, SubstrateNode,
};
pub use observe::{Observation, ObservationLevel, PipelineObservability, StageReport};
pub use pipeline::{CancelToken, ModelResponse, Pipeline, PipelineInput};
pub use provenance::{
    ClaimProvenance, EntropyHistogram, ProvenanceEngine, ProvenanceRecord, StatementAllocation,
};
pub use relevance::{QueryRelevance, QueryRelevanceScore, RelevanceMeta, RelevanceTier};
pub use semantic::{
    build_prompt, parse_envelope, print_envelope, Claim, ClaimId, ClaimRole, ClaimType,
    Conditional, EdgeKind, Mapper, MapperAdapter, SemanticEdge, SemanticMap,
};
pub use shadow::{
    Paragraph, ParagraphId, Shadow, ShadowExtractor, Signals, Stance, Statement, StatementId,
};
pub use structure::{ClaimStructure, Shape, ShapePrior, StructuralAnalysis};
pub use survey::{BlastRadiusFilter, BlastRadiusScore, SurveyGate, SurveyGates};
