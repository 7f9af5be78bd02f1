//! Types for the semantic layer: claims, edges, conditionals.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::shadow::StatementId;

/// Mapper-assigned claim identifier. Stable across re-runs iff the mapper
/// is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimId(String);

impl ClaimId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClaimId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of claim types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Factual,
    Prescriptive,
    Conditional,
    Contested,
    Speculative,
}

impl ClaimType {
    /// Normalize a raw mapper string, accepting common synonyms.
    pub fn from_raw(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "factual" | "fact" | "assertive" => Some(Self::Factual),
            "prescriptive" | "recommendation" | "normative" => Some(Self::Prescriptive),
            "conditional" => Some(Self::Conditional),
            "contested" | "disputed" => Some(Self::Contested),
            "speculative" | "speculation" | "hypothesis" => Some(Self::Speculative),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClaimType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Factual => "factual",
            Self::Prescriptive => "prescriptive",
            Self::Conditional => "conditional",
            Self::Contested => "contested",
            Self::Speculative => "speculative",
        };
        write!(f, "{}", s)
    }
}

/// Optional structural role of a claim in the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimRole {
    Anchor,
    Challenger,
    Supplement,
    Branch,
}

impl ClaimRole {
    pub fn from_raw(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "anchor" => Some(Self::Anchor),
            "challenger" => Some(Self::Challenger),
            "supplement" => Some(Self::Supplement),
            "branch" => Some(Self::Branch),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClaimRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Anchor => "anchor",
            Self::Challenger => "challenger",
            Self::Supplement => "supplement",
            Self::Branch => "branch",
        };
        write!(f, "{}", s)
    }
}

/// One claim distilled by the mapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub label: String,
    pub text: String,
    pub claim_type: ClaimType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ClaimRole>,
    /// Statement ids cited by the mapper, validated against the shadow.
    pub source_statement_ids: BTreeSet<StatementId>,
    /// Model indexes backing the claim (derived from sources, plus any
    /// explicit mapper attribute).
    pub supporters: BTreeSet<u32>,
    /// Filled by the provenance engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance_bulk: Option<f64>,
    /// Mean pairwise similarity of the claim's source paragraphs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_coherence: Option<f64>,
}

/// Closed set of semantic edge kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Supports,
    Refutes,
    Tradeoff,
    Prerequisite,
    Elaborates,
}

impl EdgeKind {
    /// Normalize a raw mapper string, mapping the documented synonyms
    /// (`contradicts` -> refutes, `requires` -> prerequisite) and a few
    /// spelling variants.
    pub fn from_raw(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "supports" | "support" => Some(Self::Supports),
            "refutes" | "refute" | "contradicts" | "conflicts" => Some(Self::Refutes),
            "tradeoff" | "trade_off" | "tradeoffs" => Some(Self::Tradeoff),
            "prerequisite" | "requires" | "require" => Some(Self::Prerequisite),
            "elaborates" | "elaborate" | "elaboration" => Some(Self::Elaborates),
            _ => None,
        }
    }

    /// Whether the edge expresses disagreement between its endpoints.
    pub fn is_conflict(self) -> bool {
        matches!(self, Self::Refutes | Self::Tradeoff)
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Supports => "supports",
            Self::Refutes => "refutes",
            Self::Tradeoff => "tradeoff",
            Self::Prerequisite => "prerequisite",
            Self::Elaborates => "elaborates",
        };
        write!(f, "{}", s)
    }
}

/// Directed semantic edge between claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticEdge {
    pub source: ClaimId,
    pub target: ClaimId,
    pub kind: EdgeKind,
    /// Mapper-asserted strength in [0, 1]; defaults to 0.5.
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A conditional gate distilled by the mapper: a condition under which a
/// subset of claims applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditional {
    pub id: String,
    pub condition: String,
    /// Claims gated by the condition; validated against the claim set.
    pub claims: Vec<ClaimId>,
}

/// Parsed semantic layer: the map plus the narrative prose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticMap {
    pub claims: Vec<Claim>,
    pub edges: Vec<SemanticEdge>,
    pub conditionals: Vec<Conditional>,
    /// Markdown prose with `[n]` citation markers, if the mapper sent one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
}

impl SemanticMap {
    pub fn claim(&self, id: &ClaimId) -> Option<&Claim> {
        self.claims.iter().find(|c| &c.id == id)
    }

    /// Edges touching the given claim.
    pub fn edges_of(&self, id: &ClaimId) -> Vec<&SemanticEdge> {
        self.edges
            .iter()
            .filter(|e| &e.source == id || &e.target == id)
            .collect()
    }

    /// Distinct `[n]` citation markers in the narrative, ascending.
    pub fn narrative_citations(&self) -> Vec<u32> {
        let Some(narrative) = &self.narrative else {
            return Vec::new();
        };
        let citation_re = regex::Regex::new(r"\[(\d+)\]").unwrap();
        let set: std::collections::BTreeSet<u32> = citation_re
            .captures_iter(narrative)
            .filter_map(|cap| cap.get(1)?.as_str().parse().ok())
            .collect();
        set.into_iter().collect()
    }
}
