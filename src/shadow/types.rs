//! Core types for the pre-semantic shadow decomposition.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifier of one statement: `stmt_{model}_{paragraph}_{sentence}`.
///
/// Ids are assigned in `(model_index, paragraph_index, sentence_index)`
/// order before any parallel work begins, so the derived lexicographic
/// ordering is stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatementId(String);

impl StatementId {
    pub fn new(model_index: u32, paragraph_index: u32, sentence_index: u32) -> Self {
        Self(format!(
            "stmt_{}_{}_{}",
            model_index, paragraph_index, sentence_index
        ))
    }

    /// Wrap an externally supplied id (e.g. from a mapper `sources` attr).
    /// Validation against the known statement set happens in the parser.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StatementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one paragraph: `p_{model}_{paragraph}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParagraphId(String);

impl ParagraphId {
    pub fn new(model_index: u32, paragraph_index: u32) -> Self {
        Self(format!("p_{}_{}", model_index, paragraph_index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParagraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rhetorical stance of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    /// Recommends an action ("should", "must", "recommend").
    Prescriptive,
    /// Warns against something ("avoid", "risk", "warning").
    Cautionary,
    /// States a precondition ("requires", "first", "before").
    Prerequisite,
    /// States a consequence or follow-up ("then", "afterwards").
    Dependent,
    /// Plain declarative assertion.
    Assertive,
    /// Hedged ("may", "might", "possibly").
    Uncertain,
    /// No stance could be read off the text.
    Unknown,
}

impl Stance {
    /// Dominance priority used for paragraph-level tie-breaks. Lower wins.
    pub fn priority(self) -> u8 {
        match self {
            Self::Prescriptive => 0,
            Self::Cautionary => 1,
            Self::Prerequisite => 2,
            Self::Dependent => 3,
            Self::Uncertain => 4,
            Self::Assertive => 5,
            Self::Unknown => 6,
        }
    }
}

impl std::fmt::Display for Stance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Prescriptive => "prescriptive",
            Self::Cautionary => "cautionary",
            Self::Prerequisite => "prerequisite",
            Self::Dependent => "dependent",
            Self::Assertive => "assertive",
            Self::Uncertain => "uncertain",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Three independent structural cues read off a statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signals {
    /// Temporal/procedural ordering cue ("first", "then", "step").
    pub sequence: bool,
    /// Contrastive cue ("but", "however", "tradeoff").
    pub tension: bool,
    /// If-then cue ("if", "unless", "provided that").
    pub conditional: bool,
}

/// One sentence carved out of a model response. Never mutated after
/// extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub id: StatementId,
    pub model_index: u32,
    pub paragraph_index: u32,
    pub sentence_index: u32,
    pub text: String,
    pub stance: Stance,
    /// Lexical confidence in the stance tag, in [0, 1].
    pub confidence: f64,
    pub signals: Signals,
    /// Optional 2-D layout coordinates; advisory, never authoritative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometric_coordinates: Option<(f32, f32)>,
}

/// One paragraph of a model response with its carved statements.
///
/// Invariant: `statement_ids` are exactly the statements carved from
/// `text`, in original order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub id: ParagraphId,
    pub model_index: u32,
    pub paragraph_index: u32,
    pub statement_ids: Vec<StatementId>,
    pub dominant_stance: Stance,
    /// True iff the paragraph holds both prescriptive and cautionary
    /// statements.
    pub contested: bool,
    /// The raw paragraph text, exactly as extracted.
    pub text: String,
}

/// The complete pre-semantic decomposition of a run's responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shadow {
    pub statements: Vec<Statement>,
    pub paragraphs: Vec<Paragraph>,
}

impl Shadow {
    /// All statement ids, for cross-reference validation.
    pub fn statement_id_set(&self) -> BTreeSet<StatementId> {
        self.statements.iter().map(|s| s.id.clone()).collect()
    }

    /// Look up a statement by id.
    pub fn statement(&self, id: &StatementId) -> Option<&Statement> {
        self.statements.iter().find(|s| &s.id == id)
    }

    /// Look up a paragraph by id.
    pub fn paragraph(&self, id: &ParagraphId) -> Option<&Paragraph> {
        self.paragraphs.iter().find(|p| &p.id == id)
    }

    /// Distinct model indexes present, ascending.
    pub fn model_indexes(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = self.paragraphs.iter().map(|p| p.model_index).collect();
        set.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_formats() {
        assert_eq!(StatementId::new(1, 0, 2).as_str(), "stmt_1_0_2");
        assert_eq!(ParagraphId::new(3, 4).as_str(), "p_3_4");
    }

    #[test]
    fn test_id_ordering_is_lexicographic() {
        let a = ParagraphId::new(1, 0);
        let b = ParagraphId::new(1, 1);
        assert!(a < b);
    }

    #[test]
    fn test_stance_priority_order() {
        assert!(Stance::Prescriptive.priority() < Stance::Cautionary.priority());
        assert!(Stance::Cautionary.priority() < Stance::Prerequisite.priority());
        assert!(Stance::Uncertain.priority() < Stance::Assertive.priority());
        assert!(Stance::Assertive.priority() < Stance::Unknown.priority());
    }

    #[test]
    fn test_stance_serde_canonical_form() {
        let json = serde_json::to_string(&Stance::Prescriptive).unwrap();
        assert_eq!(json, "\"prescriptive\"");
        assert_eq!(Stance::Prescriptive.to_string(), "prescriptive");
    }
}
