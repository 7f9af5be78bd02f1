//! Shadow extraction: the pre-semantic decomposition of raw responses.
//!
//! Each model response is carved into paragraphs (blank-line boundaries,
//! code fences atomic) and statements (sentence splitter), then every
//! statement is tagged with a stance and three independent structural
//! signals. Ids are assigned in `(model, paragraph, sentence)` order and
//! nothing here is mutated afterwards; all downstream stages consume the
//! shadow read-only.

pub mod segment;
pub mod stance;
pub mod types;

pub use types::{Paragraph, ParagraphId, Shadow, Signals, Stance, Statement, StatementId};

use std::collections::BTreeMap;
use tracing::debug;

/// Splits responses into tagged statements and paragraphs.
///
/// Stateless; the struct exists so callers can hold one extractor and so
/// future lexicon overrides have somewhere to live.
#[derive(Debug, Clone, Default)]
pub struct ShadowExtractor;

impl ShadowExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract the shadow for a set of `(model_index, raw_text)` responses.
    ///
    /// Empty responses yield zero statements, not an error. Unsplittable
    /// text becomes one paragraph holding one statement.
    pub fn extract(&self, responses: &[(u32, &str)]) -> Shadow {
        let mut statements = Vec::new();
        let mut paragraphs = Vec::new();

        for (model_index, raw) in responses {
            let model_index = *model_index;
            for (paragraph_index, paragraph_text) in
                segment::split_paragraphs(raw).into_iter().enumerate()
            {
                let paragraph_index = paragraph_index as u32;
                let paragraph_id = ParagraphId::new(model_index, paragraph_index);
                let mut statement_ids = Vec::new();
                let mut stance_counts: BTreeMap<u8, (Stance, usize)> = BTreeMap::new();
                let mut has_prescriptive = false;
                let mut has_cautionary = false;

                for (sentence_index, sentence) in segment::split_sentences(&paragraph_text)
                    .into_iter()
                    .enumerate()
                {
                    let sentence_index = sentence_index as u32;
                    let (stance, confidence) = stance::classify_stance(&sentence);
                    let signals = stance::detect_signals(&sentence);
                    let id = StatementId::new(model_index, paragraph_index, sentence_index);

                    has_prescriptive |= stance == Stance::Prescriptive;
                    has_cautionary |= stance == Stance::Cautionary;
                    stance_counts
                        .entry(stance.priority())
                        .and_modify(|(_, n)| *n += 1)
                        .or_insert((stance, 1));

                    statement_ids.push(id.clone());
                    statements.push(Statement {
                        id,
                        model_index,
                        paragraph_index,
                        sentence_index,
                        text: sentence,
                        stance,
                        confidence,
                        signals,
                        geometric_coordinates: None,
                    });
                }

                paragraphs.push(Paragraph {
                    id: paragraph_id,
                    model_index,
                    paragraph_index,
                    statement_ids,
                    dominant_stance: dominant_stance(&stance_counts),
                    contested: has_prescriptive && has_cautionary,
                    text: paragraph_text,
                });
            }
        }

        debug!(
            statements = statements.len(),
            paragraphs = paragraphs.len(),
            "shadow extracted"
        );
        Shadow {
            statements,
            paragraphs,
        }
    }
}

/// Modal stance with the deterministic priority tie-break: on equal counts
/// the stance with the lower priority rank wins.
fn dominant_stance(counts: &BTreeMap<u8, (Stance, usize)>) -> Stance {
    let mut best: Option<(Stance, usize)> = None;
    // BTreeMap iterates in priority order, so `>` keeps the higher-priority
    // stance on ties.
    for (stance, count) in counts.values() {
        match best {
            Some((_, best_count)) if *count > best_count => best = Some((*stance, *count)),
            None => best = Some((*stance, *count)),
            _ => {}
        }
    }
    best.map(|(s, _)| s).unwrap_or(Stance::Unknown)
}
