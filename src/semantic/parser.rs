//! Parser for the mapper's XML-ish envelope.
//!
//! The envelope is LLM-generated text, not XML: attribute values may
//! contain `>`, closing tags go missing, and prose appears between tags.
//! The scanner is single-pass with quote awareness and never backtracks.
//! Recovery rule for a missing closing tag: the element ends at the next
//! sibling tag (or the end of the block).

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::error::{Error, Result};
use crate::observe::{codes, Observation};
use crate::shadow::StatementId;

use super::types::{
    Claim, ClaimId, ClaimRole, ClaimType, Conditional, EdgeKind, SemanticEdge, SemanticMap,
};

const STAGE: &str = "mapper";
const CHILD_TAGS: &[&str] = &["claim", "edge", "conditional"];

/// Parse result: the semantic map plus the parse-time observations.
#[derive(Debug, Clone)]
pub struct ParsedEnvelope {
    pub map: SemanticMap,
    pub notes: Vec<Observation>,
}

/// Parse a mapper envelope against the known statement id set.
///
/// A missing `<map>` block is a hard failure carrying the raw envelope;
/// everything else degrades to dropped items plus warning observations.
pub fn parse_envelope(
    raw: &str,
    known_statements: &BTreeSet<StatementId>,
) -> Result<ParsedEnvelope> {
    let map_inner = find_block(raw, "map")
        .ok_or_else(|| Error::mapper("no <map> block in envelope", raw))?;
    let narrative = find_block(raw, "narrative")
        .map(|block| unescape(block.trim()))
        .filter(|n| !n.is_empty());

    let mut notes = Vec::new();
    let tags = tokenize(&map_inner);

    // First pass: claims, so edge endpoints can resolve against them.
    let mut claims: Vec<Claim> = Vec::new();
    let mut seen_ids: BTreeSet<ClaimId> = BTreeSet::new();
    for tag in tags.iter().filter(|t| t.name == "claim") {
        match build_claim(tag, known_statements, &mut notes) {
            Some(claim) => {
                if seen_ids.contains(&claim.id) {
                    notes.push(
                        Observation::warning(
                            STAGE,
                            codes::DUPLICATE_CLAIM_ID,
                            format!("duplicate claim id '{}', keeping the first", claim.id),
                        )
                        .with_metadata("claim", claim.id.as_str()),
                    );
                    continue;
                }
                seen_ids.insert(claim.id.clone());
                claims.push(claim);
            }
            None => {}
        }
    }

    let claim_ids: BTreeSet<ClaimId> = claims.iter().map(|c| c.id.clone()).collect();

    let mut edges = Vec::new();
    for tag in tags.iter().filter(|t| t.name == "edge") {
        if let Some(edge) = build_edge(tag, &claim_ids, &mut notes) {
            edges.push(edge);
        }
    }

    let mut conditionals = Vec::new();
    for (index, tag) in tags.iter().filter(|t| t.name == "conditional").enumerate() {
        if let Some(conditional) = build_conditional(tag, index, &claim_ids, &mut notes) {
            conditionals.push(conditional);
        }
    }

    if claims.is_empty() {
        notes.push(Observation::warning(
            STAGE,
            codes::MAPPER_PARTIAL_PARSE,
            "map block contained no valid claims",
        ));
    } else if notes.iter().any(|n| {
        n.code == codes::CLAIM_DROPPED
            || n.code == codes::EDGE_DROPPED
            || n.code == codes::EDGE_ENDPOINT_UNRESOLVED
    }) {
        notes.push(Observation::warning(
            STAGE,
            codes::MAPPER_PARTIAL_PARSE,
            "some map items were dropped during parsing",
        ));
    }

    Ok(ParsedEnvelope {
        map: SemanticMap {
            claims,
            edges,
            conditionals,
            narrative,
        },
        notes,
    })
}

fn build_claim(
    tag: &RawTag,
    known_statements: &BTreeSet<StatementId>,
    notes: &mut Vec<Observation>,
) -> Option<Claim> {
    let drop = |notes: &mut Vec<Observation>, why: &str| {
        warn!(why, "dropping claim tag");
        notes.push(Observation::warning(
            STAGE,
            codes::CLAIM_DROPPED,
            format!("claim dropped: {}", why),
        ));
        None
    };

    let id = match tag.attr("id") {
        Some(id) if !id.is_empty() => ClaimId::new(id),
        _ => return drop(notes, "missing id attribute"),
    };
    let label = match tag.attr("label") {
        Some(label) if !label.is_empty() => label,
        _ => return drop(notes, "missing label attribute"),
    };
    let text = tag
        .attr("text")
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| tag.inner.trim().to_string());
    if text.is_empty() {
        return drop(notes, "missing text");
    }

    let claim_type = match tag.attr("type") {
        Some(raw) => match ClaimType::from_raw(&raw) {
            Some(t) => t,
            None => {
                notes.push(Observation::info(
                    STAGE,
                    codes::MAPPER_PARTIAL_PARSE,
                    format!("unknown claim type '{}' on '{}', defaulting to factual", raw, id),
                ));
                ClaimType::Factual
            }
        },
        None => ClaimType::Factual,
    };
    let role = tag.attr("role").and_then(|raw| {
        let role = ClaimRole::from_raw(&raw);
        if role.is_none() {
            notes.push(Observation::info(
                STAGE,
                codes::MAPPER_PARTIAL_PARSE,
                format!("unknown claim role '{}' on '{}', ignoring", raw, id),
            ));
        }
        role
    });

    // Sources are trimmed and validated against the shadow's statements.
    let mut source_statement_ids = BTreeSet::new();
    let mut supporters: BTreeSet<u32> = BTreeSet::new();
    if let Some(sources) = tag.attr("sources") {
        for raw_id in sources.split([',', ' ']).map(str::trim).filter(|s| !s.is_empty()) {
            let statement_id = StatementId::from_raw(raw_id);
            if known_statements.contains(&statement_id) {
                if let Some(model) = model_index_of(&statement_id) {
                    supporters.insert(model);
                }
                source_statement_ids.insert(statement_id);
            } else {
                notes.push(
                    Observation::warning(
                        STAGE,
                        codes::UNKNOWN_SOURCE_STATEMENT,
                        format!("claim '{}' cites unknown statement '{}'", id, raw_id),
                    )
                    .with_metadata("claim", id.as_str()),
                );
            }
        }
    }
    if let Some(raw) = tag.attr("supporters") {
        for token in raw.split([',', ' ']).map(str::trim).filter(|s| !s.is_empty()) {
            if let Ok(model) = token.parse::<u32>() {
                supporters.insert(model);
            }
        }
    }

    Some(Claim {
        id,
        label,
        text,
        claim_type,
        role,
        source_statement_ids,
        supporters,
        provenance_bulk: None,
        source_coherence: None,
    })
}

fn build_edge(
    tag: &RawTag,
    claim_ids: &BTreeSet<ClaimId>,
    notes: &mut Vec<Observation>,
) -> Option<SemanticEdge> {
    let (source, target, kind_raw) = match (tag.attr("source"), tag.attr("target"), tag.attr("kind"))
    {
        (Some(s), Some(t), Some(k)) if !s.is_empty() && !t.is_empty() => (s, t, k),
        _ => {
            notes.push(Observation::warning(
                STAGE,
                codes::EDGE_DROPPED,
                "edge dropped: missing source/target/kind attribute",
            ));
            return None;
        }
    };
    let kind = match EdgeKind::from_raw(&kind_raw) {
        Some(kind) => kind,
        None => {
            notes.push(Observation::warning(
                STAGE,
                codes::EDGE_DROPPED,
                format!("edge dropped: unknown kind '{}'", kind_raw),
            ));
            return None;
        }
    };
    let source = ClaimId::new(source);
    let target = ClaimId::new(target);
    if source == target {
        notes.push(Observation::warning(
            STAGE,
            codes::EDGE_DROPPED,
            format!("edge dropped: self-edge on '{}'", source),
        ));
        return None;
    }
    if !claim_ids.contains(&source) || !claim_ids.contains(&target) {
        warn!(source = %source, target = %target, "edge endpoint unresolved");
        notes.push(
            Observation::warning(
                STAGE,
                codes::EDGE_ENDPOINT_UNRESOLVED,
                format!("edge {} -> {} references a missing claim", source, target),
            )
            .with_metadata("source", source.as_str())
            .with_metadata("target", target.as_str()),
        );
        return None;
    }
    let weight = tag
        .attr("weight")
        .and_then(|w| w.parse::<f64>().ok())
        .filter(|w| w.is_finite())
        .map(|w| w.clamp(0.0, 1.0))
        .unwrap_or(0.5);

    Some(SemanticEdge {
        source,
        target,
        kind,
        weight,
        reason: tag.attr("reason").filter(|r| !r.is_empty()),
    })
}

fn build_conditional(
    tag: &RawTag,
    index: usize,
    claim_ids: &BTreeSet<ClaimId>,
    notes: &mut Vec<Observation>,
) -> Option<Conditional> {
    let condition = tag
        .attr("condition")
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| tag.inner.trim().to_string());
    if condition.is_empty() {
        notes.push(Observation::warning(
            STAGE,
            codes::CONDITIONAL_DROPPED,
            "conditional dropped: no condition text",
        ));
        return None;
    }
    let id = tag
        .attr("id")
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| format!("cond_{}", index));
    let mut claims = Vec::new();
    if let Some(raw) = tag.attr("claims") {
        for token in raw.split([',', ' ']).map(str::trim).filter(|s| !s.is_empty()) {
            let claim_id = ClaimId::new(token);
            if claim_ids.contains(&claim_id) {
                claims.push(claim_id);
            } else {
                notes.push(Observation::warning(
                    STAGE,
                    codes::CONDITIONAL_DROPPED,
                    format!("conditional '{}' references missing claim '{}'", id, token),
                ));
            }
        }
    }
    Some(Conditional {
        id,
        condition,
        claims,
    })
}

/// Model index encoded in a statement id (`stmt_{model}_{p}_{s}`).
fn model_index_of(id: &StatementId) -> Option<u32> {
    id.as_str().split('_').nth(1)?.parse().ok()
}

// ---------------------------------------------------------------------------
// Low-level scanning
// ---------------------------------------------------------------------------

/// A tokenized child tag.
#[derive(Debug, Clone)]
struct RawTag {
    name: String,
    attrs: BTreeMap<String, String>,
    inner: String,
}

impl RawTag {
    fn attr(&self, name: &str) -> Option<String> {
        self.attrs.get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }
}

/// Locate the outermost `<name>...</name>` block and return its inner text.
/// Quote-aware and balanced for nested same-name tags; a missing closing
/// tag recovers to the end of the text.
fn find_block(text: &str, name: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let open_start = find_tag_open(&chars, 0, name)?;
    let (open_end, self_closing) = scan_tag_end(&chars, open_start)?;
    if self_closing {
        return Some(String::new());
    }
    let inner_start = open_end + 1;
    let mut depth = 1usize;
    let mut i = inner_start;
    while i < chars.len() {
        if chars[i] != '<' {
            i += 1;
            continue;
        }
        if starts_with_close(&chars, i, name) {
            depth -= 1;
            if depth == 0 {
                let inner: String = chars[inner_start..i].iter().collect();
                return Some(inner);
            }
            i = skip_past_gt(&chars, i);
            continue;
        }
        if is_tag_open_at(&chars, i, name) {
            if let Some((end, closed)) = scan_tag_end(&chars, i) {
                if !closed {
                    depth += 1;
                }
                i = end + 1;
                continue;
            }
        }
        // Some other tag or stray '<': skip its quoted-aware extent.
        i = skip_past_gt(&chars, i);
    }
    // Unterminated block: tolerate and take the rest.
    Some(chars[inner_start..].iter().collect())
}

/// Tokenize the children of a map block.
fn tokenize(inner: &str) -> Vec<RawTag> {
    let chars: Vec<char> = inner.chars().collect();
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < chars.len() {
        if chars[i] != '<' {
            i += 1;
            continue;
        }
        if i + 1 < chars.len() && chars[i + 1] == '/' {
            // Stray closer with no open: skip it.
            i = skip_past_gt(&chars, i);
            continue;
        }
        let name = read_name(&chars, i + 1);
        if name.is_empty() {
            i += 1;
            continue;
        }
        let Some((tag_end, self_closing)) = scan_tag_end(&chars, i) else {
            break;
        };
        let attrs = parse_attrs(&chars, i + 1 + name.len(), tag_end);
        let mut inner_text = String::new();
        let mut next = tag_end + 1;
        if !self_closing {
            let content_start = tag_end + 1;
            match find_close_or_sibling(&chars, content_start, &name) {
                ElementEnd::Closed { inner_end, resume } => {
                    inner_text = chars[content_start..inner_end].iter().collect();
                    next = resume;
                }
                ElementEnd::Recovered { inner_end } => {
                    inner_text = chars[content_start..inner_end].iter().collect();
                    next = inner_end;
                }
            }
        }
        out.push(RawTag {
            name,
            attrs,
            inner: unescape(inner_text.trim()),
        });
        i = next;
    }
    out
}

enum ElementEnd {
    /// Proper `</name>` found.
    Closed { inner_end: usize, resume: usize },
    /// Closing tag missing; element ends at the next sibling (or EOF).
    Recovered { inner_end: usize },
}

fn find_close_or_sibling(chars: &[char], from: usize, name: &str) -> ElementEnd {
    let mut i = from;
    while i < chars.len() {
        if chars[i] != '<' {
            i += 1;
            continue;
        }
        if starts_with_close(chars, i, name) {
            return ElementEnd::Closed {
                inner_end: i,
                resume: skip_past_gt(chars, i),
            };
        }
        // Missing closing tag: a sibling opener ends the element.
        if CHILD_TAGS.iter().any(|t| is_tag_open_at(chars, i, t)) {
            return ElementEnd::Recovered { inner_end: i };
        }
        i = skip_past_gt(chars, i);
    }
    ElementEnd::Recovered {
        inner_end: chars.len(),
    }
}

/// Whether `<name` opens at position `i` (with a boundary after the name).
fn is_tag_open_at(chars: &[char], i: usize, name: &str) -> bool {
    let name_chars: Vec<char> = name.chars().collect();
    if chars.get(i) != Some(&'<') {
        return false;
    }
    for (k, nc) in name_chars.iter().enumerate() {
        if chars.get(i + 1 + k) != Some(nc) {
            return false;
        }
    }
    matches!(
        chars.get(i + 1 + name_chars.len()),
        Some(' ') | Some('\t') | Some('\n') | Some('\r') | Some('>') | Some('/') | None
    )
}

fn find_tag_open(chars: &[char], from: usize, name: &str) -> Option<usize> {
    (from..chars.len()).find(|&i| is_tag_open_at(chars, i, name))
}

/// Whether `</name>` (with optional internal spaces) starts at `i`.
fn starts_with_close(chars: &[char], i: usize, name: &str) -> bool {
    if chars.get(i) != Some(&'<') || chars.get(i + 1) != Some(&'/') {
        return false;
    }
    let mut k = i + 2;
    for nc in name.chars() {
        if chars.get(k) != Some(&nc) {
            return false;
        }
        k += 1;
    }
    while matches!(chars.get(k), Some(c) if c.is_whitespace()) {
        k += 1;
    }
    chars.get(k) == Some(&'>')
}

/// Find the `>` ending the tag that opens at `start`, honoring quotes.
/// Returns `(index_of_gt, self_closing)`.
fn scan_tag_end(chars: &[char], start: usize) -> Option<(usize, bool)> {
    let mut quote: Option<char> = None;
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    quote = Some(c);
                } else if c == '>' {
                    let self_closing = i > 0 && chars[i - 1] == '/';
                    return Some((i, self_closing));
                }
            }
        }
        i += 1;
    }
    None
}

/// Skip past the end of a tag starting at `i` (or one char on failure).
fn skip_past_gt(chars: &[char], i: usize) -> usize {
    match scan_tag_end(chars, i) {
        Some((end, _)) => end + 1,
        None => i + 1,
    }
}

fn read_name(chars: &[char], from: usize) -> String {
    let mut name = String::new();
    let mut i = from;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            name.push(c.to_ascii_lowercase());
            i += 1;
        } else {
            break;
        }
    }
    name
}

/// Parse `key="value"` attributes between `from` and the tag's `>`.
/// Values may be single- or double-quoted (and may contain `>`), or bare.
fn parse_attrs(chars: &[char], from: usize, tag_end: usize) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    let mut i = from;
    while i < tag_end {
        while i < tag_end && (chars[i].is_whitespace() || chars[i] == '/') {
            i += 1;
        }
        let key = read_name(chars, i);
        if key.is_empty() {
            i += 1;
            continue;
        }
        i += key.chars().count();
        while i < tag_end && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= tag_end || chars[i] != '=' {
            // Bare attribute with no value.
            attrs.entry(key).or_insert_with(String::new);
            continue;
        }
        i += 1;
        while i < tag_end && chars[i].is_whitespace() {
            i += 1;
        }
        let mut value = String::new();
        if i < tag_end && (chars[i] == '"' || chars[i] == '\'') {
            let quote = chars[i];
            i += 1;
            while i < tag_end && chars[i] != quote {
                value.push(chars[i]);
                i += 1;
            }
            i += 1;
        } else {
            while i < tag_end && !chars[i].is_whitespace() && chars[i] != '/' {
                value.push(chars[i]);
                i += 1;
            }
        }
        attrs.insert(key, unescape(&value));
    }
    attrs
}

/// Undo the minimal entity escaping used by the canonical printer.
pub fn unescape(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
