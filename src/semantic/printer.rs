//! Canonical printer for the semantic map.
//!
//! Printing and re-parsing an envelope yields the same claims, edges and
//! conditionals, which makes the printed form usable as a cache or diff
//! key for mapper output.

use super::types::SemanticMap;

/// Minimal entity escaping for attribute values and inner text; the parser
/// undoes exactly this set.
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render a semantic map as a canonical envelope.
pub fn print_envelope(map: &SemanticMap) -> String {
    let mut out = String::from("<map>\n");
    for claim in &map.claims {
        out.push_str(&format!(
            "  <claim id=\"{}\" label=\"{}\" type=\"{}\"",
            escape(claim.id.as_str()),
            escape(&claim.label),
            claim.claim_type
        ));
        if let Some(role) = claim.role {
            out.push_str(&format!(" role=\"{}\"", role));
        }
        if !claim.source_statement_ids.is_empty() {
            let sources: Vec<&str> = claim
                .source_statement_ids
                .iter()
                .map(|s| s.as_str())
                .collect();
            out.push_str(&format!(" sources=\"{}\"", sources.join(",")));
        }
        if !claim.supporters.is_empty() {
            let supporters: Vec<String> =
                claim.supporters.iter().map(|m| m.to_string()).collect();
            out.push_str(&format!(" supporters=\"{}\"", supporters.join(",")));
        }
        out.push_str(&format!(">{}</claim>\n", escape(&claim.text)));
    }
    for edge in &map.edges {
        out.push_str(&format!(
            "  <edge source=\"{}\" target=\"{}\" kind=\"{}\" weight=\"{}\"",
            escape(edge.source.as_str()),
            escape(edge.target.as_str()),
            edge.kind,
            edge.weight
        ));
        if let Some(reason) = &edge.reason {
            out.push_str(&format!(" reason=\"{}\"", escape(reason)));
        }
        out.push_str("/>\n");
    }
    for conditional in &map.conditionals {
        out.push_str(&format!(
            "  <conditional id=\"{}\"",
            escape(&conditional.id)
        ));
        if !conditional.claims.is_empty() {
            let ids: Vec<&str> = conditional.claims.iter().map(|c| c.as_str()).collect();
            out.push_str(&format!(" claims=\"{}\"", ids.join(",")));
        }
        out.push_str(&format!(">{}</conditional>\n", escape(&conditional.condition)));
    }
    out.push_str("</map>\n");
    if let Some(narrative) = &map.narrative {
        out.push_str(&format!("<narrative>\n{}\n</narrative>\n", escape(narrative)));
    }
    out
}
