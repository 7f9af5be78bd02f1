//! Paragraph and sentence segmentation.
//!
//! Locale-independent: boundaries are terminator punctuation followed by
//! whitespace and an upper-case or numeric continuation, with common
//! abbreviations and quoted spans respected. Code fences are atomic, both
//! at the paragraph level (blank lines inside a fence do not split) and at
//! the sentence level (a fenced paragraph is one statement).

/// Tokens before a period that do not end a sentence.
const ABBREVIATIONS: &[&str] = &[
    "e.g", "i.e", "etc", "vs", "cf", "mr", "ms", "mrs", "dr", "st", "no", "approx", "fig", "al",
];

/// Split raw response text into paragraphs on blank-line boundaries,
/// keeping fenced code blocks intact.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            current.push(line);
            continue;
        }
        if line.trim().is_empty() && !in_fence {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Split one paragraph into sentences.
///
/// Unsplittable text (no boundary found) comes back as a single sentence;
/// empty input yields an empty vec.
pub fn split_sentences(paragraph: &str) -> Vec<String> {
    let trimmed = paragraph.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    // Fenced blocks are atomic statements.
    if trimmed.contains("```") {
        return vec![trimmed.to_string()];
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c != '.' && c != '!' && c != '?' {
            i += 1;
            continue;
        }

        // Absorb terminator runs ("?!", "...") and trailing closers.
        let mut end = i + 1;
        while end < chars.len() && matches!(chars[end], '.' | '!' | '?') {
            end += 1;
        }
        while end < chars.len() && matches!(chars[end], '"' | '\'' | '\u{201d}' | '\u{2019}' | ')')
        {
            end += 1;
        }

        // A period after an abbreviation or initial is not a boundary.
        if c == '.' && is_abbreviation_before(&chars, i) {
            i = end;
            continue;
        }

        // Boundary requires whitespace, then an upper-case, numeric, or
        // quote-opened continuation (or end of text).
        let mut next = end;
        while next < chars.len() && chars[next].is_whitespace() {
            next += 1;
        }
        let has_ws = next > end;
        let continuation_ok = next >= chars.len()
            || chars[next].is_uppercase()
            || chars[next].is_numeric()
            || matches!(chars[next], '"' | '\'' | '\u{201c}' | '\u{2018}');

        if (next >= chars.len() || has_ws) && continuation_ok {
            let sentence: String = chars[start..end].iter().collect();
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = next;
            i = next;
        } else {
            i = end;
        }
    }

    if start < chars.len() {
        let tail: String = chars[start..].iter().collect();
        let tail = tail.trim();
        if !tail.is_empty() {
            sentences.push(tail.to_string());
        }
    }

    if sentences.is_empty() {
        vec![trimmed.to_string()]
    } else {
        sentences
    }
}

/// Check whether the token ending at `period_idx` (exclusive) is a known
/// abbreviation or a single-letter initial.
fn is_abbreviation_before(chars: &[char], period_idx: usize) -> bool {
    let mut word_start = period_idx;
    while word_start > 0 {
        let prev = chars[word_start - 1];
        if prev.is_alphabetic() || prev == '.' {
            word_start -= 1;
        } else {
            break;
        }
    }
    if word_start == period_idx {
        return false;
    }
    let token: String = chars[word_start..period_idx]
        .iter()
        .collect::<String>()
        .to_lowercase();
    if token.len() == 1 && chars[word_start].is_uppercase() {
        // Initials like "J. Smith".
        return true;
    }
    ABBREVIATIONS.contains(&token.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraphs_split_on_blank_lines() {
        let text = "First paragraph.\n\nSecond paragraph.\n\n\nThird.";
        let paragraphs = split_paragraphs(text);
        assert_eq!(paragraphs.len(), 3);
        assert_eq!(paragraphs[0], "First paragraph.");
    }

    #[test]
    fn test_code_fence_is_atomic_paragraph() {
        let text = "Intro line.\n\n```rust\nlet x = 1;\n\nlet y = 2;\n```\n\nOutro.";
        let paragraphs = split_paragraphs(text);
        assert_eq!(paragraphs.len(), 3);
        assert!(paragraphs[1].contains("let x = 1;"));
        assert!(paragraphs[1].contains("let y = 2;"));
    }

    #[test]
    fn test_empty_input_yields_no_paragraphs() {
        assert!(split_paragraphs("").is_empty());
        assert!(split_paragraphs("\n\n  \n").is_empty());
    }

    #[test]
    fn test_basic_sentence_split() {
        let sentences = split_sentences("Use a queue. It batches well. Streams are overkill.");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "Use a queue.");
    }

    #[test]
    fn test_abbreviations_do_not_split() {
        let sentences = split_sentences("Use a broker, e.g. Kafka. It scales.");
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].contains("e.g. Kafka"));
    }

    #[test]
    fn test_decimal_numbers_do_not_split() {
        let sentences = split_sentences("Latency stays under 3.5 ms. That is fine.");
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].contains("3.5 ms"));
    }

    #[test]
    fn test_question_and_exclamation() {
        let sentences = split_sentences("Is it safe? It is! Ship it.");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "Is it safe?");
        assert_eq!(sentences[1], "It is!");
    }

    #[test]
    fn test_quote_after_terminator_stays_attached() {
        let sentences = split_sentences("They said \"use a queue.\" We agreed.");
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].ends_with('"'));
    }

    #[test]
    fn test_unsplittable_text_is_one_sentence() {
        let sentences = split_sentences("just a fragment without terminator");
        assert_eq!(sentences.len(), 1);
    }

    #[test]
    fn test_fenced_paragraph_is_one_statement() {
        let sentences = split_sentences("```py\nx = 1. Then more.\n```");
        assert_eq!(sentences.len(), 1);
    }

    #[test]
    fn test_initials_do_not_split() {
        let sentences = split_sentences("Ask J. Smith about it. He knows.");
        assert_eq!(sentences.len(), 2);
    }
}
