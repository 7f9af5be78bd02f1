//! Keyword-family stance and signal tagging.
//!
//! Classification is a fixed-lexicon lookup, checked in the priority order
//! prescriptive > cautionary > prerequisite > dependent > uncertain. A
//! sentence matching none of the families is assertive when it carries
//! enough words to assert anything, otherwise unknown.

use super::types::{Signals, Stance};

const PRESCRIPTIVE: &[&str] = &[
    "should",
    "must",
    "shall",
    "recommend",
    "recommends",
    "recommended",
    "advise",
    "advised",
    "ought",
    "ideally",
    "prefer",
    "preferred",
    "preferable",
];

/// Leading imperative verbs that read as a recommendation.
const PRESCRIPTIVE_IMPERATIVE: &[&str] = &["use", "adopt", "choose", "pick", "consider", "prefer"];

const CAUTIONARY: &[&str] = &[
    "avoid",
    "warning",
    "warn",
    "warns",
    "risk",
    "risks",
    "risky",
    "danger",
    "dangerous",
    "careful",
    "caution",
    "beware",
    "pitfall",
    "fragile",
    "unsafe",
    "never",
    "wrong",
];

const PREREQUISITE: &[&str] = &[
    "requires",
    "require",
    "required",
    "prerequisite",
    "first",
    "before",
    "beforehand",
    "initially",
];

const DEPENDENT: &[&str] = &[
    "then",
    "afterwards",
    "afterward",
    "subsequently",
    "thereafter",
    "later",
    "following",
];

const UNCERTAIN: &[&str] = &[
    "may",
    "might",
    "possibly",
    "perhaps",
    "probably",
    "likely",
    "unclear",
    "uncertain",
    "seems",
    "appears",
    "could",
];

const SEQUENCE_CUES: &[&str] = &[
    "first",
    "second",
    "third",
    "then",
    "next",
    "after",
    "afterwards",
    "before",
    "finally",
    "lastly",
    "step",
    "steps",
    "subsequently",
    "once",
];

const TENSION_CUES: &[&str] = &[
    "but",
    "however",
    "although",
    "though",
    "whereas",
    "tradeoff",
    "versus",
    "vs",
    "instead",
    "rather",
    "conversely",
    "contrast",
    "while",
];

const CONDITIONAL_CUES: &[&str] = &[
    "if",
    "unless",
    "when",
    "whenever",
    "otherwise",
    "depending",
    "assuming",
];

const TENSION_PHRASES: &[&str] = &["trade-off", "on the other hand", "on one hand"];
const CONDITIONAL_PHRASES: &[&str] = &["provided that", "in case", "as long as"];
const CAUTIONARY_PHRASES: &[&str] = &["do not", "don't", "watch out"];

/// Lowercase word tokens of a sentence.
fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn count_matches(tokens: &[String], family: &[&str]) -> usize {
    tokens.iter().filter(|t| family.contains(&t.as_str())).count()
}

fn any_phrase(lower: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| lower.contains(p))
}

/// Classify a sentence's stance and a lexical confidence in [0, 1].
pub fn classify_stance(text: &str) -> (Stance, f64) {
    let lower = text.to_lowercase();
    let words = tokens(text);

    let mut prescriptive = count_matches(&words, PRESCRIPTIVE);
    if let Some(head) = words.first() {
        if PRESCRIPTIVE_IMPERATIVE.contains(&head.as_str()) {
            prescriptive += 1;
        }
    }
    let mut cautionary = count_matches(&words, CAUTIONARY);
    if any_phrase(&lower, CAUTIONARY_PHRASES) {
        cautionary += 1;
    }
    let prerequisite = count_matches(&words, PREREQUISITE);
    let dependent = count_matches(&words, DEPENDENT);
    let uncertain = count_matches(&words, UNCERTAIN);

    let families = [
        (Stance::Prescriptive, prescriptive),
        (Stance::Cautionary, cautionary),
        (Stance::Prerequisite, prerequisite),
        (Stance::Dependent, dependent),
        (Stance::Uncertain, uncertain),
    ];

    // Priority-ordered lookup: the first family with a hit wins.
    for (stance, hits) in families {
        if hits > 0 {
            let mut confidence = (0.6 + 0.15 * (hits as f64 - 1.0)).min(0.9);
            if stance != Stance::Uncertain && uncertain > 0 {
                confidence *= 0.8;
            }
            return (stance, confidence);
        }
    }

    if words.len() >= 3 {
        (Stance::Assertive, 0.55)
    } else {
        (Stance::Unknown, 0.3)
    }
}

/// Detect the three independent structural signals.
pub fn detect_signals(text: &str) -> Signals {
    let lower = text.to_lowercase();
    let words = tokens(text);
    Signals {
        sequence: count_matches(&words, SEQUENCE_CUES) > 0,
        tension: count_matches(&words, TENSION_CUES) > 0 || any_phrase(&lower, TENSION_PHRASES),
        conditional: count_matches(&words, CONDITIONAL_CUES) > 0
            || any_phrase(&lower, CONDITIONAL_PHRASES),
    }
}
