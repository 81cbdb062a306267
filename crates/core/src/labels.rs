//! Label normalization for cross-cube deduplication.
//!
//! Two normalizers live here with different jobs:
//!
//! - [`member_label_norm`] is the *hashing* normalizer: NFC, trim,
//!   lowercase. It feeds the member hash and must never change once data
//!   has been hashed.
//! - [`LabelNormalizer`] produces the `base_name` grouping key for the
//!   registry. It is injectable so language-specific implementations can
//!   be swapped in without touching the pipeline.

use unicode_normalization::UnicodeNormalization;

/// Normalize a member label for hashing: NFC, trimmed, lowercased.
pub fn member_label_norm(label: &str) -> String {
    label.nfc().collect::<String>().trim().to_lowercase()
}

/// Pluggable label canonicalizer producing `base_name` keys.
pub trait LabelNormalizer: Send + Sync {
    /// Reduce a display label to a deterministic grouping key.
    fn normalize(&self, label: &str) -> String;

    /// Whether the label carries a "total" token.
    ///
    /// The default implementation checks the tokenized label so that
    /// "Total, all industries" and "total" both match while "totality"
    /// does not.
    fn has_total_token(&self, label: &str) -> bool {
        tokenize(label).any(|t| t == "total")
    }
}

/// English-stopword normalizer.
///
/// Tokenizes on Unicode word boundaries, keeps alphabetic tokens, drops
/// stopwords, lowercases, then sorts and dedupes the remainder so word
/// order and repetition never affect the key.
#[derive(Debug, Default, Clone)]
pub struct EnglishNormalizer;

/// Common English stopwords, enough to collapse StatCan label phrasing.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "all", "as", "at", "both", "by", "for", "from", "in", "into", "of", "on",
    "or", "other", "the", "to", "with",
];

impl LabelNormalizer for EnglishNormalizer {
    fn normalize(&self, label: &str) -> String {
        let mut tokens: Vec<String> = tokenize(label)
            .filter(|t| !STOPWORDS.contains(&t.as_str()))
            .collect();
        tokens.sort();
        tokens.dedup();
        tokens.join(" ")
    }
}

/// Lowercased alphabetic tokens of a label, in order of appearance.
fn tokenize(label: &str) -> impl Iterator<Item = String> + '_ {
    label
        .nfc()
        .collect::<String>()
        .to_lowercase()
        .split(|c: char| !c.is_alphabetic())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>()
        .into_iter()
}

/// Deterministic title caser for canonical dimension names.
///
/// Uppercases the first alphabetic character of each word (a run following
/// a non-alphabetic character) and lowercases the rest, which matches how
/// the registry stores consensus names.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}
