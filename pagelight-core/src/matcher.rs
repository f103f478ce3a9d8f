use std::fmt;

use once_cell::sync::Lazy;
use serde::Serialize;
use unicode_normalization::char::{canonical_combining_class, compose};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::tokenizer::{join_tokens, Token};

static TERM_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("0f4c3d0e-8a52-5b1e-9d3c-2c6e1b7a4f90").expect("valid namespace UUID")
});

/// Groups matches of the same query for styling. Derived only from the raw
/// query text; never used to merge or deduplicate matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TermId(Uuid);

impl TermId {
    pub fn for_query(query: &str) -> Self {
        Self(Uuid::new_v5(&TERM_NAMESPACE, query.as_bytes()))
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "term-{}", self.0.simple())
    }
}

/// Character range `[start_index, end_index)` of one occurrence, in the
/// original (un-normalized) text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchSpan {
    pub start_index: usize,
    pub end_index: usize,
    pub term_id: TermId,
}

impl MatchSpan {
    pub fn len(&self) -> usize {
        self.end_index.saturating_sub(self.start_index)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait Matcher: Send + Sync {
    fn find_matches(&self, tokens: &[Token], query: &str) -> Vec<MatchSpan>;
}

/// Case-insensitive, composition-insensitive substring search reporting every
/// overlapping occurrence.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringMatcher;

impl Matcher for SubstringMatcher {
    fn find_matches(&self, tokens: &[Token], query: &str) -> Vec<MatchSpan> {
        find_matches(tokens, query)
    }
}

pub fn find_matches(tokens: &[Token], query: &str) -> Vec<MatchSpan> {
    if tokens.is_empty() || query.is_empty() {
        return Vec::new();
    }
    let needle: Vec<char> = normalize(query).chars().collect();
    if needle.is_empty() {
        return Vec::new();
    }

    let haystack = NormalizedText::new(&join_tokens(tokens));
    if haystack.chars.len() < needle.len() {
        return Vec::new();
    }

    let term_id = TermId::for_query(query);
    let mut spans: Vec<MatchSpan> = Vec::new();
    for (start, window) in haystack.chars.windows(needle.len()).enumerate() {
        if window != needle.as_slice() {
            continue;
        }
        let span = MatchSpan {
            start_index: haystack.origin[start].0,
            end_index: haystack.origin[start + needle.len() - 1].1,
            term_id,
        };
        // Two normalized positions inside one composition segment map to the
        // same original range.
        if spans.last() != Some(&span) {
            spans.push(span);
        }
    }
    spans
}

/// Canonical composition followed by lowercasing.
pub fn normalize(text: &str) -> String {
    text.nfc().flat_map(char::to_lowercase).collect()
}

/// Normalized text plus, for every normalized character, the original
/// character range it came from.
///
/// The original text is cut into composition segments: a starter followed by
/// everything that may compose onto it. Each segment is normalized on its own,
/// so every normalized character maps back to exactly one segment. Matches
/// that begin or end inside a segment widen to the whole segment.
struct NormalizedText {
    chars: Vec<char>,
    origin: Vec<(usize, usize)>,
}

impl NormalizedText {
    fn new(text: &str) -> Self {
        let mut chars = Vec::new();
        let mut origin = Vec::new();
        let mut segment = String::new();
        let mut segment_start = 0;
        let mut last: Option<char> = None;

        for (index, ch) in text.chars().enumerate() {
            if let Some(prev) = last {
                if starts_segment(prev, ch) {
                    push_segment(&segment, (segment_start, index), &mut chars, &mut origin);
                    segment.clear();
                    segment_start = index;
                }
            }
            segment.push(ch);
            last = Some(ch);
        }
        if !segment.is_empty() {
            let end = segment_start + segment.chars().count();
            push_segment(&segment, (segment_start, end), &mut chars, &mut origin);
        }

        Self { chars, origin }
    }
}

fn starts_segment(prev: char, ch: char) -> bool {
    canonical_combining_class(ch) == 0 && compose(prev, ch).is_none()
}

fn push_segment(
    segment: &str,
    range: (usize, usize),
    chars: &mut Vec<char>,
    origin: &mut Vec<(usize, usize)>,
) {
    for ch in normalize(segment).chars() {
        chars.push(ch);
        origin.push(range);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize;

    fn slice(text: &str, span: &MatchSpan) -> String {
        text.chars()
            .skip(span.start_index)
            .take(span.len())
            .collect()
    }

    fn count_overlapping(haystack: &str, needle: &str) -> usize {
        let hay: Vec<char> = haystack.chars().collect();
        let needle: Vec<char> = needle.chars().collect();
        hay.windows(needle.len())
            .filter(|w| *w == needle.as_slice())
            .count()
    }

    #[test]
    fn finds_every_occurrence_across_tokens() {
        let text = "The contractor shall comply. Subcontractors shall also comply.";
        let spans = find_matches(&tokenize(text), "shall");
        assert_eq!(spans.len(), 2);
        assert!(spans[0].start_index < spans[1].start_index);
        for span in &spans {
            assert_eq!(slice(text, span), "shall");
        }

        let spans = find_matches(&tokenize(text), "shall comply");
        assert_eq!(spans.len(), 1);
        assert_eq!(slice(text, &spans[0]), "shall comply");
    }

    #[test]
    fn matches_inside_words_case_insensitively() {
        let text = "Contractor CONTRACTS";
        let spans = find_matches(&tokenize(text), "contract");
        assert_eq!(spans.len(), 2);
        assert_eq!(slice(text, &spans[1]), "CONTRACT");
    }

    #[test]
    fn reports_overlapping_occurrences() {
        let text = "aaaa baaa";
        let spans = find_matches(&tokenize(text), "aa");
        let starts: Vec<_> = spans.iter().map(|s| s.start_index).collect();
        assert_eq!(starts, vec![0, 1, 2, 6, 7]);
    }

    #[test]
    fn occurrence_count_matches_normalized_text() {
        let text = "abab ababab, ABA ba";
        for query in ["ab", "aba", "b a", "bab", "x"] {
            let spans = find_matches(&tokenize(text), query);
            assert_eq!(
                spans.len(),
                count_overlapping(&normalize(text), &normalize(query)),
                "query {query:?}"
            );
            for span in &spans {
                assert_eq!(normalize(&slice(text, span)), normalize(query));
            }
        }
    }

    #[test]
    fn decomposed_text_matches_composed_query() {
        let text = "re\u{0301}sume\u{0301} and résumé";
        let spans = find_matches(&tokenize(text), "RÉSUMÉ");
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].start_index, 0);
        assert_eq!(spans[0].end_index, 8);
        assert_eq!(slice(text, &spans[1]), "résumé");
    }

    #[test]
    fn partial_segment_match_widens_to_segment() {
        // "İ" lowercases to "i" plus a combining dot.
        let text = "İstanbul";
        let spans = find_matches(&tokenize(text), "i");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start_index, 0);
        assert_eq!(spans[0].end_index, 1);
    }

    #[test]
    fn empty_inputs_yield_nothing() {
        assert!(find_matches(&tokenize("some text"), "").is_empty());
        assert!(find_matches(&[], "text").is_empty());
        assert!(find_matches(&tokenize("short"), "much longer query").is_empty());
    }

    #[test]
    fn term_id_is_stable_per_raw_query() {
        assert_eq!(TermId::for_query("shall"), TermId::for_query("shall"));
        assert_ne!(TermId::for_query("shall"), TermId::for_query("Shall"));
        let spans = find_matches(&tokenize("shall shall"), "shall");
        assert!(spans.iter().all(|s| s.term_id == TermId::for_query("shall")));
    }
}
