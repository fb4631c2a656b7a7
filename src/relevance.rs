//! Lexical relevance scoring
//!
//! The engine ranks glossary terms, journeys and canned responses against a
//! query (usually the latest customer message or a draft reply). Scoring is
//! lexical: distinct query words found in the candidate, matched with a
//! case-insensitive Aho-Corasick automaton, normalized by query length.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use std::collections::HashSet;

/// Minimum word length considered signal rather than noise
const MIN_WORD_LEN: usize = 3;

/// Scores candidate texts against a fixed query
pub struct RelevanceScorer {
    words: Vec<String>,
    automaton: Option<AhoCorasick>,
}

impl RelevanceScorer {
    /// Build a scorer for a query
    pub fn new(query: &str) -> Self {
        let mut seen = HashSet::new();
        let words: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .map(|w| w.to_lowercase())
            .filter(|w| w.len() >= MIN_WORD_LEN)
            .filter(|w| seen.insert(w.clone()))
            .collect();

        let automaton = if words.is_empty() {
            None
        } else {
            AhoCorasickBuilder::new()
                .ascii_case_insensitive(true)
                .build(&words)
                .ok()
        };

        Self { words, automaton }
    }

    /// Fraction of distinct query words found in `text`, in `[0, 1]`
    pub fn score(&self, text: &str) -> f32 {
        let automaton = match &self.automaton {
            Some(a) => a,
            None => return 0.0,
        };

        let lowered = text.to_lowercase();
        let mut matched: HashSet<usize> = HashSet::new();
        for hit in automaton.find_iter(&lowered) {
            matched.insert(hit.pattern().as_usize());
        }

        matched.len() as f32 / self.words.len() as f32
    }

    /// Highest score across several candidate texts
    pub fn score_any<'a, I: IntoIterator<Item = &'a str>>(&self, texts: I) -> f32 {
        texts
            .into_iter()
            .map(|t| self.score(t))
            .fold(0.0_f32, f32::max)
    }
}

/// Rank `items` by score against `query`, keeping those above `threshold`,
/// best first, at most `max_items`.
pub fn rank_by_relevance<T, F>(
    query: &str,
    items: Vec<T>,
    text_of: F,
    threshold: f32,
    max_items: usize,
) -> Vec<T>
where
    F: Fn(&T) -> Vec<String>,
{
    let scorer = RelevanceScorer::new(query);
    let mut scored: Vec<(f32, T)> = items
        .into_iter()
        .map(|item| {
            let texts = text_of(&item);
            let score = scorer.score_any(texts.iter().map(|s| s.as_str()));
            (score, item)
        })
        .filter(|(score, _)| *score >= threshold)
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(max_items).map(|(_, item)| item).collect()
}
