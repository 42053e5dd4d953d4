//! Ranked consumer-facing views over per-field word scores.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::aggregate::WordScores;

/// Standard English stop words (the NLTK list).
const ENGLISH_STOP_WORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "you're", "you've",
    "you'll", "you'd", "your", "yours", "yourself", "yourselves", "he", "him", "his", "himself",
    "she", "she's", "her", "hers", "herself", "it", "it's", "its", "itself", "they", "them",
    "their", "theirs", "themselves", "what", "which", "who", "whom", "this", "that", "that'll",
    "these", "those", "am", "is", "are", "was", "were", "be", "been", "being", "have", "has",
    "had", "having", "do", "does", "did", "doing", "a", "an", "the", "and", "but", "if", "or",
    "because", "as", "until", "while", "of", "at", "by", "for", "with", "about", "against",
    "between", "into", "through", "during", "before", "after", "above", "below", "to", "from",
    "up", "down", "in", "out", "on", "off", "over", "under", "again", "further", "then", "once",
    "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "s", "t", "can", "will", "just", "don", "don't", "should", "should've", "now",
    "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren", "aren't", "couldn", "couldn't", "didn",
    "didn't", "doesn", "doesn't", "hadn", "hadn't", "hasn", "hasn't", "haven", "haven't", "isn",
    "isn't", "ma", "mightn", "mightn't", "mustn", "mustn't", "needn", "needn't", "shan",
    "shan't", "shouldn", "shouldn't", "wasn", "wasn't", "weren", "weren't", "won", "won't",
    "wouldn", "wouldn't",
];

/// Stop-word membership, owned by whoever assembles the pipeline and
/// injected into the ranker. No process-global state.
#[derive(Debug, Clone)]
pub struct StopWordSet {
    words: HashSet<String>,
}

impl StopWordSet {
    /// The built-in English list.
    pub fn english() -> Self {
        Self::from_words(ENGLISH_STOP_WORDS.iter().copied())
    }

    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            words: words.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }
}

/// The four derived views consumed by the refinement-prompt filler.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankedViews {
    /// Every field's pairs, lower-cased, sorted by score descending.
    pub all_sorted: WordScores,
    /// Same pairs with scores summed across fields on word collision.
    pub merged_sorted: WordScores,
    /// `all_sorted` with stop words removed, parent order preserved.
    pub all_filtered: WordScores,
    /// `merged_sorted` with stop words removed, parent order preserved.
    pub merged_filtered: WordScores,
}

/// Build the four ranked views from per-field word scores.
///
/// Sorting is a stable descending sort on score, so equal scores keep
/// their first-appearance order.
pub fn rank_fields(per_field: &[(String, WordScores)], stop_words: &StopWordSet) -> RankedViews {
    let mut all: Vec<(String, f32)> = Vec::new();
    let mut merged: Vec<(String, f32)> = Vec::new();
    let mut merged_index: HashMap<String, usize> = HashMap::new();

    for (_, word_scores) in per_field {
        for (word, score) in word_scores.iter() {
            let word = word.to_lowercase();
            all.push((word.clone(), score));
            match merged_index.get(&word) {
                Some(&i) => merged[i].1 += score,
                None => {
                    merged_index.insert(word.clone(), merged.len());
                    merged.push((word, score));
                }
            }
        }
    }

    sort_descending(&mut all);
    sort_descending(&mut merged);

    let all_filtered = filter_stop_words(&all, stop_words);
    let merged_filtered = filter_stop_words(&merged, stop_words);

    RankedViews {
        all_sorted: to_word_scores(all),
        merged_sorted: to_word_scores(merged),
        all_filtered: to_word_scores(all_filtered),
        merged_filtered: to_word_scores(merged_filtered),
    }
}

fn sort_descending(pairs: &mut [(String, f32)]) {
    pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
}

fn filter_stop_words(pairs: &[(String, f32)], stop_words: &StopWordSet) -> Vec<(String, f32)> {
    pairs
        .iter()
        .filter(|(word, _)| !stop_words.contains(word))
        .cloned()
        .collect()
}

fn to_word_scores(pairs: Vec<(String, f32)>) -> WordScores {
    let mut out = WordScores::default();
    for (word, score) in pairs {
        out.push(word, score);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, entries: &[(&str, f32)]) -> (String, WordScores) {
        let mut ws = WordScores::default();
        for (word, score) in entries {
            ws.push(word.to_string(), *score);
        }
        (name.to_string(), ws)
    }

    #[test]
    fn merged_sums_scores_across_fields() {
        let per_field = vec![
            field("premise", &[("Dog", 3.0)]),
            field("hypothesis", &[("dog", 5.0)]),
        ];
        let views = rank_fields(&per_field, &StopWordSet::english());
        assert_eq!(views.merged_sorted.words, vec!["dog"]);
        assert!((views.merged_sorted.scores[0] - 8.0).abs() < 1e-6);
        // all_sorted keeps both occurrences
        assert_eq!(views.all_sorted.len(), 2);
        assert!((views.all_sorted.scores[0] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn sorted_views_are_non_increasing() {
        let per_field = vec![field(
            "question",
            &[("low", 0.1), ("high", 2.0), ("mid", 1.0)],
        )];
        let views = rank_fields(&per_field, &StopWordSet::english());
        for scores in [&views.all_sorted.scores, &views.merged_sorted.scores] {
            for pair in scores.windows(2) {
                assert!(pair[0] >= pair[1]);
            }
        }
        assert_eq!(views.all_sorted.words, vec!["high", "mid", "low"]);
    }

    #[test]
    fn filtered_views_contain_no_stop_words() {
        let per_field = vec![field(
            "question",
            &[("the", 9.0), ("cats", 1.0), ("of", 5.0)],
        )];
        let stop_words = StopWordSet::english();
        let views = rank_fields(&per_field, &stop_words);
        assert!(views.all_filtered.words.iter().all(|w| !stop_words.contains(w)));
        assert_eq!(views.all_filtered.words, vec!["cats"]);
        assert_eq!(views.merged_filtered.words, vec!["cats"]);
        // filtering preserves the already-sorted parent order
        assert_eq!(views.all_sorted.words, vec!["the", "of", "cats"]);
    }

    #[test]
    fn ties_keep_first_appearance_order() {
        let per_field = vec![field("question", &[("alpha", 1.0), ("beta", 1.0)])];
        let views = rank_fields(&per_field, &StopWordSet::from_words(Vec::<String>::new()));
        assert_eq!(views.all_sorted.words, vec!["alpha", "beta"]);
    }

    #[test]
    fn pairing_invariant_holds_in_every_view() {
        let per_field = vec![
            field("a", &[("x", 1.0), ("y", 2.0)]),
            field("b", &[("y", 3.0)]),
        ];
        let views = rank_fields(&per_field, &StopWordSet::english());
        for view in [
            &views.all_sorted,
            &views.merged_sorted,
            &views.all_filtered,
            &views.merged_filtered,
        ] {
            assert_eq!(view.words.len(), view.scores.len());
        }
    }
}
