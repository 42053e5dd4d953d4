//! Random important-word baseline: a control condition that ignores
//! attribution entirely and emits a deterministically shuffled word set.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;

/// Control attributor producing a seeded shuffle of the input words.
///
/// Interchangeable at the consumer interface with the `merged_sorted`
/// word list of the real attributors, but carries no scores.
#[derive(Debug, Clone)]
pub struct RandomWordBaseline {
    seed: u64,
}

impl RandomWordBaseline {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Whitespace-split every field, strip one trailing `, . ? !`,
    /// lower-case, deduplicate across fields, then shuffle with the
    /// configured seed. The pre-shuffle order is sorted so equal seeds
    /// give equal output on equal content.
    pub fn shuffle_words(&self, fields: &[&str]) -> Vec<String> {
        let mut unique: BTreeSet<String> = BTreeSet::new();
        for field in fields {
            for word in field.split_whitespace() {
                let word = strip_trailing_punctuation(word).to_lowercase();
                if !word.is_empty() {
                    unique.insert(word);
                }
            }
        }

        let mut words: Vec<String> = unique.into_iter().collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        words.shuffle(&mut rng);
        words
    }
}

fn strip_trailing_punctuation(word: &str) -> &str {
    word.strip_suffix([',', '.', '?', '!']).unwrap_or(word)
}
