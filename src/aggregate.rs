//! Score aggregation: target-axis collapse and sub-word-to-word merging.

use serde::{Deserialize, Serialize};

/// One input token with its attribution score.
///
/// `text` is the raw sub-word surface form from the tokenizer and may
/// carry a word-boundary marker. `score` is signed and meaningful only
/// relative to other scores from the same run.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributedToken {
    pub id: u32,
    pub text: String,
    pub score: f32,
}

/// One row per target-token position, each row scored over the same input
/// token positions. Rectangular by construction: position `i` of every row
/// refers to the same input token.
pub type TargetAttributionMatrix = Vec<Vec<AttributedToken>>;

/// How scores are collapsed across the target-position axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetAggregation {
    #[default]
    AbsMean,
    AbsSum,
    SignedMean,
    SignedSum,
}

/// Collapse a target-attribution matrix into one score per input token.
///
/// Token id and text at each position are taken from the first row; all
/// rows share identical token identity per column. An empty matrix yields
/// an empty result ("no signal"); ragged rows are a precondition violation.
pub fn aggregate_target(
    matrix: &[Vec<AttributedToken>],
    method: TargetAggregation,
) -> Vec<AttributedToken> {
    let Some(first) = matrix.first() else {
        return Vec::new();
    };
    let width = first.len();
    for row in matrix {
        assert_eq!(row.len(), width, "ragged target-attribution matrix");
    }

    let rows = matrix.len() as f32;
    (0..width)
        .map(|col| {
            let mut acc = 0.0f32;
            for row in matrix {
                let score = row[col].score;
                acc += match method {
                    TargetAggregation::AbsMean | TargetAggregation::AbsSum => score.abs(),
                    TargetAggregation::SignedMean | TargetAggregation::SignedSum => score,
                };
            }
            let score = match method {
                TargetAggregation::AbsMean | TargetAggregation::SignedMean => acc / rows,
                TargetAggregation::AbsSum | TargetAggregation::SignedSum => acc,
            };
            AttributedToken {
                id: first[col].id,
                text: first[col].text.clone(),
                score,
            }
        })
        .collect()
}

/// Index-aligned word/score pairs. `words.len() == scores.len()` holds at
/// every boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WordScores {
    pub words: Vec<String>,
    pub scores: Vec<f32>,
}

impl WordScores {
    pub fn push(&mut self, word: String, score: f32) {
        self.words.push(word);
        self.scores.push(score);
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.words.len(), self.scores.len());
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.words
            .iter()
            .map(String::as_str)
            .zip(self.scores.iter().copied())
    }
}

/// Tokenizer sub-word marker conventions.
///
/// BPE-family tokenizers mark "this sub-word begins a new word" with a
/// leading `Ġ` (GPT-2 byte-level) or `▁` (SentencePiece), and encode
/// newlines as `Ċ` or `<0x0A>`. Other families can supply their own
/// markers instead of patching the aggregator.
#[derive(Debug, Clone)]
pub struct SubwordMarkers {
    pub word_start: Vec<char>,
    pub newline: Vec<String>,
}

impl Default for SubwordMarkers {
    fn default() -> Self {
        Self {
            word_start: vec!['Ġ', '▁'],
            newline: vec!["Ċ".to_string(), "<0x0A>".to_string()],
        }
    }
}

impl SubwordMarkers {
    fn starts_word(&self, token: &str) -> bool {
        token
            .chars()
            .next()
            .is_some_and(|c| self.word_start.contains(&c))
    }

    fn strip<'a>(&self, token: &'a str) -> &'a str {
        token.trim_start_matches(|c| self.word_start.contains(&c))
    }

    fn is_newline(&self, token: &str) -> bool {
        self.newline.iter().any(|m| token.contains(m.as_str()))
    }
}

/// How constituent sub-word scores combine into one word score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WordAggregation {
    Mean,
    #[default]
    Sum,
}

const PUNCTUATION: [&str; 4] = [",", ".", "?", "!"];

/// Merge consecutive sub-word tokens into whole words with one combined
/// score each.
///
/// A marker-prefixed token flushes the current word and starts a new one
/// from its marker-stripped remainder; an unmarked token extends the
/// current word. Empty, newline-marker and lone punctuation tokens are
/// skipped entirely. Output order is first-appearance order.
pub fn aggregate_words(
    tokens: &[AttributedToken],
    method: WordAggregation,
    markers: &SubwordMarkers,
) -> WordScores {
    let mut out = WordScores::default();
    let mut word = String::new();
    let mut sum = 0.0f32;
    let mut count = 0usize;

    for entry in tokens {
        let token = entry.text.trim();

        if token.is_empty() || markers.is_newline(token) {
            continue;
        }
        if PUNCTUATION.contains(&token) {
            continue;
        }

        if markers.starts_word(token) {
            if !word.is_empty() {
                push_word(&mut out, &word, sum, count, method);
            }
            let clean = markers.strip(token);
            if !clean.is_empty() && !PUNCTUATION.contains(&clean) {
                word = clean.to_string();
                sum = entry.score;
                count = 1;
            } else {
                word.clear();
                sum = 0.0;
                count = 0;
            }
        } else {
            word.push_str(token);
            sum += entry.score;
            count += 1;
        }
    }

    if !word.is_empty() {
        push_word(&mut out, &word, sum, count, method);
    }
    out
}

fn push_word(out: &mut WordScores, word: &str, sum: f32, count: usize, method: WordAggregation) {
    let score = match method {
        WordAggregation::Mean => sum / count as f32,
        WordAggregation::Sum => sum,
    };
    out.push(word.to_string(), score);
}
