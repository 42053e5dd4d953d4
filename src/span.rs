//! Token-span localization inside prompts and generated continuations.
//!
//! Spans are found by exact token-id subsequence matching; there is no
//! fuzzy or case-insensitive matching at the id level. A span that cannot
//! be located is `None`, and callers must check before slicing.

use crate::error::FeedbackError;
use crate::model::PromptTokenizer;

/// Inclusive token-index range into the sequence that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpan {
    pub start: usize,
    pub end: usize,
}

impl TokenSpan {
    /// Invariant: `start <= end`.
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Number of token positions covered (at least 1).
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }
}

/// Locate the generated answer inside the generated continuation.
///
/// Tries the space-prefixed encoding of `target_text` first, since BPE
/// tokenizers merge a leading space into the first sub-word at word
/// boundaries, then falls back to the bare encoding. The first contiguous
/// match wins. Returned indices are offset by the token length of
/// `input_text`, so they index into `input_text + generated_text`.
pub fn locate_target(
    tokenizer: &dyn PromptTokenizer,
    input_text: &str,
    generated_text: &str,
    target_text: &str,
) -> Result<Option<TokenSpan>, FeedbackError> {
    let input_ids = tokenizer.encode(input_text)?;
    let generated_ids = tokenizer.encode(generated_text)?;
    let with_space = tokenizer.encode(&format!(" {target_text}"))?;
    let bare = tokenizer.encode(target_text)?;

    for candidate in [&with_space, &bare] {
        if let Some(i) = find_subsequence(&generated_ids, candidate, false) {
            let start = input_ids.len() + i;
            return Ok(Some(TokenSpan::new(start, start + candidate.len() - 1)));
        }
    }
    Ok(None)
}

/// Locate a named input field inside the formatted prompt.
///
/// Fields are encoded as `" " + field_text + "\n"`, matching how the
/// prompt templates lay them out. Unlike [`locate_target`], the *last*
/// occurrence wins: templates may repeat field-like substrings in their
/// instructions, and the authoritative occurrence is the final one before
/// generation.
pub fn locate_field(
    tokenizer: &dyn PromptTokenizer,
    input_text: &str,
    field_text: &str,
) -> Result<Option<TokenSpan>, FeedbackError> {
    let input_ids = tokenizer.encode(input_text)?;
    let field_ids = tokenizer.encode(&format!(" {field_text}\n"))?;

    Ok(find_subsequence(&input_ids, &field_ids, true)
        .map(|i| TokenSpan::new(i, i + field_ids.len() - 1)))
}

/// First (or last) index where `needle` occurs as a contiguous
/// subsequence of `haystack`.
fn find_subsequence(haystack: &[u32], needle: &[u32], last: bool) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    let mut found = None;
    for i in 0..=haystack.len() - needle.len() {
        if &haystack[i..i + needle.len()] == needle {
            if !last {
                return Some(i);
            }
            found = Some(i);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Tokenizer stub with a fixed text -> ids table.
    struct TableTokenizer {
        table: HashMap<String, Vec<u32>>,
    }

    impl TableTokenizer {
        fn new(entries: &[(&str, &[u32])]) -> Self {
            Self {
                table: entries
                    .iter()
                    .map(|(text, ids)| (text.to_string(), ids.to_vec()))
                    .collect(),
            }
        }
    }

    impl PromptTokenizer for TableTokenizer {
        fn encode(&self, text: &str) -> Result<Vec<u32>, FeedbackError> {
            Ok(self.table.get(text).cloned().unwrap_or_default())
        }

        fn ids_to_tokens(&self, ids: &[u32]) -> Vec<String> {
            ids.iter().map(|id| format!("t{id}")).collect()
        }

        fn token_to_id(&self, _token: &str) -> Option<u32> {
            None
        }

        fn pad_token_id(&self) -> Option<u32> {
            None
        }

        fn eos_token_id(&self) -> Option<u32> {
            Some(0)
        }
    }

    #[test]
    fn target_prefers_space_prefixed_encoding() {
        let tok = TableTokenizer::new(&[
            ("prompt", &[10, 11, 12]),
            ("the answer is mice", &[20, 21, 22, 30]),
            (" mice", &[30]),
            ("mice", &[31]),
        ]);
        let span = locate_target(&tok, "prompt", "the answer is mice", "mice")
            .unwrap()
            .unwrap();
        // offset by the 3 prompt tokens, " mice" matched at index 3
        assert_eq!(span, TokenSpan::new(6, 6));
        assert_eq!(span.len(), 1);
    }

    #[test]
    fn target_falls_back_to_bare_encoding() {
        let tok = TableTokenizer::new(&[
            ("p", &[1]),
            ("mice!", &[31, 40]),
            (" mice", &[30]),
            ("mice", &[31]),
        ]);
        let span = locate_target(&tok, "p", "mice!", "mice").unwrap().unwrap();
        assert_eq!(span, TokenSpan::new(1, 1));
    }

    #[test]
    fn target_missing_yields_none() {
        let tok = TableTokenizer::new(&[
            ("p", &[1]),
            ("no answer here", &[2, 3, 4]),
            (" mice", &[30]),
            ("mice", &[31]),
        ]);
        assert!(locate_target(&tok, "p", "no answer here", "mice")
            .unwrap()
            .is_none());
    }

    #[test]
    fn target_localization_is_idempotent() {
        let tok = TableTokenizer::new(&[
            ("p", &[1, 2]),
            ("x mice y", &[5, 30, 6]),
            (" mice", &[30]),
            ("mice", &[31]),
        ]);
        let a = locate_target(&tok, "p", "x mice y", "mice").unwrap();
        let b = locate_target(&tok, "p", "x mice y", "mice").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn field_matches_last_occurrence() {
        // field token sequence [7, 8] appears twice in the prompt
        let tok = TableTokenizer::new(&[
            ("intro 7 8 body 7 8 tail", &[1, 7, 8, 2, 7, 8, 3]),
            (" premise\n", &[7, 8]),
        ]);
        let span = locate_field(&tok, "intro 7 8 body 7 8 tail", "premise")
            .unwrap()
            .unwrap();
        assert_eq!(span, TokenSpan::new(4, 5));
    }

    #[test]
    fn field_missing_yields_none() {
        let tok = TableTokenizer::new(&[("prompt", &[1, 2, 3]), (" premise\n", &[7, 8])]);
        assert!(locate_field(&tok, "prompt", "premise").unwrap().is_none());
    }

    #[test]
    fn span_bounds_are_within_producing_sequence() {
        let tok = TableTokenizer::new(&[
            ("p", &[1]),
            ("a b mice", &[2, 3, 30]),
            (" mice", &[30]),
            ("mice", &[31]),
        ]);
        let span = locate_target(&tok, "p", "a b mice", "mice")
            .unwrap()
            .unwrap();
        let full_len = 1 + 3; // prompt tokens + generated tokens
        assert!(span.start <= span.end);
        assert!(span.end < full_len);
    }
}
