// Pedantic clippy configuration for ML/math code:
#![allow(clippy::cast_precision_loss)] // usize→f32/f64 intentional in score math
#![allow(clippy::cast_possible_truncation)] // usize→u32 in tensor indexing
#![allow(clippy::many_single_char_names)] // d, k, i standard in math
#![allow(clippy::module_name_repetitions)] // AttentionCache in attention.rs is fine
#![allow(clippy::doc_markdown)] // backticks for every technical term is excessive
#![allow(clippy::missing_errors_doc)] // # Errors section for every Result fn
#![allow(clippy::must_use_candidate)] // #[must_use] on every pure fn is excessive
#![allow(clippy::len_without_is_empty)] // spans are never empty

//! IWF-rs: Important-Word Feedback
//!
//! Token-level attribution over causal language models, turned into the
//! ranked word-importance feedback consumed by an iterative
//! explanation-refinement loop: locate the answer span in a generated
//! continuation, score every input token's influence on it (raw attention
//! or Integrated Gradients), then collapse sub-word scores into per-word,
//! per-field and cross-field rankings.
//!
//! ## Architecture
//!
//! - `span`: token-span localization for answers and named prompt fields
//! - `attention`: attention-row attribution with per-layer capture
//! - `gradient`: Integrated Gradients over a causal decode position, with
//!   memory back-off
//! - `aggregate`: target-axis collapse and sub-word-to-word merging
//! - `rank`: the four sorted/merged/stop-word-filtered consumer views
//! - `baseline`: seeded random word shuffle (control condition)
//! - `feedback`: per-item drivers wiring the stages together
//! - `model`: backend/tokenizer trait seams and the HuggingFace tokenizer
//! - `config`: JSON-loaded run configuration with closed policy enums
//! - `error`: shared error type with a structured memory-exhaustion kind

pub mod aggregate;
pub mod attention;
pub mod baseline;
pub mod config;
pub mod error;
pub mod feedback;
pub mod gradient;
pub mod model;
pub mod rank;
pub mod span;

pub use aggregate::{
    aggregate_target, aggregate_words, AttributedToken, SubwordMarkers, TargetAggregation,
    TargetAttributionMatrix, WordAggregation, WordScores,
};
pub use attention::{compute_attention_matrix, AttentionCache, LayerMode};
pub use baseline::RandomWordBaseline;
pub use config::{AttributionMethod, FeedbackConfig};
pub use error::{classify_tensor_error, FeedbackError};
pub use feedback::{AttentionFeedback, FeedbackBundle, FeedbackItem, GradientFeedback};
pub use gradient::{BaselineKind, IntegratedGradients};
pub use model::{AttributionBackend, GenerationModel, HfTokenizer, PromptTokenizer};
pub use rank::{rank_fields, RankedViews, StopWordSet};
pub use span::{locate_field, locate_target, TokenSpan};
