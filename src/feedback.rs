//! Attributor drivers: turn one item into ranked word-importance feedback.
//!
//! Both drivers share the same shape: locate the answer span, run an
//! attribution back-end, slice each row down to the prompt's token length,
//! collapse the target axis, split the prompt into named fields and merge
//! sub-words into scored words per field, then build the ranked views. The
//! random baseline in [`crate::baseline`] bypasses attribution but is
//! interchangeable at the consumer interface.

use serde::Serialize;
use tracing::warn;

use crate::aggregate::{
    aggregate_target, aggregate_words, AttributedToken, SubwordMarkers, TargetAggregation,
    WordAggregation, WordScores,
};
use crate::attention::{compute_attention_matrix, LayerMode};
use crate::error::FeedbackError;
use crate::gradient::IntegratedGradients;
use crate::model::GenerationModel;
use crate::rank::{rank_fields, RankedViews, StopWordSet};
use crate::span::locate_field;

/// One processed item's inputs.
#[derive(Debug, Clone)]
pub struct FeedbackItem {
    /// The fully formatted prompt the model was conditioned on.
    pub prompt: String,
    /// The sampled continuation holding the answer and explanation.
    pub generated: String,
    /// The final (voted) answer text to attribute.
    pub answer: String,
    /// Named input fields, in prompt order (e.g. premise/hypothesis).
    pub fields: Vec<(String, String)>,
}

/// Per-item output record: per-field word scores plus the four ranked
/// views. Created fresh per item, populated in one pass, never mutated
/// afterward; holds plain strings and numbers only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedbackBundle {
    pub per_field: Vec<(String, WordScores)>,
    #[serde(flatten)]
    pub views: RankedViews,
    /// Integrated Gradients convergence deltas, one per target position;
    /// `None` for the attention attributor.
    pub convergence_deltas: Option<Vec<f32>>,
}

/// Attention-based feedback driver.
pub struct AttentionFeedback {
    pub layer_mode: LayerMode,
    pub target_aggregation: TargetAggregation,
    pub word_aggregation: WordAggregation,
    pub markers: SubwordMarkers,
    stop_words: StopWordSet,
}

impl AttentionFeedback {
    pub fn new(
        layer_mode: LayerMode,
        target_aggregation: TargetAggregation,
        word_aggregation: WordAggregation,
        stop_words: StopWordSet,
    ) -> Self {
        Self {
            layer_mode,
            target_aggregation,
            word_aggregation,
            markers: SubwordMarkers::default(),
            stop_words,
        }
    }

    pub fn run(
        &self,
        model: &GenerationModel,
        item: &FeedbackItem,
    ) -> Result<FeedbackBundle, FeedbackError> {
        let input_len = model.encode(&item.prompt)?.len();

        let Some(matrix) = compute_attention_matrix(
            model,
            &item.prompt,
            &item.generated,
            &item.answer,
            self.layer_mode,
        )?
        else {
            warn!("answer not found in generated text; emitting empty feedback");
            return Ok(FeedbackBundle::default());
        };

        let aggregated = collapse_to_input(matrix, input_len, self.target_aggregation);
        let per_field = field_word_scores(
            model,
            item,
            &aggregated,
            self.word_aggregation,
            &self.markers,
        )?;
        let views = rank_fields(&per_field, &self.stop_words);

        Ok(FeedbackBundle {
            per_field,
            views,
            convergence_deltas: None,
        })
    }
}

/// Integrated-Gradients feedback driver.
pub struct GradientFeedback {
    pub attributor: IntegratedGradients,
    pub target_aggregation: TargetAggregation,
    pub word_aggregation: WordAggregation,
    pub markers: SubwordMarkers,
    stop_words: StopWordSet,
}

impl GradientFeedback {
    pub fn new(
        attributor: IntegratedGradients,
        target_aggregation: TargetAggregation,
        word_aggregation: WordAggregation,
        stop_words: StopWordSet,
    ) -> Self {
        Self {
            attributor,
            target_aggregation,
            word_aggregation,
            markers: SubwordMarkers::default(),
            stop_words,
        }
    }

    pub fn run(
        &self,
        model: &GenerationModel,
        item: &FeedbackItem,
    ) -> Result<FeedbackBundle, FeedbackError> {
        let input_len = model.encode(&item.prompt)?.len();

        let Some((matrix, deltas)) =
            self.attributor
                .compute(model, &item.prompt, &item.generated, &item.answer)?
        else {
            warn!("answer not found in generated text; emitting empty feedback");
            return Ok(FeedbackBundle::default());
        };

        let aggregated = collapse_to_input(matrix, input_len, self.target_aggregation);
        let per_field = field_word_scores(
            model,
            item,
            &aggregated,
            self.word_aggregation,
            &self.markers,
        )?;
        let views = rank_fields(&per_field, &self.stop_words);

        Ok(FeedbackBundle {
            per_field,
            views,
            convergence_deltas: Some(deltas),
        })
    }
}

/// Trim every row to the prompt's token length (scores over generated
/// positions are not input attribution) and collapse the target axis.
fn collapse_to_input(
    matrix: Vec<Vec<AttributedToken>>,
    input_len: usize,
    method: TargetAggregation,
) -> Vec<AttributedToken> {
    let trimmed: Vec<Vec<AttributedToken>> = matrix
        .into_iter()
        .map(|row| row.into_iter().take(input_len).collect())
        .collect();
    aggregate_target(&trimmed, method)
}

/// Slice the aggregated prompt scores per named field and merge the
/// sub-words into scored words. A field whose span cannot be located
/// contributes an empty collection rather than aborting the item.
fn field_word_scores(
    model: &GenerationModel,
    item: &FeedbackItem,
    aggregated: &[AttributedToken],
    method: WordAggregation,
    markers: &SubwordMarkers,
) -> Result<Vec<(String, WordScores)>, FeedbackError> {
    let mut per_field = Vec::with_capacity(item.fields.len());
    for (name, text) in &item.fields {
        let word_scores = match locate_field(model.tokenizer(), &item.prompt, text)? {
            Some(span) if span.end < aggregated.len() => {
                aggregate_words(&aggregated[span.start..=span.end], method, markers)
            }
            _ => {
                warn!(field = %name, "field not found in prompt; emitting empty word list");
                WordScores::default()
            }
        };
        per_field.push((name.clone(), word_scores));
    }
    Ok(per_field)
}
