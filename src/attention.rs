//! Attention-based attribution.
//!
//! One forward pass with attention weights captured; a target token's
//! attribution over the sequence is its query row of the head-averaged
//! attention matrix. This is raw attention, not attention rollout: no
//! recursive propagation through earlier layers.

use candle_core::{DType, IndexOp, Tensor};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregate::{AttributedToken, TargetAttributionMatrix};
use crate::error::FeedbackError;
use crate::model::GenerationModel;
use crate::span::locate_target;

/// Cache of per-layer attention weights from one forward pass.
#[derive(Debug)]
pub struct AttentionCache {
    /// Attention weights per layer: `[batch, heads, seq, seq]`
    patterns: Vec<Tensor>,
}

impl AttentionCache {
    /// Create new cache with expected capacity
    pub fn with_capacity(n_layers: usize) -> Self {
        Self {
            patterns: Vec::with_capacity(n_layers),
        }
    }

    /// Add attention pattern for a layer
    pub fn push(&mut self, pattern: Tensor) {
        self.patterns.push(pattern);
    }

    /// Number of layers captured
    pub fn n_layers(&self) -> usize {
        self.patterns.len()
    }

    /// Captured weights for one layer, indexed in push order.
    pub fn get_layer(&self, layer: usize) -> Option<&Tensor> {
        self.patterns.get(layer)
    }

    /// Collapse the cache into one square `[seq, seq]` matrix.
    ///
    /// `Last` head-averages the final layer; `Avg` averages over every
    /// layer and every head. Always computed in F32: half-precision
    /// attention rows accumulate visible summation error.
    pub fn head_averaged(&self, mode: LayerMode) -> Result<Tensor, FeedbackError> {
        match mode {
            LayerMode::Last => {
                let last = self
                    .patterns
                    .last()
                    .ok_or_else(|| FeedbackError::config("attention cache is empty"))?;
                // [B, H, S, S] -> [S, S]
                Ok(last.to_dtype(DType::F32)?.i(0)?.mean(0)?)
            }
            LayerMode::Avg => {
                if self.patterns.is_empty() {
                    return Err(FeedbackError::config("attention cache is empty"));
                }
                // [L, B, H, S, S] -> [S, S]
                let stacked = Tensor::stack(&self.patterns, 0)?.to_dtype(DType::F32)?;
                Ok(stacked.mean(0)?.mean(0)?.mean(0)?)
            }
        }
    }
}

/// Which layers contribute to the attention matrix.
///
/// Resolved from configuration into this closed set up front; an unknown
/// mode string fails at config load, never at compute time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerMode {
    #[default]
    Last,
    Avg,
}

/// Attention attribution for every position of the located target span.
///
/// Each emitted row covers the *entire* input+generated sequence; scores
/// over generated positions are not meaningful as input attribution and
/// the caller slices rows down to the input token length before
/// aggregating. Returns `None` when the target cannot be located.
pub fn compute_attention_matrix(
    model: &GenerationModel,
    input_text: &str,
    generated_text: &str,
    target_text: &str,
    mode: LayerMode,
) -> Result<Option<TargetAttributionMatrix>, FeedbackError> {
    let full_text = format!("{input_text}{generated_text}");
    let input_ids = model.encode(&full_text)?;

    let Some(span) = locate_target(model.tokenizer(), input_text, generated_text, target_text)?
    else {
        return Ok(None);
    };

    let input_tensor = model.input_tensor(&input_ids)?;
    let (_, cache) = model.backend().forward_with_attention(&input_tensor)?;
    let averaged = cache.head_averaged(mode)?;

    let (rows, cols) = averaged.dims2()?;
    debug_assert_eq!(rows, cols);
    if span.end >= rows {
        // joint tokenization of prompt+continuation disagrees with the
        // separate encodings used for localization
        warn!(
            span_end = span.end,
            seq_len = rows,
            "target span exceeds attention matrix; emitting no signal"
        );
        return Ok(None);
    }

    let tokens = model.tokenizer().ids_to_tokens(&input_ids);
    debug!(
        target_start = span.start,
        target_end = span.end,
        seq_len = rows,
        "extracting attention rows for target span"
    );

    let mut matrix = Vec::with_capacity(span.len());
    for pos in span.start..=span.end {
        let scores: Vec<f32> = averaged.i((pos, ..))?.to_vec1()?;
        let row = input_ids
            .iter()
            .zip(&tokens)
            .zip(scores)
            .map(|((&id, text), score)| AttributedToken {
                id,
                text: text.clone(),
                score,
            })
            .collect();
        matrix.push(row);
    }
    Ok(Some(matrix))
}
