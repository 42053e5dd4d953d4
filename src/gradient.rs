//! Integrated Gradients attribution over a causal decode position.
//!
//! For each target-span position the prefix (all tokens strictly before
//! it) is embedded, a baseline embedding sequence of identical shape is
//! built, and the target token's next-token logit is integrated along the
//! straight-line path between baseline and input. The integral is batched
//! along the interpolation-step axis, with a halving back-off on device
//! memory exhaustion — the only retried failure in the subsystem.

use candle_core::{DType, IndexOp, Tensor, Var, D};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregate::{AttributedToken, TargetAttributionMatrix};
use crate::error::FeedbackError;
use crate::model::{AttributionBackend, GenerationModel};
use crate::span::locate_target;

/// Reference embedding sequence for the path integral.
///
/// Resolved from configuration into this closed set up front; an unknown
/// policy string fails at config load, never at compute time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineKind {
    /// All-zero embeddings.
    Zero,
    /// Embeddings of the pad token repeated across the prefix
    /// (falls back to the eos token when the tokenizer has no pad).
    Pad,
    /// Embeddings of the eos token repeated across the prefix.
    #[default]
    Eos,
    /// The mean embedding over the full vocabulary, broadcast across
    /// positions.
    Mean,
}

/// Integrated Gradients attributor.
///
/// `steps` comes from configuration keyed by which generative model is in
/// use (see [`crate::config::FeedbackConfig::steps_for`]); this type takes
/// a plain integer and has no per-model table of its own.
#[derive(Debug, Clone)]
pub struct IntegratedGradients {
    pub steps: usize,
    pub initial_batch_size: usize,
    pub baseline: BaselineKind,
}

impl Default for IntegratedGradients {
    fn default() -> Self {
        Self {
            steps: 500,
            initial_batch_size: 50,
            baseline: BaselineKind::Eos,
        }
    }
}

impl IntegratedGradients {
    /// Attribute every target-span position against its causal prefix.
    ///
    /// Row `k` of the returned matrix scores the prefix of target position
    /// `start + k`, so rows lengthen with the position; callers slice each
    /// row down to the input token length before aggregating. The second
    /// element carries one convergence delta per target position, a
    /// quality side-channel for the caller. Returns `None` when the target
    /// cannot be located.
    pub fn compute(
        &self,
        model: &GenerationModel,
        input_text: &str,
        generated_text: &str,
        target_text: &str,
    ) -> Result<Option<(TargetAttributionMatrix, Vec<f32>)>, FeedbackError> {
        let full_text = format!("{input_text}{generated_text}");
        let input_ids = model.encode(&full_text)?;

        let Some(span) =
            locate_target(model.tokenizer(), input_text, generated_text, target_text)?
        else {
            return Ok(None);
        };
        if span.end >= input_ids.len() || span.start == 0 {
            warn!(
                target_start = span.start,
                target_end = span.end,
                seq_len = input_ids.len(),
                "target span unusable for causal attribution; emitting no signal"
            );
            return Ok(None);
        }

        let tokens = model.tokenizer().ids_to_tokens(&input_ids);
        let mut matrix = Vec::with_capacity(span.len());
        let mut deltas = Vec::with_capacity(span.len());

        for pos in span.start..=span.end {
            let target_id = input_ids[pos];
            let prefix_ids = &input_ids[..pos];
            debug!(position = pos, target_id, prefix_len = pos, "attributing target token");

            let prefix = model.input_tensor(prefix_ids)?;
            // detach before gradient tracking so attribution gradients
            // never accumulate against the base model's parameters
            let embeds = model
                .backend()
                .embed(&prefix)?
                .detach()
                .to_dtype(DType::F32)?;
            let baseline = self.baseline_embeds(model, pos)?;

            let (scores, delta) =
                self.attribute_with_backoff(model.backend(), &embeds, &baseline, target_id)?;

            let row = prefix_ids
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
            deltas.push(delta);
        }

        Ok(Some((matrix, deltas)))
    }

    /// Build a `[1, len, d_model]` F32 baseline per the configured policy.
    fn baseline_embeds(&self, model: &GenerationModel, len: usize) -> Result<Tensor, FeedbackError> {
        let backend = model.backend();
        match self.baseline {
            BaselineKind::Zero => Ok(Tensor::zeros(
                (1, len, backend.d_model()),
                DType::F32,
                backend.device(),
            )?),
            BaselineKind::Pad | BaselineKind::Eos => {
                let filler = match self.baseline {
                    BaselineKind::Pad => model
                        .tokenizer()
                        .pad_token_id()
                        .or_else(|| model.tokenizer().eos_token_id()),
                    _ => model.tokenizer().eos_token_id(),
                }
                .ok_or_else(|| {
                    FeedbackError::config("tokenizer exposes no filler token for the baseline")
                })?;
                let ids = Tensor::full(filler, (1, len), backend.device())?;
                Ok(backend.embed(&ids)?.detach().to_dtype(DType::F32)?)
            }
            BaselineKind::Mean => {
                let table = backend.embedding_table()?.detach().to_dtype(DType::F32)?;
                let mean = table.mean(0)?; // [d_model]
                Ok(mean
                    .reshape((1, 1, backend.d_model()))?
                    .broadcast_as((1, len, backend.d_model()))?
                    .contiguous()?)
            }
        }
    }

    /// Run the integral, halving the internal batch size on memory
    /// exhaustion down to a floor of 1. Buffers from a failed attempt are
    /// dropped before the retry; no other error kind is retried.
    fn attribute_with_backoff(
        &self,
        backend: &dyn AttributionBackend,
        embeds: &Tensor,
        baseline: &Tensor,
        target_id: u32,
    ) -> Result<(Vec<f32>, f32), FeedbackError> {
        let mut batch = self.initial_batch_size.max(1);
        loop {
            match self.attribute(backend, embeds, baseline, target_id, batch) {
                Ok(result) => return Ok(result),
                Err(err) if err.is_resource_exhausted() && batch > 1 => {
                    batch /= 2;
                    warn!(
                        batch_size = batch,
                        "device memory exhausted; retrying attribution with smaller batch"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One full Riemann-midpoint path integral at a fixed internal batch
    /// size. Per-token score is the attribution summed over the embedding
    /// dimension; the delta is `sum(scores) - (F(input) - F(baseline))`.
    fn attribute(
        &self,
        backend: &dyn AttributionBackend,
        embeds: &Tensor,
        baseline: &Tensor,
        target_id: u32,
        batch: usize,
    ) -> Result<(Vec<f32>, f32), FeedbackError> {
        let steps = self.steps.max(1);
        let (_, seq, d_model) = embeds.dims3()?;
        let diff = (embeds - baseline)?;

        let mut grad_sum = Tensor::zeros((1, seq, d_model), DType::F32, embeds.device())?;
        let mut start = 0;
        while start < steps {
            let count = batch.min(steps - start);
            let mut chunk = Vec::with_capacity(count);
            for k in 0..count {
                let alpha = ((start + k) as f64 + 0.5) / steps as f64;
                chunk.push(baseline.add(&diff.affine(alpha, 0.0)?)?);
            }
            let interp = Var::from_tensor(&Tensor::cat(&chunk, 0)?)?;
            drop(chunk);

            let logits = backend.forward_from_embeds(interp.as_tensor())?;
            let objective = logits.i((.., target_id as usize))?.sum_all()?;
            let grads = objective.backward()?;
            let grad = grads.get(&interp).ok_or_else(|| {
                FeedbackError::config("no gradient recorded for interpolated embeddings")
            })?;
            grad_sum = grad_sum.add(&grad.sum_keepdim(0)?)?;
            start += count;
        }

        let avg_grad = grad_sum.affine(1.0 / steps as f64, 0.0)?;
        let scores: Vec<f32> = diff
            .mul(&avg_grad)?
            .sum(D::Minus1)?
            .squeeze(0)?
            .to_vec1()?;

        let f_input = self.target_logit(backend, embeds, target_id)?;
        let f_baseline = self.target_logit(backend, baseline, target_id)?;
        let total: f32 = scores.iter().sum();
        let delta = total - (f_input - f_baseline);

        Ok((scores, delta))
    }

    fn target_logit(
        &self,
        backend: &dyn AttributionBackend,
        embeds: &Tensor,
        target_id: u32,
    ) -> Result<f32, FeedbackError> {
        let logits = backend.forward_from_embeds(embeds)?;
        Ok(logits.i((0, target_id as usize))?.to_scalar::<f32>()?)
    }
}
