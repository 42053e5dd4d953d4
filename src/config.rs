//! Run configuration for the feedback pipeline.
//!
//! Every configurable policy (attribution method, layer mode, aggregation
//! methods, baseline kind) deserializes into a closed enum, so an unknown
//! string fails here at load time and never reaches a compute call.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::aggregate::{TargetAggregation, WordAggregation};
use crate::attention::LayerMode;
use crate::baseline::RandomWordBaseline;
use crate::error::FeedbackError;
use crate::feedback::{AttentionFeedback, GradientFeedback};
use crate::gradient::{BaselineKind, IntegratedGradients};
use crate::rank::StopWordSet;

const DEFAULT_IG_STEPS: usize = 500;

/// Which attributor produces the feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionMethod {
    Attention,
    IntegratedGradients,
    Random,
}

/// Feedback pipeline configuration, loaded from JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub method: AttributionMethod,
    pub layer_mode: LayerMode,
    pub target_aggregation: TargetAggregation,
    pub word_aggregation: WordAggregation,
    pub baseline: BaselineKind,
    /// Integrated Gradients step counts keyed by model name; models not
    /// listed fall back to the default.
    pub step_counts: BTreeMap<String, usize>,
    pub initial_batch_size: usize,
    pub seed: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            method: AttributionMethod::Attention,
            layer_mode: LayerMode::Last,
            target_aggregation: TargetAggregation::AbsMean,
            word_aggregation: WordAggregation::Sum,
            baseline: BaselineKind::Eos,
            step_counts: default_step_counts(),
            initial_batch_size: 50,
            seed: 42,
        }
    }
}

fn default_step_counts() -> BTreeMap<String, usize> {
    [
        ("llama".to_string(), 500),
        ("mistral".to_string(), 500),
        ("falcon".to_string(), 500),
        ("qwen".to_string(), 1000),
    ]
    .into_iter()
    .collect()
}

impl FeedbackConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, FeedbackError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FeedbackError::io("reading config file", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| FeedbackError::json("parsing config file", e))?;
        info!(method = ?config.method, "loaded feedback configuration");
        Ok(config)
    }

    /// Step count for a given generative model.
    pub fn steps_for(&self, model_name: &str) -> usize {
        self.step_counts
            .get(model_name)
            .copied()
            .unwrap_or(DEFAULT_IG_STEPS)
    }

    /// Assemble the attention-based driver.
    pub fn attention_feedback(&self, stop_words: StopWordSet) -> AttentionFeedback {
        AttentionFeedback::new(
            self.layer_mode,
            self.target_aggregation,
            self.word_aggregation,
            stop_words,
        )
    }

    /// Assemble the Integrated-Gradients driver for a given model.
    pub fn gradient_feedback(&self, model_name: &str, stop_words: StopWordSet) -> GradientFeedback {
        let attributor = IntegratedGradients {
            steps: self.steps_for(model_name),
            initial_batch_size: self.initial_batch_size,
            baseline: self.baseline,
        };
        GradientFeedback::new(
            attributor,
            self.target_aggregation,
            self.word_aggregation,
            stop_words,
        )
    }

    /// Assemble the random-shuffle control.
    pub fn random_baseline(&self) -> RandomWordBaseline {
        RandomWordBaseline::new(self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_settings() {
        let config = FeedbackConfig::default();
        assert_eq!(config.method, AttributionMethod::Attention);
        assert_eq!(config.target_aggregation, TargetAggregation::AbsMean);
        assert_eq!(config.word_aggregation, WordAggregation::Sum);
        assert_eq!(config.steps_for("qwen"), 1000);
        assert_eq!(config.steps_for("llama"), 500);
        assert_eq!(config.steps_for("unlisted-model"), 500);
        assert_eq!(config.initial_batch_size, 50);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: FeedbackConfig =
            serde_json::from_str(r#"{"method": "integrated_gradients", "baseline": "mean"}"#)
                .unwrap();
        assert_eq!(config.method, AttributionMethod::IntegratedGradients);
        assert_eq!(config.baseline, BaselineKind::Mean);
        assert_eq!(config.layer_mode, LayerMode::Last);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn unknown_policy_string_fails_at_load() {
        let result: Result<FeedbackConfig, _> =
            serde_json::from_str(r#"{"layer_mode": "rollout"}"#);
        assert!(result.is_err());

        let result: Result<FeedbackConfig, _> =
            serde_json::from_str(r#"{"target_aggregation": "median"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn random_baseline_carries_the_configured_seed() {
        let config = FeedbackConfig {
            seed: 7,
            ..FeedbackConfig::default()
        };
        let fields = ["red green blue"];
        assert_eq!(
            config.random_baseline().shuffle_words(&fields),
            RandomWordBaseline::new(7).shuffle_words(&fields)
        );
    }

    #[test]
    fn gradient_driver_uses_per_model_steps() {
        let config = FeedbackConfig::default();
        let driver = config.gradient_feedback("qwen", StopWordSet::english());
        assert_eq!(driver.attributor.steps, 1000);
        assert_eq!(driver.attributor.initial_batch_size, 50);
    }
}
