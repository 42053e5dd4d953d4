//! Collaborator seams for the generative model and its tokenizer.
//!
//! The attribution pipeline never owns model state; it borrows an
//! [`AttributionBackend`] and a [`PromptTokenizer`] for the duration of one
//! call and produces plain numbers and strings, so results can outlive the
//! model session.

use candle_core::{Device, Tensor};
use hf_hub::{api::sync::Api, Repo, RepoType};
use tokenizers::Tokenizer;
use tracing::info;

use crate::attention::AttentionCache;
use crate::error::FeedbackError;

/// Tokenizer capability consumed by the attribution pipeline.
///
/// Token texts returned by `ids_to_tokens` are raw sub-word surface forms
/// and may carry a word-boundary marker (`Ġ`, `▁`, ...); the word
/// aggregator relies on that convention.
pub trait PromptTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, FeedbackError>;

    fn ids_to_tokens(&self, ids: &[u32]) -> Vec<String>;

    fn token_to_id(&self, token: &str) -> Option<u32>;

    fn pad_token_id(&self) -> Option<u32>;

    fn eos_token_id(&self) -> Option<u32>;
}

/// Model capability consumed by the attribution pipeline.
///
/// Implementations classify device allocation failures into
/// [`FeedbackError::ResourceExhausted`] (see
/// [`crate::error::classify_tensor_error`]) so the gradient attributor's
/// batch back-off never inspects error text itself.
pub trait AttributionBackend {
    fn n_layers(&self) -> usize;
    fn d_model(&self) -> usize;
    fn device(&self) -> &Device;

    /// Forward pass over token ids `[batch, seq]` with attention weights
    /// captured for every layer and the KV-cache disabled.
    fn forward_with_attention(
        &self,
        input_ids: &Tensor,
    ) -> Result<(Tensor, AttentionCache), FeedbackError>;

    /// Next-token logits `[batch, vocab]` from input embeddings
    /// `[batch, seq, d_model]`, bypassing the id-based embedding lookup.
    /// Must be differentiable with respect to `embeds`.
    fn forward_from_embeds(&self, embeds: &Tensor) -> Result<Tensor, FeedbackError>;

    /// Embed token ids `[batch, seq]` into `[batch, seq, d_model]`.
    fn embed(&self, input_ids: &Tensor) -> Result<Tensor, FeedbackError>;

    /// The full vocabulary embedding table `[vocab, d_model]`.
    fn embedding_table(&self) -> Result<Tensor, FeedbackError>;
}

/// Generative model handle: one backend plus one tokenizer.
///
/// Both halves are injected by the caller that assembles the pipeline, so
/// tests can plug in deterministic fakes and the attribution code stays
/// architecture-agnostic.
pub struct GenerationModel {
    backend: Box<dyn AttributionBackend>,
    tokenizer: Box<dyn PromptTokenizer>,
}

impl GenerationModel {
    pub fn new(backend: Box<dyn AttributionBackend>, tokenizer: Box<dyn PromptTokenizer>) -> Self {
        Self { backend, tokenizer }
    }

    pub fn backend(&self) -> &dyn AttributionBackend {
        self.backend.as_ref()
    }

    pub fn tokenizer(&self) -> &dyn PromptTokenizer {
        self.tokenizer.as_ref()
    }

    pub fn device(&self) -> &Device {
        self.backend.device()
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u32>, FeedbackError> {
        self.tokenizer.encode(text)
    }

    /// Build a `[1, seq]` input tensor from token ids on the model device.
    pub fn input_tensor(&self, ids: &[u32]) -> Result<Tensor, FeedbackError> {
        Ok(Tensor::new(ids, self.device())?.unsqueeze(0)?)
    }
}

/// `tokenizers`-backed implementation of [`PromptTokenizer`].
pub struct HfTokenizer {
    tokenizer: Tokenizer,
}

impl HfTokenizer {
    /// Download `tokenizer.json` for a model from the HuggingFace Hub.
    pub fn from_pretrained(model_id: &str) -> Result<Self, FeedbackError> {
        info!("Loading tokenizer for {}", model_id);
        let api = Api::new().map_err(|e| FeedbackError::hub("initializing hub client", e))?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));
        let tokenizer_path = repo
            .get("tokenizer.json")
            .map_err(|e| FeedbackError::hub("downloading tokenizer.json", e))?;
        Self::from_file(&tokenizer_path)
    }

    /// Load a tokenizer from a local `tokenizer.json`.
    pub fn from_file(path: &std::path::Path) -> Result<Self, FeedbackError> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| FeedbackError::tokenizer("loading tokenizer file", e))?;
        Ok(Self { tokenizer })
    }

    pub fn from_tokenizer(tokenizer: Tokenizer) -> Self {
        Self { tokenizer }
    }

    fn vocab_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.get_vocab(true).get(token).copied()
    }
}

impl PromptTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, FeedbackError> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| FeedbackError::tokenizer("encoding text", e))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn ids_to_tokens(&self, ids: &[u32]) -> Vec<String> {
        ids.iter()
            .map(|&id| {
                self.tokenizer
                    .id_to_token(id)
                    .unwrap_or_else(|| format!("<{id}>"))
            })
            .collect()
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }

    fn pad_token_id(&self) -> Option<u32> {
        self.vocab_id("<pad>")
            .or_else(|| self.vocab_id("<|pad|>"))
            .or_else(|| self.vocab_id("[PAD]"))
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.vocab_id("<|im_end|>")
            .or_else(|| self.vocab_id("<|endoftext|>"))
            .or_else(|| self.vocab_id("</s>"))
            .or_else(|| self.vocab_id("<end_of_turn>"))
    }
}
