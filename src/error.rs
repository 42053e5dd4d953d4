//! Error type shared across the attribution pipeline.

use thiserror::Error;

/// Errors produced by the attribution subsystem.
///
/// `ResourceExhausted` is the one recoverable kind: the Integrated
/// Gradients batch back-off matches on it and shrinks its internal batch
/// size. Everything else is a wiring or runtime defect and aborts the item.
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("tokenizer error while {context}: {message}")]
    Tokenizer {
        context: &'static str,
        message: String,
    },

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("device memory exhausted during {context}")]
    ResourceExhausted { context: &'static str },

    #[error("model hub error while {context}: {message}")]
    Hub {
        context: &'static str,
        message: String,
    },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parse error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl FeedbackError {
    pub(crate) fn tokenizer(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Tokenizer {
            context,
            message: err.to_string(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn hub(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Hub {
            context,
            message: err.to_string(),
        }
    }

    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    /// Whether this error signals device memory exhaustion.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}

/// Classify a tensor-library failure at the backend boundary.
///
/// CUDA allocation failures only surface through the driver's error text,
/// so the string inspection lives here, once, and everything downstream
/// (the batch back-off in particular) matches on the structured
/// `ResourceExhausted` variant instead.
pub fn classify_tensor_error(context: &'static str, err: candle_core::Error) -> FeedbackError {
    let message = err.to_string();
    if message.contains("out of memory") || message.contains("OUT_OF_MEMORY") {
        FeedbackError::ResourceExhausted { context }
    } else {
        FeedbackError::Tensor(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_exhausted_is_detectable() {
        let err = FeedbackError::ResourceExhausted {
            context: "gradient attribution",
        };
        assert!(err.is_resource_exhausted());
        assert!(!FeedbackError::config("bad").is_resource_exhausted());
    }
}
