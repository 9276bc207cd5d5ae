//! Error type shared by the whole preparation pipeline.

use thiserror::Error;

/// Errors raised while augmenting, chunking or packing transcripts.
///
/// Tokenizer incompatibilities, a stalled chunk cursor and negative
/// augmentation levels abort the run; the orchestrator never retries them.
#[derive(Debug, Error)]
pub enum PrepError {
    #[error("augmentation level must be non-negative, got {0}")]
    NegativeLevel(i64),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("weird tokenizer: no common {side} tokens for turn tags {renderings:?}")]
    NoCommonTagTokens {
        side: &'static str,
        renderings: Vec<String>,
    },

    #[error("unexpected tokenizer behaviour: turn tag {side} decodes to {actual:?} instead of {expected:?} (tokens {tokens:?})")]
    UnexpectedTagDecoding {
        side: &'static str,
        expected: &'static str,
        actual: String,
        tokens: Vec<u32>,
    },

    #[error("tokenizers splitting turn tags into several tokens are not supported (prefix {prefix:?}, suffix {suffix:?})")]
    MultiTokenTagBoundary { prefix: Vec<u32>, suffix: Vec<u32> },

    #[error("chunk cursor did not advance (from {previous} to {next})")]
    StalledCursor { previous: usize, next: usize },

    #[error("no input files found under {0}")]
    NoInputFiles(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = PrepError> = std::result::Result<T, E>;
