//! Core preparation logic for multi-speaker transcript corpora.
//!
//! This crate turns raw transcripts (turns opened by `[<speaker>:]` tags,
//! annotation markers such as `[LAUGHTER]` or `[PII]`) into fixed-length token
//! segments for language-model training:
//!
//! - [`TextAugmenter`] yields deduplicated textual variants of a conversation
//!   at increasing levels of normalization and degradation;
//! - [`TagBoundary`] finds the tokens opening and closing a speaker tag;
//! - [`TurnAwareChunker`] cuts token sequences into segments without severing
//!   a turn from its speaker tag or a word from its start;
//! - [`pipeline`] walks a corpus, packs segments into binary shards and
//!   reports counts.

/// Trait for tokenization operations.
///
/// Implementors map text to token ids and back. The chunker relies on
/// decoding a single word-initial token to a string starting with a space.
pub trait Tokenizer {
    /// Encode `text`, optionally adding beginning/end-of-sequence tokens.
    fn encode(&self, text: &str, bos: bool, eos: bool) -> Result<Vec<u32>>;

    /// Decode token ids back to text, keeping special tokens.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// End-of-sequence id, also used as padding and shard separator.
    fn eos_id(&self) -> Option<u32>;

    fn vocab_size(&self) -> usize;

    /// Whether `id` opens a new word. Tokenizers whose single-token decoding
    /// drops the leading space should override this.
    fn starts_word(&self, id: u32) -> Result<bool> {
        Ok(self.decode(&[id])?.starts_with(' '))
    }
}

// Blanket implementation for references to Tokenizers
impl<T: Tokenizer + ?Sized> Tokenizer for &T {
    fn encode(&self, text: &str, bos: bool, eos: bool) -> Result<Vec<u32>> {
        (*self).encode(text, bos, eos)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        (*self).decode(ids)
    }

    fn eos_id(&self) -> Option<u32> {
        (*self).eos_id()
    }

    fn vocab_size(&self) -> usize {
        (*self).vocab_size()
    }

    fn starts_word(&self, id: u32) -> Result<bool> {
        (*self).starts_word(id)
    }
}

mod augment;
mod boundary;
mod chunker;
mod conversation;
pub mod dataset;
mod error;
mod helpers;
pub mod names;
pub mod pipeline;
pub mod shard;

pub use augment::{AugmentationConfig, AugmentationLevel, SpeakerIdentityMap, TextAugmenter, Variants};
pub use boundary::{common_prefix, common_suffix, TagBoundary};
pub use chunker::{decide_cut, ChunkerConfig, Chunks, Cut, TokenSegment, TurnAwareChunker, WordBoundary};
pub use conversation::{Conversation, Marker, Piece, SpeakerId, Turn};
pub use dataset::{discover_datasets, read_conversations, DatasetFile, DatasetFileNames, DatasetMetadata, MetadataTable};
pub use error::{PrepError, Result};
pub use helpers::{capitalize, clean_text, split_paragraphs};
pub use pipeline::{process_all_datasets, process_dataset, DatasetReport, PrepareConfig, PrepareResult, ShardLayout};
pub use shard::{NullShardWriter, PackedShardWriter, ShardDtype, ShardWriter};

/// Exemplar tag renderings used to find the turn-tag boundary tokens.
pub const TAG_EXEMPLARS: [&str; 3] = ["[speaker001:]", "[Intervenant 1:]", "[A:]"];

/// Tokens scanned past a window's end when looking for a closing tag.
pub const DEFAULT_LOOKAHEAD: usize = 10;

/// Final fragments this short are dropped when cutting ignores turns.
pub const DEFAULT_MIN_TAIL_TOKENS: usize = 10;

/// Seed of the augmentation random stream, reset for every dataset pass.
pub const DEFAULT_AUGMENTATION_SEED: u64 = 51;

/// Augmentation level used for spontaneous-speech datasets.
pub const DEFAULT_SPONTANEOUS_LEVEL: usize = 4;

/// Shards hold a multiple of this many segments.
pub const DEFAULT_MULTIPLE_OF: usize = 8;

/// Upper bound on segments per shard file.
pub const MAX_SEGMENTS_PER_FILE: usize = 512;
