//! Turn-aware cutting of token sequences into fixed-length segments.
//!
//! A window of `block_size` tokens is cut at each step. Before advancing, the
//! tokens just past the window are scanned for the last closing tag `:]`:
//! if the turn it closes starts inside the window, the next segment starts at
//! that turn; if the whole window belongs to one open turn, its speaker tag is
//! carried in front of the next segment. Cuts that land inside a word walk
//! back to the word start.

use tracing::trace;

use crate::boundary::TagBoundary;
use crate::error::{PrepError, Result};
use crate::{Tokenizer, DEFAULT_LOOKAHEAD, DEFAULT_MIN_TAIL_TOKENS};

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Length of every emitted segment.
    pub block_size: usize,
    /// Tokens scanned past the window end for a closing tag.
    pub lookahead: usize,
    /// Without turn-aware cutting, final fragments this short are dropped.
    pub min_tail_tokens: usize,
    /// Right-pad short segments to `block_size` with this id.
    pub pad_value: Option<u32>,
}

impl ChunkerConfig {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            ..Self::default()
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            block_size: 2048,
            lookahead: DEFAULT_LOOKAHEAD,
            min_tail_tokens: DEFAULT_MIN_TAIL_TOKENS,
            pad_value: None,
        }
    }
}

/// One segment ready for the shard writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSegment {
    /// Carried prefix, source tokens, then padding.
    pub tokens: Vec<u32>,
    /// Offset in the source sequence of the first non-carried token.
    pub start: usize,
    /// Number of leading tokens carried over from an earlier window.
    pub carried: usize,
    /// Number of trailing padding tokens.
    pub padded: usize,
}

impl TokenSegment {
    /// Tokens taken from the source at this segment's offset.
    pub fn content(&self) -> &[u32] {
        &self.tokens[self.carried..self.tokens.len() - self.padded]
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// How the cursor moves after a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cut {
    /// Advance to the window end, keeping any carried prefix.
    NaiveAdvance,
    /// Restart at the turn opening at this offset from the window start.
    RealignToTurn { offset: usize },
    /// Advance to the window end and carry the first `tag_len` tokens of the
    /// window (the open turn's tag) in front of the next segment.
    CarryOpenTurn { tag_len: usize },
}

/// Decide the cut for a window starting at `lookahead[0]`.
///
/// `lookahead` spans the window plus the lookahead margin; `consumed` is the
/// number of source tokens inside the window itself.
pub fn decide_cut(lookahead: &[u32], consumed: usize, tags: TagBoundary) -> Cut {
    let Some(close) = lookahead.iter().rposition(|&t| t == tags.suffix) else {
        return Cut::NaiveAdvance;
    };
    let Some(open) = lookahead[..close].iter().rposition(|&t| t == tags.prefix) else {
        return Cut::NaiveAdvance;
    };
    match open {
        0 if close < consumed => Cut::CarryOpenTurn { tag_len: close + 1 },
        0 => Cut::NaiveAdvance,
        offset if offset <= consumed => Cut::RealignToTurn { offset },
        _ => Cut::NaiveAdvance,
    }
}

/// Tells whether a token may start a segment without splitting a word.
pub trait WordBoundary {
    fn starts_word(&self, token: u32) -> Result<bool>;
}

impl<T: Tokenizer + ?Sized> WordBoundary for T {
    fn starts_word(&self, token: u32) -> Result<bool> {
        Tokenizer::starts_word(self, token)
    }
}

/// Cuts token sequences into `block_size` segments.
///
/// Without a [`TagBoundary`] the cut is a plain fixed window.
#[derive(Debug, Clone)]
pub struct TurnAwareChunker {
    config: ChunkerConfig,
    tags: Option<TagBoundary>,
}

impl TurnAwareChunker {
    pub fn new(config: ChunkerConfig, tags: Option<TagBoundary>) -> Result<Self> {
        if config.block_size == 0 {
            return Err(PrepError::Config("block size must be positive".to_string()));
        }
        Ok(Self { config, tags })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Lazily cut `tokens`. Re-running on the same input yields the same
    /// segments; an empty input yields one (padded) segment.
    pub fn chunks<'a, W: WordBoundary + ?Sized>(
        &'a self,
        tokens: &'a [u32],
        words: &'a W,
    ) -> Chunks<'a, W> {
        Chunks {
            chunker: self,
            tokens,
            words,
            cursor: 0,
            carried: Vec::new(),
            done: false,
        }
    }
}

/// Iterator over the segments of one token sequence.
pub struct Chunks<'a, W: ?Sized> {
    chunker: &'a TurnAwareChunker,
    tokens: &'a [u32],
    words: &'a W,
    cursor: usize,
    carried: Vec<u32>,
    done: bool,
}

impl<W: WordBoundary + ?Sized> Chunks<'_, W> {
    fn segment(&self, start: usize, end: usize) -> TokenSegment {
        let mut tokens = Vec::with_capacity(self.chunker.config.block_size);
        tokens.extend_from_slice(&self.carried);
        tokens.extend_from_slice(&self.tokens[start..end]);
        let mut padded = 0;
        if let Some(pad) = self.chunker.config.pad_value {
            padded = self.chunker.config.block_size.saturating_sub(tokens.len());
            tokens.resize(tokens.len() + padded, pad);
        }
        TokenSegment {
            tokens,
            start,
            carried: self.carried.len(),
            padded,
        }
    }

    /// Walk back from `end` to a token starting a word (or a turn tag).
    fn word_start(&self, end: usize) -> Result<usize> {
        let mut next = end;
        while next > self.cursor {
            let token = self.tokens[next];
            if self.chunker.tags.is_some_and(|t| t.prefix == token)
                || self.words.starts_word(token)?
            {
                break;
            }
            next -= 1;
        }
        Ok(next)
    }

    fn advance(&mut self, end: usize) -> Result<usize> {
        let Some(tags) = self.chunker.tags else {
            return Ok(end);
        };
        let config = &self.chunker.config;
        let scan_end = (end + config.lookahead).min(self.tokens.len());
        let cut = decide_cut(&self.tokens[self.cursor..scan_end], end - self.cursor, tags);
        trace!(cursor = self.cursor, end, ?cut, "cut decision");

        match cut {
            Cut::NaiveAdvance => self.word_start(end),
            Cut::RealignToTurn { offset } => {
                self.carried.clear();
                Ok(self.cursor + offset)
            }
            Cut::CarryOpenTurn { tag_len } => {
                let next = self.word_start(end)?;
                self.carried.clear();
                if tag_len < config.block_size {
                    self.carried
                        .extend_from_slice(&self.tokens[self.cursor..self.cursor + tag_len]);
                }
                Ok(next)
            }
        }
    }

    fn step(&mut self) -> Result<Option<TokenSegment>> {
        let config = &self.chunker.config;
        let len = self.tokens.len();

        if self.cursor == 0 && len <= config.block_size {
            self.done = true;
            return Ok(Some(self.segment(0, len)));
        }

        let end = (self.cursor + config.block_size - self.carried.len()).min(len);
        if end == len {
            self.done = true;
            if self.chunker.tags.is_none() && end - self.cursor <= config.min_tail_tokens {
                trace!(tail = end - self.cursor, "dropping short final fragment");
                return Ok(None);
            }
            return Ok(Some(self.segment(self.cursor, end)));
        }

        let segment = self.segment(self.cursor, end);
        let next = self.advance(end)?;
        if next <= self.cursor {
            return Err(PrepError::StalledCursor {
                previous: self.cursor,
                next,
            });
        }
        self.cursor = next;
        Ok(Some(segment))
    }
}

impl<W: WordBoundary + ?Sized> Iterator for Chunks<'_, W> {
    type Item = Result<TokenSegment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = self.step();
        if step.is_err() {
            self.done = true;
        }
        step.transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    const TAGS: TagBoundary = TagBoundary { prefix: 1, suffix: 2 };

    /// Ids 100..1000 start a word, ids from 1000 continue one.
    struct FakeTokenizer;

    impl Tokenizer for FakeTokenizer {
        fn encode(&self, _text: &str, _bos: bool, _eos: bool) -> Result<Vec<u32>> {
            Err(PrepError::Tokenizer("encoding is not supported".to_string()))
        }

        fn decode(&self, ids: &[u32]) -> Result<String> {
            Ok(ids
                .iter()
                .map(|&id| match id {
                    0 => "</s>".to_string(),
                    1 => "[".to_string(),
                    2 => ":]".to_string(),
                    100..=999 => format!(" w{id}"),
                    1000.. => format!("c{id}"),
                    _ => format!("speaker{id}"),
                })
                .collect())
        }

        fn eos_id(&self) -> Option<u32> {
            Some(0)
        }

        fn vocab_size(&self) -> usize {
            2000
        }
    }

    fn chunker(block_size: usize, tags: Option<TagBoundary>, pad: bool) -> TurnAwareChunker {
        let config = ChunkerConfig {
            pad_value: pad.then_some(0),
            ..ChunkerConfig::new(block_size)
        };
        TurnAwareChunker::new(config, tags).unwrap()
    }

    fn cut(chunker: &TurnAwareChunker, tokens: &[u32]) -> Result<Vec<TokenSegment>> {
        chunker.chunks(tokens, &FakeTokenizer).collect()
    }

    #[test]
    fn test_decide_cut() {
        assert_eq!(decide_cut(&[100, 101, 102], 3, TAGS), Cut::NaiveAdvance);
        assert_eq!(decide_cut(&[100, 50, 2, 101], 4, TAGS), Cut::NaiveAdvance);
        assert_eq!(
            decide_cut(&[1, 50, 2, 100, 101], 5, TAGS),
            Cut::CarryOpenTurn { tag_len: 3 }
        );
        assert_eq!(
            decide_cut(&[100, 1, 50, 2, 101], 3, TAGS),
            Cut::RealignToTurn { offset: 1 }
        );
        // Turn opening in the lookahead margin only.
        assert_eq!(decide_cut(&[100, 101, 102, 1, 50, 2], 2, TAGS), Cut::NaiveAdvance);
        // Tag closing past the window end.
        assert_eq!(decide_cut(&[1, 50, 51, 2], 2, TAGS), Cut::NaiveAdvance);
    }

    #[test]
    fn test_short_input_single_segment() {
        let tokens = [1, 50, 2, 100, 101];
        let segments = cut(&chunker(8, Some(TAGS), false), &tokens).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].tokens, tokens);

        let segments = cut(&chunker(8, Some(TAGS), true), &tokens).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].tokens, vec![1, 50, 2, 100, 101, 0, 0, 0]);
        assert_eq!(segments[0].padded, 3);
        assert_eq!(segments[0].content(), tokens);

        let segments = cut(&chunker(8, Some(TAGS), true), &[]).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].tokens, vec![0; 8]);
        assert_eq!(segments[0].padded, 8);
        assert!(segments[0].content().is_empty());

        for chunker in [chunker(8, Some(TAGS), false), chunker(8, None, false)] {
            let segments = cut(&chunker, &[]).unwrap();
            assert_eq!(segments.len(), 1);
            assert!(segments[0].is_empty());
        }
    }

    #[test]
    fn test_realign_then_carry() {
        let tokens = [1, 50, 2, 100, 101, 1, 51, 2, 102, 103, 104, 105, 106, 107];
        let segments = cut(&chunker(8, Some(TAGS), true), &tokens).unwrap();
        assert_eq!(segments.len(), 3);

        // The second turn starts inside the first window: restart there.
        assert_eq!(segments[0].tokens, tokens[..8]);
        assert_eq!(segments[1].start, 5);
        assert_eq!(segments[1].tokens, tokens[5..13]);

        // The second window is one open turn: its tag opens the last segment.
        assert_eq!(segments[2].start, 13);
        assert_eq!(segments[2].carried, 3);
        assert_eq!(segments[2].tokens, vec![1, 51, 2, 107, 0, 0, 0, 0]);
        assert_eq!(segments[2].content(), [107]);
    }

    #[test]
    fn test_cut_walks_back_to_word_start() {
        let tokens = [100, 1000, 1001, 101, 1002, 1003, 1004, 102, 1005, 103, 104, 105];
        let segments = cut(&chunker(5, Some(TAGS), false), &tokens).unwrap();
        let starts: Vec<usize> = segments.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![0, 3, 7]);
        assert_eq!(segments[1].tokens, tokens[3..8]);
        assert_eq!(segments[2].tokens, tokens[7..]);
    }

    #[test]
    fn test_carry_cut_walks_back_to_word_start() {
        // One open turn whose window ends inside the word 103.
        let tokens = [1, 50, 2, 100, 101, 102, 103, 1000, 1001, 104, 105];
        let segments = cut(&chunker(8, Some(TAGS), false), &tokens).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].tokens, tokens[..8]);
        assert_eq!(segments[1].start, 6);
        assert_eq!(segments[1].carried, 3);
        assert_eq!(segments[1].tokens, vec![1, 50, 2, 103, 1000, 1001, 104, 105]);
        assert_eq!(segments[1].content(), [103, 1000, 1001, 104, 105]);
    }

    #[test]
    fn test_stalled_cursor_is_fatal() {
        let tokens = [100, 1000, 1001, 1002, 1003, 1004, 1005];
        let err = cut(&chunker(3, Some(TAGS), false), &tokens).unwrap_err();
        assert!(matches!(err, PrepError::StalledCursor { previous: 0, next: 0 }));
    }

    #[test]
    fn test_naive_mode_drops_short_tail() {
        let tokens: Vec<u32> = (0..25).map(|i| 1000 + i).collect();
        let segments = cut(&chunker(10, None, true), &tokens).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].tokens, tokens[10..20]);

        let config = ChunkerConfig {
            min_tail_tokens: 1,
            pad_value: Some(0),
            ..ChunkerConfig::new(10)
        };
        let chunker = TurnAwareChunker::new(config, None).unwrap();
        let tokens: Vec<u32> = (0..32).map(|i| 1000 + i).collect();
        let segments = cut(&chunker, &tokens).unwrap();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[3].content(), [1030, 1031]);
        assert_eq!(segments[3].padded, 8);
    }

    #[test]
    fn test_segments_cover_input_without_gaps() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..20 {
            let mut tokens: Vec<u32> = Vec::new();
            while tokens.len() < 300 {
                if rng.gen_bool(0.08) {
                    tokens.extend([1, rng.gen_range(50..60), 2]);
                } else if rng.gen_bool(0.7) {
                    tokens.push(rng.gen_range(100..1000));
                } else {
                    tokens.push(rng.gen_range(1000..2000));
                }
            }

            let segments = cut(&chunker(16, Some(TAGS), true), &tokens).unwrap();
            assert!(segments.len() > 1);
            assert_eq!(segments[0].start, 0);
            for segment in &segments {
                assert_eq!(segment.len(), 16);
                let end = segment.start + segment.content().len();
                assert_eq!(segment.content(), &tokens[segment.start..end]);
            }
            for pair in segments.windows(2) {
                let previous_end = pair[0].start + pair[0].content().len();
                assert!(pair[1].start > pair[0].start);
                assert!(pair[1].start <= previous_end);
            }
            let last = segments.last().unwrap();
            assert_eq!(last.start + last.content().len(), tokens.len());
        }
    }
}
