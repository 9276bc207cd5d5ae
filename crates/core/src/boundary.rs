//! Detection of the tokens that open and close a speaker tag.

use tracing::debug;

use crate::error::{PrepError, Result};
use crate::Tokenizer;

/// Token ids of the `[` opening and the `:]` closing a speaker tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagBoundary {
    pub prefix: u32,
    pub suffix: u32,
}

impl TagBoundary {
    /// Tokenize each exemplar tag and keep the tokens they all share at the
    /// start and at the end.
    ///
    /// The shared tokens must decode to `[` and `:]` and be a single token
    /// each; any other segmentation makes turn-aware cutting impossible.
    pub fn resolve<T: Tokenizer + ?Sized>(tokenizer: &T, renderings: &[&str]) -> Result<Self> {
        if renderings.is_empty() {
            return Err(PrepError::Config("no exemplar tag renderings given".to_string()));
        }
        let encoded = renderings
            .iter()
            .map(|r| tokenizer.encode(r, false, false))
            .collect::<Result<Vec<_>>>()?;

        let prefix = common_prefix(&encoded);
        let suffix = common_suffix(&encoded);
        for (side, tokens) in [("prefix", &prefix), ("suffix", &suffix)] {
            if tokens.is_empty() {
                return Err(PrepError::NoCommonTagTokens {
                    side,
                    renderings: renderings.iter().map(|r| r.to_string()).collect(),
                });
            }
        }

        for (side, tokens, expected) in [("prefix", &prefix, "["), ("suffix", &suffix, ":]")] {
            let actual = tokenizer.decode(tokens)?;
            if actual != expected {
                return Err(PrepError::UnexpectedTagDecoding {
                    side,
                    expected,
                    actual,
                    tokens: tokens.clone(),
                });
            }
        }

        match (prefix.as_slice(), suffix.as_slice()) {
            (&[prefix], &[suffix]) => {
                debug!(prefix, suffix, "resolved turn tag boundary tokens");
                Ok(Self { prefix, suffix })
            }
            _ => Err(PrepError::MultiTokenTagBoundary { prefix, suffix }),
        }
    }
}

/// Longest run of tokens shared by the start of every list.
pub fn common_prefix(lists: &[Vec<u32>]) -> Vec<u32> {
    let Some(first) = lists.first() else {
        return Vec::new();
    };
    let min_length = lists.iter().map(Vec::len).min().unwrap_or(0);
    let shared = (0..min_length)
        .take_while(|&i| lists[1..].iter().all(|l| l[i] == first[i]))
        .count();
    first[..shared].to_vec()
}

/// Longest run of tokens shared by the end of every list.
pub fn common_suffix(lists: &[Vec<u32>]) -> Vec<u32> {
    let reversed: Vec<Vec<u32>> = lists
        .iter()
        .map(|l| l.iter().rev().copied().collect())
        .collect();
    let mut suffix = common_prefix(&reversed);
    suffix.reverse();
    suffix
}
