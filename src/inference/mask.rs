//! Word-length constraint masks: per in-progress word length, the set of token
//! ids that may come next.
//!
//! Masks are a pure function of the vocabulary (including its end-of-sequence
//! id), the maximum word length and the word-boundary rule. They are built once
//! and shared read-only by every particle.

use crate::errors::{Result, SmcError};
use crate::model::Vocabulary;
use serde::{Deserialize, Serialize};

/// Default maximum number of characters per whitespace-delimited word.
pub const MAX_WORD_LEN: usize = 5;

/// Which tokens are treated as continuing the word in progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordBoundary {
    /// Only tokens whose first character is alphabetic extend the current word;
    /// punctuation-led tokens are assumed to start fresh.
    #[default]
    Alphabetic,
    /// Every token that does not begin with whitespace extends the current word
    /// by its characters up to the first whitespace.
    Whitespace,
}

/// Allowed-tokens set for one bucket: sorted ids plus a membership bitmap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenSet {
    bucket: usize,
    ids: Vec<usize>,
    member: Vec<bool>,
}

impl TokenSet {
    pub fn from_ids(bucket: usize, vocab_len: usize, ids: impl IntoIterator<Item = usize>) -> Self {
        let mut member = vec![false; vocab_len];
        for id in ids {
            if id < vocab_len {
                member[id] = true;
            }
        }
        let ids = member
            .iter()
            .enumerate()
            .filter(|(_, &m)| m)
            .map(|(i, _)| i)
            .collect();
        Self { bucket, ids, member }
    }

    /// Bucket index this set was built for.
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    pub fn contains(&self, id: usize) -> bool {
        self.member.get(id).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> std::iter::Copied<std::slice::Iter<'_, usize>> {
        self.ids.iter().copied()
    }
}

/// Masks for buckets `0..=max_word_len`; the last bucket means "max or more".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstraintMasks {
    buckets: Vec<TokenSet>,
    max_word_len: usize,
    boundary: WordBoundary,
}

impl ConstraintMasks {
    pub fn build(vocab: &Vocabulary, max_word_len: usize, boundary: WordBoundary) -> Self {
        let buckets = (0..=max_word_len)
            .map(|bucket| {
                let ids = vocab.iter().filter_map(|(id, token)| {
                    let ok = id != vocab.eos_id()
                        && is_eligible(token, bucket, max_word_len, boundary);
                    ok.then_some(id)
                });
                TokenSet::from_ids(bucket, vocab.len(), ids)
            })
            .collect();
        Self {
            buckets,
            max_word_len,
            boundary,
        }
    }

    /// Masks with the default word length and boundary rule.
    pub fn for_vocabulary(vocab: &Vocabulary) -> Self {
        Self::build(vocab, MAX_WORD_LEN, WordBoundary::default())
    }

    pub fn max_word_len(&self) -> usize {
        self.max_word_len
    }

    pub fn boundary(&self) -> WordBoundary {
        self.boundary
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket(&self, index: usize) -> &TokenSet {
        &self.buckets[index.min(self.max_word_len)]
    }

    /// Mask for the word in progress at the end of `text`.
    pub fn active(&self, text: &str) -> &TokenSet {
        self.bucket(active_bucket(text, self.max_word_len))
    }

    pub fn empty_buckets(&self) -> Vec<usize> {
        self.buckets
            .iter()
            .filter(|b| b.is_empty())
            .map(TokenSet::bucket)
            .collect()
    }

    /// Fail with `EmptyMask` naming the first bucket without support.
    pub fn ensure_non_empty(&self) -> Result<()> {
        match self.empty_buckets().first() {
            Some(&bucket) => Err(SmcError::EmptyMask { bucket }),
            None => Ok(()),
        }
    }
}

/// Character length of the last whitespace-delimited word, capped at `max_word_len`.
pub fn active_bucket(text: &str, max_word_len: usize) -> usize {
    text.split_whitespace()
        .last()
        .map(|w| w.chars().count())
        .unwrap_or(0)
        .min(max_word_len)
}

/// Whether `token` (never the eos token) may follow a word of length `bucket`.
pub fn is_eligible(token: &str, bucket: usize, max_word_len: usize, boundary: WordBoundary) -> bool {
    if token.contains('\n') {
        return false;
    }
    if !token
        .chars()
        .any(|c| c.is_alphanumeric() || c.is_ascii_punctuation())
    {
        return false;
    }
    if token.trim().chars().count() > max_word_len {
        return false;
    }
    let Some(first) = token.chars().next() else {
        return false;
    };
    match boundary {
        WordBoundary::Alphabetic if first.is_alphabetic() => {
            bucket + token.chars().count() <= max_word_len
        }
        WordBoundary::Whitespace if !first.is_whitespace() => {
            bucket + token.chars().take_while(|c| !c.is_whitespace()).count() <= max_word_len
        }
        _ => true,
    }
}
