//! Deterministic demo model: hashed bigram logits over any vocabulary (for tests and demos).

use super::{SequenceModel, Vocabulary};
use crate::errors::{Result, SmcError};
use crate::inference::sampling::log_softmax;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Built-in vocabulary for the demo model: short words, space-led words,
/// punctuation, a few long words, newline and `<eos>`.
pub const DEMO_TOKENS: &[&str] = &[
    "<eos>", "\n", " ", ".", ",", "!", "?", "-", "'s", "a", "an", "the", "is", "it", "to",
    "of", "in", "on", "and", "but", "we", "they", "new", "vote", "news", "Senate", "House",
    "memo", "party", "chair", "ing", "ed", "er", "s", " a", " an", " the", " is", " it", " to",
    " of", " in", " on", " and", " but", " we", " they", " new", " vote", " news", " party",
    " chair", " House", " Senate", " memo", " week", " bust", " push", " back", " early",
    " senators", " impeachment", " retirement", "ation", "ment", "1", "2", "3", "\"", ":",
];

/// Bigram model whose logits are a seeded hash of (previous token, next token)
/// plus a per-token unigram bias. O(|V|) per query; no table is stored.
#[derive(Debug, Clone)]
pub struct BigramModel {
    vocab: Vocabulary,
    seed: u64,
    temperature: f32,
    unigram: Vec<f32>,
}

impl BigramModel {
    pub fn new(vocab: Vocabulary, seed: u64, temperature: f32) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let unigram = (0..vocab.len())
            .map(|_| rng.gen_range(-1.0f32..=1.0f32))
            .collect();
        Self {
            vocab,
            seed,
            temperature: temperature.max(1e-6),
            unigram,
        }
    }

    fn logit(&self, prev: usize, next: usize) -> f32 {
        let h = splitmix64(self.seed ^ (prev as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ next as u64);
        // top 24 bits -> [-1, 1)
        let u = (h >> 40) as f32 / (1u64 << 23) as f32 - 1.0;
        (2.0 * u + self.unigram[next]) / self.temperature
    }
}

impl SequenceModel for BigramModel {
    fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    fn next_token_logprobs(&self, tokens: &[usize]) -> Result<Vec<f32>> {
        let prev = match tokens.last() {
            Some(&id) if id >= self.vocab.len() => return Err(SmcError::InvalidToken(id)),
            Some(&id) => id,
            None => usize::MAX,
        };
        let logits: Vec<f32> = (0..self.vocab.len()).map(|t| self.logit(prev, t)).collect();
        Ok(log_softmax(&logits))
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Create a deterministic demo model over [`DEMO_TOKENS`] from a seed.
pub fn create_demo_model_seeded(seed: u64) -> Result<BigramModel> {
    let vocab = Vocabulary::from_tokens(DEMO_TOKENS, "<eos>")?;
    Ok(BigramModel::new(vocab, seed, 1.0))
}
