//! Sequence-model collaborator: the contract the SMC core consumes, plus
//! in-crate implementations (demo bigram model, memoising cache, dynamic batcher).

pub mod batch;
pub mod bigram;
pub mod cached;
pub mod vocab;

pub use batch::{spawn_batcher, BatchClient, BatchRequest, DynamicBatcher};
pub use bigram::{create_demo_model_seeded, BigramModel, DEMO_TOKENS};
pub use cached::CachedModel;
pub use vocab::Vocabulary;

use crate::errors::{Result, SmcError};
use crate::inference::mask::TokenSet;
use crate::inference::sampling::log_sum_exp;
use std::sync::Arc;

/// Autoregressive next-token model. Read-only after construction and shared by
/// `Arc` between every generation context.
pub trait SequenceModel: Send + Sync {
    fn vocabulary(&self) -> &Vocabulary;

    /// Log-probabilities over the whole vocabulary for the token after `tokens`.
    fn next_token_logprobs(&self, tokens: &[usize]) -> Result<Vec<f32>>;

    /// Same distribution behind an `Arc`, so callers that keep it (generation
    /// contexts, caches) share one allocation.
    fn next_token_logprobs_shared(&self, tokens: &[usize]) -> Result<Arc<Vec<f32>>> {
        Ok(Arc::new(self.next_token_logprobs(tokens)?))
    }

    /// One collective call for several sequences.
    fn next_token_logprobs_batch(&self, batch: &[Vec<usize>]) -> Result<Vec<Vec<f32>>> {
        batch
            .iter()
            .map(|seq| self.next_token_logprobs(seq))
            .collect()
    }

    /// Next-token distribution restricted to `allowed` and renormalised over it.
    fn restricted_logprobs(&self, tokens: &[usize], allowed: &TokenSet) -> Result<Vec<(usize, f32)>> {
        let full = self.next_token_logprobs_shared(tokens)?;
        restrict(&full, allowed)
    }
}

impl<M: SequenceModel + ?Sized> SequenceModel for Arc<M> {
    fn vocabulary(&self) -> &Vocabulary {
        (**self).vocabulary()
    }

    fn next_token_logprobs(&self, tokens: &[usize]) -> Result<Vec<f32>> {
        (**self).next_token_logprobs(tokens)
    }

    fn next_token_logprobs_shared(&self, tokens: &[usize]) -> Result<Arc<Vec<f32>>> {
        (**self).next_token_logprobs_shared(tokens)
    }

    fn next_token_logprobs_batch(&self, batch: &[Vec<usize>]) -> Result<Vec<Vec<f32>>> {
        (**self).next_token_logprobs_batch(batch)
    }

    fn restricted_logprobs(&self, tokens: &[usize], allowed: &TokenSet) -> Result<Vec<(usize, f32)>> {
        (**self).restricted_logprobs(tokens, allowed)
    }
}

/// Renormalise a full log-distribution over the ids in `allowed`.
///
/// Fails with `EmptyMask` when `allowed` is empty or carries no probability mass.
pub fn restrict(logprobs: &[f32], allowed: &TokenSet) -> Result<Vec<(usize, f32)>> {
    let support: Vec<(usize, f32)> = allowed
        .iter()
        .filter_map(|id| logprobs.get(id).map(|&lp| (id, lp)))
        .collect();
    let mass = log_sum_exp(support.iter().map(|(_, lp)| *lp as f64));
    if support.is_empty() || !mass.is_finite() {
        return Err(SmcError::EmptyMask {
            bucket: allowed.bucket(),
        });
    }
    Ok(support
        .into_iter()
        .map(|(id, lp)| (id, (lp as f64 - mass) as f32))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restrict_renormalises() {
        let logprobs = vec![(0.5f32).ln(), (0.25f32).ln(), (0.25f32).ln()];
        let allowed = TokenSet::from_ids(1, 3, [1, 2]);
        let r = restrict(&logprobs, &allowed).unwrap();
        assert_eq!(r.len(), 2);
        for (_, lp) in &r {
            assert!((lp.exp() - 0.5).abs() < 1e-5);
        }
    }

    #[test]
    fn test_restrict_empty_fails() {
        let logprobs = vec![0.0f32, f32::NEG_INFINITY];
        let allowed = TokenSet::from_ids(4, 2, [1]);
        match restrict(&logprobs, &allowed) {
            Err(SmcError::EmptyMask { bucket }) => assert_eq!(bucket, 4),
            other => panic!("expected EmptyMask, got {:?}", other),
        }
        let none = TokenSet::from_ids(2, 2, []);
        assert!(restrict(&logprobs, &none).is_err());
    }
}
