//! Generation context: one growing token sequence, its log-probability
//! accumulator and the shared sequence model.

use crate::errors::{Result, SmcError};
use crate::inference::mask::TokenSet;
use crate::model::SequenceModel;
use std::sync::Arc;

/// A prompt evaluated once; every context created from it reads the prompt's
/// next-token distribution from here instead of querying the model again.
pub struct PrimedPrompt<M> {
    model: Arc<M>,
    tokens: Arc<Vec<usize>>,
    text: Arc<str>,
    next_logprobs: Arc<Vec<f32>>,
}

impl<M> Clone for PrimedPrompt<M> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            tokens: Arc::clone(&self.tokens),
            text: Arc::clone(&self.text),
            next_logprobs: Arc::clone(&self.next_logprobs),
        }
    }
}

impl<M: SequenceModel> PrimedPrompt<M> {
    pub fn new(model: Arc<M>, prompt_ids: Vec<usize>) -> Result<Self> {
        if prompt_ids.is_empty() {
            return Err(SmcError::EmptyPrompt);
        }
        let text = model.vocabulary().decode(&prompt_ids)?;
        let next_logprobs = model.next_token_logprobs_shared(&prompt_ids)?;
        Ok(Self {
            model,
            tokens: Arc::new(prompt_ids),
            text: Arc::from(text),
            next_logprobs,
        })
    }

    pub fn model(&self) -> &Arc<M> {
        &self.model
    }

    pub fn tokens(&self) -> &[usize] {
        &self.tokens
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// One token sequence (prompt prefix + generated suffix) under a shared model.
///
/// Cloning forks the context: the copy owns its own sequence and accumulator.
pub struct LmContext<M> {
    model: Arc<M>,
    tokens: Vec<usize>,
    prompt_len: usize,
    text: String,
    prompt_text_len: usize,
    log_prob: f64,
    /// Next-token distribution for the current `tokens`; filled lazily, dropped on append.
    next_logprobs: Option<Arc<Vec<f32>>>,
}

impl<M> Clone for LmContext<M> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            tokens: self.tokens.clone(),
            prompt_len: self.prompt_len,
            text: self.text.clone(),
            prompt_text_len: self.prompt_text_len,
            log_prob: self.log_prob,
            next_logprobs: self.next_logprobs.clone(),
        }
    }
}

impl<M: SequenceModel> LmContext<M> {
    pub fn new(prompt: &PrimedPrompt<M>) -> Self {
        Self {
            model: Arc::clone(&prompt.model),
            tokens: prompt.tokens.as_ref().clone(),
            prompt_len: prompt.tokens.len(),
            text: prompt.text.to_string(),
            prompt_text_len: prompt.text.len(),
            log_prob: 0.0,
            next_logprobs: Some(Arc::clone(&prompt.next_logprobs)),
        }
    }

    /// Unconstrained next-token log-probabilities; queries the model at most
    /// once per appended token.
    pub fn next_token_logprobs(&mut self) -> Result<Arc<Vec<f32>>> {
        if let Some(cached) = &self.next_logprobs {
            return Ok(Arc::clone(cached));
        }
        let logprobs = self.model.next_token_logprobs_shared(&self.tokens)?;
        self.next_logprobs = Some(Arc::clone(&logprobs));
        Ok(logprobs)
    }

    /// Twisted next-token distribution: support exactly `mask`, renormalised
    /// over it by the model.
    pub fn masked_logprobs(&self, mask: &TokenSet) -> Result<Vec<(usize, f32)>> {
        self.model.restricted_logprobs(&self.tokens, mask)
    }

    /// Log-probability of `token` under the unconstrained next-token distribution.
    pub fn logprob_of(&mut self, token: usize) -> Result<f32> {
        self.next_token_logprobs()?
            .get(token)
            .copied()
            .ok_or(SmcError::InvalidToken(token))
    }

    /// Append one token, adding `logprob` to the accumulator.
    pub fn observe(&mut self, token: usize, logprob: f32) -> Result<()> {
        let piece = self.model.vocabulary().token(token)?;
        self.text.push_str(piece);
        self.tokens.push(token);
        self.log_prob += logprob as f64;
        self.next_logprobs = None;
        Ok(())
    }

    /// Full materialised text (prompt + generated).
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Materialised text generated after the prompt.
    pub fn completion(&self) -> &str {
        &self.text[self.prompt_text_len..]
    }

    pub fn tokens(&self) -> &[usize] {
        &self.tokens
    }

    pub fn generated(&self) -> &[usize] {
        &self.tokens[self.prompt_len..]
    }

    /// Sum of log-probabilities of the tokens generated through this context.
    pub fn log_prob(&self) -> f64 {
        self.log_prob
    }

    pub fn model(&self) -> &Arc<M> {
        &self.model
    }
}
