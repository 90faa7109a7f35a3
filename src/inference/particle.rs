//! Particles: weighted partial generations stepped by the SMC driver.

use crate::errors::{Result, SmcError};
use crate::inference::config::EmptyMaskPolicy;
use crate::inference::context::{LmContext, PrimedPrompt};
use crate::inference::mask::ConstraintMasks;
use crate::inference::sampling::sample_from_logprobs;
use crate::model::SequenceModel;
use rand::rngs::StdRng;
use std::sync::Arc;
use tracing::warn;

/// What the SMC driver needs from a particle. Implement this for another
/// constraint family and the driver runs it unchanged.
pub trait SmcModel: Clone + Send {
    /// Advance by one token. Must be a no-op once finished.
    fn step(&mut self, rng: &mut StdRng) -> Result<()>;

    fn is_finished(&self) -> bool;

    /// Full text of the sequence that defines this particle's output.
    fn materialized_text(&self) -> &str;

    /// Output text after the prompt.
    fn completion(&self) -> &str {
        self.materialized_text()
    }

    fn log_weight(&self) -> f64;

    fn set_log_weight(&mut self, log_weight: f64);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Active,
    Finished,
}

/// Word-length constrained particle.
///
/// `lm` is the true model context: it defines the output and the target
/// probability of each token. `proposal` is advanced in lock-step and only
/// shapes the next-token proposal, restricted to the active mask.
pub struct WordLengthParticle<M> {
    lm: LmContext<M>,
    proposal: LmContext<M>,
    masks: Arc<ConstraintMasks>,
    log_weight: f64,
    remaining: usize,
    steps: usize,
    status: Status,
    empty_mask: EmptyMaskPolicy,
}

impl<M> Clone for WordLengthParticle<M> {
    fn clone(&self) -> Self {
        Self {
            lm: self.lm.clone(),
            proposal: self.proposal.clone(),
            masks: Arc::clone(&self.masks),
            log_weight: self.log_weight,
            remaining: self.remaining,
            steps: self.steps,
            status: self.status,
            empty_mask: self.empty_mask,
        }
    }
}

impl<M: SequenceModel> WordLengthParticle<M> {
    pub fn new(
        prompt: &PrimedPrompt<M>,
        masks: Arc<ConstraintMasks>,
        max_tokens: usize,
        empty_mask: EmptyMaskPolicy,
    ) -> Result<Self> {
        if max_tokens == 0 {
            return Err(SmcError::InvalidConfig("max_tokens must be > 0".into()));
        }
        if empty_mask == EmptyMaskPolicy::Abort {
            masks.ensure_non_empty()?;
        }
        Ok(Self {
            lm: LmContext::new(prompt),
            proposal: LmContext::new(prompt),
            masks,
            log_weight: 0.0,
            remaining: max_tokens,
            steps: 0,
            status: Status::Active,
            empty_mask,
        })
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Number of tokens this particle has emitted.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn lm(&self) -> &LmContext<M> {
        &self.lm
    }

    pub fn proposal(&self) -> &LmContext<M> {
        &self.proposal
    }

    fn on_empty_mask(&mut self, err: SmcError) -> Result<()> {
        match self.empty_mask {
            EmptyMaskPolicy::Abort => Err(err),
            EmptyMaskPolicy::Finish => {
                warn!(error = %err, steps = self.steps, "finishing particle on empty mask");
                self.status = Status::Finished;
                Ok(())
            }
        }
    }
}

impl<M: SequenceModel> SmcModel for WordLengthParticle<M> {
    fn step(&mut self, rng: &mut StdRng) -> Result<()> {
        if self.status == Status::Finished {
            return Ok(());
        }

        let masks = Arc::clone(&self.masks);
        let mask = masks.active(self.lm.text());

        let proposal = match self.proposal.masked_logprobs(mask) {
            Ok(dist) => dist,
            Err(err @ SmcError::EmptyMask { .. }) => return self.on_empty_mask(err),
            Err(err) => return Err(err),
        };
        let (token, log_q) = sample_from_logprobs(&proposal, rng).ok_or(SmcError::EmptyMask {
            bucket: mask.bucket(),
        })?;

        let log_p = self.lm.logprob_of(token)?;
        self.lm.observe(token, log_p)?;
        self.proposal.observe(token, log_q)?;
        self.log_weight += log_p as f64 - log_q as f64;

        self.steps += 1;
        self.remaining -= 1;
        let eos = self.lm.model().vocabulary().eos_id();
        if token == eos || self.remaining == 0 {
            self.status = Status::Finished;
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.status == Status::Finished
    }

    fn materialized_text(&self) -> &str {
        self.lm.text()
    }

    fn completion(&self) -> &str {
        self.lm.completion()
    }

    fn log_weight(&self) -> f64 {
        self.log_weight
    }

    fn set_log_weight(&mut self, log_weight: f64) {
        self.log_weight = log_weight;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::mask::{TokenSet, WordBoundary, MAX_WORD_LEN};
    use crate::inference::sampling::log_sum_exp;
    use crate::model::{BigramModel, Vocabulary};
    use rand::SeedableRng;

    fn setup(tokens: &[&str], prompt: &[usize]) -> (PrimedPrompt<BigramModel>, Arc<ConstraintMasks>) {
        setup_with(tokens, prompt, WordBoundary::Alphabetic)
    }

    fn setup_with(
        tokens: &[&str],
        prompt: &[usize],
        boundary: WordBoundary,
    ) -> (PrimedPrompt<BigramModel>, Arc<ConstraintMasks>) {
        let vocab = Vocabulary::from_tokens(tokens, "<eos>").unwrap();
        let masks = Arc::new(ConstraintMasks::build(&vocab, MAX_WORD_LEN, boundary));
        let model = Arc::new(BigramModel::new(vocab, 17, 1.0));
        (PrimedPrompt::new(model, prompt.to_vec()).unwrap(), masks)
    }

    const TOKENS: &[&str] = &["<eos>", "a", "bb", "ccccc", " dd", ".", "\n", "long word"];

    #[test]
    fn test_step_advances_both_contexts() {
        let (prompt, masks) = setup(TOKENS, &[5]);
        let mut p = WordLengthParticle::new(&prompt, masks.clone(), 10, EmptyMaskPolicy::Abort).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..4 {
            let mut lm = p.lm().clone();
            let full = lm.next_token_logprobs().unwrap();
            let mask = masks.active(p.materialized_text()).clone();
            let mass = log_sum_exp(mask.iter().map(|id| full[id] as f64));
            let before = p.log_weight();

            p.step(&mut rng).unwrap();

            assert_eq!(p.lm().tokens(), p.proposal().tokens());
            let token = *p.lm().generated().last().unwrap();
            assert!(mask.contains(token));
            // same model on both sides: the increment is the mask's mass
            assert!((p.log_weight() - before - mass).abs() < 1e-4);
        }
        assert_eq!(p.steps(), 4);
        assert_eq!(p.remaining(), 6);
    }

    /// Bigram model whose restricted distribution puts all mass on the lowest allowed id.
    struct LowestAllowed(BigramModel);

    impl SequenceModel for LowestAllowed {
        fn vocabulary(&self) -> &Vocabulary {
            self.0.vocabulary()
        }

        fn next_token_logprobs(&self, tokens: &[usize]) -> Result<Vec<f32>> {
            self.0.next_token_logprobs(tokens)
        }

        fn restricted_logprobs(&self, _tokens: &[usize], allowed: &TokenSet) -> Result<Vec<(usize, f32)>> {
            allowed
                .iter()
                .next()
                .map(|id| vec![(id, 0.0)])
                .ok_or(SmcError::EmptyMask {
                    bucket: allowed.bucket(),
                })
        }
    }

    #[test]
    fn test_proposal_uses_model_restriction() {
        let vocab = Vocabulary::from_tokens(TOKENS, "<eos>").unwrap();
        let masks = Arc::new(ConstraintMasks::build(&vocab, MAX_WORD_LEN, WordBoundary::Alphabetic));
        let model = Arc::new(LowestAllowed(BigramModel::new(vocab, 17, 1.0)));
        let prompt = PrimedPrompt::new(model, vec![5]).unwrap();
        let mut p = WordLengthParticle::new(&prompt, masks.clone(), 3, EmptyMaskPolicy::Abort).unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        for _ in 0..3 {
            let lowest = masks.active(p.materialized_text()).iter().next().unwrap();
            let log_p = p.lm().clone().logprob_of(lowest).unwrap();
            let before = p.log_weight();

            p.step(&mut rng).unwrap();

            assert_eq!(*p.lm().generated().last().unwrap(), lowest);
            // log q = 0 for a point-mass proposal
            assert!((p.log_weight() - before - log_p as f64).abs() < 1e-6);
            assert_eq!(p.proposal().log_prob(), 0.0);
        }
        assert!(p.is_finished());
    }

    #[test]
    fn test_budget_finishes_particle() {
        let (prompt, masks) = setup(TOKENS, &[5]);
        let mut p = WordLengthParticle::new(&prompt, masks, 3, EmptyMaskPolicy::Abort).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        while !p.is_finished() {
            p.step(&mut rng).unwrap();
        }
        assert_eq!(p.steps(), 3);
        assert_eq!(p.remaining(), 0);

        let frozen = (p.completion().to_string(), p.log_weight());
        p.step(&mut rng).unwrap();
        assert_eq!((p.completion().to_string(), p.log_weight()), frozen);
    }

    #[test]
    fn test_words_stay_short() {
        // punctuation-led tokens only stay within the bound under the whitespace rule
        let (prompt, masks) = setup_with(TOKENS, &[4], WordBoundary::Whitespace);
        for seed in 0..20 {
            let mut p = WordLengthParticle::new(&prompt, masks.clone(), 12, EmptyMaskPolicy::Abort).unwrap();
            let mut rng = StdRng::seed_from_u64(seed);
            while !p.is_finished() {
                p.step(&mut rng).unwrap();
            }
            assert!(!p.completion().contains('\n'));
            for word in p.materialized_text().split_whitespace() {
                assert!(word.chars().count() <= MAX_WORD_LEN, "{:?}", p.materialized_text());
            }
        }
    }

    #[test]
    fn test_empty_bucket_policy() {
        let tokens = &["a", "bb", "ccccc", "\n", "<eos>"];
        let (prompt, masks) = setup(tokens, &[2]);
        assert!(matches!(
            WordLengthParticle::new(&prompt, masks.clone(), 5, EmptyMaskPolicy::Abort),
            Err(SmcError::EmptyMask { bucket: 5 })
        ));

        let mut p = WordLengthParticle::new(&prompt, masks, 5, EmptyMaskPolicy::Finish).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        p.step(&mut rng).unwrap();
        assert!(p.is_finished());
        assert_eq!(p.steps(), 0);
        assert_eq!(p.completion(), "");
    }

    #[test]
    fn test_zero_budget_rejected() {
        let (prompt, masks) = setup(TOKENS, &[5]);
        assert!(WordLengthParticle::new(&prompt, masks, 0, EmptyMaskPolicy::Abort).is_err());
    }
}
