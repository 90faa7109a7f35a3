//! Word-length constrained generation: masks + primed prompt + SMC driver.

use crate::errors::{Result, SmcError};
use crate::inference::config::SmcConfig;
use crate::inference::context::PrimedPrompt;
use crate::inference::mask::ConstraintMasks;
use crate::inference::particle::WordLengthParticle;
use crate::inference::smc::{CancelFlag, SmcDriver, SmcOutput};
use crate::model::SequenceModel;
use std::sync::Arc;
use tracing::info;

/// Generator producing completions whose words are at most `max_word_len` characters.
pub struct ShortWordGenerator<M> {
    model: Arc<M>,
    masks: Arc<ConstraintMasks>,
    config: SmcConfig,
}

impl<M: SequenceModel> ShortWordGenerator<M> {
    /// Build the constraint masks once for the model's vocabulary.
    pub fn new(model: Arc<M>, config: SmcConfig) -> Result<Self> {
        config.validate()?;
        let masks = ConstraintMasks::build(
            model.vocabulary(),
            config.max_word_len,
            config.word_boundary,
        );
        let empty = masks.empty_buckets();
        info!(
            vocab_size = model.vocabulary().len(),
            buckets = masks.num_buckets(),
            empty_buckets = ?empty,
            "constraint masks built"
        );
        Ok(Self {
            model,
            masks: Arc::new(masks),
            config,
        })
    }

    pub fn masks(&self) -> &ConstraintMasks {
        &self.masks
    }

    pub fn config(&self) -> &SmcConfig {
        &self.config
    }

    /// Run SMC from prompt token ids.
    pub fn generate(&self, prompt_ids: &[usize]) -> Result<SmcOutput> {
        self.generate_with_cancel(prompt_ids, CancelFlag::new())
    }

    /// Run SMC from prompt token ids; `cancel` stops the run at the next round boundary.
    pub fn generate_with_cancel(&self, prompt_ids: &[usize], cancel: CancelFlag) -> Result<SmcOutput> {
        if prompt_ids.is_empty() {
            return Err(SmcError::EmptyPrompt);
        }
        let prompt = PrimedPrompt::new(Arc::clone(&self.model), prompt_ids.to_vec())?;
        let driver = SmcDriver::new(self.config.clone())?.with_cancel_flag(cancel);
        driver.run(|| {
            WordLengthParticle::new(
                &prompt,
                Arc::clone(&self.masks),
                self.config.max_tokens,
                self.config.empty_mask,
            )
        })
    }

    /// Encode `prompt` with the vocabulary's greedy matcher and run SMC.
    pub fn generate_text(&self, prompt: &str) -> Result<SmcOutput> {
        let ids = self.model.vocabulary().encode_greedy(prompt)?;
        self.generate(&ids)
    }
}
