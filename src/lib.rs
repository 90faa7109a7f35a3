//! # smc-oxidized
//!
//! Constrained text generation from an autoregressive sequence model, steered by
//! sequential Monte Carlo rather than rejection.
//!
//! ## Architecture
//!
//! - **Constraint masks**: per in-progress word length, the tokens that keep every
//!   whitespace-delimited word at most five characters
//! - **Generation contexts**: a token sequence, its log-probability and the shared model
//! - **Particles**: a true-model context plus a proposal context restricted to the
//!   active mask (twisted proposal), with an importance log-weight
//! - **SMC driver**: steps the population, normalises with log-sum-exp and resamples
//! - **Model collaborators**: the [`SequenceModel`] contract, a seeded demo model,
//!   a memoising prefix cache and a dynamic batcher

pub mod errors;
pub mod inference;
pub mod model;
pub mod tokenizer;
pub mod utils;

pub use errors::{Result, SmcError};
pub use inference::{
    active_bucket, smc_standard, CancelFlag, ConstraintMasks, EmptyMaskPolicy, Execution,
    LmContext, Population, PrimedPrompt, ResamplingScheme, ShortWordGenerator, SmcConfig,
    SmcDriver, SmcModel, SmcOutput, TokenSet, WeightedCompletion, WordBoundary,
    WordLengthParticle, MAX_WORD_LEN,
};
pub use model::{
    create_demo_model_seeded, spawn_batcher, BatchClient, BigramModel, CachedModel,
    SequenceModel, Vocabulary,
};
pub use tokenizer::PromptTokenizer;
pub use utils::{effective_sample_size, RunMetrics};
