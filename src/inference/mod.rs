//! Constrained generation: masks, generation contexts, particles and the SMC driver.

pub mod config;
pub mod context;
pub mod generator;
pub mod mask;
pub mod particle;
pub mod sampling;
pub mod smc;

pub use config::{EmptyMaskPolicy, Execution, ResamplingScheme, SmcConfig};
pub use context::{LmContext, PrimedPrompt};
pub use generator::ShortWordGenerator;
pub use mask::{active_bucket, ConstraintMasks, TokenSet, WordBoundary, MAX_WORD_LEN};
pub use particle::{SmcModel, Status, WordLengthParticle};
pub use smc::{
    smc_standard, CancelFlag, Population, RoundSummary, SmcDriver, SmcOutput, WeightedCompletion,
};
