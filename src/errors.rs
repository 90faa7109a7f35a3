//! Central error types for smc-oxidized.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmcError {
    #[error("Constraint bucket {bucket} has no eligible tokens")]
    EmptyMask { bucket: usize },

    #[error("Particle weights degenerated: log-sum-exp is {log_sum_exp}")]
    DegenerateWeights { log_sum_exp: f64 },

    #[error("Sequence model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Token {0} out of vocabulary range")]
    InvalidToken(usize),

    #[error("Prompt must contain at least one token")]
    EmptyPrompt,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config parse error: {0}")]
    Config(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, SmcError>;
