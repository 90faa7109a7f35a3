//! Token vocabulary: ordered token strings plus the end-of-sequence id.

use crate::errors::{Result, SmcError};

/// Ordered vocabulary (token id -> materialised string).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    tokens: Vec<String>,
    eos_id: usize,
}

impl Vocabulary {
    pub fn new(tokens: Vec<String>, eos_id: usize) -> Result<Self> {
        if eos_id >= tokens.len() {
            return Err(SmcError::InvalidToken(eos_id));
        }
        Ok(Self { tokens, eos_id })
    }

    /// Build from string slices; `eos` must be one of the tokens.
    pub fn from_tokens(tokens: &[&str], eos: &str) -> Result<Self> {
        let eos_id = tokens
            .iter()
            .position(|t| *t == eos)
            .ok_or_else(|| SmcError::Tokenizer(format!("eos token {:?} not in vocabulary", eos)))?;
        Self::new(tokens.iter().map(|t| t.to_string()).collect(), eos_id)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn eos_id(&self) -> usize {
        self.eos_id
    }

    pub fn token(&self, id: usize) -> Result<&str> {
        self.tokens
            .get(id)
            .map(String::as_str)
            .ok_or(SmcError::InvalidToken(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.tokens.iter().enumerate().map(|(i, t)| (i, t.as_str()))
    }

    pub fn id_of(&self, token: &str) -> Option<usize> {
        self.tokens.iter().position(|t| t == token)
    }

    /// Materialise a token sequence by concatenating token strings.
    pub fn decode(&self, ids: &[usize]) -> Result<String> {
        let mut out = String::new();
        for &id in ids {
            out.push_str(self.token(id)?);
        }
        Ok(out)
    }

    /// Greedy longest-match encoding. Only meant for small built-in vocabularies;
    /// real prompts go through [`crate::tokenizer::PromptTokenizer`].
    pub fn encode_greedy(&self, text: &str) -> Result<Vec<usize>> {
        let mut ids = Vec::new();
        let mut rest = text;
        while !rest.is_empty() {
            let best = self
                .iter()
                .filter(|(id, t)| *id != self.eos_id && !t.is_empty() && rest.starts_with(*t))
                .max_by_key(|(_, t)| t.len());
            match best {
                Some((id, t)) => {
                    ids.push(id);
                    rest = &rest[t.len()..];
                }
                None => {
                    let c = rest.chars().next().unwrap_or(' ');
                    return Err(SmcError::Tokenizer(format!(
                        "no vocabulary entry covers {:?}",
                        c
                    )));
                }
            }
        }
        Ok(ids)
    }
}
