//! Tokenizer integration: prompt encoding and vocabulary extraction.

pub mod pieces;

pub use pieces::PieceFormat;

use crate::errors::{Result, SmcError};
use crate::model::Vocabulary;
use std::path::Path;

/// Wrapper around HuggingFace tokenizers for prompt text and vocabulary loading.
pub struct PromptTokenizer {
    tokenizer: tokenizers::Tokenizer,
}

impl PromptTokenizer {
    /// Load tokenizer from a JSON file (e.g. tokenizer.json).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let tokenizer = tokenizers::Tokenizer::from_file(path.as_ref())
            .map_err(|e| SmcError::Tokenizer(e.to_string()))?;
        Ok(Self { tokenizer })
    }

    /// Encode text to token IDs.
    pub fn encode(&self, text: &str) -> Result<Vec<usize>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| SmcError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().iter().map(|&id| id as usize).collect())
    }

    /// Vocabulary in id order with pieces materialised as plain text.
    pub fn vocabulary(&self, eos_token: &str) -> Result<Vocabulary> {
        let size = self.tokenizer.get_vocab_size(true);
        let pieces: Vec<Option<String>> = (0..size)
            .map(|id| self.tokenizer.id_to_token(id as u32))
            .collect();
        let eos_id = self
            .tokenizer
            .token_to_id(eos_token)
            .ok_or_else(|| SmcError::Tokenizer(format!("unknown eos token {:?}", eos_token)))?;
        vocabulary_from_pieces(pieces, eos_id as usize)
    }
}

/// Build a vocabulary from raw tokenizer pieces, decoding each piece to the
/// text it stands for. Ids without a piece become empty strings, which no
/// constraint mask ever admits. The eos piece is kept verbatim.
pub fn vocabulary_from_pieces(pieces: Vec<Option<String>>, eos_id: usize) -> Result<Vocabulary> {
    let format = PieceFormat::detect(pieces.iter().flatten().map(String::as_str));
    let tokens = pieces
        .into_iter()
        .enumerate()
        .map(|(id, piece)| match piece {
            Some(raw) if id == eos_id => raw,
            Some(raw) => format.decode(&raw),
            None => String::new(),
        })
        .collect();
    Vocabulary::new(tokens, eos_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::mask::ConstraintMasks;

    #[test]
    fn test_sentencepiece_vocabulary() {
        let pieces = vec![
            Some("</s>".to_string()),
            Some("▁the".to_string()),
            None,
            Some("<0x0A>".to_string()),
            Some("▁cat".to_string()),
        ];
        let vocab = vocabulary_from_pieces(pieces, 0).unwrap();
        assert_eq!(vocab.token(0).unwrap(), "</s>");
        assert_eq!(vocab.token(1).unwrap(), " the");
        assert_eq!(vocab.token(2).unwrap(), "");
        assert_eq!(vocab.token(3).unwrap(), "\n");
        assert_eq!(vocab.token(4).unwrap(), " cat");

        let masks = ConstraintMasks::for_vocabulary(&vocab);
        assert!(!masks.bucket(0).contains(2));
        assert!(!masks.bucket(0).contains(3));
        assert!(masks.bucket(5).contains(1));
    }

    #[test]
    fn test_byte_level_vocabulary_lengths() {
        let pieces = vec![
            Some("<|endoftext|>".to_string()),
            Some("ĠcafÃ©".to_string()),
            Some("Ċ".to_string()),
            Some("âĢĻs".to_string()),
            Some("cafÃ©s".to_string()),
        ];
        let vocab = vocabulary_from_pieces(pieces, 0).unwrap();
        assert_eq!(vocab.token(0).unwrap(), "<|endoftext|>");
        assert_eq!(vocab.token(1).unwrap(), " café");
        assert_eq!(vocab.token(2).unwrap(), "\n");
        assert_eq!(vocab.token(3).unwrap(), "\u{2019}s");

        let masks = ConstraintMasks::for_vocabulary(&vocab);
        // " café" is four characters after the space, not five bytes
        assert!(masks.bucket(5).contains(1));
        assert!(!masks.bucket(0).contains(2));
        // "cafés" fills a fresh word exactly
        assert!(masks.bucket(0).contains(4));
        assert!(!masks.bucket(1).contains(4));
    }

    #[test]
    fn test_eos_out_of_range() {
        assert!(vocabulary_from_pieces(vec![Some("a".into())], 3).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(PromptTokenizer::from_file("/nonexistent/tokenizer.json").is_err());
    }
}
