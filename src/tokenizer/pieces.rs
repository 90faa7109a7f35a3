//! Vocabulary pieces as HuggingFace tokenizers store them, mapped back to the
//! text they stand for.
//!
//! Byte-level BPE vocabularies (GPT-2 style) spell every byte as a printable
//! code point, so `Ġ` is a space and `âĢĻ` is the three UTF-8 bytes of `’`.
//! Sentencepiece vocabularies mark spaces with `▁` and spell raw bytes as
//! `<0xNN>`. Word-length masks count characters, so pieces must be decoded
//! before masks are built.

use std::collections::HashMap;
use std::sync::OnceLock;

/// How a vocabulary spells its pieces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PieceFormat {
    ByteLevel,
    SentencePiece,
}

impl PieceFormat {
    /// Byte-level vocabularies spell the space as `Ġ` and never contain `▁`.
    pub fn detect<'a>(pieces: impl IntoIterator<Item = &'a str>) -> Self {
        let mut byte_level = false;
        for piece in pieces {
            if piece.contains('▁') {
                return PieceFormat::SentencePiece;
            }
            byte_level |= piece.contains('Ġ');
        }
        if byte_level {
            PieceFormat::ByteLevel
        } else {
            PieceFormat::SentencePiece
        }
    }

    pub fn decode(self, piece: &str) -> String {
        match self {
            PieceFormat::ByteLevel => decode_byte_level(piece),
            PieceFormat::SentencePiece => decode_sentencepiece(piece),
        }
    }
}

/// Code point -> byte table of byte-level BPE.
/// See https://github.com/openai/gpt-2/blob/master/src/encoder.py#L9
fn char_bytes() -> HashMap<char, u8> {
    let mut bs: Vec<u8> = vec![];
    bs.extend(b'!'..=b'~');
    bs.extend(b'\xA1'..=b'\xAC');
    bs.extend(b'\xAE'..=b'\xFF');

    let mut cs: Vec<u32> = bs.iter().map(|&b| b as u32).collect();
    let mut n = 0;
    for b in 0..=255u8 {
        if !bs.contains(&b) {
            bs.push(b);
            cs.push(256 + n);
            n += 1;
        }
    }

    bs.into_iter()
        .zip(cs)
        .filter_map(|(b, c)| char::from_u32(c).map(|c| (c, b)))
        .collect()
}

fn char_bytes_map() -> &'static HashMap<char, u8> {
    static MAP: OnceLock<HashMap<char, u8>> = OnceLock::new();
    MAP.get_or_init(char_bytes)
}

/// Restore the bytes a byte-level piece encodes and read them as UTF-8.
///
/// Characters outside the byte alphabet (added special tokens) keep their own
/// UTF-8 bytes. A piece holding part of a multi-byte character decodes to
/// U+FFFD, which no mask admits on its own.
pub fn decode_byte_level(piece: &str) -> String {
    let map = char_bytes_map();
    let mut bytes = Vec::with_capacity(piece.len());
    for c in piece.chars() {
        match map.get(&c) {
            Some(&b) => bytes.push(b),
            None => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// `▁` becomes a space; byte-fallback pieces become their ASCII character or
/// U+FFFD for a lone non-ASCII byte.
pub fn decode_sentencepiece(piece: &str) -> String {
    if let Some(hex) = piece.strip_prefix("<0x").and_then(|r| r.strip_suffix('>')) {
        if let Ok(byte) = u8::from_str_radix(hex, 16) {
            return if byte.is_ascii() {
                (byte as char).to_string()
            } else {
                char::REPLACEMENT_CHARACTER.to_string()
            };
        }
    }
    piece.replace('▁', " ")
}
