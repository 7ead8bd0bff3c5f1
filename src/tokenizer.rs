// src/tokenizer.rs

//! Text ⇄ token codecs with a designated end-of-turn marker

use anyhow::{anyhow, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::error::{ChatError, ChatResult};

pub const DEFAULT_END_MARKER: &str = "<|endoftext|>";

// ═════════════════════════════════════════════════════════════════════════════
// Codec interface
// ═════════════════════════════════════════════════════════════════════════════

/// Encoder/decoder consumed by the turn protocol.
///
/// `encode` never appends the marker; callers do that explicitly. `decode`
/// renders the marker as its literal text so decoded conversations can be
/// split on it.
pub trait TokenCodec {
    fn encode(&self, text: &str) -> ChatResult<Vec<u32>>;

    fn decode(&self, ids: &[u32]) -> ChatResult<String>;

    fn end_marker_token_id(&self) -> u32;

    fn end_marker_text(&self) -> &str;

    fn vocab_size(&self) -> usize;
}

// Marker literal inside user text would be read back as a turn boundary.
fn reject_marker_literal(text: &str, marker: &str) -> ChatResult<()> {
    if text.contains(marker) {
        return Err(ChatError::Encoding(format!(
            "text contains the reserved turn marker {marker:?}"
        )));
    }
    Ok(())
}

// ═════════════════════════════════════════════════════════════════════════════
// HuggingFace tokenizer.json
// ═════════════════════════════════════════════════════════════════════════════

pub struct DialogTokenizer {
    base_tokenizer: tokenizers::Tokenizer,
    end_marker: String,
    end_marker_id: u32,
    vocab_size: usize,
}

impl DialogTokenizer {
    /// Load tokenizer by pointing to tokenizer.json file OR a directory containing it.
    pub fn from_path(model_path: impl AsRef<Path>, end_marker: &str) -> Result<Self> {
        let path = model_path.as_ref();
        let resolved = resolve_tokenizer_file(path)?;
        let base = tokenizers::Tokenizer::from_file(&resolved)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {e}", resolved.display()))?;
        info!("Tokenizer: loaded {}", resolved.display());
        Self::with_base(base, end_marker)
    }

    /// From in-memory bytes of a tokenizer.json file.
    pub fn from_bytes(bytes: &[u8], end_marker: &str) -> Result<Self> {
        let base = tokenizers::Tokenizer::from_bytes(bytes)
            .map_err(|e| anyhow!("Failed to load tokenizer from bytes: {e}"))?;
        Self::with_base(base, end_marker)
    }

    pub fn with_base(mut base_tokenizer: tokenizers::Tokenizer, end_marker: &str) -> Result<Self> {
        if end_marker.is_empty() {
            return Err(anyhow!("End marker must not be empty"));
        }

        // GPT-2 vocabularies already carry <|endoftext|>; register it otherwise.
        let end_marker_id = match base_tokenizer.token_to_id(end_marker) {
            Some(id) => id,
            None => {
                debug!("Tokenizer: registering end marker {:?}", end_marker);
                base_tokenizer
                    .add_special_tokens(&[tokenizers::AddedToken::from(end_marker.to_string(), true)]);
                base_tokenizer
                    .token_to_id(end_marker)
                    .ok_or_else(|| anyhow!("End marker {end_marker:?} not found after registration"))?
            }
        };

        let vocab_size = base_tokenizer.get_vocab_size(true);
        info!(
            "Tokenizer: vocab_size={}, end_marker={:?} (id {})",
            vocab_size, end_marker, end_marker_id
        );

        Ok(Self {
            base_tokenizer,
            end_marker: end_marker.to_string(),
            end_marker_id,
            vocab_size,
        })
    }

    pub fn id_to_token(&self, id: u32) -> Option<String> {
        self.base_tokenizer.id_to_token(id)
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.base_tokenizer.token_to_id(token)
    }
}

impl TokenCodec for DialogTokenizer {
    fn encode(&self, text: &str) -> ChatResult<Vec<u32>> {
        reject_marker_literal(text, &self.end_marker)?;
        let encoding = self
            .base_tokenizer
            .encode(text, false)
            .map_err(|e| ChatError::Encoding(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> ChatResult<String> {
        self.base_tokenizer
            .decode(ids, false)
            .map_err(|e| ChatError::Encoding(format!("decoding failed: {e}")))
    }

    fn end_marker_token_id(&self) -> u32 {
        self.end_marker_id
    }

    fn end_marker_text(&self) -> &str {
        &self.end_marker
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

// Helper: resolve tokenizer.json from a file or directory path.
fn resolve_tokenizer_file(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if path.is_dir() {
        let candidate = path.join("tokenizer.json");
        if candidate.is_file() {
            return Ok(candidate);
        }
        return Err(anyhow!(
            "Directory '{}' does not contain tokenizer.json",
            path.display()
        ));
    }
    Err(anyhow!("Path '{}' not found", path.display()))
}

// ═════════════════════════════════════════════════════════════════════════════
// Byte-level codec
// ═════════════════════════════════════════════════════════════════════════════

/// One token per UTF-8 byte, plus a marker token after the byte range.
#[derive(Debug, Clone)]
pub struct ByteTokenizer {
    end_marker: String,
}

impl ByteTokenizer {
    pub const END_MARKER_ID: u32 = 256;
    pub const VOCAB_SIZE: usize = 257;

    pub fn new(end_marker: impl Into<String>) -> Self {
        Self {
            end_marker: end_marker.into(),
        }
    }
}

impl Default for ByteTokenizer {
    fn default() -> Self {
        Self::new(DEFAULT_END_MARKER)
    }
}

impl TokenCodec for ByteTokenizer {
    fn encode(&self, text: &str) -> ChatResult<Vec<u32>> {
        reject_marker_literal(text, &self.end_marker)?;
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32]) -> ChatResult<String> {
        let mut out = String::new();
        let mut run: Vec<u8> = Vec::new();
        for &id in ids {
            match id {
                Self::END_MARKER_ID => {
                    out.push_str(&String::from_utf8_lossy(&run));
                    out.push_str(&self.end_marker);
                    run.clear();
                }
                0..=255 => run.push(id as u8),
                _ => {
                    return Err(ChatError::Encoding(format!(
                        "token id {id} is outside the byte vocabulary"
                    )))
                }
            }
        }
        out.push_str(&String::from_utf8_lossy(&run));
        Ok(out)
    }

    fn end_marker_token_id(&self) -> u32 {
        Self::END_MARKER_ID
    }

    fn end_marker_text(&self) -> &str {
        &self.end_marker
    }

    fn vocab_size(&self) -> usize {
        Self::VOCAB_SIZE
    }
}

impl<T: TokenCodec + ?Sized> TokenCodec for &T {
    fn encode(&self, text: &str) -> ChatResult<Vec<u32>> {
        (**self).encode(text)
    }

    fn decode(&self, ids: &[u32]) -> ChatResult<String> {
        (**self).decode(ids)
    }

    fn end_marker_token_id(&self) -> u32 {
        (**self).end_marker_token_id()
    }

    fn end_marker_text(&self) -> &str {
        (**self).end_marker_text()
    }

    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }
}
