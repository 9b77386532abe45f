//! Token-bounded text chunking
//!
//! Text is split into fixed, non-overlapping token windows. Windows do not
//! respect sentence or paragraph boundaries: this keeps chunking a single
//! linear pass with predictable chunk sizes for the embedding model, at the
//! price of occasionally cutting a sentence in two.
//!
//! Byte-level tokens can end a window inside a multi-byte character. Such a
//! window is shortened to the last character boundary and the remaining
//! tokens open the next window, so every chunk decodes to valid text.

use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Converts text to model token ids and back
pub trait Tokenizer: Send + Sync {
    /// Encode text into token ids
    fn encode(&self, text: &str) -> Result<Vec<usize>>;

    /// Decode token ids back into text, failing on invalid UTF-8
    fn decode(&self, tokens: &[usize]) -> Result<String>;

    /// Decode token ids, replacing invalid UTF-8 sequences
    fn decode_lossy(&self, tokens: &[usize]) -> Result<String> {
        self.decode(tokens)
    }
}

/// Tokens a window may give back to reach a character boundary
const MAX_BOUNDARY_BACKOFF: usize = 8;

/// The `cl100k_base` encoding used by the OpenAI embedding models
pub struct Cl100kTokenizer {
    bpe: CoreBPE,
}

impl Cl100kTokenizer {
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| Error::internal(format!("Failed to load cl100k tokenizer: {}", e)))?;
        Ok(Self { bpe })
    }
}

impl Tokenizer for Cl100kTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<usize>> {
        Ok(self.bpe.encode_ordinary(text))
    }

    fn decode(&self, tokens: &[usize]) -> Result<String> {
        self.bpe
            .decode(tokens.to_vec())
            .map_err(|e| Error::internal(format!("Token decode failed: {}", e)))
    }

    fn decode_lossy(&self, tokens: &[usize]) -> Result<String> {
        let bytes = self.bpe._decode_native(tokens);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Splits extracted text into chunks of at most `max_tokens` tokens
pub struct TextChunker {
    tokenizer: Option<Arc<dyn Tokenizer>>,
    /// Maximum tokens per chunk
    max_tokens: usize,
    /// Chunk size in characters when tokenization is unavailable
    fallback_chars: usize,
}

impl TextChunker {
    /// Create a chunker backed by the `cl100k_base` tokenizer.
    ///
    /// If the tokenizer cannot be loaded the chunker still works, using
    /// character slicing for every document.
    pub fn new(max_tokens: usize, fallback_chars: usize) -> Self {
        let tokenizer = match Cl100kTokenizer::new() {
            Ok(tokenizer) => Some(Arc::new(tokenizer) as Arc<dyn Tokenizer>),
            Err(e) => {
                warn!("{}; chunking by characters instead", e);
                None
            }
        };

        Self {
            tokenizer,
            max_tokens: max_tokens.max(1),
            fallback_chars: fallback_chars.max(1),
        }
    }

    /// Create a chunker with a custom tokenizer
    pub fn with_tokenizer(
        tokenizer: Arc<dyn Tokenizer>,
        max_tokens: usize,
        fallback_chars: usize,
    ) -> Self {
        Self {
            tokenizer: Some(tokenizer),
            max_tokens: max_tokens.max(1),
            fallback_chars: fallback_chars.max(1),
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Chunk text into ordered segments. Never fails.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let Some(tokenizer) = &self.tokenizer else {
            return self.chunk_by_chars(text);
        };

        match self.chunk_by_tokens(tokenizer.as_ref(), text) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(
                    "Tokenization failed ({}), falling back to {}-character chunks",
                    e, self.fallback_chars
                );
                self.chunk_by_chars(text)
            }
        }
    }

    fn chunk_by_tokens(&self, tokenizer: &dyn Tokenizer, text: &str) -> Result<Vec<String>> {
        let tokens = tokenizer.encode(text)?;
        if tokens.len() <= self.max_tokens {
            return Ok(vec![text.to_string()]);
        }

        let mut chunks = Vec::with_capacity(tokens.len().div_ceil(self.max_tokens));
        let mut start = 0;
        while start < tokens.len() {
            let end = (start + self.max_tokens).min(tokens.len());
            let (chunk, next) = self.decode_window(tokenizer, &tokens, start, end)?;
            chunks.push(chunk);
            start = next;
        }

        debug!(
            "Split {} tokens into {} chunks of up to {}",
            tokens.len(),
            chunks.len(),
            self.max_tokens
        );
        Ok(chunks)
    }

    /// Decode `tokens[start..end]`, ending early at a character boundary if
    /// needed. Returns the text and the index where the next window starts.
    fn decode_window(
        &self,
        tokenizer: &dyn Tokenizer,
        tokens: &[usize],
        start: usize,
        end: usize,
    ) -> Result<(String, usize)> {
        for cut in (start + 1..=end).rev().take(MAX_BOUNDARY_BACKOFF + 1) {
            if let Ok(text) = tokenizer.decode(&tokens[start..cut]) {
                return Ok((text, cut));
            }
        }

        debug!(
            "No character boundary near tokens {}..{}, decoding lossily",
            start, end
        );
        Ok((tokenizer.decode_lossy(&tokens[start..end])?, end))
    }

    fn chunk_by_chars(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= self.fallback_chars {
            return vec![text.to_string()];
        }

        chars
            .chunks(self.fallback_chars)
            .map(|window| window.iter().collect())
            .collect()
    }
}
