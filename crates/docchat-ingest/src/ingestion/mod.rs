//! Text extraction and chunking

mod chunker;
mod extractor;

pub use chunker::{Cl100kTokenizer, TextChunker, Tokenizer};
pub use extractor::{LocalExtractor, TextExtractor};
