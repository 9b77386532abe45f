//! Provider abstractions for embeddings, metadata generation and vector storage
//!
//! The ingestion pipeline only talks to these traits; concrete clients are
//! constructed once by the binary and injected.

pub mod annotator;
pub mod embedding;
pub mod memory;
pub mod openai;
pub mod pinecone;
pub mod vector_store;

pub use annotator::{MetadataAnnotator, NoopAnnotator};
pub use embedding::EmbeddingProvider;
pub use memory::InMemoryVectorStore;
pub use openai::{OpenAiAnnotator, OpenAiClient, OpenAiEmbedder};
pub use pinecone::PineconeStore;
pub use vector_store::{IndexStats, QueryMatch, VectorStoreProvider};
