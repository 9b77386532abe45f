//! Vector store provider trait for storing and searching embeddings

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::types::{RecordMetadata, VectorRecord};

/// Search result from vector store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMatch {
    /// Record id
    pub id: String,
    /// Similarity score, higher is more similar
    pub score: f32,
    /// Stored metadata, when the store returns it
    pub metadata: Option<RecordMetadata>,
}

/// Index-wide record counts
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStats {
    /// Records across all namespaces
    pub total_count: u64,
    /// Records per namespace
    pub namespaces: BTreeMap<String, u64>,
}

impl IndexStats {
    pub fn namespace_count(&self, namespace: &str) -> u64 {
        self.namespaces.get(namespace).copied().unwrap_or(0)
    }
}

/// Trait for vector storage and similarity search
///
/// Implementations:
/// - `PineconeStore`: Pinecone serverless index over REST
/// - `InMemoryVectorStore`: in-process store for local runs and tests
#[async_trait]
pub trait VectorStoreProvider: Send + Sync {
    /// Upsert a batch of records in one request, returning the number written
    async fn upsert_batch(&self, records: &[VectorRecord], namespace: &str) -> Result<usize>;

    /// Search for the `top_k` most similar records
    async fn query(&self, vector: &[f32], top_k: usize, namespace: &str) -> Result<Vec<QueryMatch>>;

    /// Record counts for the whole index
    async fn stats(&self) -> Result<IndexStats>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
