//! In-process vector store for local runs and tests

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::types::{RecordMetadata, VectorRecord};

use super::vector_store::{IndexStats, QueryMatch, VectorStoreProvider};

/// Namespaced vector store held in memory, queried by cosine similarity
#[derive(Default)]
pub struct InMemoryVectorStore {
    namespaces: RwLock<HashMap<String, BTreeMap<String, VectorRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored records for one file across namespaces, ordered by chunk id
    pub fn records_for_file(&self, filename: &str) -> Vec<RecordMetadata> {
        let namespaces = self.namespaces.read();
        let mut records: Vec<RecordMetadata> = namespaces
            .values()
            .flat_map(|records| records.values())
            .filter(|record| record.metadata.filename == filename)
            .map(|record| record.metadata.clone())
            .collect();
        records.sort_by_key(|m| m.chunk_id);
        records
    }

    pub fn len(&self) -> usize {
        self.namespaces.read().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStoreProvider for InMemoryVectorStore {
    async fn upsert_batch(&self, records: &[VectorRecord], namespace: &str) -> Result<usize> {
        if let Some(bad) = records.iter().find(|r| r.values.is_empty()) {
            return Err(Error::vector_store_rejected(format!(
                "Record {} has an empty vector",
                bad.id
            )));
        }

        let mut namespaces = self.namespaces.write();
        let target = namespaces.entry(namespace.to_string()).or_default();
        for record in records {
            target.insert(record.id.clone(), record.clone());
        }
        Ok(records.len())
    }

    async fn query(&self, vector: &[f32], top_k: usize, namespace: &str) -> Result<Vec<QueryMatch>> {
        let namespaces = self.namespaces.read();
        let Some(records) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<QueryMatch> = records
            .values()
            .map(|record| QueryMatch {
                id: record.id.clone(),
                score: cosine_similarity(vector, &record.values),
                metadata: Some(record.metadata.clone()),
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn stats(&self) -> Result<IndexStats> {
        let namespaces = self.namespaces.read();
        let counts: BTreeMap<String, u64> = namespaces
            .iter()
            .map(|(name, records)| (name.clone(), records.len() as u64))
            .collect();

        Ok(IndexStats {
            total_count: counts.values().sum(),
            namespaces: counts,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}
