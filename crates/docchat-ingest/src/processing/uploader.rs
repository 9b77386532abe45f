//! Batched embedding and vector upsert for one file's chunks

use std::sync::Arc;
use std::time::Duration;

use crate::config::IngestConfig;
use crate::error::Result;
use crate::providers::{EmbeddingProvider, VectorStoreProvider};
use crate::types::{BaseMetadata, Chunk, TaskStatus, VectorRecord};

use super::retry::RetryPolicy;
use super::status_store::StatusStore;

/// Whole-file progress range reserved for uploading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSpan {
    pub start: u32,
    pub end: u32,
}

impl Default for ProgressSpan {
    fn default() -> Self {
        Self { start: 40, end: 90 }
    }
}

impl ProgressSpan {
    /// Progress after `done` of `total` chunks
    pub fn at(&self, done: usize, total: usize) -> u32 {
        if total == 0 {
            return self.end;
        }
        let width = u64::from(self.end.saturating_sub(self.start));
        let advanced = width * done.min(total) as u64 / total as u64;
        self.start + advanced as u32
    }
}

/// Result of uploading one file's chunks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Records confirmed by the vector store
    pub records_stored: usize,
    /// Chunks handed to the uploader
    pub total_chunks: usize,
    /// Chunk indices that produced no vector
    pub failed_chunks: Vec<usize>,
    /// Batches whose upsert failed after retries
    pub failed_batches: usize,
}

/// Drives embedding and batched upsert with retry, reporting partial success
pub struct BatchUploader {
    embedder: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStoreProvider>,
    status: Arc<StatusStore>,
    retry: RetryPolicy,
    batch_size: usize,
    batch_delay: Duration,
    namespace: String,
}

impl BatchUploader {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStoreProvider>,
        status: Arc<StatusStore>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            status,
            retry: RetryPolicy::from(&config.retry),
            batch_size: config.upload.batch_size.max(1),
            batch_delay: config.upload.batch_delay(),
            namespace: config.upload.namespace.clone(),
        }
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Embed and store `chunks` in batches.
    ///
    /// A chunk whose embedding fails after retries is skipped and recorded
    /// once in the task's error log; a failed batch upsert is logged and the
    /// next batch proceeds. Only fatal errors (bad credentials or
    /// configuration) are returned.
    pub async fn upload(
        &self,
        filename: &str,
        chunks: &[String],
        base: &BaseMetadata,
        span: ProgressSpan,
    ) -> Result<UploadOutcome> {
        let total = chunks.len();
        let mut outcome = UploadOutcome {
            total_chunks: total,
            ..Default::default()
        };
        if total == 0 {
            return Ok(outcome);
        }

        let batch_count = total.div_ceil(self.batch_size);

        for (batch_idx, batch) in chunks.chunks(self.batch_size).enumerate() {
            let batch_no = batch_idx + 1;
            let first_index = batch_idx * self.batch_size;
            let done_before = first_index;

            self.status.update(
                filename,
                TaskStatus::Processing,
                span.at(done_before, total),
                Some(&format!("Processing batch {} of {}", batch_no, batch_count)),
                None,
            );

            let mut records = Vec::with_capacity(batch.len());
            for (offset, text) in batch.iter().enumerate() {
                let chunk = Chunk::new(first_index + offset, text.as_str());
                match self.embed_chunk(&chunk).await {
                    Ok(values) if !values.is_empty() => records.push(VectorRecord {
                        id: uuid::Uuid::new_v4().to_string(),
                        values,
                        metadata: base.for_chunk(&chunk),
                    }),
                    Ok(_) => {
                        tracing::warn!("[{}] Empty embedding for chunk {}", filename, chunk.index);
                        self.record_chunk_failure(filename, &chunk, "empty embedding", span, total);
                        outcome.failed_chunks.push(chunk.index);
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::error!("[{}] Error processing chunk {}: {}", filename, chunk.index, e);
                        self.record_chunk_failure(filename, &chunk, &e.to_string(), span, total);
                        outcome.failed_chunks.push(chunk.index);
                    }
                }
            }

            let done_after = first_index + batch.len();
            if !records.is_empty() {
                match self.store_batch(&records).await {
                    Ok(stored) => {
                        outcome.records_stored += stored.min(records.len());
                        self.status.set_chunk_count(filename, outcome.records_stored);
                        tracing::info!(
                            "[{}] Stored batch {}/{} ({} vectors)",
                            filename,
                            batch_no,
                            batch_count,
                            stored
                        );
                        self.status.update(
                            filename,
                            TaskStatus::Processing,
                            span.at(done_after, total),
                            Some(&format!(
                                "Stored batch {} ({} vectors), total stored: {}",
                                batch_no, stored, outcome.records_stored
                            )),
                            None,
                        );
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::error!("[{}] Error upserting batch {}: {}", filename, batch_no, e);
                        outcome.failed_batches += 1;
                        self.status.update(
                            filename,
                            TaskStatus::Processing,
                            span.at(done_after, total),
                            Some(&format!("Error: Failed to store batch {}", batch_no)),
                            Some(&format!("Failed to store batch {}: {}", batch_no, e)),
                        );
                    }
                }
            } else {
                self.status.update(
                    filename,
                    TaskStatus::Processing,
                    span.at(done_after, total),
                    Some(&format!("Batch {} produced no vectors", batch_no)),
                    None,
                );
            }

            if batch_no < batch_count && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        Ok(outcome)
    }

    async fn embed_chunk(&self, chunk: &Chunk) -> Result<Vec<f32>> {
        let operation = format!("embed chunk {}", chunk.index);
        self.retry
            .run(&operation, || self.embedder.embed(&chunk.text))
            .await
    }

    async fn store_batch(&self, records: &[VectorRecord]) -> Result<usize> {
        self.retry
            .run("upsert batch", || {
                self.vector_store.upsert_batch(records, &self.namespace)
            })
            .await
    }

    fn record_chunk_failure(
        &self,
        filename: &str,
        chunk: &Chunk,
        reason: &str,
        span: ProgressSpan,
        total: usize,
    ) {
        self.status.update(
            filename,
            TaskStatus::Processing,
            span.at(chunk.index, total),
            Some(&format!("Warning: Failed to process chunk {}", chunk.index)),
            Some(&format!("Failed to embed chunk {}: {}", chunk.index, reason)),
        );
    }
}
