//! Single-file ingestion lifecycle
//!
//! extract → annotate → chunk → batch upload → verify → relocate, with a
//! status write at every transition:
//!
//! ```text
//! pending ─► processing ─┬─► error            (extraction failed / nothing stored)
//!                        └─► verifying ─┬─► verified ─┐
//!                                       └─► warning  ─┴─► completed | warning
//! ```

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{IngestConfig, MetadataConfig};
use crate::error::{Error, Result};
use crate::ingestion::{TextChunker, TextExtractor};
use crate::providers::{EmbeddingProvider, MetadataAnnotator, VectorStoreProvider};
use crate::types::{BaseMetadata, DocumentMetadata, FileType, IngestSource, TaskStatus};

use super::status_store::StatusStore;
use super::uploader::{BatchUploader, ProgressSpan, UploadOutcome};

/// Per-invocation options
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Ingestion path recorded on every stored record
    pub source: IngestSource,
    /// Operator-supplied subject, replaces the annotator's
    pub subject: Option<String>,
    /// Operator-supplied tags, replace the annotator's
    pub tags: Option<BTreeSet<String>>,
}

impl JobOptions {
    pub fn user_upload() -> Self {
        Self {
            source: IngestSource::UserUpload,
            ..Default::default()
        }
    }

    fn overrides_annotation(&self) -> bool {
        self.subject.is_some() && self.tags.is_some()
    }
}

/// How one processing run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Stored, verified and relocated
    Completed { chunks: usize },
    /// Stored, but verification or relocation needs follow-up
    Warning { chunks: usize, reason: String },
    /// Nothing usable was stored; the file stays in the intake folder
    Failed { error: String },
    /// Another run for the same file is in progress
    Skipped,
}

impl ProcessOutcome {
    /// Chunks were stored (completed or warning)
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Warning { .. })
    }
}

/// External services used by the pipeline
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn TextExtractor>,
    pub annotator: Arc<dyn MetadataAnnotator>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vector_store: Arc<dyn VectorStoreProvider>,
}

/// Drives one file through the ingestion state machine
pub struct FileProcessor {
    intake_dir: PathBuf,
    processed_dir: PathBuf,
    extractor: Arc<dyn TextExtractor>,
    annotator: Arc<dyn MetadataAnnotator>,
    vector_store: Arc<dyn VectorStoreProvider>,
    chunker: TextChunker,
    uploader: BatchUploader,
    status: Arc<StatusStore>,
    metadata: MetadataConfig,
    in_flight: Arc<DashMap<String, ()>>,
}

/// Exclusive right to write or process one intake file.
///
/// The claim is released when the guard is dropped, however the run ends.
pub struct ClaimGuard {
    claims: Arc<DashMap<String, ()>>,
    filename: String,
}

impl ClaimGuard {
    pub fn filename(&self) -> &str {
        &self.filename
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.claims.remove(&self.filename);
    }
}

impl FileProcessor {
    pub fn new(config: &IngestConfig, collaborators: Collaborators, status: Arc<StatusStore>) -> Self {
        let uploader = BatchUploader::new(
            collaborators.embedder,
            Arc::clone(&collaborators.vector_store),
            Arc::clone(&status),
            config,
        );

        Self {
            intake_dir: config.paths.intake_dir.clone(),
            processed_dir: config.paths.processed_dir.clone(),
            extractor: collaborators.extractor,
            annotator: collaborators.annotator,
            vector_store: collaborators.vector_store,
            chunker: TextChunker::new(config.chunking.max_tokens, config.chunking.fallback_chars),
            uploader,
            status,
            metadata: config.metadata.clone(),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Replace the chunker
    pub fn with_chunker(mut self, chunker: TextChunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// Replace the batch uploader
    pub fn with_uploader(mut self, uploader: BatchUploader) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn intake_dir(&self) -> &Path {
        &self.intake_dir
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    pub fn status_store(&self) -> &Arc<StatusStore> {
        &self.status
    }

    pub fn vector_store(&self) -> &Arc<dyn VectorStoreProvider> {
        &self.vector_store
    }

    /// Whether a run for `filename` is currently in progress
    pub fn is_claimed(&self, filename: &str) -> bool {
        self.in_flight.contains_key(filename)
    }

    /// Process a file discovered in the intake folder
    pub async fn process(&self, filename: &str) -> ProcessOutcome {
        self.process_with(filename, JobOptions::default()).await
    }

    /// Process a file with explicit options.
    ///
    /// Never returns an error: every failure ends as a status entry and a
    /// `ProcessOutcome`. Callers are expected to only pass eligible files.
    pub async fn process_with(&self, filename: &str, options: JobOptions) -> ProcessOutcome {
        let Some(claim) = self.try_claim(filename) else {
            tracing::info!("[{}] Already being processed, skipping", filename);
            return ProcessOutcome::Skipped;
        };

        self.process_claimed(claim, options).await
    }

    /// Process a file under a claim the caller already holds, releasing it at the end
    pub async fn process_claimed(&self, claim: ClaimGuard, options: JobOptions) -> ProcessOutcome {
        let filename = claim.filename();

        match self.run(filename, &options).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("[{}] Error processing file: {}", filename, e);
                let error = e.to_string();
                self.status.update(
                    filename,
                    TaskStatus::Error,
                    0,
                    Some(&format!("Error processing file: {}", error)),
                    Some(&error),
                );
                ProcessOutcome::Failed { error }
            }
        }
    }

    /// Claim `filename` for this caller, or `None` if a run already holds it
    pub fn try_claim(&self, filename: &str) -> Option<ClaimGuard> {
        use dashmap::mapref::entry::Entry;

        match self.in_flight.entry(filename.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(ClaimGuard {
                    claims: Arc::clone(&self.in_flight),
                    filename: filename.to_string(),
                })
            }
        }
    }

    async fn run(&self, filename: &str, options: &JobOptions) -> Result<ProcessOutcome> {
        let path = self.intake_dir.join(filename);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(self.fail(
                filename,
                0,
                &format!("File {} not found in upload folder", filename),
                "File not found",
            ));
        }

        self.status
            .begin(filename, &format!("Started processing {}", filename));
        tracing::info!("[{}] Started processing ({:?})", filename, options.source);

        let file_type = FileType::from_filename(filename);
        if !file_type.is_supported() {
            return Err(Error::UnsupportedFileType(filename.to_string()));
        }

        // Extraction
        self.progress(filename, 5, &format!("Extracting text from {}", filename));
        let text = match self.extractor.extract(&path, file_type).await {
            Some(text) if !text.trim().is_empty() => text,
            _ => {
                return Ok(self.fail(
                    filename,
                    0,
                    &format!("Unable to extract text from {}", filename),
                    "Text extraction failed",
                ));
            }
        };
        self.progress(
            filename,
            15,
            &format!("Extracted {} characters from {}", text.chars().count(), filename),
        );

        // Metadata (advisory)
        let document = self.annotate(filename, file_type, &text, options).await;
        let base = BaseMetadata::new(filename, file_type, options.source, document);

        // Chunking
        self.progress(filename, 35, "Chunking text content");
        let chunks = self.chunker.chunk(&text);
        self.progress(
            filename,
            40,
            &format!("Chunked text into {} segments for processing", chunks.len()),
        );

        // Upload
        let upload = self
            .uploader
            .upload(filename, &chunks, &base, ProgressSpan::default())
            .await?;

        if upload.records_stored == 0 {
            return Ok(self.fail(
                filename,
                95,
                "No chunks were successfully processed",
                "All chunks failed processing",
            ));
        }

        let verification = self.verify(filename, &upload).await;
        Ok(self.relocate(filename, &path, &upload, verification).await)
    }

    async fn annotate(
        &self,
        filename: &str,
        file_type: FileType,
        text: &str,
        options: &JobOptions,
    ) -> DocumentMetadata {
        let mut document = if !self.metadata.enabled || options.overrides_annotation() {
            DocumentMetadata::default()
        } else {
            self.progress(
                filename,
                20,
                &format!("Generating comprehensive metadata for {}", filename),
            );
            let sample: String = text.chars().take(self.metadata.sample_chars).collect();
            match self
                .annotator
                .annotate(&sample, filename, file_type, self.metadata.max_tags)
                .await
            {
                Ok(document) => {
                    tracing::info!(
                        "[{}] Generated {} tags with {} metadata fields",
                        filename,
                        document.tags.len(),
                        document.field_count()
                    );
                    self.progress(
                        filename,
                        30,
                        &format!(
                            "Generated metadata with {} categories and {} tags",
                            document.field_count(),
                            document.tags.len()
                        ),
                    );
                    document
                }
                Err(e) => {
                    tracing::warn!("[{}] Metadata generation failed: {}", filename, e);
                    self.status.update(
                        filename,
                        TaskStatus::Processing,
                        30,
                        Some("Warning: Metadata generation failed, proceeding with default metadata"),
                        Some(&e.to_string()),
                    );
                    DocumentMetadata::default()
                }
            }
        };

        if let Some(subject) = &options.subject {
            document.subject = subject.clone();
        }
        if let Some(tags) = &options.tags {
            document.tags = tags.clone();
        }
        document
    }

    /// Returns the reason verification could not confirm storage, if any
    async fn verify(&self, filename: &str, upload: &UploadOutcome) -> Option<String> {
        self.status.update(
            filename,
            TaskStatus::Verifying,
            95,
            Some("Verifying document processing"),
            None,
        );

        match self.vector_store.stats().await {
            Ok(stats) => {
                let namespace = self.uploader.namespace();
                let mut message = format!(
                    "Verified storage in {}. Total vectors in index: {}",
                    self.vector_store.name(),
                    stats.total_count
                );
                if stats.namespace_count(namespace) < upload.records_stored as u64 {
                    message.push_str(" (index statistics may still be catching up)");
                }
                self.status
                    .update(filename, TaskStatus::Verified, 98, Some(&message), None);
                None
            }
            Err(e) => {
                tracing::warn!("[{}] Could not verify storage: {}", filename, e);
                let reason = e.to_string();
                self.status.update(
                    filename,
                    TaskStatus::Warning,
                    98,
                    Some("Warning: Could not verify vector store status, but chunks were processed"),
                    Some(&reason),
                );
                Some(reason)
            }
        }
    }

    async fn relocate(
        &self,
        filename: &str,
        path: &Path,
        upload: &UploadOutcome,
        verification: Option<String>,
    ) -> ProcessOutcome {
        let chunks = upload.records_stored;
        let destination = self.processed_dir.join(filename);

        match move_file(path, &destination).await {
            Ok(()) => {
                tracing::info!("[{}] Moved to {}", filename, self.processed_dir.display());
                self.status.update(
                    filename,
                    TaskStatus::Completed,
                    100,
                    Some(&format!(
                        "Successfully processed {} ({}/{} chunks). File moved to processed folder.",
                        filename, chunks, upload.total_chunks
                    )),
                    None,
                );
                match verification {
                    None => ProcessOutcome::Completed { chunks },
                    Some(reason) => ProcessOutcome::Warning { chunks, reason },
                }
            }
            Err(e) => {
                tracing::error!("[{}] Error moving file to processed folder: {}", filename, e);
                let reason = e.to_string();
                self.status.update(
                    filename,
                    TaskStatus::Warning,
                    99,
                    Some("Warning: File processed successfully but could not be moved to processed folder"),
                    Some(&reason),
                );
                ProcessOutcome::Warning { chunks, reason }
            }
        }
    }

    fn progress(&self, filename: &str, progress: u32, message: &str) {
        tracing::debug!("[{}] {}% {}", filename, progress, message);
        self.status
            .update(filename, TaskStatus::Processing, progress, Some(message), None);
    }

    fn fail(&self, filename: &str, progress: u32, message: &str, error: &str) -> ProcessOutcome {
        tracing::error!("[{}] {}: {}", filename, message, error);
        self.status
            .update(filename, TaskStatus::Error, progress, Some(message), Some(error));
        ProcessOutcome::Failed {
            error: error.to_string(),
        }
    }
}

/// Move a file, falling back to copy + remove across filesystems
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}
