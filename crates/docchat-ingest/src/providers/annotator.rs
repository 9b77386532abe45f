//! Metadata annotator trait

use async_trait::async_trait;
use crate::error::Result;
use crate::types::{DocumentMetadata, FileType};

/// Produces document-level metadata (subject, tags, summary) from text.
///
/// Annotation is advisory: callers fall back to `DocumentMetadata::default()`
/// when it fails.
#[async_trait]
pub trait MetadataAnnotator: Send + Sync {
    async fn annotate(
        &self,
        text: &str,
        filename: &str,
        file_type: FileType,
        max_tags: usize,
    ) -> Result<DocumentMetadata>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

/// Annotator that always returns the default metadata
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnnotator;

#[async_trait]
impl MetadataAnnotator for NoopAnnotator {
    async fn annotate(
        &self,
        _text: &str,
        _filename: &str,
        _file_type: FileType,
        _max_tags: usize,
    ) -> Result<DocumentMetadata> {
        Ok(DocumentMetadata::default())
    }

    fn name(&self) -> &str {
        "noop"
    }
}
