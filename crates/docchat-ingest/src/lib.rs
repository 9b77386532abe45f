//! docchat-ingest: Document ingestion engine for a chat-over-documents backend
//!
//! Documents dropped into an intake folder (or uploaded over HTTP) are
//! extracted to text, split into token-bounded chunks, annotated with
//! subject and tag metadata, embedded and upserted into a vector index in
//! batches. Every step is recorded in a durable JSON status document so
//! operators can follow progress and failed files can be retried.

pub mod config;
pub mod error;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod server;
pub mod types;

pub use config::IngestConfig;
pub use error::{Error, Result};
pub use processing::{FileProcessor, ProcessOutcome, QueueScanner, ScanReport, StatusStore};
pub use types::{
    document::{Chunk, DocumentMetadata, FileType, IngestSource, RecordMetadata, VectorRecord},
    file_task::{FileTask, TaskStatus},
};
