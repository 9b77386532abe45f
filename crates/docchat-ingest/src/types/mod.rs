//! Core types for the ingestion engine

pub mod document;
pub mod file_task;

pub use document::{
    BaseMetadata, Chunk, DocumentMetadata, FileType, IngestSource, RecordMetadata, VectorRecord,
};
pub use file_task::{FileTask, LogEntry, TaskStatus};
