//! Ingestion processing: status tracking, batched upload, the per-file
//! state machine and the scan-dispatch loop

pub mod processor;
pub mod retry;
pub mod scanner;
pub mod status_store;
pub mod uploader;

pub use processor::{ClaimGuard, Collaborators, FileProcessor, JobOptions, ProcessOutcome};
pub use retry::RetryPolicy;
pub use scanner::{is_eligible, QueueScanner, ScanReport};
pub use status_store::{StatusMap, StatusStore};
pub use uploader::{BatchUploader, ProgressSpan, UploadOutcome};
