//! End-to-end ingestion runs against in-process collaborators

use async_trait::async_trait;
use docchat_ingest::{
    config::IngestConfig,
    error::{Error, Result},
    ingestion::{LocalExtractor, TextChunker, Tokenizer},
    processing::{
        BatchUploader, Collaborators, FileProcessor, ProcessOutcome, QueueScanner, RetryPolicy,
        StatusStore,
    },
    providers::{EmbeddingProvider, InMemoryVectorStore, NoopAnnotator, VectorStoreProvider},
    types::{IngestSource, TaskStatus},
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// One token per character
struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<usize>> {
        Ok(text.chars().map(|c| c as usize).collect())
    }

    fn decode(&self, tokens: &[usize]) -> Result<String> {
        tokens
            .iter()
            .map(|&t| char::from_u32(t as u32).ok_or_else(|| Error::internal("bad token")))
            .collect()
    }
}

/// Embeds everything except chunks containing "bad"
struct SelectiveEmbedder;

#[async_trait]
impl EmbeddingProvider for SelectiveEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains("bad") {
            return Err(Error::embedding("upstream timeout"));
        }
        Ok(vec![text.len() as f32, 1.0])
    }

    fn dimensions(&self) -> usize {
        2
    }

    fn name(&self) -> &str {
        "selective"
    }
}

struct Pipeline {
    dir: TempDir,
    config: IngestConfig,
    status: Arc<StatusStore>,
    store: Arc<InMemoryVectorStore>,
}

impl Pipeline {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = IngestConfig::default();
        config.paths.intake_dir = dir.path().join("upload_folder");
        config.paths.processed_dir = dir.path().join("processed_folder");
        config.paths.status_file = dir.path().join("processing_status.json");
        config.upload.batch_delay_ms = 0;
        config.scheduler.stuck_after_secs = 60;
        std::fs::create_dir_all(&config.paths.intake_dir).unwrap();

        let status = Arc::new(StatusStore::new(config.paths.status_file.clone()));
        Self {
            dir,
            config,
            status,
            store: Arc::new(InMemoryVectorStore::new()),
        }
    }

    fn write(&self, filename: &str, contents: &str) {
        std::fs::write(self.config.paths.intake_dir.join(filename), contents).unwrap();
    }

    fn processor(&self, max_tokens: usize) -> Arc<FileProcessor> {
        let store: Arc<dyn VectorStoreProvider> = self.store.clone();
        let collaborators = Collaborators {
            extractor: Arc::new(LocalExtractor::new()),
            annotator: Arc::new(NoopAnnotator),
            embedder: Arc::new(SelectiveEmbedder),
            vector_store: Arc::clone(&store),
        };
        let uploader = BatchUploader::new(
            Arc::new(SelectiveEmbedder),
            store,
            Arc::clone(&self.status),
            &self.config,
        )
        .with_retry(RetryPolicy::immediate(2))
        .with_batch_delay(Duration::ZERO);

        Arc::new(
            FileProcessor::new(&self.config, collaborators, Arc::clone(&self.status))
                .with_chunker(TextChunker::with_tokenizer(Arc::new(CharTokenizer), max_tokens, 100))
                .with_uploader(uploader),
        )
    }

    fn scanner(&self, max_tokens: usize) -> QueueScanner {
        QueueScanner::new(self.processor(max_tokens), self.config.scheduler.clone())
    }
}

#[tokio::test]
async fn test_long_text_is_stored_in_order() {
    let pipeline = Pipeline::new();
    pipeline.write("essay.txt", &"abcdefghij".repeat(120));

    let outcome = pipeline.processor(500).process("essay.txt").await;
    assert_eq!(outcome, ProcessOutcome::Completed { chunks: 3 });

    let records = pipeline.store.records_for_file("essay.txt");
    let ids: Vec<usize> = records.iter().map(|r| r.chunk_id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(records[0].text.len(), 500);
    assert_eq!(records[2].text.len(), 200);
    assert!(records.iter().all(|r| r.source == IngestSource::FolderUpload));
    assert!(records.iter().all(|r| r.filetype == "txt"));

    let task = pipeline.status.get("essay.txt").unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
    assert_eq!(task.chunk_count, 3);
    assert!(task.errors.is_empty());
    assert!(pipeline
        .config
        .paths
        .processed_dir
        .join("essay.txt")
        .exists());
}

#[tokio::test]
async fn test_one_failed_chunk_is_skipped() {
    let pipeline = Pipeline::new();
    let text: String = (0..10)
        .map(|i| {
            if i == 4 {
                format!("seg{:02}-bad.", i)
            } else {
                format!("seg{:02}-ok..", i)
            }
        })
        .collect();
    pipeline.write("notes.txt", &text);

    let outcome = pipeline.processor(10).process("notes.txt").await;
    assert_eq!(outcome, ProcessOutcome::Completed { chunks: 9 });

    let task = pipeline.status.get("notes.txt").unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.chunk_count, 9);
    assert_eq!(task.errors.len(), 1);
    assert!(task.errors[0].text.starts_with("Failed to embed chunk 4"));

    let ids: Vec<usize> = pipeline
        .store
        .records_for_file("notes.txt")
        .iter()
        .map(|r| r.chunk_id)
        .collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 5, 6, 7, 8, 9]);
}

#[tokio::test]
async fn test_every_chunk_failing_is_an_error() {
    let pipeline = Pipeline::new();
    pipeline.write("broken.txt", "bad bad bad");

    let outcome = pipeline.processor(500).process("broken.txt").await;
    assert!(matches!(outcome, ProcessOutcome::Failed { .. }));

    let task = pipeline.status.get("broken.txt").unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.latest_error(), Some("All chunks failed processing"));
    assert!(pipeline.config.paths.intake_dir.join("broken.txt").exists());
}

#[tokio::test]
async fn test_scan_pass_processes_each_file_once() {
    let pipeline = Pipeline::new();
    pipeline.write("a.txt", "First document.");
    pipeline.write("b.txt", "Second document.");
    pipeline.write("ignored.docx", "Not a supported type.");
    let scanner = pipeline.scanner(500);

    let report = scanner.run_once().await.unwrap();
    assert_eq!(report.discovered, 2);
    assert_eq!(report.completed, 2);
    assert!(report.is_clean());

    // A completed file copied back into intake is not picked up again
    pipeline.write("a.txt", "First document.");
    assert!(scanner.list_pending().await.unwrap().is_empty());

    let report = scanner.run_once().await.unwrap();
    assert_eq!(report.discovered, 0);
    assert_eq!(pipeline.store.records_for_file("a.txt").len(), 1);
}

#[tokio::test]
async fn test_failed_file_is_retried_on_next_pass() {
    let pipeline = Pipeline::new();
    pipeline.write("retry.txt", "   \n\t ");
    let scanner = pipeline.scanner(500);

    let report = scanner.run_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(!report.is_clean());
    assert_eq!(
        pipeline.status.get("retry.txt").unwrap().latest_error(),
        Some("Text extraction failed")
    );

    pipeline.write("retry.txt", "Now there is something to read.");
    assert_eq!(scanner.list_pending().await.unwrap(), vec!["retry.txt"]);

    let report = scanner.run_once().await.unwrap();
    assert_eq!(report.completed, 1);
    let task = pipeline.status.get("retry.txt").unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    // History from the failed run is kept
    assert_eq!(task.errors.len(), 1);
}

#[tokio::test]
async fn test_stuck_task_is_reclaimed() {
    let pipeline = Pipeline::new();
    pipeline.write("stuck.txt", "Abandoned by a crashed worker.");
    pipeline.write("busy.txt", "Another worker is on this one.");

    let recent = chrono::Utc::now().to_rfc3339();
    let document = serde_json::json!({
        "stuck.txt": {
            "status": "processing",
            "progress": 40,
            "start_time": "2024-01-01T08:00:00",
            "last_updated": "2024-01-01T08:05:00",
            "messages": [{"time": "2024-01-01T08:05:00", "message": "Processing batch 1 of 3"}],
            "errors": []
        },
        "busy.txt": {
            "status": "processing",
            "progress": 40,
            "start_time": recent,
            "last_updated": recent,
            "messages": [],
            "errors": []
        }
    });
    std::fs::write(
        &pipeline.config.paths.status_file,
        serde_json::to_string_pretty(&document).unwrap(),
    )
    .unwrap();

    let scanner = pipeline.scanner(500);
    assert_eq!(scanner.list_pending().await.unwrap(), vec!["stuck.txt"]);

    let report = scanner.run_once().await.unwrap();
    assert_eq!(report.completed, 1);

    let tasks = pipeline.status.load();
    assert_eq!(tasks["stuck.txt"].status, TaskStatus::Completed);
    assert_eq!(tasks["stuck.txt"].messages[0].text, "Processing batch 1 of 3");
    assert_eq!(tasks["busy.txt"].status, TaskStatus::Processing);
}

#[tokio::test]
async fn test_corrupt_status_document_starts_fresh() {
    let pipeline = Pipeline::new();
    pipeline.write("fresh.txt", "Recovered after a torn write.");
    std::fs::write(&pipeline.config.paths.status_file, "{\"fresh.txt\": {\"status\": ").unwrap();

    let scanner = pipeline.scanner(500);
    assert_eq!(scanner.list_pending().await.unwrap(), vec!["fresh.txt"]);

    let backups = std::fs::read_dir(pipeline.dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with("processing_status.json.bak")
        })
        .count();
    assert_eq!(backups, 1);

    let report = scanner.run_once().await.unwrap();
    assert_eq!(report.completed, 1);
}

#[tokio::test]
async fn test_user_upload_overrides_metadata() {
    let pipeline = Pipeline::new();
    pipeline.write("lecture.txt", "Photosynthesis converts light into chemical energy.");

    let mut options = docchat_ingest::processing::JobOptions::user_upload();
    options.subject = Some("biology".to_string());
    options.tags = Some(["plants".to_string(), "energy".to_string()].into_iter().collect());

    let outcome = pipeline
        .processor(500)
        .process_with("lecture.txt", options)
        .await;
    assert!(outcome.is_success());

    let records = pipeline.store.records_for_file("lecture.txt");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].subject, "biology");
    assert_eq!(records[0].source, IngestSource::UserUpload);
    assert!(records[0].tags.contains(&"plants".to_string()));
}
