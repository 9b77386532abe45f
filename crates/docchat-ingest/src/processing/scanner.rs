//! Intake folder scanning and the scan-dispatch loop

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::types::{FileTask, FileType, TaskStatus};

use super::processor::{FileProcessor, ProcessOutcome};

/// Counts from one scan-and-drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub discovered: usize,
    pub completed: usize,
    pub warnings: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ScanReport {
    fn record(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Completed { .. } => self.completed += 1,
            ProcessOutcome::Warning { .. } => self.warnings += 1,
            ProcessOutcome::Failed { .. } => self.failed += 1,
            ProcessOutcome::Skipped => self.skipped += 1,
        }
    }

    /// No file in the pass ended as a failure
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Whether a file with the given status entry should be (re)processed.
///
/// Eligible: no entry, `pending`, `error`, or `processing` with no write for
/// longer than `stuck_after` (abandoned by a crashed worker).
pub fn is_eligible(task: Option<&FileTask>, now: DateTime<Utc>, stuck_after: Duration) -> bool {
    match task {
        None => true,
        Some(task) => match task.status {
            TaskStatus::Pending | TaskStatus::Error => true,
            TaskStatus::Processing => task.is_stuck(now, stuck_after),
            _ => false,
        },
    }
}

/// Discovers eligible files and drives the processor over them
pub struct QueueScanner {
    processor: Arc<FileProcessor>,
    config: SchedulerConfig,
}

impl QueueScanner {
    pub fn new(processor: Arc<FileProcessor>, config: SchedulerConfig) -> Self {
        Self { processor, config }
    }

    pub fn processor(&self) -> &Arc<FileProcessor> {
        &self.processor
    }

    /// Supported files in the intake folder that are eligible for processing, sorted by name
    pub async fn list_pending(&self) -> Result<Vec<String>> {
        let mut candidates = Vec::new();
        let mut entries = tokio::fs::read_dir(self.processor.intake_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(filename) = entry.file_name().into_string() else {
                tracing::warn!("Skipping non UTF-8 filename in intake folder");
                continue;
            };
            if FileType::from_filename(&filename).is_supported() {
                candidates.push(filename);
            }
        }
        candidates.sort();

        let tasks = self.processor.status_store().load();
        let now = Utc::now();
        let stuck_after = self.config.stuck_after();

        Ok(candidates
            .into_iter()
            .filter(|filename| !self.processor.is_claimed(filename))
            .filter(|filename| {
                let task = tasks.get(filename);
                if let Some(task) = task.filter(|t| t.status == TaskStatus::Processing) {
                    if task.is_stuck(now, stuck_after) {
                        tracing::warn!(
                            "File {} seems stuck in processing (last update: {})",
                            filename,
                            task.last_activity()
                        );
                    }
                }
                is_eligible(task, now, stuck_after)
            })
            .collect())
    }

    /// One scan-and-drain pass: process every currently eligible file in order
    pub async fn run_once(&self) -> Result<ScanReport> {
        let pending = self.list_pending().await?;
        let mut report = ScanReport {
            discovered: pending.len(),
            ..Default::default()
        };

        if !pending.is_empty() {
            tracing::info!("Found {} files to process", pending.len());
        }

        for filename in pending {
            tracing::info!("Processing {}", filename);
            let outcome = self.processor.process(&filename).await;
            report.record(&outcome);
        }

        Ok(report)
    }

    /// Run the scanner. With `continuous == false` this is a single pass;
    /// otherwise it scans forever, sleeping between passes and backing off
    /// after loop-level errors.
    pub async fn run(&self, continuous: bool) -> Result<ScanReport> {
        if !continuous {
            return self.run_once().await;
        }

        tracing::info!(
            "Starting folder processor. Monitoring {} for files...",
            self.processor.intake_dir().display()
        );

        loop {
            match self.run_once().await {
                Ok(report) => {
                    if report.discovered > 0 {
                        tracing::info!(
                            "Pass finished: {} completed, {} warnings, {} failed, {} skipped",
                            report.completed,
                            report.warnings,
                            report.failed,
                            report.skipped
                        );
                    }
                    tokio::time::sleep(self.config.poll_interval()).await;
                }
                Err(e) => {
                    tracing::error!("Error in processor loop: {}", e);
                    tokio::time::sleep(self.config.error_backoff()).await;
                }
            }
        }
    }
}
