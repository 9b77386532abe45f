//! Per-file processing state persisted in the status document

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

/// Processing status of a file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Discovered or re-queued, waiting for a worker
    Pending,
    /// Extraction, chunking and upload in progress
    Processing,
    /// Chunks stored, confirming with the vector store
    Verifying,
    /// Storage confirmed, relocation pending
    Verified,
    /// Stored, but verification or relocation needs follow-up
    Warning,
    /// Stored and moved to the processed folder
    Completed,
    /// Failed, file left in the intake folder
    Error,
}

impl TaskStatus {
    /// States a worker is actively driving
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Processing | Self::Verifying | Self::Verified)
    }

    /// States retained as the final outcome of a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Warning)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Verifying => "verifying",
            Self::Verified => "verified",
            Self::Warning => "warning",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamped entry in a task's message or error log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub time: DateTime<Utc>,
    #[serde(alias = "message", alias = "error")]
    pub text: String,
}

impl LogEntry {
    pub fn new(text: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            time,
            text: text.into(),
        }
    }
}

/// One unit of ingestion work, keyed by filename in the status document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileTask {
    /// Current status
    pub status: TaskStatus,
    /// Whole-file progress, 0-100
    #[serde(default)]
    pub progress: u8,
    /// Chunks successfully stored in the vector index
    #[serde(default, alias = "chunks")]
    pub chunk_count: usize,
    /// Start of the current (or last) run
    #[serde(default = "Utc::now", deserialize_with = "deserialize_timestamp")]
    pub start_time: DateTime<Utc>,
    /// Last status write
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_timestamp"
    )]
    pub last_updated: Option<DateTime<Utc>>,
    /// Human-readable progress log, append-only
    #[serde(default)]
    pub messages: Vec<LogEntry>,
    /// Error log, append-only
    #[serde(default)]
    pub errors: Vec<LogEntry>,
}

impl FileTask {
    /// Create a task first seen at `now`
    pub fn new(status: TaskStatus, progress: u8, now: DateTime<Utc>) -> Self {
        Self {
            status,
            progress: progress.min(100),
            chunk_count: 0,
            start_time: now,
            last_updated: Some(now),
            messages: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn push_message(&mut self, text: impl Into<String>, now: DateTime<Utc>) {
        self.messages.push(LogEntry::new(text, now));
    }

    pub fn push_error(&mut self, text: impl Into<String>, now: DateTime<Utc>) {
        self.errors.push(LogEntry::new(text, now));
    }

    /// Most recent sign of life for this task
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_updated.unwrap_or(self.start_time)
    }

    /// A `processing` task whose last write is older than `threshold`
    pub fn is_stuck(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if self.status != TaskStatus::Processing {
            return false;
        }
        let threshold =
            ChronoDuration::from_std(threshold).unwrap_or_else(|_| ChronoDuration::days(36_500));
        now.signed_duration_since(self.last_activity()) > threshold
    }

    pub fn latest_message(&self) -> Option<&str> {
        self.messages.last().map(|m| m.text.as_str())
    }

    pub fn latest_error(&self) -> Option<&str> {
        self.errors.last().map(|e| e.text.as_str())
    }
}

/// Accepts RFC 3339 as well as naive ISO-8601 timestamps (read as UTC)
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

fn deserialize_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw))),
        None => Ok(None),
    }
}
