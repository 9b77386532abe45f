//! Document upload endpoint

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::processing::JobOptions;
use crate::server::state::AppState;
use crate::types::{FileType, TaskStatus};

/// Response for an accepted upload
#[derive(Debug, Serialize)]
pub struct IngestAccepted {
    pub filename: String,
    pub status: TaskStatus,
}

/// POST /api/ingest - Save an uploaded file to the intake folder and process it in the background
///
/// Multipart fields: `file` (required), `subject` and `tags` (comma separated, optional).
pub async fn ingest_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<IngestAccepted>)> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut options = JobOptions::user_upload();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::BadRequest(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().map(|s| s.to_string()).unwrap_or_default();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| Error::BadRequest(format!("Failed to read file: {}", e)))?;
                upload = Some((filename, data.to_vec()));
            }
            "subject" => {
                let subject = field
                    .text()
                    .await
                    .map_err(|e| Error::BadRequest(format!("Failed to read subject: {}", e)))?;
                let subject = subject.trim();
                if !subject.is_empty() {
                    options.subject = Some(subject.to_string());
                }
            }
            "tags" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| Error::BadRequest(format!("Failed to read tags: {}", e)))?;
                let tags: BTreeSet<String> = raw
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
                if !tags.is_empty() {
                    options.tags = Some(tags);
                }
            }
            _ => {}
        }
    }

    let (original_name, data) =
        upload.ok_or_else(|| Error::BadRequest("No file part in the request".into()))?;
    let filename = sanitize_filename(&original_name)
        .ok_or_else(|| Error::BadRequest("No selected file".into()))?;

    if !FileType::from_filename(&filename).is_supported() {
        return Err(Error::UnsupportedFileType(format!(
            "{} (supported: {})",
            filename,
            FileType::supported_extensions().join(", ")
        )));
    }

    let processor = state.processor().clone();
    let claim = processor
        .try_claim(&filename)
        .ok_or_else(|| Error::Conflict(format!("{} is being processed", filename)))?;

    let intake_dir = processor.intake_dir().to_path_buf();
    let size = data.len();
    write_into_intake(intake_dir, filename.clone(), data).await?;
    tracing::info!("Saved upload {} ({} bytes)", filename, size);

    state.status().update(
        &filename,
        TaskStatus::Pending,
        0,
        Some(&format!("Uploaded {}, queued for processing", filename)),
        None,
    );

    tokio::spawn(async move {
        let job_filename = claim.filename().to_string();
        let outcome = processor.process_claimed(claim, options).await;
        tracing::info!("Upload {} finished: {:?}", job_filename, outcome);
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestAccepted {
            filename,
            status: TaskStatus::Pending,
        }),
    ))
}

/// Write through a temporary file in the intake folder so a scan never sees a partial file
async fn write_into_intake(intake_dir: PathBuf, filename: String, data: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        std::fs::create_dir_all(&intake_dir)?;
        let mut temp = tempfile::NamedTempFile::new_in(&intake_dir)?;
        temp.write_all(&data)?;
        temp.flush()?;
        temp.persist(intake_dir.join(&filename))
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| Error::internal(format!("Upload write task failed: {}", e)))?
}

/// Reduce an uploaded name to a safe basename of ASCII letters, digits, `.`, `-` and `_`
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let cleaned = cleaned.trim_start_matches(['.', '_']).to_string();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}
