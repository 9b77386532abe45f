//! Text extraction from PDF, EPUB, TXT and Kindle files

use async_trait::async_trait;
use regex::bytes::Regex;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::FileType;

/// Extracts plain text from a document on disk.
///
/// `None` means the content is unsupported or unreadable; it is not an error
/// condition for the caller to propagate.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path, file_type: FileType) -> Option<String>;
}

/// Extractor built on local libraries, with Calibre's `ebook-convert` for Kindle formats
#[derive(Debug, Clone)]
pub struct LocalExtractor {
    ebook_convert: String,
}

impl Default for LocalExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalExtractor {
    pub fn new() -> Self {
        Self {
            ebook_convert: "ebook-convert".to_string(),
        }
    }

    /// Use a specific `ebook-convert` executable
    pub fn with_ebook_convert(mut self, program: impl Into<String>) -> Self {
        self.ebook_convert = program.into();
        self
    }

    async fn extract_inner(&self, path: &Path, file_type: FileType) -> Result<String> {
        match file_type {
            FileType::Txt => {
                let bytes = tokio::fs::read(path).await?;
                Ok(decode_text(&bytes))
            }
            FileType::Pdf => {
                let path = path.to_path_buf();
                tokio::task::spawn_blocking(move || extract_pdf(&path))
                    .await
                    .map_err(|e| Error::internal(format!("PDF extraction task failed: {}", e)))?
            }
            FileType::Epub => {
                let path = path.to_path_buf();
                tokio::task::spawn_blocking(move || extract_epub(&path))
                    .await
                    .map_err(|e| Error::internal(format!("EPUB extraction task failed: {}", e)))?
            }
            FileType::Mobi | FileType::Azw | FileType::Azw3 => self.extract_kindle(path).await,
            FileType::Unknown => Err(Error::UnsupportedFileType(
                path.display().to_string(),
            )),
        }
    }

    async fn extract_kindle(&self, path: &Path) -> Result<String> {
        match self.convert_with_calibre(path).await {
            Ok(text) => return Ok(text),
            Err(e) => warn!(
                "ebook-convert unavailable for {} ({}), falling back to binary text scan",
                path.display(),
                e
            ),
        }

        let bytes = tokio::fs::read(path).await?;
        let text = scan_printable_text(&bytes);
        if text.is_empty() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            warn!("Could not extract text from {}", path.display());
            return Ok(format!(
                "Unable to extract text from {}. Format not supported without additional tools.",
                name
            ));
        }
        Ok(text)
    }

    async fn convert_with_calibre(&self, path: &Path) -> Result<String> {
        let temp_dir = tempfile::tempdir()?;
        let output_path = temp_dir.path().join("converted.txt");

        let output = tokio::process::Command::new(&self.ebook_convert)
            .arg(path)
            .arg(&output_path)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::extraction(
                path.display().to_string(),
                format!("ebook-convert failed: {}", stderr.trim()),
            ));
        }

        let bytes = tokio::fs::read(&output_path).await?;
        Ok(decode_text(&bytes))
    }
}

#[async_trait]
impl TextExtractor for LocalExtractor {
    async fn extract(&self, path: &Path, file_type: FileType) -> Option<String> {
        match self.extract_inner(path, file_type).await {
            Ok(text) => {
                debug!("Extracted {} characters from {}", text.len(), path.display());
                Some(text)
            }
            Err(e) => {
                warn!("Text extraction failed for {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Decode text honoring a byte-order mark, then UTF-8, then Windows-1252
fn decode_text(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = encoding_rs::Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, had_errors) = encoding_rs::WINDOWS_1252.decode(bytes);
            if had_errors {
                debug!("Lossy Windows-1252 decode");
            }
            text.into_owned()
        }
    }
}

fn extract_pdf(path: &Path) -> Result<String> {
    let raw = pdf_extract::extract_text(path)
        .map_err(|e| Error::extraction(path.display().to_string(), e.to_string()))?;

    let cleaned: Vec<&str> = raw
        .lines()
        .map(|line| line.trim_end())
        .filter(|line| !line.trim().is_empty())
        .collect();
    Ok(cleaned.join("\n").replace('\0', ""))
}

fn extract_epub(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| Error::extraction(path.display().to_string(), e.to_string()))?;

    let body_selector = scraper::Selector::parse("body")
        .map_err(|e| Error::internal(format!("Invalid selector: {:?}", e)))?;

    let mut content = String::new();
    let mut documents = 0usize;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| Error::extraction(path.display().to_string(), e.to_string()))?;

        let name = entry.name().to_lowercase();
        if !(name.ends_with(".xhtml") || name.ends_with(".html") || name.ends_with(".htm")) {
            continue;
        }

        let mut raw = Vec::new();
        entry.read_to_end(&mut raw)?;
        let html = String::from_utf8_lossy(&raw);
        let document = scraper::Html::parse_document(&html);

        if let Some(body) = document.select(&body_selector).next() {
            for text in body.text() {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    content.push_str(trimmed);
                    content.push('\n');
                }
            }
        }
        documents += 1;
    }

    info!("Read {} content documents from {}", documents, path.display());
    Ok(content)
}

/// Pull sentence-like printable ASCII runs out of a binary ebook
fn scan_printable_text(bytes: &[u8]) -> String {
    let (Ok(runs), Ok(punctuation)) = (
        Regex::new(r"[\x20-\x7E\n\r\t]{4,}"),
        regex::Regex::new(r"[.!?]"),
    ) else {
        return String::new();
    };

    let mut text = String::new();
    for run in runs.find_iter(bytes) {
        let decoded = String::from_utf8_lossy(run.as_bytes());
        if decoded.chars().count() > 10 && punctuation.is_match(&decoded) {
            text.push_str(&decoded);
            text.push_str("\n\n");
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_decode_utf8_and_bom() {
        assert_eq!(decode_text("naïve café".as_bytes()), "naïve café");

        let mut with_bom = vec![0xEF, 0xBB, 0xBF];
        with_bom.extend_from_slice(b"hello");
        assert_eq!(decode_text(&with_bom), "hello");
    }

    #[test]
    fn test_decode_windows_1252_fallback() {
        // "café" with é as 0xE9
        assert_eq!(decode_text(&[0x63, 0x61, 0x66, 0xE9]), "café");
    }

    #[test]
    fn test_printable_scan_keeps_sentences() {
        let mut bytes = vec![0u8, 1, 2, 3];
        bytes.extend_from_slice(b"This is a real sentence.");
        bytes.extend_from_slice(&[0, 0, 0xFF]);
        bytes.extend_from_slice(b"HEADERDATA12345");
        bytes.push(0);

        let text = scan_printable_text(&bytes);
        assert!(text.contains("This is a real sentence."));
        assert!(!text.contains("HEADERDATA"));
    }

    #[tokio::test]
    async fn test_extract_txt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "Line one\nLine two\n").unwrap();

        let text = LocalExtractor::new().extract(&path, FileType::Txt).await;
        assert_eq!(text.as_deref(), Some("Line one\nLine two\n"));
    }

    #[tokio::test]
    async fn test_extract_epub_documents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.epub");
        {
            let file = std::fs::File::create(&path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("mimetype", options).unwrap();
            zip.write_all(b"application/epub+zip").unwrap();
            zip.start_file("OEBPS/ch1.xhtml", options).unwrap();
            zip.write_all(b"<html><body><h1>Chapter One</h1><p>It was a dark night.</p></body></html>")
                .unwrap();
            zip.finish().unwrap();
        }

        let text = LocalExtractor::new()
            .extract(&path, FileType::Epub)
            .await
            .unwrap();
        assert_eq!(text, "Chapter One\nIt was a dark night.\n");
    }

    #[tokio::test]
    async fn test_kindle_without_converter_uses_scan() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("novel.mobi");
        std::fs::write(&path, [0u8, 0, 0]).unwrap();

        let extractor = LocalExtractor::new().with_ebook_convert("docchat-missing-converter");
        let text = extractor.extract(&path, FileType::Mobi).await.unwrap();
        assert_eq!(
            text,
            "Unable to extract text from novel.mobi. Format not supported without additional tools."
        );
    }

    #[tokio::test]
    async fn test_missing_or_corrupt_file_is_none() {
        let dir = TempDir::new().unwrap();
        let extractor = LocalExtractor::new();
        assert!(extractor
            .extract(&dir.path().join("absent.txt"), FileType::Txt)
            .await
            .is_none());

        let bogus = dir.path().join("bogus.epub");
        std::fs::write(&bogus, b"not a zip").unwrap();
        assert!(extractor.extract(&bogus, FileType::Epub).await.is_none());
    }
}
