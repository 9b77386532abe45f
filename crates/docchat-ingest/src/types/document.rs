//! Document, chunk and stored-record types

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Supported file types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// PDF document
    Pdf,
    /// EPUB ebook
    Epub,
    /// Plain text file
    Txt,
    /// Kindle MOBI
    Mobi,
    /// Kindle AZW
    Azw,
    /// Kindle AZW3 (KF8)
    Azw3,
    /// Unknown file type
    Unknown,
}

impl FileType {
    /// Detect file type from extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "epub" => Self::Epub,
            "txt" => Self::Txt,
            "mobi" => Self::Mobi,
            "azw" => Self::Azw,
            "azw3" => Self::Azw3,
            _ => Self::Unknown,
        }
    }

    /// Detect file type from the last extension of a filename
    pub fn from_filename(filename: &str) -> Self {
        Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown)
    }

    /// Lowercase extension, also used as the `filetype` record field
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Epub => "epub",
            Self::Txt => "txt",
            Self::Mobi => "mobi",
            Self::Azw => "azw",
            Self::Azw3 => "azw3",
            Self::Unknown => "",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub fn is_kindle(&self) -> bool {
        matches!(self, Self::Mobi | Self::Azw | Self::Azw3)
    }

    /// Supported extensions, for user-facing messages
    pub fn supported_extensions() -> &'static [&'static str] {
        &["pdf", "epub", "txt", "mobi", "azw", "azw3"]
    }
}

/// A bounded slice of extracted text; identity is (filename, index)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the original chunk sequence
    pub index: usize,
    /// Chunk text
    pub text: String,
}

impl Chunk {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }
}

/// Which ingestion path produced a record
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestSource {
    /// Discovered in the intake folder
    #[default]
    FolderUpload,
    /// Submitted through the HTTP upload endpoint
    UserUpload,
}

/// Document-level metadata produced by the annotator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    /// Primary subject
    pub subject: String,
    /// Descriptive tags
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Short summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Provider-specific extras
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            subject: "general".to_string(),
            tags: BTreeSet::new(),
            summary: None,
            extra: BTreeMap::new(),
        }
    }
}

impl DocumentMetadata {
    /// Number of populated metadata fields
    pub fn field_count(&self) -> usize {
        2 + usize::from(self.summary.is_some()) + self.extra.len()
    }
}

/// Metadata fields owned by the pipeline; extras may not shadow them
pub const RESERVED_METADATA_KEYS: &[&str] = &[
    "text", "filename", "filetype", "subject", "tags", "chunk_id", "source",
];

/// Metadata attached to every stored vector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordMetadata {
    pub text: String,
    pub filename: String,
    pub filetype: String,
    pub subject: String,
    pub tags: BTreeSet<String>,
    #[serde(deserialize_with = "deserialize_chunk_id")]
    pub chunk_id: usize,
    pub source: IngestSource,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Vector stores hand numeric metadata back as floats (`3.0`); accept any
/// non-negative whole number.
fn deserialize_chunk_id<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    struct ChunkIdVisitor;

    impl<'de> de::Visitor<'de> for ChunkIdVisitor {
        type Value = usize;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a non-negative whole number")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<usize, E> {
            usize::try_from(v).map_err(|_| E::custom(format!("chunk_id {} out of range", v)))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<usize, E> {
            usize::try_from(v).map_err(|_| E::custom(format!("chunk_id {} out of range", v)))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<usize, E> {
            if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= usize::MAX as f64 {
                Ok(v as usize)
            } else {
                Err(E::custom(format!("chunk_id {} is not a whole number", v)))
            }
        }
    }

    deserializer.deserialize_any(ChunkIdVisitor)
}

/// File-level metadata shared by all chunks of a file
#[derive(Debug, Clone, PartialEq)]
pub struct BaseMetadata {
    pub filename: String,
    pub filetype: String,
    pub subject: String,
    pub tags: BTreeSet<String>,
    pub source: IngestSource,
    pub extra: BTreeMap<String, Value>,
}

impl BaseMetadata {
    /// Combine file identity with annotator output
    pub fn new(
        filename: impl Into<String>,
        file_type: FileType,
        source: IngestSource,
        document: DocumentMetadata,
    ) -> Self {
        let mut extra: BTreeMap<String, Value> = document
            .extra
            .into_iter()
            .filter(|(key, _)| !RESERVED_METADATA_KEYS.contains(&key.as_str()))
            .collect();
        if let Some(summary) = document.summary {
            extra.insert("summary".to_string(), Value::String(summary));
        }

        Self {
            filename: filename.into(),
            filetype: file_type.extension().to_string(),
            subject: document.subject,
            tags: document.tags,
            source,
            extra,
        }
    }

    /// Full record metadata for one chunk
    pub fn for_chunk(&self, chunk: &Chunk) -> RecordMetadata {
        RecordMetadata {
            text: chunk.text.clone(),
            filename: self.filename.clone(),
            filetype: self.filetype.clone(),
            subject: self.subject.clone(),
            tags: self.tags.clone(),
            chunk_id: chunk.index,
            source: self.source,
            extra: self.extra.clone(),
        }
    }
}

/// A vector with its id and metadata, the unit written to the vector store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: RecordMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_file_type_detection() {
        assert_eq!(FileType::from_filename("Report.PDF"), FileType::Pdf);
        assert_eq!(FileType::from_filename("novel.azw3"), FileType::Azw3);
        assert_eq!(FileType::from_filename("notes.tar.txt"), FileType::Txt);
        assert_eq!(FileType::from_filename("README"), FileType::Unknown);
        assert_eq!(FileType::from_filename("sheet.xlsx"), FileType::Unknown);
        assert!(FileType::Mobi.is_kindle());
        assert!(!FileType::Epub.is_kindle());
    }

    #[test]
    fn test_default_document_metadata() {
        let meta = DocumentMetadata::default();
        assert_eq!(meta.subject, "general");
        assert!(meta.tags.is_empty());
    }

    #[test]
    fn test_extras_cannot_shadow_record_fields() {
        let mut document = DocumentMetadata {
            subject: "physics".into(),
            tags: ["optics".to_string()].into_iter().collect(),
            summary: Some("Light and lenses".into()),
            extra: BTreeMap::new(),
        };
        document.extra.insert("text".into(), json!("hijacked"));
        document.extra.insert("audience".into(), json!("undergraduate"));

        let base = BaseMetadata::new("optics.pdf", FileType::Pdf, IngestSource::FolderUpload, document);
        let record = base.for_chunk(&Chunk::new(3, "Snell's law"));

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["text"], "Snell's law");
        assert_eq!(value["chunk_id"], 3);
        assert_eq!(value["filetype"], "pdf");
        assert_eq!(value["source"], "folder_upload");
        assert_eq!(value["audience"], "undergraduate");
        assert_eq!(value["summary"], "Light and lenses");
        assert_eq!(value["tags"], json!(["optics"]));
    }

    #[test]
    fn test_chunk_id_read_back_as_float() {
        let value = json!({
            "text": "Snell's law",
            "filename": "optics.pdf",
            "filetype": "pdf",
            "subject": "physics",
            "tags": ["optics"],
            "chunk_id": 3.0,
            "source": "folder_upload",
            "audience": "undergraduate"
        });
        let record: RecordMetadata = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(record.chunk_id, 3);
        assert_eq!(record.extra["audience"], "undergraduate");

        let mut integral = value.clone();
        integral["chunk_id"] = json!(7);
        assert_eq!(
            serde_json::from_value::<RecordMetadata>(integral).unwrap().chunk_id,
            7
        );

        for bad in [json!(2.5), json!(-1.0), json!(-4), json!("3")] {
            let mut broken = value.clone();
            broken["chunk_id"] = bad;
            assert!(serde_json::from_value::<RecordMetadata>(broken).is_err());
        }
    }
}
