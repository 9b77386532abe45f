//! OpenAI-backed providers for embeddings and metadata generation

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::OpenAiConfig;
use crate::error::{Error, Result};
use crate::types::{DocumentMetadata, FileType};

use super::annotator::MetadataAnnotator;
use super::embedding::EmbeddingProvider;

/// Shared HTTP client for the OpenAI REST API
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    /// Create a client; fails with `Error::Config` if no API key is configured
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            Error::Config(
                "OpenAI API key is required. Please set the OPENAI_API_KEY environment variable."
                    .into(),
            )
        })?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        Ok(response)
    }
}

/// Map a non-success OpenAI response to an error with the right retryability
fn embedding_failure(status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Auth(format!("OpenAI API key is invalid or missing ({})", status))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            Error::embedding(format!("OpenAI rate limit ({}): {}", status, body))
        }
        s if s.is_server_error() => Error::embedding(format!("OpenAI server error ({}): {}", s, body)),
        s => Error::embedding_rejected(format!("OpenAI rejected the request ({}): {}", s, body)),
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI embedding provider (text-embedding-ada-002 by default)
pub struct OpenAiEmbedder {
    client: OpenAiClient,
    model: String,
    dimensions: usize,
    max_input_chars: usize,
}

impl OpenAiEmbedder {
    pub fn new(client: OpenAiClient, config: &OpenAiConfig, dimensions: usize) -> Self {
        Self {
            client,
            model: config.embedding_model.clone(),
            dimensions,
            max_input_chars: config.max_input_chars,
        }
    }
}

/// Truncate to at most `max_chars` characters
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = truncate_chars(text, self.max_input_chars);
        if input.len() < text.len() {
            warn!(
                "Text too long ({} chars), truncating to {} chars",
                text.chars().count(),
                self.max_input_chars
            );
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input,
        };

        let response = self
            .client
            .post("embeddings", &request)
            .await
            .map_err(|e| match e {
                Error::Http(err) if !err.is_builder() => {
                    Error::embedding(format!("OpenAI request failed: {}", err))
                }
                other => other,
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(embedding_failure(status, &body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::embedding(format!("Failed to parse OpenAI response: {}", e)))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::embedding("No embedding in response"))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Chat-completion metadata annotator in JSON mode
pub struct OpenAiAnnotator {
    client: OpenAiClient,
    model: String,
    sample_chars: usize,
}

impl OpenAiAnnotator {
    pub fn new(client: OpenAiClient, config: &OpenAiConfig, sample_chars: usize) -> Self {
        Self {
            client,
            model: config.chat_model.clone(),
            sample_chars,
        }
    }

    fn prompt(sample: &str, filename: &str, file_type: FileType, max_tags: usize) -> String {
        format!(
            "Analyze the following excerpt from the document \"{filename}\" ({ext}) and \
             return a JSON object with these fields:\n\
             - \"subject\": the primary subject area as a short lowercase phrase\n\
             - \"general_tags\": up to {max_tags} short descriptive tags\n\
             - \"summary\": a two-sentence summary\n\
             - any further descriptive fields you can infer (e.g. \"audience\", \"language\", \"document_type\")\n\n\
             Document excerpt:\n{sample}",
            ext = file_type.extension(),
        )
    }
}

/// Parse the annotator's JSON reply into structured metadata
fn parse_metadata(raw: &str, max_tags: usize) -> Result<DocumentMetadata> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(mut fields) = value else {
        return Err(Error::Annotation("Metadata response is not a JSON object".into()));
    };

    let subject = match fields.remove("subject") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_lowercase(),
        _ => "general".to_string(),
    };

    let tags = fields
        .remove("general_tags")
        .or_else(|| fields.remove("tags"))
        .map(|v| string_list(&v))
        .unwrap_or_default()
        .into_iter()
        .take(max_tags)
        .collect();

    let summary = match fields.remove("summary").or_else(|| fields.remove("chunk_summary")) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        _ => None,
    };

    Ok(DocumentMetadata {
        subject,
        tags,
        summary,
        extra: fields.into_iter().filter(|(_, v)| !v.is_null()).collect(),
    })
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl MetadataAnnotator for OpenAiAnnotator {
    async fn annotate(
        &self,
        text: &str,
        filename: &str,
        file_type: FileType,
        max_tags: usize,
    ) -> Result<DocumentMetadata> {
        let sample = truncate_chars(text, self.sample_chars);
        let mut body = Map::new();
        body.insert("model".into(), json!(self.model));
        body.insert("response_format".into(), json!({"type": "json_object"}));
        body.insert(
            "messages".into(),
            json!([
                {"role": "system", "content": "You are a librarian who catalogs documents. Reply with JSON only."},
                {"role": "user", "content": Self::prompt(sample, filename, file_type, max_tags)},
            ]),
        );

        let response = self
            .client
            .post("chat/completions", &body)
            .await
            .map_err(|e| Error::Annotation(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Annotation(format!(
                "OpenAI chat completion failed ({}): {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Annotation(format!("Failed to parse OpenAI response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Annotation("Empty metadata response".into()))?;

        let metadata = parse_metadata(&content, max_tags)?;
        debug!(
            "Generated metadata for {} with {} fields and {} tags",
            filename,
            metadata.field_count(),
            metadata.tags.len()
        );
        Ok(metadata)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        assert!(matches!(
            embedding_failure(StatusCode::UNAUTHORIZED, ""),
            Error::Auth(_)
        ));
        assert!(embedding_failure(StatusCode::TOO_MANY_REQUESTS, "slow down").is_retryable());
        assert!(embedding_failure(StatusCode::BAD_GATEWAY, "").is_retryable());

        let rejected = embedding_failure(StatusCode::BAD_REQUEST, "input too long");
        assert!(!rejected.is_retryable());
        assert!(!rejected.is_fatal());
    }

    #[test]
    fn test_truncate_chars_on_char_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn test_parse_metadata_fields() {
        let raw = r#"{
            "subject": "Astronomy",
            "general_tags": ["stars", "galaxies", "", "telescopes"],
            "summary": "An overview of the night sky.",
            "audience": "beginners",
            "language": null
        }"#;

        let meta = parse_metadata(raw, 2).unwrap();
        assert_eq!(meta.subject, "astronomy");
        assert_eq!(meta.tags.len(), 2);
        assert!(meta.tags.contains("stars"));
        assert_eq!(meta.summary.as_deref(), Some("An overview of the night sky."));
        assert_eq!(meta.extra.get("audience"), Some(&json!("beginners")));
        assert!(!meta.extra.contains_key("language"));
    }

    #[test]
    fn test_parse_metadata_rejects_non_objects() {
        assert!(parse_metadata("[1, 2, 3]", 10).is_err());
        assert!(parse_metadata("not json", 10).is_err());

        let meta = parse_metadata("{}", 10).unwrap();
        assert_eq!(meta, DocumentMetadata::default());
    }

    #[test]
    fn test_client_requires_api_key() {
        let config = OpenAiConfig::default();
        assert!(matches!(OpenAiClient::new(&config), Err(Error::Config(_))));
    }
}
