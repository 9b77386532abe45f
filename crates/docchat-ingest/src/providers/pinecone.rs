//! Pinecone vector store over the REST data-plane API

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::PineconeConfig;
use crate::error::{Error, Result};
use crate::types::VectorRecord;

use super::vector_store::{IndexStats, QueryMatch, VectorStoreProvider};

/// Pinecone index client
pub struct PineconeStore {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl PineconeStore {
    /// Create a store for the configured index host
    pub fn new(config: &PineconeConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            Error::Config(
                "Pinecone API key is required. Please set the PINECONE_API_KEY environment variable."
                    .into(),
            )
        })?;
        let host = config.index_host.as_deref().ok_or_else(|| {
            Error::Config("Pinecone index host is required. Please set PINECONE_INDEX_HOST.".into())
        })?;

        let endpoint = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", host.trim_end_matches('/'))
        };

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}/{}", self.endpoint, path))
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::vector_store(format!("Pinecone request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(store_failure(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| Error::vector_store(format!("Failed to parse Pinecone response: {}", e)))
    }
}

fn store_failure(status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Auth(format!("Pinecone API key is invalid or missing ({})", status))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            Error::vector_store(format!("Pinecone rate limit ({}): {}", status, body))
        }
        s if s.is_server_error() => {
            Error::vector_store(format!("Pinecone server error ({}): {}", s, body))
        }
        s => Error::vector_store_rejected(format!("Pinecone rejected the request ({}): {}", s, body)),
    }
}

/// Pinecone metadata accepts strings, numbers, booleans and lists of strings.
/// Anything else is stored as its JSON text; nulls are dropped.
fn pinecone_metadata(record: &VectorRecord) -> Result<Map<String, Value>> {
    let Value::Object(fields) = serde_json::to_value(&record.metadata)? else {
        return Err(Error::internal("record metadata did not serialize to an object"));
    };

    Ok(fields
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(key, value)| {
            let supported = match &value {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => true,
                Value::Array(items) => items.iter().all(Value::is_string),
                _ => false,
            };
            if supported {
                (key, value)
            } else {
                (key, Value::String(value.to_string()))
            }
        })
        .collect())
}

#[derive(Deserialize)]
struct UpsertResponse {
    #[serde(rename = "upsertedCount", default)]
    upserted_count: Option<usize>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<RawMatch>,
}

#[derive(Deserialize)]
struct RawMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Deserialize)]
struct StatsResponse {
    #[serde(rename = "totalVectorCount", default)]
    total_vector_count: u64,
    #[serde(default)]
    namespaces: BTreeMap<String, NamespaceSummary>,
}

#[derive(Deserialize)]
struct NamespaceSummary {
    #[serde(rename = "vectorCount", default)]
    vector_count: u64,
}

/// A match whose metadata does not parse is still returned, without metadata
fn query_match(raw: RawMatch) -> QueryMatch {
    let metadata = raw.metadata.and_then(|value| match serde_json::from_value(value) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            warn!("Dropping unreadable metadata on match {}: {}", raw.id, e);
            None
        }
    });

    QueryMatch {
        id: raw.id,
        score: raw.score,
        metadata,
    }
}

#[async_trait]
impl VectorStoreProvider for PineconeStore {
    async fn upsert_batch(&self, records: &[VectorRecord], namespace: &str) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let vectors = records
            .iter()
            .map(|record| {
                Ok(json!({
                    "id": record.id,
                    "values": record.values,
                    "metadata": pinecone_metadata(record)?,
                }))
            })
            .collect::<Result<Vec<_>>>()?;

        let response = self
            .post(
                "vectors/upsert",
                &json!({ "vectors": vectors, "namespace": namespace }),
            )
            .await?;

        let parsed: UpsertResponse = serde_json::from_value(response)?;
        let count = parsed.upserted_count.unwrap_or(records.len());
        debug!("Pinecone upserted {} vectors into '{}'", count, namespace);
        Ok(count)
    }

    async fn query(&self, vector: &[f32], top_k: usize, namespace: &str) -> Result<Vec<QueryMatch>> {
        let response = self
            .post(
                "query",
                &json!({
                    "namespace": namespace,
                    "vector": vector,
                    "topK": top_k,
                    "includeMetadata": true,
                    "includeValues": false,
                }),
            )
            .await?;

        let parsed: QueryResponse = serde_json::from_value(response)?;
        Ok(parsed.matches.into_iter().map(query_match).collect())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let response = self.post("describe_index_stats", &json!({})).await?;
        let parsed: StatsResponse = serde_json::from_value(response)?;

        Ok(IndexStats {
            total_count: parsed.total_vector_count,
            namespaces: parsed
                .namespaces
                .into_iter()
                .map(|(name, summary)| (name, summary.vector_count))
                .collect(),
        })
    }

    fn name(&self) -> &str {
        "pinecone"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BaseMetadata, Chunk, DocumentMetadata, FileType, IngestSource};

    fn record() -> VectorRecord {
        let mut document = DocumentMetadata::default();
        document.extra.insert("reading_level".into(), json!({"grade": 9}));
        document.extra.insert("pages".into(), json!(120));
        let base = BaseMetadata::new("atlas.epub", FileType::Epub, IngestSource::UserUpload, document);

        VectorRecord {
            id: "rec-1".into(),
            values: vec![0.1, 0.2],
            metadata: base.for_chunk(&Chunk::new(0, "Maps of the world")),
        }
    }

    #[test]
    fn test_metadata_is_flattened_for_pinecone() {
        let metadata = pinecone_metadata(&record()).unwrap();
        assert_eq!(metadata["filename"], "atlas.epub");
        assert_eq!(metadata["source"], "user_upload");
        assert_eq!(metadata["pages"], 120);
        assert_eq!(metadata["tags"], json!([]));
        assert_eq!(metadata["reading_level"], json!("{\"grade\":9}"));
    }

    #[test]
    fn test_store_failure_classification() {
        assert!(matches!(store_failure(StatusCode::FORBIDDEN, ""), Error::Auth(_)));
        assert!(store_failure(StatusCode::SERVICE_UNAVAILABLE, "").is_retryable());
        assert!(!store_failure(StatusCode::BAD_REQUEST, "dimension mismatch").is_retryable());
    }

    #[test]
    fn test_stats_response_parsing() {
        let raw = json!({
            "namespaces": {"default": {"vectorCount": 42}},
            "dimension": 1536,
            "totalVectorCount": 42
        });
        let parsed: StatsResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.total_vector_count, 42);
        assert_eq!(parsed.namespaces["default"].vector_count, 42);
    }

    #[test]
    fn test_new_requires_host() {
        let config = PineconeConfig {
            api_key: Some("pc-test".into()),
            ..Default::default()
        };
        assert!(matches!(PineconeStore::new(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_query_match_metadata_from_pinecone() {
        let response = json!({
            "matches": [
                {
                    "id": "rec-1",
                    "score": 0.92,
                    "metadata": {
                        "text": "Maps of the world",
                        "filename": "atlas.epub",
                        "filetype": "epub",
                        "subject": "geography",
                        "tags": [],
                        "chunk_id": 0.0,
                        "source": "user_upload",
                        "pages": 120.0
                    }
                },
                {"id": "rec-2", "score": 0.5, "metadata": {"text": "orphan"}}
            ]
        });
        let parsed: QueryResponse = serde_json::from_value(response).unwrap();
        let matches: Vec<QueryMatch> = parsed.matches.into_iter().map(query_match).collect();

        let metadata = matches[0].metadata.as_ref().unwrap();
        assert_eq!(metadata.chunk_id, 0);
        assert_eq!(metadata.filename, "atlas.epub");
        assert_eq!(metadata.extra["pages"], json!(120.0));
        assert_eq!(matches[1].id, "rec-2");
        assert!(matches[1].metadata.is_none());
    }
}
