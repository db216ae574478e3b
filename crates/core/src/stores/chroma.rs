//! ChromaDB-backed [`VectorStore`] over the REST API.

use crate::error::{EngineError, Result};
use crate::models::{DocumentChunk, DocumentMetadata, RetrievalResult, SearchRequest};
use crate::stores::{CollectionStats, VectorStore};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

pub struct ChromaStore {
    client: Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl ChromaStore {
    pub fn new(endpoint: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            auth_token,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}/api/v1{}", self.endpoint, path));
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Chroma addresses collections by id; resolve a name first.
    async fn collection_id(&self, name: &str) -> Result<String> {
        let response = self
            .request(reqwest::Method::GET, &format!("/collections/{name}"))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::UnknownCollection(name.to_string()));
        }
        if !response.status().is_success() {
            return Err(EngineError::store("chroma", response.status().to_string()));
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/id")
            .and_then(Value::as_str)
            .map(|id| id.to_string())
            .ok_or_else(|| EngineError::store("chroma", "collection response missing id"))
    }

    fn chunk_to_metadata(chunk: &DocumentChunk) -> Result<Value> {
        // Chroma metadata values must be scalars; the full record rides
        // along as a JSON string for lossless reconstruction.
        Ok(json!({
            "document_id": chunk.document_id,
            "chunk_index": chunk.chunk_index,
            "start_offset": chunk.start_offset,
            "end_offset": chunk.end_offset,
            "checksum": chunk.metadata.checksum,
            "doc_type": chunk.metadata.doc_type.as_str(),
            "title": chunk.metadata.title,
            "source": chunk.metadata.source,
            "language": chunk.metadata.language,
            "metadata_json": serde_json::to_string(&chunk.metadata)?,
        }))
    }

    fn parse_metadata(raw: &Value) -> Option<DocumentMetadata> {
        raw.pointer("/metadata_json")
            .and_then(Value::as_str)
            .and_then(|encoded| serde_json::from_str(encoded).ok())
    }

    fn filters_to_where(request: &SearchRequest) -> Option<Value> {
        if request.filters.is_empty() {
            return None;
        }
        let clauses: Vec<Value> = request
            .filters
            .iter()
            .map(|(key, value)| json!({ key: { "$eq": value } }))
            .collect();
        if clauses.len() == 1 {
            Some(clauses.into_iter().next().unwrap_or_default())
        } else {
            Some(json!({ "$and": clauses }))
        }
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, "/collections")
            .json(&json!({
                "name": name,
                "get_or_create": true,
                "metadata": {
                    "dimension": dimension,
                    "distance_metric": "cosine",
                },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngineError::store("chroma", response.status().to_string()));
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/collections/{name}"))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::UnknownCollection(name.to_string()));
        }
        if !response.status().is_success() {
            return Err(EngineError::store("chroma", response.status().to_string()));
        }
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let response = self
            .request(reqwest::Method::GET, "/collections")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EngineError::store("chroma", response.status().to_string()));
        }

        let parsed: Value = response.json().await?;
        let names = parsed
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.pointer("/name").and_then(Value::as_str))
                    .map(|name| name.to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }

    async fn add_documents(&self, collection: &str, chunks: &[DocumentChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let id = self.collection_id(collection).await?;

        let mut ids = Vec::with_capacity(chunks.len());
        let mut embeddings = Vec::with_capacity(chunks.len());
        let mut metadatas = Vec::with_capacity(chunks.len());
        let mut documents = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            ids.push(chunk.chunk_id.clone());
            embeddings.push(chunk.embedding.clone());
            metadatas.push(Self::chunk_to_metadata(chunk)?);
            documents.push(chunk.content.clone());
        }

        let response = self
            .request(reqwest::Method::POST, &format!("/collections/{id}/upsert"))
            .json(&json!({
                "ids": ids,
                "embeddings": embeddings,
                "metadatas": metadatas,
                "documents": documents,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngineError::store("chroma", response.status().to_string()));
        }
        Ok(())
    }

    async fn update_document(&self, collection: &str, chunk: &DocumentChunk) -> Result<()> {
        self.add_documents(collection, std::slice::from_ref(chunk))
            .await
    }

    async fn delete_document(&self, collection: &str, chunk_id: &str) -> Result<()> {
        let id = self.collection_id(collection).await?;
        let response = self
            .request(reqwest::Method::POST, &format!("/collections/{id}/delete"))
            .json(&json!({ "ids": [chunk_id] }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngineError::store("chroma", response.status().to_string()));
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        request: &SearchRequest,
    ) -> Result<Vec<RetrievalResult>> {
        let id = self.collection_id(collection).await?;
        let where_clause = Self::filters_to_where(request);

        let mut results = if let Some(embedding) = &request.embedding {
            let mut body = json!({
                "query_embeddings": [embedding],
                "n_results": request.top_k,
                "include": ["metadatas", "documents", "distances"],
            });
            if let Some(clause) = where_clause {
                body["where"] = clause;
            }

            let response = self
                .request(reqwest::Method::POST, &format!("/collections/{id}/query"))
                .json(&body)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(EngineError::store("chroma", response.status().to_string()));
            }

            let parsed: Value = response.json().await?;
            parse_query_results(&parsed)
        } else {
            // Keyword / pure-filter lookup via a metadata get, scored
            // client-side by token overlap.
            let mut body = json!({
                "limit": request.top_k,
                "include": ["metadatas", "documents"],
            });
            if let Some(clause) = where_clause {
                body["where"] = clause;
            }
            if let Some(query_text) = &request.query_text {
                if let Some(keyword) = query_text.split_whitespace().next() {
                    body["where_document"] = json!({ "$contains": keyword });
                }
            }

            let response = self
                .request(reqwest::Method::POST, &format!("/collections/{id}/get"))
                .json(&body)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(EngineError::store("chroma", response.status().to_string()));
            }

            let parsed: Value = response.json().await?;
            let mut hits = parse_get_results(&parsed);
            if let Some(query_text) = &request.query_text {
                for hit in &mut hits {
                    hit.score = overlap_score(&hit.content, query_text);
                }
            } else {
                for hit in &mut hits {
                    hit.score = 1.0;
                }
            }
            hits
        };

        if let Some(threshold) = request.threshold {
            results.retain(|hit| hit.score >= threshold);
        }
        results.sort_by(|left, right| right.score.total_cmp(&left.score));
        results.truncate(request.top_k);
        Ok(results)
    }

    async fn get_document(
        &self,
        collection: &str,
        chunk_id: &str,
    ) -> Result<Option<DocumentChunk>> {
        let id = self.collection_id(collection).await?;
        let response = self
            .request(reqwest::Method::POST, &format!("/collections/{id}/get"))
            .json(&json!({
                "ids": [chunk_id],
                "include": ["metadatas", "documents", "embeddings"],
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EngineError::store("chroma", response.status().to_string()));
        }

        let parsed: Value = response.json().await?;
        let metadata_raw = match parsed.pointer("/metadatas/0") {
            Some(value) if !value.is_null() => value,
            _ => return Ok(None),
        };
        let metadata = match Self::parse_metadata(metadata_raw) {
            Some(metadata) => metadata,
            None => return Ok(None),
        };

        let content = parsed
            .pointer("/documents/0")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let embedding = parsed
            .pointer("/embeddings/0")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_f64)
                    .map(|v| v as f32)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(DocumentChunk {
            chunk_id: chunk_id.to_string(),
            document_id: scalar_str(metadata_raw, "/document_id"),
            chunk_index: scalar_usize(metadata_raw, "/chunk_index"),
            start_offset: scalar_usize(metadata_raw, "/start_offset"),
            end_offset: scalar_usize(metadata_raw, "/end_offset"),
            content,
            metadata,
            embedding,
        }))
    }

    async fn collection_stats(&self, collection: &str) -> Result<CollectionStats> {
        let id = self.collection_id(collection).await?;
        let response = self
            .request(reqwest::Method::GET, &format!("/collections/{id}/count"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EngineError::store("chroma", response.status().to_string()));
        }
        let count: usize = response.json().await?;

        let meta_response = self
            .request(reqwest::Method::GET, &format!("/collections/{collection}"))
            .send()
            .await?;
        let dimension = if meta_response.status().is_success() {
            let parsed: Value = meta_response.json().await?;
            parsed
                .pointer("/metadata/dimension")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize
        } else {
            0
        };

        Ok(CollectionStats {
            document_count: count,
            dimension,
        })
    }

    async fn health_check(&self) -> bool {
        match self.request(reqwest::Method::GET, "/heartbeat").send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

fn scalar_str(raw: &Value, pointer: &str) -> String {
    raw.pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn scalar_usize(raw: &Value, pointer: &str) -> usize {
    raw.pointer(pointer).and_then(Value::as_u64).unwrap_or(0) as usize
}

fn overlap_score(content: &str, query_text: &str) -> f64 {
    let lowered = content.to_lowercase();
    let query_lowered = query_text.to_lowercase();
    let terms: Vec<&str> = query_lowered.split_whitespace().collect();
    if terms.is_empty() {
        return 0.0;
    }
    let matched = terms.iter().filter(|term| lowered.contains(**term)).count();
    matched as f64 / terms.len() as f64
}

/// Query responses nest per-query arrays: `ids[0]`, `distances[0]`, ...
fn parse_query_results(parsed: &Value) -> Vec<RetrievalResult> {
    let ids = parsed
        .pointer("/ids/0")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut results = Vec::with_capacity(ids.len());
    for (position, id) in ids.iter().enumerate() {
        let chunk_id = id.as_str().unwrap_or_default().to_string();
        let metadata_raw = parsed
            .pointer(&format!("/metadatas/0/{position}"))
            .cloned()
            .unwrap_or(Value::Null);
        let metadata = match ChromaStore::parse_metadata(&metadata_raw) {
            Some(metadata) => metadata,
            None => continue,
        };
        let distance = parsed
            .pointer(&format!("/distances/0/{position}"))
            .and_then(Value::as_f64)
            .unwrap_or(1.0);
        let content = parsed
            .pointer(&format!("/documents/0/{position}"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        results.push(RetrievalResult {
            chunk_id,
            document_id: scalar_str(&metadata_raw, "/document_id"),
            chunk_index: scalar_usize(&metadata_raw, "/chunk_index"),
            content,
            // Cosine distance to similarity.
            score: 1.0 - distance,
            metadata,
            highlights: Vec::new(),
            relevance: None,
        });
    }
    results
}

/// Get responses are flat arrays: `ids`, `metadatas`, `documents`.
fn parse_get_results(parsed: &Value) -> Vec<RetrievalResult> {
    let ids = parsed
        .pointer("/ids")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut results = Vec::with_capacity(ids.len());
    for (position, id) in ids.iter().enumerate() {
        let chunk_id = id.as_str().unwrap_or_default().to_string();
        let metadata_raw = parsed
            .pointer(&format!("/metadatas/{position}"))
            .cloned()
            .unwrap_or(Value::Null);
        let metadata = match ChromaStore::parse_metadata(&metadata_raw) {
            Some(metadata) => metadata,
            None => continue,
        };
        let content = parsed
            .pointer(&format!("/documents/{position}"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        results.push(RetrievalResult {
            chunk_id,
            document_id: scalar_str(&metadata_raw, "/document_id"),
            chunk_index: scalar_usize(&metadata_raw, "/chunk_index"),
            content,
            score: 0.0,
            metadata,
            highlights: Vec::new(),
            relevance: None,
        });
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_become_eq_clauses() {
        let mut request = SearchRequest {
            top_k: 5,
            ..Default::default()
        };
        assert!(ChromaStore::filters_to_where(&request).is_none());

        request
            .filters
            .insert("checksum".to_string(), json!("abc"));
        let single = ChromaStore::filters_to_where(&request).unwrap();
        assert_eq!(single, json!({ "checksum": { "$eq": "abc" } }));

        request
            .filters
            .insert("doc_type".to_string(), json!("policy"));
        let combined = ChromaStore::filters_to_where(&request).unwrap();
        assert!(combined.get("$and").is_some());
    }

    #[test]
    fn query_results_convert_distance_to_similarity() {
        let metadata_json = serde_json::to_string(&serde_json::json!({
            "document_id": "d1",
            "title": "T",
            "doc_type": "policy",
            "source": "s",
            "author": null,
            "version": null,
            "tags": [],
            "category": null,
            "language": "en",
            "size_bytes": 4,
            "checksum": "c",
            "structure": {
                "paragraph_count": 1,
                "has_headers": false,
                "has_bullets": false,
                "has_numbered_lists": false
            },
            "key_terms": [],
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        let parsed = json!({
            "ids": [["c1"]],
            "distances": [[0.25]],
            "documents": [["text"]],
            "metadatas": [[{
                "document_id": "d1",
                "chunk_index": 0,
                "metadata_json": metadata_json,
            }]],
        });

        let results = parse_query_results(&parsed);
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 0.75).abs() < 1e-9);
        assert_eq!(results[0].document_id, "d1");
    }
}
