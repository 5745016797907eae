// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Remote HTTP providers for dense embeddings and reranking.
//!
//! Speaks the OpenAI-compatible `/embeddings` contract and the
//! Cohere/Jina-style `/rerank` contract, which local runners (Ollama, TEI,
//! vLLM) also serve. Credentials come from the environment unless the
//! settings carry an explicit key.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{ProviderSettings, EMBED_API_KEY_VAR, RERANK_API_KEY_VAR};
use crate::error::ProviderError;

use super::{DenseEmbedder, Reranker};

const DEFAULT_EMBED_URL: &str = "http://localhost:11434/v1";
const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
const DEFAULT_RERANK_MODEL: &str = "rerank-lite";

/// Known output dimensions for common embedding models.
fn known_dimensions(model: &str) -> usize {
    match model {
        "nomic-embed-text" => 768,
        "mxbai-embed-large" => 1024,
        "all-minilm" => 384,
        "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
        "text-embedding-3-large" => 3072,
        _ => 768,
    }
}

/// Run `call` up to `1 + max_retries` times, backing off exponentially on
/// retryable provider errors.
async fn with_retries<T, F, Fut>(max_retries: u32, mut call: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_retries => {
                let delay = Duration::from_millis(200u64.saturating_mul(1 << attempt));
                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying provider call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Wrap a provider future with the configured deadline.
async fn with_deadline<T, Fut>(timeout_ms: u64, fut: Fut) -> Result<T, ProviderError>
where
    Fut: std::future::Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(timeout_ms)),
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Dense embedder backed by an OpenAI-compatible HTTP endpoint.
pub struct RemoteDenseEmbedder {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    timeout_ms: u64,
    max_retries: u32,
}

impl RemoteDenseEmbedder {
    pub fn new(settings: &ProviderSettings) -> Self {
        let model = settings
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string());
        let dimensions = known_dimensions(&model);
        Self {
            client: Client::new(),
            base_url: settings.url_or(DEFAULT_EMBED_URL).trim_end_matches('/').to_string(),
            api_key: settings.resolve_api_key(EMBED_API_KEY_VAR),
            model,
            dimensions,
            timeout_ms: settings.timeout_ms,
            max_retries: settings.max_retries,
        }
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        let mut builder = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("embedding request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(format!("failed to read response body: {e}")))?;

        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited(body));
        }
        if !status.is_success() {
            if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(ProviderError::api(parsed.error.message, status.as_u16()));
            }
            return Err(ProviderError::api(body, status.as_u16()));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Parse(format!("bad embedding response: {e}")))?;

        // The contract allows out-of-order data entries.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        if data.len() != texts.len() {
            return Err(ProviderError::Parse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }

        let vectors: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();
        for v in &vectors {
            if v.len() != self.dimensions {
                return Err(ProviderError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: v.len(),
                });
            }
        }
        Ok(vectors)
    }
}

#[async_trait]
impl DenseEmbedder for RemoteDenseEmbedder {
    fn name(&self) -> &str {
        "remote-dense"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        with_retries(self.max_retries, || {
            with_deadline(self.timeout_ms, self.request_embeddings(texts))
        })
        .await
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest {
    model: String,
    query: String,
    documents: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankEntry>,
}

#[derive(Debug, Deserialize)]
struct RerankEntry {
    index: usize,
    relevance_score: f32,
}

/// Reranker backed by a Cohere/Jina-style `/rerank` endpoint.
pub struct RemoteReranker {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout_ms: u64,
    max_retries: u32,
}

impl RemoteReranker {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let url = settings.url.clone().ok_or_else(|| ProviderError::Unavailable {
            variant: "remote-rerank".to_string(),
            missing: vec!["rerank.url".to_string()],
        })?;
        Ok(Self {
            client: Client::new(),
            base_url: url.trim_end_matches('/').to_string(),
            api_key: settings.resolve_api_key(RERANK_API_KEY_VAR),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_RERANK_MODEL.to_string()),
            timeout_ms: settings.timeout_ms,
            max_retries: settings.max_retries,
        })
    }

    async fn request_rerank(
        &self,
        query: &str,
        documents: &[String],
    ) -> Result<Vec<f32>, ProviderError> {
        let request = RerankRequest {
            model: self.model.clone(),
            query: query.to_string(),
            documents: documents.to_vec(),
        };

        let mut builder = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("rerank request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(format!("failed to read response body: {e}")))?;

        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited(body));
        }
        if !status.is_success() {
            return Err(ProviderError::api(body, status.as_u16()));
        }

        let parsed: RerankResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Parse(format!("bad rerank response: {e}")))?;

        let mut scores = vec![0.0f32; documents.len()];
        for entry in parsed.results {
            if entry.index < scores.len() {
                scores[entry.index] = entry.relevance_score.clamp(0.0, 1.0);
            }
        }
        Ok(scores)
    }
}

#[async_trait]
impl Reranker for RemoteReranker {
    fn name(&self) -> &str {
        "remote-rerank"
    }

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, ProviderError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        with_retries(self.max_retries, || {
            with_deadline(self.timeout_ms, self.request_rerank(query, documents))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_dimensions() {
        assert_eq!(known_dimensions("nomic-embed-text"), 768);
        assert_eq!(known_dimensions("text-embedding-3-large"), 3072);
        assert_eq!(known_dimensions("something-new"), 768);
    }

    #[test]
    fn test_embedder_defaults() {
        let embedder = RemoteDenseEmbedder::new(&ProviderSettings::default());
        assert_eq!(embedder.model(), "nomic-embed-text");
        assert_eq!(embedder.dimensions(), 768);
        assert_eq!(embedder.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_reranker_requires_url() {
        let result = RemoteReranker::new(&ProviderSettings::default());
        assert!(matches!(
            result,
            Err(ProviderError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_retries_stop_on_fatal_error() {
        let mut calls = 0;
        let result: Result<(), ProviderError> = with_retries(3, || {
            calls += 1;
            async { Err(ProviderError::NotConfigured("no key".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_retries_exhaust_on_transient_error() {
        let mut calls = 0;
        let result: Result<(), ProviderError> = with_retries(2, || {
            calls += 1;
            async { Err(ProviderError::Network("reset".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_deadline_maps_to_timeout() {
        let result: Result<(), ProviderError> = with_deadline(10, async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Timeout(10))));
    }
}
