//! OpenAI-compatible embeddings endpoint.
//!
//! The response body is decoded into a typed shape; anything that does not
//! fit it becomes `ProviderError::Malformed` rather than a panic at an
//! access site.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::embeddings::Embedder;
use crate::error::ProviderError;

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    dim: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl OpenAiEmbedder {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: String,
        dim: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build embeddings HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key,
            dim,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("embeddings request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transient(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        parse_response(&body, texts.len(), self.dim)
    }
}

pub(crate) fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());
    let message = format!("HTTP {}: {}", status.as_u16(), detail);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            ProviderError::Transient(message)
        }
        s if s.is_server_error() => ProviderError::Transient(message),
        _ => ProviderError::Malformed(message),
    }
}

/// Decodes a success body into vectors ordered like the request inputs.
pub(crate) fn parse_response(
    body: &str,
    expected_len: usize,
    dim: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    let mut parsed: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Malformed(format!("undecodable embeddings response: {e}")))?;

    if parsed.data.len() != expected_len {
        return Err(ProviderError::Malformed(format!(
            "expected {expected_len} embeddings, got {}",
            parsed.data.len()
        )));
    }

    parsed.data.sort_by_key(|d| d.index);
    let mut out = Vec::with_capacity(expected_len);
    for (position, datum) in parsed.data.into_iter().enumerate() {
        if datum.index != position {
            return Err(ProviderError::Malformed(format!(
                "embedding indices are not a permutation of 0..{expected_len}"
            )));
        }
        if datum.embedding.len() != dim {
            return Err(ProviderError::Malformed(format!(
                "embedding {position} has dimension {}, expected {dim}",
                datum.embedding.len()
            )));
        }
        out.push(datum.embedding);
    }
    Ok(out)
}
