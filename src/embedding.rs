//! Embedding contract and the Ollama HTTP client.
//!
//! The retrieval core never computes embeddings itself. It asks an
//! [`Embedder`] for vectors, and an [`EmbeddingBackend`] decides how an
//! embedder is built for a given (model, host) pair. Any failure surfaces
//! as [`Error::EmbeddingUnavailable`] so callers can degrade to keyword
//! retrieval.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of texts sent per embedding request.
const BATCH_SIZE: usize = 64;

/// Produces dense vectors for text.
pub trait Embedder: Send + Sync {
    /// Name of the embedding model; stores are bound to it.
    fn model(&self) -> &str;

    /// One vector per input text, in input order.
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_documents(&[text.to_string()])?;
        vectors.pop().ok_or_else(|| {
            Error::EmbeddingUnavailable("empty response for query".into())
        })
    }
}

/// Builds embedders for a configured model and host.
pub trait EmbeddingBackend: Send + Sync {
    fn embedder(&self, model: &str, host: &str) -> Result<Arc<dyn Embedder>>;
}

/// Backend that talks to an Ollama server.
#[derive(Debug, Default, Clone, Copy)]
pub struct OllamaBackend;

impl EmbeddingBackend for OllamaBackend {
    fn embedder(&self, model: &str, host: &str) -> Result<Arc<dyn Embedder>> {
        Ok(Arc::new(OllamaEmbedder::new(model, host)?))
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Embedder backed by `POST {host}/api/embed`.
pub struct OllamaEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(model: &str, host: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/embed", host.trim_end_matches('/')),
            model: model.to_string(),
        })
    }

    fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let unavailable = |e: reqwest::Error| {
            Error::EmbeddingUnavailable(format!("{}: {e}", self.endpoint))
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .map_err(unavailable)?;

        let status = response.status();
        if !status.is_success() {
            let reason = response
                .json::<ErrorResponse>()
                .map(|body| body.error)
                .unwrap_or_else(|_| status.to_string());
            return Err(Error::EmbeddingUnavailable(format!(
                "model '{}': {reason}",
                self.model
            )));
        }

        let body: EmbedResponse = response.json().map_err(unavailable)?;
        if body.embeddings.len() != texts.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }
        Ok(body.embeddings)
    }
}

impl Embedder for OllamaEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            vectors.extend(self.request(batch)?);
        }
        tracing::debug!(
            model = %self.model,
            count = vectors.len(),
            "embedded documents"
        );
        Ok(vectors)
    }
}

impl std::fmt::Debug for OllamaEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaEmbedder")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}
