//! Embedding providers. The worker and the assistant only see the
//! [`EmbeddingProvider`] trait; the Gemini client is one implementation.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const EMBEDDING_MODEL: &str = "models/text-embedding-004";
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub trait EmbeddingProvider: Send + Sync {
    /// Compute an embedding vector for the given text.
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    fn name(&self) -> &'static str;
}

/// Client for the Gemini `embedContent` endpoint (768-dimensional
/// text-embedding-004 vectors).
pub struct GeminiProvider {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: ContentPayload<'a>,
}

#[derive(Debug, Serialize)]
struct ContentPayload<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

impl GeminiProvider {
    pub fn new(api_key: String, base_url: String) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build embedding http client")?;

        Ok(GeminiProvider {
            client,
            api_key,
            base_url,
        })
    }
}

impl EmbeddingProvider for GeminiProvider {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let url = format!("{}/{}:embedContent", self.base_url, EMBEDDING_MODEL);

        let request = EmbedContentRequest {
            model: EMBEDDING_MODEL,
            content: ContentPayload {
                parts: vec![TextPart { text }],
            },
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("embedding API error ({status}): {body}"));
        }

        let response: EmbedContentResponse = response.json()?;

        if response.embedding.values.is_empty() {
            return Err(anyhow!("embedding API returned an empty vector"));
        }

        Ok(response.embedding.values)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
