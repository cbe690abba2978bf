pub mod error;
pub mod types;

pub use error::{EmbedError, Result};
pub use types::{EmbeddingRequest, EmbeddingResponse};

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

const BASE_URL: &str = "https://api.openai.com/v1";

/// Client for an OpenAI-compatible embeddings endpoint. Requests carry
/// bearer-token authorization and ask for a fixed output dimension; every
/// returned vector is checked against it.
pub struct EmbedClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl EmbedClient {
    pub fn new(http: reqwest::Client, api_key: String, model: String, dimensions: usize) -> Self {
        Self {
            http,
            api_key,
            base_url: BASE_URL.to_string(),
            model,
            dimensions,
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| EmbedError::Parse(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::Parse("no embedding in response".to_string()))
    }

    /// Embed a batch of texts. Vectors are returned in input order
    /// regardless of the order the provider lists them in.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
            dimensions: self.dimensions,
        };

        let resp = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(EmbedError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| EmbedError::Parse(e.to_string()))?;

        if let Some(usage) = &body.usage {
            tracing::info!(
                prompt_tokens = usage.prompt_tokens,
                total_tokens = usage.total_tokens,
                "embedding API usage"
            );
        }

        if body.data.len() != texts.len() {
            return Err(EmbedError::Parse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.data.len()
            )));
        }

        let mut data = body.data;
        data.sort_by_key(|d| d.index);
        for item in &data {
            if item.embedding.len() != self.dimensions {
                return Err(EmbedError::Dimension {
                    expected: self.dimensions,
                    got: item.embedding.len(),
                });
            }
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}
