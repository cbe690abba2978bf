pub mod error;

pub use error::{HeadlessError, Result};

use std::time::Duration;

/// Client for a Browserless-style remote headless-browser service.
///
/// `content` returns fully rendered HTML for a URL; `function` ships a
/// page-driving script to the service and returns whatever JSON the script
/// produces. Browser-driven source adapters build on `function` so the
/// clicking and response interception happen next to the page.
pub struct HeadlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HeadlessClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        let mut endpoint = format!("{}{path}", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }

    /// Fetch fully-rendered HTML for a URL.
    pub async fn content(&self, url: &str) -> Result<String> {
        let body = serde_json::json!({ "url": url });

        let resp = self
            .client
            .post(self.endpoint("/content"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(HeadlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }

    /// Run a page-driving script in the service and return its JSON result.
    /// `context` is passed to the script as its `context` argument.
    pub async fn function(
        &self,
        script: &str,
        context: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let body = serde_json::json!({ "code": script, "context": context });

        let resp = self
            .client
            .post(self.endpoint("/function"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(HeadlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        resp.json()
            .await
            .map_err(|e| HeadlessError::Parse(e.to_string()))
    }
}
