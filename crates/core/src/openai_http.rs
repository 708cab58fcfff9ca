//! Thin HTTP access to OpenAI endpoints that need raw request bodies or
//! streamed responses (the Responses API with hosted tools, streaming speech).

use anyhow::{Context, Result, bail};
use secrecy::{ExposeSecret, SecretString};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAIHttp {
    http: reqwest::Client,
    api_base: String,
    api_key: SecretString,
}

impl OpenAIHttp {
    pub fn new(api_base: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    /// POSTs a JSON body and fails with the response body on non-2xx status.
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        let url = self.endpoint(path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("{url} returned {status}: {detail}");
        }
        Ok(response)
    }
}

impl std::fmt::Debug for OpenAIHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIHttp")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}
