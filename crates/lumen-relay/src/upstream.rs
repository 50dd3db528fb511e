//! Client for the upstream Ollama HTTP API.

use futures_util::StreamExt;
use lumen_core::api::types::{ChatRequest, ModelsResponse};
use reqwest::Response;
use serde::Serialize;
use serde_json::{Value, json};
use std::pin::Pin;
use std::time::Duration;
use tokio_util::bytes::Bytes;
use tracing::debug;
use url::Url;

use crate::error::{RelayError, Result};

const CONNECT_TIMEOUT_SECS: u64 = 10;

pub type UpstreamBody = Pin<Box<dyn futures_util::Stream<Item = reqwest::Result<Bytes>> + Send>>;

#[derive(Debug, Serialize)]
struct UpstreamChatRequest<'a> {
    model: &'a str,
    messages: &'a [Value],
    stream: bool,
}

#[derive(Clone, Debug)]
pub struct OllamaClient {
    http_client: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            RelayError::Configuration(format!("Invalid upstream URL '{base_url}': {e}"))
        })?;
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http_client,
            base_url,
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RelayError::Configuration(format!("Invalid upstream endpoint {path}: {e}")))
    }

    async fn check_status(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let details = response.text().await.unwrap_or_default();
        debug!(target: "lumen::relay::upstream", "Upstream error status={} body={}", status, details);
        Err(RelayError::UpstreamStatus {
            status_code: status.as_u16(),
            details,
        })
    }

    /// Installed models from `/api/tags`, passed through as reported.
    pub async fn list_models(&self) -> Result<Vec<Value>> {
        let response = self
            .http_client
            .get(self.endpoint("api/tags")?)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let tags: ModelsResponse<Value> = response.json().await?;
        Ok(tags.models)
    }

    /// Start a streaming chat on `/api/chat` and hand back its body.
    ///
    /// Only the wait for response headers is bounded; the body streams for as
    /// long as the model generates.
    pub async fn chat(&self, request: &ChatRequest<Value>) -> Result<UpstreamBody> {
        let body = UpstreamChatRequest {
            model: &request.model,
            messages: &request.messages,
            stream: true,
        };
        let send = self
            .http_client
            .post(self.endpoint("api/chat")?)
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| RelayError::UpstreamTimeout(self.request_timeout.as_secs()))??;
        let response = Self::check_status(response).await?;
        Ok(response.bytes_stream().boxed())
    }

    /// Model details from `/api/show`, or `None` when upstream does not know it.
    pub async fn show(&self, model: &str) -> Result<Option<Value>> {
        let response = self
            .http_client
            .post(self.endpoint("api/show")?)
            .timeout(self.request_timeout)
            .json(&json!({ "name": model }))
            .send()
            .await?;
        if !response.status().is_success() {
            debug!(
                target: "lumen::relay::upstream",
                model,
                status = %response.status(),
                "Model not available upstream"
            );
            return Ok(None);
        }
        Ok(Some(response.json().await?))
    }
}
