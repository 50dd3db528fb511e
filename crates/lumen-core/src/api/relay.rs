use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Response;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::types::{ChatRequest, CloseResponse, LoadedModelResponse, ModelRequest, ModelsResponse};
use super::{ApiError, ByteStream, RelayApi};
use crate::state::{Message, ModelInfo};

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// HTTP client for the relay's `/api/*` surface.
#[derive(Clone, Debug)]
pub struct RelayClient {
    http_client: reqwest::Client,
    base_url: Url,
}

impl RelayClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base_url = normalize_base_url(base_url)?;
        // No overall timeout: chat bodies stay open for as long as the model generates.
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(ApiError::Network)?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Configuration(format!("Invalid relay endpoint {path}: {e}")))
    }

    async fn check_status(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!(target: "lumen::api", "Relay error status={} body={}", status, body);
        Err(ApiError::ServerError {
            status_code: status.as_u16(),
            details: body,
        })
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::ResponseParsing {
            endpoint: path.to_string(),
            details: e.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.http_client.get(self.endpoint(path)?).send().await?;
        let response = Self::check_status(response).await?;
        Self::parse_json(response, path).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .http_client
            .post(self.endpoint(path)?)
            .json(body)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Self::parse_json(response, path).await
    }
}

#[async_trait]
impl RelayApi for RelayClient {
    async fn list_models(&self) -> Result<Vec<ModelInfo>, ApiError> {
        let response: ModelsResponse = self.get_json("api/models").await?;
        Ok(response.models)
    }

    async fn loaded_model(&self) -> Result<Option<String>, ApiError> {
        let response: LoadedModelResponse = self.get_json("api/loaded-model").await?;
        Ok(response.loaded_model)
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        token: CancellationToken,
    ) -> Result<ByteStream, ApiError> {
        let request = ChatRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
        };
        let send = self
            .http_client
            .post(self.endpoint("api/chat")?)
            .json(&request)
            .send();

        let response = tokio::select! {
            biased;
            () = token.cancelled() => return Err(ApiError::Cancelled),
            response = send => response?,
        };
        let response = Self::check_status(response).await?;

        let mut body = response.bytes_stream();
        let stream = async_stream::stream! {
            loop {
                let next = tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        yield Err(ApiError::Cancelled);
                        break;
                    }
                    next = body.next() => next,
                };
                match next {
                    Some(Ok(bytes)) => yield Ok(bytes),
                    Some(Err(e)) => {
                        yield Err(ApiError::Network(e));
                        break;
                    }
                    None => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn close_model(&self, model: &str) -> Result<(), ApiError> {
        let request = ModelRequest {
            model: Some(model.to_string()),
        };
        let response: CloseResponse = self.post_json("api/close", &request).await?;
        if response.success {
            Ok(())
        } else {
            Err(ApiError::Rejected {
                operation: format!("close of {model}"),
                details: response.error.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }
}

/// Parse a relay base URL, making sure relative joins land under its path.
pub fn normalize_base_url(base_url: &str) -> Result<Url, ApiError> {
    let trimmed = base_url.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash)
        .map_err(|e| ApiError::Configuration(format!("Invalid relay URL '{base_url}': {e}")))
}
