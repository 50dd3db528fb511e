pub mod error;
pub mod relay;
pub mod types;

pub use error::ApiError;
pub use relay::RelayClient;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use std::pin::Pin;
use tokio_util::bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::state::{Message, ModelInfo};

/// Raw response body of a streamed chat request.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ApiError>> + Send>>;

/// Prompt sent to make the upstream server load a model into memory.
pub const PRIMING_PROMPT: &str = "Initialize";

/// The relay operations the client depends on.
#[async_trait]
pub trait RelayApi: Send + Sync + 'static {
    /// Models installed on the upstream server.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, ApiError>;

    /// The model currently resident in upstream memory, if any.
    async fn loaded_model(&self) -> Result<Option<String>, ApiError>;

    /// Start a chat turn. The returned body yields relay NDJSON bytes and
    /// fails with [`ApiError::Cancelled`] once `token` is cancelled.
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        token: CancellationToken,
    ) -> Result<ByteStream, ApiError>;

    /// Unload `model` from upstream memory.
    async fn close_model(&self, model: &str) -> Result<(), ApiError>;

    /// Load `model` by sending a priming chat turn and draining the reply.
    ///
    /// Loads are not cancellable: once issued they run to completion or failure.
    async fn load_model(&self, model: &str) -> Result<(), ApiError> {
        let priming = [Message::user(PRIMING_PROMPT)];
        let mut body = self.chat(model, &priming, CancellationToken::new()).await?;
        let mut received = 0usize;
        while let Some(chunk) = body.next().await {
            received += chunk?.len();
        }
        debug!(target: "lumen::api", model, received, "Priming response drained");
        Ok(())
    }
}
