//! Sending chat turns and consuming the streamed answer.

pub mod stats;
pub mod stream;

pub use stats::{RateMeter, StreamStats, count_tokens};
pub use stream::{ChatEvent, ChatResponseStream};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::RelayApi;
use crate::error::{Error, Result};
use crate::preferences::Preferences;
use crate::state::{Message, StatePatch, StateStore};
use stream::{InFlight, RequestSlot, finish_stopped};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatStreamConfig {
    /// Recompute the token rate at most this often. `None` recomputes on every chunk.
    pub min_update_interval: Option<Duration>,
}

impl From<&Preferences> for ChatStreamConfig {
    fn from(preferences: &Preferences) -> Self {
        Self {
            min_update_interval: preferences.min_update_interval(),
        }
    }
}

/// Drives chat turns against the relay and records them in the store.
///
/// At most one response is in flight per client; clones share that slot.
#[derive(Clone)]
pub struct ChatStreamClient {
    store: StateStore,
    api: Arc<dyn RelayApi>,
    config: ChatStreamConfig,
    requests: Arc<RequestSlot>,
}

impl std::fmt::Debug for ChatStreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStreamClient")
            .field("config", &self.config)
            .field("in_flight", &self.is_in_flight())
            .finish_non_exhaustive()
    }
}

impl ChatStreamClient {
    pub fn new(store: StateStore, api: Arc<dyn RelayApi>) -> Self {
        Self::with_config(store, api, ChatStreamConfig::default())
    }

    pub fn with_config(store: StateStore, api: Arc<dyn RelayApi>, config: ChatStreamConfig) -> Self {
        Self {
            store,
            api,
            config,
            requests: Arc::new(RequestSlot::default()),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Append `text` as a user turn and start streaming the reply from the
    /// selected model.
    ///
    /// Refused without touching state if a response is already in flight, no
    /// model is selected, or `text` is blank. If the request itself fails
    /// (including cancellation before the body arrives) `is_responding` is
    /// cleared and the error returned; the user turn stays in the history.
    pub async fn send_message(&self, text: &str) -> Result<ChatResponseStream> {
        let text = text.trim();
        let mut request = None;
        self.store.try_update(|state| {
            if state.is_responding {
                return Err(Error::InvalidOperation(
                    "A response is already being generated".to_string(),
                ));
            }
            let Some(model) = state.selected_model.clone() else {
                return Err(Error::InvalidOperation("No model selected".to_string()));
            };
            if text.is_empty() {
                return Err(Error::InvalidOperation("Message is empty".to_string()));
            }

            let mut history = state.message_history.clone();
            history.push(Message::user(text));
            request = Some((model, history.clone()));
            Ok(StatePatch::new().message_history(history).is_responding(true))
        })?;
        let Some((model, history)) = request else {
            return Err(Error::InvalidOperation("Message was not recorded".to_string()));
        };

        let started = Instant::now();
        let token = CancellationToken::new();
        let in_flight = InFlight::begin(self.requests.clone(), self.store.clone(), token.clone());

        info!(
            target: "lumen::chat",
            model = %model,
            turns = history.len(),
            "Sending chat request"
        );

        match self.api.chat(&model, &history, token.clone()).await {
            Ok(body) => Ok(ChatResponseStream::new(
                body,
                in_flight,
                token,
                started,
                self.config.min_update_interval,
            )),
            Err(e) if e.is_cancelled() => {
                debug!(target: "lumen::chat", "Chat request cancelled before the response arrived");
                in_flight.stop();
                Err(Error::Cancelled)
            }
            Err(e) => {
                warn!(target: "lumen::chat", model = %model, "Chat request failed: {}", e);
                in_flight.fail();
                Err(e.into())
            }
        }
    }

    /// Cancel the in-flight response, if any, and finalize it as stopped.
    ///
    /// Returns whether a response was actually in flight.
    pub fn stop_response_generation(&self) -> bool {
        match self.requests.take() {
            Some(token) => {
                debug!(target: "lumen::chat", "Stopping response generation");
                token.cancel();
                finish_stopped(&self.store);
                true
            }
            None => false,
        }
    }

    /// Empty the transcript. Refused while a response is in flight.
    pub fn clear_history(&self) -> Result<()> {
        self.store.try_update(|state| {
            if state.is_responding {
                return Err(Error::InvalidOperation(
                    "Cannot clear history while a response is being generated".to_string(),
                ));
            }
            Ok(StatePatch::new().message_history(Vec::new()))
        })
    }

    pub fn is_in_flight(&self) -> bool {
        self.requests.is_active()
    }
}
