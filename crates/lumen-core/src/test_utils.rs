//! Test utilities for lumen-core
//!
//! In-memory stand-ins for the relay, usable from integration tests and from
//! downstream crates.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, ByteStream, RelayApi};
use crate::state::{Message, ModelInfo};
use crate::wire::WireEvent;

/// One relay call as observed by [`FakeRelay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCall {
    ListModels,
    LoadedModel,
    Chat { model: String, messages: Vec<Message> },
    Close(String),
    Load(String),
}

/// What the next chat request answers with.
#[derive(Debug)]
pub enum ChatScript {
    /// Yield these body chunks, then end.
    Chunks(Vec<Bytes>),
    /// Yield whatever the test pushes through the paired sender; end when it is dropped.
    Channel(mpsc::UnboundedReceiver<Result<Bytes, ApiError>>),
    /// Fail the request before any body arrives.
    Fail(ApiError),
    /// Never answer; the request only ends when it is cancelled.
    Pending,
}

impl ChatScript {
    /// A well-formed reply made of `chunks` followed by the done marker.
    pub fn reply(chunks: &[&str]) -> Self {
        let mut body: Vec<Bytes> = chunks.iter().map(|chunk| chunk_line(chunk)).collect();
        body.push(done_line());
        ChatScript::Chunks(body)
    }

    /// A script fed by the returned sender.
    pub fn channel() -> (mpsc::UnboundedSender<Result<Bytes, ApiError>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, ChatScript::Channel(rx))
    }
}

pub fn chunk_line(text: &str) -> Bytes {
    Bytes::from(WireEvent::Chunk(text.to_string()).to_line())
}

pub fn done_line() -> Bytes {
    Bytes::from(WireEvent::Done.to_line())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scriptable in-memory relay.
///
/// Loads and closes succeed unless the model was registered with
/// [`FakeRelay::fail_load`] / [`FakeRelay::fail_close`]. With a load or close
/// gate installed, every such call waits for one permit before settling.
#[derive(Debug, Default)]
pub struct FakeRelay {
    models: Vec<ModelInfo>,
    loaded: Mutex<Option<String>>,
    calls: Mutex<Vec<RelayCall>>,
    chat_scripts: Mutex<VecDeque<ChatScript>>,
    failing_loads: Mutex<HashSet<String>>,
    failing_closes: Mutex<HashSet<String>>,
    load_gate: Option<Arc<Semaphore>>,
    close_gate: Option<Arc<Semaphore>>,
}

impl FakeRelay {
    pub fn new(models: &[&str]) -> Self {
        Self {
            models: models.iter().map(|name| ModelInfo::new(*name)).collect(),
            ..Default::default()
        }
    }

    pub fn with_loaded(self, model: &str) -> Self {
        *lock(&self.loaded) = Some(model.to_string());
        self
    }

    /// Hold every load until a permit is added to the returned semaphore.
    pub fn with_load_gate(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.load_gate = Some(gate.clone());
        (self, gate)
    }

    /// Hold every close until a permit is added to the returned semaphore.
    pub fn with_close_gate(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.close_gate = Some(gate.clone());
        (self, gate)
    }

    pub fn fail_load(&self, model: &str) {
        lock(&self.failing_loads).insert(model.to_string());
    }

    pub fn fail_close(&self, model: &str) {
        lock(&self.failing_closes).insert(model.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.failing_loads).clear();
        lock(&self.failing_closes).clear();
    }

    pub fn push_chat(&self, script: ChatScript) {
        lock(&self.chat_scripts).push_back(script);
    }

    pub fn calls(&self) -> Vec<RelayCall> {
        lock(&self.calls).clone()
    }

    pub fn loads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RelayCall::Load(model) => Some(model),
                _ => None,
            })
            .collect()
    }

    pub fn closes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RelayCall::Close(model) => Some(model),
                _ => None,
            })
            .collect()
    }

    /// The model the fake currently considers resident.
    pub fn resident(&self) -> Option<String> {
        lock(&self.loaded).clone()
    }

    fn record(&self, call: RelayCall) {
        lock(&self.calls).push(call);
    }
}

async fn pass(gate: Option<&Arc<Semaphore>>) -> Result<(), ApiError> {
    if let Some(gate) = gate {
        gate.acquire()
            .await
            .map_err(|e| ApiError::Stream {
                details: e.to_string(),
            })?
            .forget();
    }
    Ok(())
}

#[async_trait]
impl RelayApi for FakeRelay {
    async fn list_models(&self) -> Result<Vec<ModelInfo>, ApiError> {
        self.record(RelayCall::ListModels);
        Ok(self.models.clone())
    }

    async fn loaded_model(&self) -> Result<Option<String>, ApiError> {
        self.record(RelayCall::LoadedModel);
        Ok(self.resident())
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        token: CancellationToken,
    ) -> Result<ByteStream, ApiError> {
        self.record(RelayCall::Chat {
            model: model.to_string(),
            messages: messages.to_vec(),
        });
        if token.is_cancelled() {
            return Err(ApiError::Cancelled);
        }

        let script = lock(&self.chat_scripts)
            .pop_front()
            .unwrap_or_else(|| ChatScript::reply(&[]));

        let mut rx = match script {
            ChatScript::Fail(e) => return Err(e),
            ChatScript::Pending => {
                token.cancelled().await;
                return Err(ApiError::Cancelled);
            }
            ChatScript::Chunks(chunks) => {
                let (tx, rx) = mpsc::unbounded_channel();
                for chunk in chunks {
                    let _ = tx.send(Ok(chunk));
                }
                rx
            }
            ChatScript::Channel(rx) => rx,
        };

        let stream = async_stream::stream! {
            loop {
                let next = tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        yield Err(ApiError::Cancelled);
                        break;
                    }
                    next = rx.recv() => next,
                };
                match next {
                    Some(item) => yield item,
                    None => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn close_model(&self, model: &str) -> Result<(), ApiError> {
        self.record(RelayCall::Close(model.to_string()));
        pass(self.close_gate.as_ref()).await?;
        if lock(&self.failing_closes).contains(model) {
            return Err(ApiError::Rejected {
                operation: format!("close of {model}"),
                details: "scripted failure".to_string(),
            });
        }
        let mut loaded = lock(&self.loaded);
        if loaded.as_deref() == Some(model) {
            *loaded = None;
        }
        Ok(())
    }

    async fn load_model(&self, model: &str) -> Result<(), ApiError> {
        self.record(RelayCall::Load(model.to_string()));
        pass(self.load_gate.as_ref()).await?;
        if lock(&self.failing_loads).contains(model) {
            return Err(ApiError::ServerError {
                status_code: 500,
                details: format!("scripted failure loading {model}"),
            });
        }
        *lock(&self.loaded) = Some(model.to_string());
        Ok(())
    }
}
