use futures_core::Stream;
use futures_util::StreamExt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stats::{RateMeter, StreamStats};
use crate::api::{ApiError, ByteStream};
use crate::state::{Message, StatePatch, StateStore};
use crate::wire::{LineDecoder, WireEvent, decode_line};

/// What a chat response produces, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// An incremental fragment, with everything received so far.
    Chunk {
        chunk: String,
        full_response: String,
        stats: StreamStats,
    },
    /// The relay sent its terminal marker; the assistant turn is in the history.
    Completed { content: String, stats: StreamStats },
    /// Generation was cancelled before completion; nothing was appended.
    Stopped { partial: String },
}

/// The single chat request that may be in flight for a client.
#[derive(Debug, Default)]
pub(crate) struct RequestSlot {
    current: Mutex<Option<(u64, CancellationToken)>>,
    next_id: AtomicU64,
}

impl RequestSlot {
    fn begin(&self, token: CancellationToken) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((id, token));
        if let Some((_, orphaned)) = previous {
            orphaned.cancel();
        }
        id
    }

    /// Clear the slot if it still holds request `id`.
    fn release(&self, id: u64) -> bool {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(current.as_ref(), Some((current_id, _)) if *current_id == id) {
            *current = None;
            true
        } else {
            false
        }
    }

    /// Take whatever request is in flight.
    pub(crate) fn take(&self) -> Option<CancellationToken> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|(_, token)| token)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Finalize a response that will not complete: clear `is_responding` and
/// mark the latest assistant turn, if the history ends with one, as stopped.
pub(crate) fn finish_stopped(store: &StateStore) {
    store.update(|state| {
        let patch = StatePatch::new().is_responding(false);
        match state.message_history.last() {
            Some(Message::Assistant { .. }) => {
                let mut history = state.message_history.clone();
                if let Some(last) = history.last_mut() {
                    last.mark_stopped();
                }
                patch.message_history(history)
            }
            _ => patch,
        }
    });
}

/// Ownership of the in-flight slot for one request.
///
/// Exactly one finalization wins: whichever of completion, failure, stop or
/// drop still finds this request in the slot applies its state change.
pub(crate) struct InFlight {
    id: u64,
    requests: Arc<RequestSlot>,
    store: StateStore,
    armed: bool,
}

impl InFlight {
    pub(crate) fn begin(
        requests: Arc<RequestSlot>,
        store: StateStore,
        token: CancellationToken,
    ) -> Self {
        let id = requests.begin(token);
        Self {
            id,
            requests,
            store,
            armed: true,
        }
    }

    fn disarm(&mut self) -> bool {
        self.armed = false;
        self.requests.release(self.id)
    }

    /// Append the finished assistant turn. Returns false if a stop got there first.
    pub(crate) fn complete(mut self, content: &str, stats: StreamStats) -> bool {
        if !self.disarm() {
            return false;
        }
        let message = Message::assistant(content, stats.to_string());
        self.store.update(|state| {
            let mut history = state.message_history.clone();
            history.push(message);
            StatePatch::new().message_history(history).is_responding(false)
        });
        true
    }

    pub(crate) fn fail(mut self) {
        if self.disarm() {
            self.store.set_state(StatePatch::new().is_responding(false));
        }
    }

    pub(crate) fn stop(mut self) {
        if self.disarm() {
            finish_stopped(&self.store);
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.armed && self.disarm() {
            debug!(target: "lumen::chat::stream", "Response dropped before completion");
            finish_stopped(&self.store);
        }
    }
}

type EventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent, ApiError>> + Send>>;

/// A cancellable, single-pass sequence of [`ChatEvent`]s for one chat turn.
///
/// The sequence ends after `Completed`, `Stopped`, or the first error.
/// Dropping it before the end is treated like a stop.
pub struct ChatResponseStream {
    events: EventStream,
    token: CancellationToken,
}

impl std::fmt::Debug for ChatResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatResponseStream")
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ChatResponseStream {
    pub(crate) fn new(
        body: ByteStream,
        in_flight: InFlight,
        token: CancellationToken,
        started: Instant,
        min_update_interval: Option<Duration>,
    ) -> Self {
        let events = Self::consume(body, in_flight, token.clone(), started, min_update_interval);
        Self {
            events: Box::pin(events),
            token,
        }
    }

    /// Stop generation. The sequence yields `Stopped` and ends.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn consume(
        mut body: ByteStream,
        in_flight: InFlight,
        token: CancellationToken,
        started: Instant,
        min_update_interval: Option<Duration>,
    ) -> impl Stream<Item = Result<ChatEvent, ApiError>> + Send + 'static {
        async_stream::stream! {
            let mut in_flight = Some(in_flight);
            let mut decoder = LineDecoder::new();
            let mut full_response = String::new();
            let mut meter = RateMeter::new(started, min_update_interval);

            'read: loop {
                let next = tokio::select! {
                    biased;
                    () = token.cancelled() => Some(Err(ApiError::Cancelled)),
                    next = body.next() => next,
                };

                let (lines, ended) = match next {
                    Some(Ok(bytes)) => (decoder.push(&bytes), false),
                    Some(Err(ApiError::Cancelled)) => {
                        debug!(
                            target: "lumen::chat::stream",
                            received = full_response.len(),
                            "Response generation stopped"
                        );
                        if let Some(in_flight) = in_flight.take() {
                            in_flight.stop();
                        }
                        yield Ok(ChatEvent::Stopped { partial: std::mem::take(&mut full_response) });
                        break 'read;
                    }
                    Some(Err(e)) => {
                        warn!(target: "lumen::chat::stream", "Response stream failed: {}", e);
                        if let Some(in_flight) = in_flight.take() {
                            in_flight.fail();
                        }
                        yield Err(e);
                        break 'read;
                    }
                    None => (decoder.finish().into_iter().collect::<Vec<_>>(), true),
                };

                for line in lines {
                    let events = match decode_line(&line) {
                        Ok(events) => events,
                        Err(e) => {
                            warn!(
                                target: "lumen::chat::stream",
                                line = %line,
                                "Skipping malformed stream line: {}",
                                e
                            );
                            continue;
                        }
                    };

                    for event in events {
                        match event {
                            WireEvent::Chunk(chunk) => {
                                full_response.push_str(&chunk);
                                let stats = meter.record(&chunk);
                                yield Ok(ChatEvent::Chunk {
                                    chunk,
                                    full_response: full_response.clone(),
                                    stats,
                                });
                            }
                            WireEvent::Done => {
                                let stats = meter.finish();
                                let completed = in_flight
                                    .take()
                                    .is_some_and(|in_flight| in_flight.complete(&full_response, stats));
                                if completed {
                                    info!(
                                        target: "lumen::chat::stream",
                                        tokens = stats.token_count,
                                        "Response completed ({})",
                                        stats
                                    );
                                    yield Ok(ChatEvent::Completed {
                                        content: std::mem::take(&mut full_response),
                                        stats,
                                    });
                                } else {
                                    yield Ok(ChatEvent::Stopped {
                                        partial: std::mem::take(&mut full_response),
                                    });
                                }
                                break 'read;
                            }
                        }
                    }
                }

                if ended {
                    warn!(
                        target: "lumen::chat::stream",
                        received = full_response.len(),
                        "Response ended without a done marker"
                    );
                    if let Some(in_flight) = in_flight.take() {
                        in_flight.fail();
                    }
                    yield Err(ApiError::Stream {
                        details: "response ended before completion".to_string(),
                    });
                    break 'read;
                }
            }
        }
    }
}

impl Stream for ChatResponseStream {
    type Item = Result<ChatEvent, ApiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.as_mut().poll_next(cx)
    }
}
