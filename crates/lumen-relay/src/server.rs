use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use lumen_core::api::types::{
    ChatRequest, CheckModelResponse, CloseResponse, LoadedModelResponse, ModelRequest,
    ModelsResponse,
};
use lumen_core::wire::{LineDecoder, NDJSON_CONTENT_TYPE, WireEvent, translate_upstream_line};
use serde_json::Value;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::process::{OllamaCli, ProcessControl, StopOutcome};
use crate::upstream::{OllamaClient, UpstreamBody};

/// Shared handles for all relay handlers.
#[derive(Clone)]
pub struct RelayState {
    upstream: OllamaClient,
    process: Arc<dyn ProcessControl>,
}

impl RelayState {
    pub fn new(upstream: OllamaClient, process: Arc<dyn ProcessControl>) -> Self {
        Self { upstream, process }
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let upstream = OllamaClient::new(&config.upstream_url, config.request_timeout())?;
        let process = Arc::new(OllamaCli::new(config.ollama_bin.clone()));
        Ok(Self::new(upstream, process))
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/models", get(list_models))
        .route("/api/loaded-model", get(loaded_model))
        .route("/api/chat", post(chat))
        .route("/api/close", post(close_model))
        .route("/api/check-model", post(check_model))
        .with_state(state)
}

/// Run the relay on `listener` until `shutdown` resolves.
pub async fn run<F>(listener: TcpListener, state: RelayState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Bind according to `config` and serve until Ctrl+C.
pub async fn serve(config: &RelayConfig) -> Result<()> {
    let addr = config.socket_addr()?;
    let state = RelayState::from_config(config)?;
    let listener = TcpListener::bind(addr).await?;

    info!(
        target: "lumen::relay",
        addr = %listener.local_addr()?,
        upstream = %config.upstream_url,
        "Relay listening"
    );

    run(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(target: "lumen::relay", "Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!(target: "lumen::relay", "Shutdown signal received");
    })
    .await
}

async fn health() -> &'static str {
    "ok"
}

async fn list_models(State(state): State<RelayState>) -> Result<Json<ModelsResponse<Value>>> {
    let models = state.upstream.list_models().await?;
    debug!(target: "lumen::relay", count = models.len(), "Listed models");
    Ok(Json(ModelsResponse { models }))
}

async fn loaded_model(State(state): State<RelayState>) -> Json<LoadedModelResponse> {
    let loaded_model = match state.process.running_models().await {
        Ok(models) => models.into_iter().next(),
        Err(e) => {
            warn!(target: "lumen::relay", "Failed to list running models: {}", e);
            None
        }
    };
    Json(LoadedModelResponse { loaded_model })
}

fn required_model(request: ModelRequest) -> Result<String> {
    request
        .model
        .filter(|model| !model.trim().is_empty())
        .ok_or(RelayError::MissingModel)
}

async fn close_model(
    State(state): State<RelayState>,
    Json(request): Json<ModelRequest>,
) -> Result<Json<CloseResponse>> {
    let model = required_model(request)?;
    let response = match state.process.stop(&model).await {
        Ok(StopOutcome::Stopped | StopOutcome::NotRunning) => CloseResponse {
            success: true,
            error: None,
        },
        Err(e) => {
            warn!(target: "lumen::relay", model = %model, "Failed to stop model: {}", e);
            CloseResponse {
                success: false,
                error: Some(e.to_string()),
            }
        }
    };
    Ok(Json(response))
}

async fn check_model(
    State(state): State<RelayState>,
    Json(request): Json<ModelRequest>,
) -> Result<Json<CheckModelResponse>> {
    let model = required_model(request)?;
    let model_info = state.upstream.show(&model).await?;
    Ok(Json(CheckModelResponse {
        loaded: model_info.is_some(),
        model_info,
    }))
}

async fn chat(
    State(state): State<RelayState>,
    Json(request): Json<ChatRequest<Value>>,
) -> Result<Response> {
    let request_id = Uuid::new_v4();
    info!(
        target: "lumen::relay",
        %request_id,
        model = %request.model,
        messages = request.messages.len(),
        "Relaying chat request"
    );

    let upstream = state.upstream.chat(&request).await?;
    let headers = [
        (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
        (header::CACHE_CONTROL, "no-cache"),
    ];
    Ok((headers, Body::from_stream(relay_lines(upstream, request_id))).into_response())
}

/// Re-frame an upstream chat body as relay NDJSON, one write per admissible line.
fn relay_lines(
    mut upstream: UpstreamBody,
    request_id: Uuid,
) -> impl Stream<Item = std::result::Result<String, Infallible>> + Send + 'static {
    async_stream::stream! {
        let mut decoder = LineDecoder::new();
        let mut forwarded = 0usize;

        'read: loop {
            let (lines, ended) = match upstream.next().await {
                Some(Ok(bytes)) => (decoder.push(&bytes), false),
                Some(Err(e)) => {
                    warn!(target: "lumen::relay", %request_id, "Upstream stream failed: {}", e);
                    break 'read;
                }
                None => (decoder.finish().into_iter().collect::<Vec<_>>(), true),
            };

            for line in lines {
                let events = match translate_upstream_line(&line) {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(
                            target: "lumen::relay",
                            %request_id,
                            line = %line,
                            "Skipping malformed upstream line: {}",
                            e
                        );
                        continue;
                    }
                };
                for event in events {
                    forwarded += 1;
                    let done = event == WireEvent::Done;
                    yield Ok(event.to_line());
                    if done {
                        break 'read;
                    }
                }
            }

            if ended {
                break 'read;
            }
        }

        debug!(target: "lumen::relay", %request_id, forwarded, "Chat relay finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio_util::bytes::Bytes;

    fn body(chunks: &[&'static str]) -> UpstreamBody {
        let chunks: Vec<reqwest::Result<Bytes>> = chunks
            .iter()
            .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
            .collect();
        Box::pin(stream::iter(chunks))
    }

    async fn relayed(chunks: &[&'static str]) -> String {
        relay_lines(body(chunks), Uuid::nil())
            .map(|line| match line {
                Ok(line) => line,
                Err(never) => match never {},
            })
            .collect::<Vec<_>>()
            .await
            .concat()
    }

    #[tokio::test]
    async fn translates_and_drops_lines() {
        let output = relayed(&[
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
            "garbage\n{\"status\":\"pulling\"}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        ])
        .await;
        assert_eq!(
            output,
            "{\"chunk\":\"Hel\"}\n{\"chunk\":\"lo\"}\n{\"done\":true}\n"
        );
    }

    #[tokio::test]
    async fn reassembles_split_upstream_lines() {
        let output = relayed(&[
            "{\"message\":{\"content\":\"A",
            "B\"},\"done\":false}\n{\"done\":",
            "true}",
        ])
        .await;
        assert_eq!(output, "{\"chunk\":\"AB\"}\n{\"done\":true}\n");
    }

    #[tokio::test]
    async fn stops_after_done() {
        let output = relayed(&[
            "{\"done\":true}\n{\"message\":{\"content\":\"late\"}}\n",
        ])
        .await;
        assert_eq!(output, "{\"done\":true}\n");
    }

    #[test]
    fn blank_model_names_are_rejected() {
        assert!(matches!(
            required_model(ModelRequest {
                model: Some("  ".to_string())
            }),
            Err(RelayError::MissingModel)
        ));
        assert!(matches!(
            required_model(ModelRequest { model: None }),
            Err(RelayError::MissingModel)
        ));
    }
}
