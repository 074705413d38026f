//! Per-instance event stream (SSE)

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::AppError;
use crate::AppState;

const STREAM_BUFFER: usize = 64;

/// Stream every envelope the instance publishes until the client goes away
/// or the instance is deleted. One `data:` line per envelope.
pub async fn stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let instance = state.registry.require(&id)?;
    let mut events = instance.events.subscribe();
    drop(instance);

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(STREAM_BUFFER);
    tokio::spawn(async move {
        tracing::debug!(instance = %id, "Event stream opened");
        loop {
            let envelope = tokio::select! {
                envelope = events.recv() => envelope,
                _ = tx.closed() => break,
            };
            let Some(envelope) = envelope else { break };

            let data = match envelope.to_json() {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(instance = %id, "Failed to encode event: {}", e);
                    continue;
                }
            };
            if tx.send(Ok(Event::default().data(data))).await.is_err() {
                break;
            }
        }
        tracing::debug!(instance = %id, "Event stream closed");
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}
