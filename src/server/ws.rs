//! WebSocket streaming endpoint.
//!
//! Each connection gets a session, a scheduler task, and a single writer
//! task that serializes all outbound events, which keeps per-session
//! message order intact. The ingest loop only decodes, appends, and
//! queues triggers; everything slow happens on the scheduler side.

use crate::audio::decoder::AudioDecoder;
use crate::server::AppState;
use crate::session::Session;
use crate::streaming::events::{ClientMessage, ProgressStep, ServerEvent};
use crate::streaming::scheduler::PipelineScheduler;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    session_id: Option<String>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn handle_socket(socket: WebSocket, state: AppState, query: WsQuery) {
    let (mut sink, stream) = socket.split();

    // Sessions do not survive their socket; a presented id cannot be
    // adopted by this connection.
    if let Some(requested) = query.session_id {
        let message = match Uuid::parse_str(&requested)
            .ok()
            .and_then(|id| state.registry.get(&id))
        {
            None => format!("unknown session {}", requested),
            Some(_) => format!("session {} is attached to another connection", requested),
        };
        let event = ServerEvent::error("session_not_found", message);
        if let Ok(json) = event.to_json() {
            let _ = sink.send(Message::Text(json)).await;
        }
        let _ = sink.close().await;
        return;
    }

    let (events_tx, events_rx) = mpsc::channel(crate::defaults::EVENT_CHANNEL_DEPTH);
    let session = Arc::new(Session::new(events_tx, &state.config.stream));
    state.registry.insert(session.clone());

    let scheduler = PipelineScheduler::spawn(
        session.clone(),
        state.models.clone(),
        state.config.stream.clone(),
    );
    let writer = tokio::spawn(write_events(sink, events_rx, session.cancel_token()));

    session
        .send(ServerEvent::Connected {
            session_id: session.id_string(),
        })
        .await;
    info!(session_id = %session.id(), "session connected");

    read_frames(stream, &state, &session).await;

    // Socket closed or session cancelled: tear down. Destroy is a no-op
    // when finalization already closed the session.
    state.registry.destroy(&session.id());
    let _ = scheduler.await;
    let _ = writer.await;

    let inner = session.inner.lock().await;
    info!(
        session_id = %session.id(),
        chunks = inner.buffer.appended_chunks(),
        confirmed_chars = inner.differ.confirmed().chars().count(),
        history_entries = inner.history.len(),
        "session disconnected"
    );
}

/// Ingest loop: dispatch frames until the socket closes or the session is
/// cancelled.
async fn read_frames(mut stream: SplitStream<WebSocket>, state: &AppState, session: &Arc<Session>) {
    let decoder = AudioDecoder::new();
    let cancel = session.cancel_token();
    let mut end_requested = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Binary(data))) => {
                        if end_requested {
                            debug!(session_id = %session.id(), "audio after end, ignoring");
                            continue;
                        }
                        handle_binary(state, session, &decoder, &data).await;
                    }
                    Some(Ok(Message::Text(text))) => {
                        handle_text(session, &text, &mut end_requested).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Ping/pong are answered by the protocol layer.
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session.id(), error = %e, "websocket error");
                        break;
                    }
                }
            }
        }
    }
}

/// Decode one audio chunk, append it, and queue a pass when due.
async fn handle_binary(state: &AppState, session: &Arc<Session>, decoder: &AudioDecoder, data: &[u8]) {
    session.touch();

    session
        .send(ServerEvent::Progress {
            step: ProgressStep::Decoding,
            message: format!("decoding {} byte chunk", data.len()),
        })
        .await;

    let raw_pcm = session.inner.lock().await.options.raw_pcm;
    let samples = match decoder.decode(data, raw_pcm) {
        Ok(samples) => samples,
        Err(e) => {
            // Malformed frame: report, drop, keep the session alive.
            warn!(session_id = %session.id(), error = %e, "decode error");
            session
                .send(ServerEvent::error(e.wire_code(), e.to_string()))
                .await;
            return;
        }
    };

    if samples.is_empty() {
        debug!(session_id = %session.id(), "empty chunk, ignoring");
        return;
    }

    let interval = state.config.stream.transcription_interval_chunks;
    let (event, trigger) = {
        let mut inner = session.inner.lock().await;
        inner.buffer.append(samples);
        inner.unseen_audio = true;
        inner.chunks_since_pass += 1;

        let trigger = inner.chunks_since_pass >= interval
            && inner.buffer.duration_sec() >= state.config.stream.min_audio_seconds;
        if trigger {
            inner.chunks_since_pass = 0;
        }

        let event = ServerEvent::Accumulating {
            chunk_id: inner.buffer.appended_chunks(),
            duration_sec: inner.buffer.duration_sec(),
            session_elapsed_sec: inner.buffer.session_elapsed_sec(),
            chunks_until_next_transcription: interval.saturating_sub(inner.chunks_since_pass),
        };
        (event, trigger)
    };

    session.send(event).await;
    if trigger {
        session.request_pass();
    }
}

/// Apply a text frame: options update, end-of-stream, or protocol error.
async fn handle_text(session: &Arc<Session>, text: &str, end_requested: &mut bool) {
    session.touch();

    match ClientMessage::from_json(text) {
        Ok(ClientMessage::Options {
            enable_hiragana,
            enable_translation,
            enable_summary,
            raw_pcm,
        }) => {
            if enable_summary == Some(true) {
                debug!(session_id = %session.id(), "summary option set; no summary stage configured");
            }
            let mut inner = session.inner.lock().await;
            inner
                .options
                .apply(enable_hiragana, enable_translation, enable_summary, raw_pcm);
            debug!(session_id = %session.id(), options = ?inner.options, "options applied");
        }
        Ok(ClientMessage::End) => {
            info!(session_id = %session.id(), "end of stream requested");
            *end_requested = true;
            session.request_end();
        }
        Err(e) => {
            // Unknown type or malformed JSON: report and ignore.
            session
                .send(ServerEvent::error(
                    "protocol",
                    format!("invalid message: {}", e),
                ))
                .await;
        }
    }
}

/// Single writer task: serializes every outbound event for one session.
///
/// On cancellation, drains events already queued (the `session_end` of a
/// finalized session is queued before the cancel fires) and closes the
/// sink.
async fn write_events(
    mut sink: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<ServerEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            event = events.recv() => {
                match event {
                    Some(event) => {
                        if forward(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = cancel.cancelled() => {
                while let Ok(event) = events.try_recv() {
                    if forward(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    let _ = sink.close().await;
}

async fn forward(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    match event.to_json() {
        Ok(json) => sink.send(Message::Text(json)).await,
        Err(e) => {
            warn!(error = %e, "failed to serialize event");
            Ok(())
        }
    }
}
