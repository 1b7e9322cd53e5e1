//! Per-connection session state.
//!
//! A session owns the cumulative buffer, the text differ, the processing
//! options, and the growth history for one streaming connection. The
//! WebSocket handler and the scheduler task share it through an `Arc`; all
//! mutable state sits behind one async mutex, which is never held across a
//! model invocation.

pub mod registry;

use crate::config::StreamConfig;
use crate::streaming::buffer::{BufferConfig, CumulativeBuffer};
use crate::streaming::events::ServerEvent;
use crate::text::TextDiffer;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Processing options; defaults off, overridden by `options` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionOptions {
    pub enable_hiragana: bool,
    pub enable_translation: bool,
    pub enable_summary: bool,
    pub raw_pcm: bool,
}

impl SessionOptions {
    /// Apply an `options` message; absent keys keep their current value.
    pub fn apply(
        &mut self,
        enable_hiragana: Option<bool>,
        enable_translation: Option<bool>,
        enable_summary: Option<bool>,
        raw_pcm: Option<bool>,
    ) {
        if let Some(v) = enable_hiragana {
            self.enable_hiragana = v;
        }
        if let Some(v) = enable_translation {
            self.enable_translation = v;
        }
        if let Some(v) = enable_summary {
            self.enable_summary = v;
        }
        if let Some(v) = raw_pcm {
            self.raw_pcm = v;
        }
    }
}

/// One confirmed-growth record, kept for the session-end result.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Wall-clock seconds since session open when the growth was confirmed.
    pub timestamp_sec: f64,
    /// The newly confirmed text.
    pub text: String,
    pub hiragana: Option<String>,
    pub translation: Option<String>,
}

/// Mutable session state, guarded by the session mutex.
#[derive(Debug)]
pub struct SessionInner {
    pub buffer: CumulativeBuffer,
    pub differ: TextDiffer,
    pub options: SessionOptions,
    pub history: Vec<HistoryEntry>,
    /// Sequence counter for emitted updates.
    pub sequence: u64,
    /// Chunks appended since the last scheduled transcription.
    pub chunks_since_pass: u32,
    /// Whether audio arrived after the last transcription snapshot.
    pub unseen_audio: bool,
    /// Accumulated hiragana for the confirmed text.
    pub confirmed_hiragana: String,
    /// Accumulated translation of the confirmed text.
    pub confirmed_translation: String,
}

impl SessionInner {
    fn new(stream: &StreamConfig) -> Self {
        Self {
            buffer: CumulativeBuffer::with_config(BufferConfig::from_stream(stream)),
            differ: TextDiffer::new(),
            options: SessionOptions::default(),
            history: Vec::new(),
            sequence: 0,
            chunks_since_pass: 0,
            unseen_audio: false,
            confirmed_hiragana: String::new(),
            confirmed_translation: String::new(),
        }
    }

    /// Allocate the next update sequence number.
    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

/// One streaming connection's session.
pub struct Session {
    id: Uuid,
    created_at: Instant,
    events: mpsc::Sender<ServerEvent>,
    cancel: CancellationToken,
    ended: AtomicBool,
    last_activity: StdMutex<Instant>,
    pass_tx: mpsc::Sender<()>,
    end_tx: mpsc::Sender<()>,
    scheduler_rx: StdMutex<Option<(mpsc::Receiver<()>, mpsc::Receiver<()>)>>,
    pub inner: Mutex<SessionInner>,
}

impl Session {
    /// Create a session writing outbound events to `events`.
    pub fn new(events: mpsc::Sender<ServerEvent>, stream: &StreamConfig) -> Self {
        // Capacity 1 coalesces triggers: a pass queued while one is in
        // flight absorbs any further arrivals.
        let (pass_tx, pass_rx) = mpsc::channel(1);
        let (end_tx, end_rx) = mpsc::channel(1);

        Self {
            id: Uuid::new_v4(),
            created_at: Instant::now(),
            events,
            cancel: CancellationToken::new(),
            ended: AtomicBool::new(false),
            last_activity: StdMutex::new(Instant::now()),
            pass_tx,
            end_tx,
            scheduler_rx: StdMutex::new(Some((pass_rx, end_rx))),
            inner: Mutex::new(SessionInner::new(stream)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn id_string(&self) -> String {
        self.id.to_string()
    }

    /// Wall-clock seconds since session open.
    pub fn elapsed_sec(&self) -> f64 {
        self.created_at.elapsed().as_secs_f64()
    }

    /// Record client activity for idle eviction.
    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// Time since the last client activity.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    /// Take the scheduler's trigger receivers (once).
    pub fn scheduler_receivers(&self) -> Option<(mpsc::Receiver<()>, mpsc::Receiver<()>)> {
        self.scheduler_rx.lock().unwrap().take()
    }

    /// Queue a transcription pass; coalesces if one is already queued.
    pub fn request_pass(&self) {
        let _ = self.pass_tx.try_send(());
    }

    /// Queue end-of-stream finalization.
    pub fn request_end(&self) {
        let _ = self.end_tx.try_send(());
    }

    /// Send an event to the session's writer.
    ///
    /// Returns false when the writer is gone (socket closed).
    pub async fn send(&self, event: ServerEvent) -> bool {
        match self.events.send(event).await {
            Ok(()) => true,
            Err(_) => {
                debug!(session_id = %self.id, "event channel closed, dropping event");
                false
            }
        }
    }

    /// Token cancelled when the session is destroyed.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Mark end-of-stream finalization as completed.
    pub fn mark_ended(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    /// Cancel all session work. Idempotent.
    pub fn close(&self) {
        self.mark_ended();
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("ended", &self.is_ended())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::events::ServerEvent;

    fn test_session() -> (Session, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (Session::new(tx, &StreamConfig::default()), rx)
    }

    #[tokio::test]
    async fn session_ids_are_unique() {
        let (a, _rx_a) = test_session();
        let (b, _rx_b) = test_session();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn send_delivers_events_in_order() {
        let (session, mut rx) = test_session();

        assert!(
            session
                .send(ServerEvent::Connected {
                    session_id: session.id_string()
                })
                .await
        );
        assert!(
            session
                .send(ServerEvent::error("decode", "bad frame"))
                .await
        );

        assert!(matches!(rx.recv().await, Some(ServerEvent::Connected { .. })));
        assert!(matches!(rx.recv().await, Some(ServerEvent::Error { .. })));
    }

    #[tokio::test]
    async fn send_after_writer_drop_returns_false() {
        let (session, rx) = test_session();
        drop(rx);

        assert!(!session.send(ServerEvent::error("decode", "x")).await);
    }

    #[tokio::test]
    async fn pass_requests_coalesce() {
        let (session, _rx) = test_session();
        let (mut pass_rx, _end_rx) = session.scheduler_receivers().unwrap();

        // Three rapid requests collapse into one queued trigger.
        session.request_pass();
        session.request_pass();
        session.request_pass();

        assert!(pass_rx.try_recv().is_ok());
        assert!(pass_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn scheduler_receivers_are_taken_once() {
        let (session, _rx) = test_session();
        assert!(session.scheduler_receivers().is_some());
        assert!(session.scheduler_receivers().is_none());
    }

    #[tokio::test]
    async fn close_cancels_and_marks_ended() {
        let (session, _rx) = test_session();
        let token = session.cancel_token();

        assert!(!session.is_ended());
        assert!(!token.is_cancelled());

        session.close();

        assert!(session.is_ended());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn touch_resets_idle_clock() {
        let (session, _rx) = test_session();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(session.idle_for() >= Duration::from_millis(20));

        session.touch();
        assert!(session.idle_for() < Duration::from_millis(20));
    }

    #[test]
    fn options_apply_overrides_only_present_keys() {
        let mut options = SessionOptions::default();

        options.apply(Some(true), None, None, Some(true));
        assert!(options.enable_hiragana);
        assert!(!options.enable_translation);
        assert!(options.raw_pcm);

        // Later message: last value wins, absent keys keep values.
        options.apply(Some(false), Some(true), None, None);
        assert!(!options.enable_hiragana);
        assert!(options.enable_translation);
        assert!(options.raw_pcm);
    }

    #[test]
    fn next_sequence_is_gapless() {
        let mut inner = SessionInner::new(&StreamConfig::default());
        assert_eq!(inner.next_sequence(), 1);
        assert_eq!(inner.next_sequence(), 2);
        assert_eq!(inner.next_sequence(), 3);
    }
}
