//! JSON message protocol for the streaming endpoint.
//!
//! Text frames in both directions carry tagged JSON. Field names are
//! camelCase on the wire; the `type` tag selects the variant. Unknown keys
//! in client messages are ignored, unknown `type` values are a protocol
//! error.

use serde::{Deserialize, Serialize};

/// Messages sent by the client as text frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Processing options; may arrive any time before `end`, last value wins.
    #[serde(rename_all = "camelCase")]
    Options {
        enable_hiragana: Option<bool>,
        enable_translation: Option<bool>,
        enable_summary: Option<bool>,
        raw_pcm: Option<bool>,
    },
    /// Initiates end-of-stream finalization.
    End,
}

impl ClientMessage {
    /// Deserialize a client message from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Pipeline step named in progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    Decoding,
    Transcribing,
    Normalizing,
    Translating,
}

/// Confirmed/tentative halves of one output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TextPair {
    pub confirmed: String,
    pub tentative: String,
}

impl TextPair {
    pub fn new(confirmed: impl Into<String>, tentative: impl Into<String>) -> Self {
        Self {
            confirmed: confirmed.into(),
            tentative: tentative.into(),
        }
    }
}

/// Final (fully confirmed) text of one output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConfirmedText {
    pub confirmed: String,
}

/// Timings attached to every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub transcription_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalization_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation_ms: Option<u64>,
    pub total_ms: u64,
    pub audio_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalization_timed_out: Option<bool>,
}

/// Messages sent by the server as text frames.
///
/// Per-session ordering: `connected` precedes everything, `session_end`
/// follows everything; `transcription_update` sequence numbers are gapless
/// and increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Connected { session_id: String },

    Progress {
        step: ProgressStep,
        message: String,
    },

    #[serde(rename_all = "camelCase")]
    Accumulating {
        chunk_id: u64,
        duration_sec: f64,
        session_elapsed_sec: f64,
        chunks_until_next_transcription: u32,
    },

    #[serde(rename_all = "camelCase")]
    TranscriptionUpdate {
        sequence: u64,
        is_final: bool,
        transcription: TextPair,
        #[serde(skip_serializing_if = "Option::is_none")]
        hiragana: Option<TextPair>,
        #[serde(skip_serializing_if = "Option::is_none")]
        translation: Option<TextPair>,
        performance: PerformanceReport,
    },

    Error {
        code: String,
        message: String,
    },

    #[serde(rename_all = "camelCase")]
    SessionEnd {
        sequence: u64,
        is_final: bool,
        transcription: TextPair,
        #[serde(skip_serializing_if = "Option::is_none")]
        hiragana: Option<ConfirmedText>,
        #[serde(skip_serializing_if = "Option::is_none")]
        translation: Option<ConfirmedText>,
        performance: PerformanceReport,
    },
}

impl ServerEvent {
    /// Serialize the event to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize an event from JSON (used by test clients).
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Build an error event from an error's wire code and message.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
