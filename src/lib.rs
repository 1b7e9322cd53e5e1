//! kikitori - incremental Japanese speech-to-text over WebSocket.
//!
//! Clients stream short audio chunks; the server re-transcribes a rolling
//! cumulative window and pushes progressively refined transcripts split
//! into a stable confirmed prefix and a tentative suffix, with optional
//! hiragana normalization and JA->EN translation.

pub mod audio;
pub mod config;
pub mod defaults;
pub mod error;
pub mod models;
pub mod server;
pub mod session;
pub mod streaming;
pub mod text;
