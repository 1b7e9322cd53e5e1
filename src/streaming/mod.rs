//! Streaming transcription pipeline.
//!
//! Per-connection data flow:
//! ```text
//! ┌─────────┐    ┌────────────┐    ┌───────────┐    ┌────────┐    ┌───────────────┐
//! │ Ingest  │───▶│ Cumulative │───▶│ Scheduler │───▶│ Differ │───▶│ Post-process  │
//! │ (WS)    │    │ Buffer     │    │ (1 task)  │    │        │    │ (kana / MT)   │
//! └─────────┘    └────────────┘    └───────────┘    └────────┘    └───────────────┘
//!      │              trigger ▲          │ snapshot                      │
//!      └──────── coalesced ───┘          └──────── updates out ──────────┘
//! ```
//!
//! The ingest loop appends decoded chunks and queues pass triggers; the
//! scheduler runs one recognition pass at a time over a snapshot of the
//! whole buffer and emits confirmed/tentative updates.

pub mod buffer;
pub mod events;
pub mod scheduler;

pub use buffer::{BufferConfig, CumulativeBuffer};
pub use events::{ClientMessage, PerformanceReport, ProgressStep, ServerEvent, TextPair};
pub use scheduler::PipelineScheduler;
