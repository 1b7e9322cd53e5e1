//! Transcript text processing.

pub mod differ;

pub use differ::{DiffOutcome, TextDiffer, clean_transcript, split_sentences};
