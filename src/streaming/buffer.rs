//! Cumulative audio buffer with bounded retention.
//!
//! Each session accumulates decoded PCM chunks and feeds the whole window
//! to every recognition pass. The window is capped at the model's usable
//! context (30s); older audio is evicted a whole chunk at a time, always
//! preserving an overlap tail so the next pass keeps acoustic context at
//! the window boundary.

use crate::config::StreamConfig;
use crate::defaults::{MAX_AUDIO_SECONDS, OVERLAP_SECONDS, SAMPLE_RATE};
use std::collections::VecDeque;
use std::time::Instant;

/// Configuration for the cumulative buffer.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Maximum seconds of audio retained.
    pub max_audio_seconds: f64,
    /// Seconds of recent audio preserved across a trim.
    pub overlap_seconds: f64,
    /// Sample rate of the stored PCM.
    pub sample_rate: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_audio_seconds: MAX_AUDIO_SECONDS,
            overlap_seconds: OVERLAP_SECONDS,
            sample_rate: SAMPLE_RATE,
        }
    }
}

impl BufferConfig {
    /// Derive a buffer config from the stream section of the app config.
    pub fn from_stream(stream: &StreamConfig) -> Self {
        Self {
            max_audio_seconds: stream.max_audio_seconds,
            overlap_seconds: stream.overlap_seconds,
            sample_rate: SAMPLE_RATE,
        }
    }
}

/// Rolling PCM window for one session.
///
/// Chunk boundaries are preserved for trim accounting; the wall clock
/// (`session_elapsed_sec`) is independent of buffer length.
#[derive(Debug)]
pub struct CumulativeBuffer {
    config: BufferConfig,
    chunks: VecDeque<Vec<i16>>,
    total_samples: usize,
    appended_chunks: u64,
    created_at: Instant,
}

impl CumulativeBuffer {
    pub fn new() -> Self {
        Self::with_config(BufferConfig::default())
    }

    pub fn with_config(config: BufferConfig) -> Self {
        Self {
            config,
            chunks: VecDeque::new(),
            total_samples: 0,
            appended_chunks: 0,
            created_at: Instant::now(),
        }
    }

    fn max_samples(&self) -> usize {
        (self.config.max_audio_seconds * self.config.sample_rate as f64) as usize
    }

    fn overlap_samples(&self) -> usize {
        (self.config.overlap_seconds * self.config.sample_rate as f64) as usize
    }

    /// Append one decoded chunk and enforce the retention cap.
    ///
    /// Empty chunks are ignored.
    pub fn append(&mut self, samples: Vec<i16>) {
        if samples.is_empty() {
            return;
        }

        // A single chunk larger than the whole window resets the buffer to
        // that chunk's tail.
        if samples.len() > self.max_samples() {
            let tail_start = samples.len() - self.max_samples();
            self.chunks.clear();
            self.total_samples = self.max_samples();
            self.chunks.push_back(samples[tail_start..].to_vec());
            self.appended_chunks += 1;
            return;
        }

        self.total_samples += samples.len();
        self.chunks.push_back(samples);
        self.appended_chunks += 1;
        self.trim();
    }

    /// Whole-chunk eviction from the head until the cap is met, never
    /// dropping below the overlap tail.
    fn trim(&mut self) {
        while self.total_samples > self.max_samples() && self.chunks.len() > 1 {
            let front_len = self.chunks.front().map(|c| c.len()).unwrap_or(0);
            if self.total_samples - front_len < self.overlap_samples() {
                break;
            }
            self.chunks.pop_front();
            self.total_samples -= front_len;
        }
    }

    /// Copy of the current window for one recognition pass.
    pub fn snapshot(&self) -> Vec<i16> {
        let mut pcm = Vec::with_capacity(self.total_samples);
        for chunk in &self.chunks {
            pcm.extend_from_slice(chunk);
        }
        pcm
    }

    /// Current audio length in seconds.
    pub fn duration_sec(&self) -> f64 {
        self.total_samples as f64 / self.config.sample_rate as f64
    }

    /// Wall-clock seconds since the buffer (session) was created.
    pub fn session_elapsed_sec(&self) -> f64 {
        self.created_at.elapsed().as_secs_f64()
    }

    /// Chunks appended over the buffer's lifetime (evictions don't reduce it).
    pub fn appended_chunks(&self) -> u64 {
        self.appended_chunks
    }

    pub fn is_empty(&self) -> bool {
        self.total_samples == 0
    }

    /// Number of chunks currently held.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

impl Default for CumulativeBuffer {
    fn default() -> Self {
        Self::new()
    }
}
