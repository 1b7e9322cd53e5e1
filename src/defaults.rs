//! Default configuration constants for kikitori.
//!
//! Shared across config types and the streaming pipeline so the wire
//! protocol, the buffer, and the scheduler agree on one set of numbers.

/// Audio sample rate in Hz expected on the wire and fed to the model.
///
/// 16kHz mono is the native input format of the Whisper family; everything
/// else is resampled on decode.
pub const SAMPLE_RATE: u32 = 16000;

/// Bytes per PCM sample (16-bit little-endian).
pub const SAMPLE_BYTES: u32 = 2;

/// Maximum seconds of audio retained in the cumulative buffer.
///
/// The acoustic model works on 30-second windows; feeding it more degrades
/// output, so the buffer slides past this point.
pub const MAX_AUDIO_SECONDS: f64 = 30.0;

/// Seconds of recent audio preserved across a trim.
///
/// Keeping an overlap tail gives the next recognition pass acoustic context
/// at the window boundary.
pub const OVERLAP_SECONDS: f64 = 5.0;

/// Re-transcribe every N appended chunks.
pub const TRANSCRIPTION_INTERVAL_CHUNKS: u32 = 1;

/// Minimum buffered seconds before the first transcription pass.
pub const MIN_AUDIO_SECONDS: f64 = 1.0;

/// Code-point cap for the initial prompt passed to the recognizer.
///
/// Whisper truncates the prompt to 224 tokens; capping at 224 code points
/// keeps Japanese text safely inside that budget.
pub const PROMPT_MAX_CHARS: usize = 224;

/// Sentences of confirmed text considered for the initial prompt.
pub const PROMPT_MAX_SENTENCES: usize = 10;

/// Seconds a session may sit idle before the sweeper destroys it.
pub const SESSION_IDLE_TTL_SECONDS: u64 = 1800;

/// Period of the registry sweep timer.
pub const SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Deadline for end-of-stream finalization before partial results are emitted.
pub const END_FINALIZATION_TIMEOUT_SECONDS: u64 = 20;

/// Default beam size for the recognizer.
pub const BEAM_SIZE: u32 = 3;

/// Language code forced on the recognizer.
pub const LANGUAGE: &str = "ja";

/// Default model size name (resolved to a ggml model file by the loader).
pub const MODEL_SIZE: &str = "base";

/// Concurrent transcription passes across all sessions.
///
/// 1 serializes the model on CPU; raise it on GPU builds.
pub const TRANSCRIBER_CONCURRENCY: usize = 1;

/// Default bind address for the server.
pub const BIND_ADDR: &str = "127.0.0.1:8710";

/// Outbound event channel depth per session.
pub const EVENT_CHANNEL_DEPTH: usize = 64;

/// Sentence terminators that close a confirmed span.
pub const SENTENCE_TERMINATORS: [char; 3] = ['。', '！', '？'];

/// Report the GPU backend compiled into this build.
///
/// Only one backend can be active at a time; if none is enabled the model
/// runs on CPU.
pub fn gpu_backend() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA"
    } else if cfg!(feature = "vulkan") {
        "Vulkan"
    } else {
        "CPU"
    }
}
