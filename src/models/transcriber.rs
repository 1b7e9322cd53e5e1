//! Speech-to-text model interface and implementations.
//!
//! The server core only sees the [`Transcriber`] trait; the real backend is
//! whisper-rs behind the `whisper` feature, and tests use the mock and
//! scripted implementations.
//!
//! # Feature Gate
//!
//! The Whisper backend requires the `whisper` feature and cmake:
//!
//! ```bash
//! cargo build --features whisper
//! ```

use crate::error::{KikitoriError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "whisper")]
use std::sync::{Mutex, Once};
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// One timed span of recognized text.
///
/// Ordering invariant: non-overlapping, ascending start times within a
/// single transcription call.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start_sec: f32,
    pub end_sec: f32,
    pub text: String,
}

/// Output of one recognition pass over the full buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    /// Full transcript text.
    pub text: String,
    /// Timed segments, ascending.
    pub segments: Vec<Segment>,
    /// Detected language, if the model reports one.
    pub language: Option<String>,
}

impl Transcription {
    /// Build a result carrying only text.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            segments: Vec::new(),
            language: None,
        }
    }
}

/// Trait for speech-to-text transcription.
///
/// This trait allows swapping implementations (real Whisper vs mock).
/// Implementations may block for seconds; callers run them off the ingest
/// path via `spawn_blocking`.
pub trait Transcriber: Send + Sync {
    /// Transcribe audio samples to text.
    ///
    /// # Arguments
    /// * `samples` - Audio as 16-bit PCM at 16kHz mono
    /// * `initial_prompt` - Optional text hint biasing recognition
    fn transcribe(&self, samples: &[i16], initial_prompt: Option<&str>) -> Result<Transcription>;

    /// Get the name of the loaded model
    fn model_name(&self) -> &str;

    /// Check if the transcriber is ready
    fn is_ready(&self) -> bool;
}

/// Implement Transcriber for Arc<T> to allow sharing across sessions.
impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    fn transcribe(&self, samples: &[i16], initial_prompt: Option<&str>) -> Result<Transcription> {
        (**self).transcribe(samples, initial_prompt)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// Mock transcriber for testing
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    model_name: String,
    response: String,
    fail_transient: bool,
    fail_fatal: bool,
}

impl MockTranscriber {
    /// Create a new mock transcriber with default settings
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: "mock transcription".to_string(),
            fail_transient: false,
            fail_fatal: false,
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the mock to fail transiently on transcribe
    pub fn with_transient_failure(mut self) -> Self {
        self.fail_transient = true;
        self
    }

    /// Configure the mock to fail fatally on transcribe
    pub fn with_fatal_failure(mut self) -> Self {
        self.fail_fatal = true;
        self
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&self, _samples: &[i16], _initial_prompt: Option<&str>) -> Result<Transcription> {
        if self.fail_fatal {
            return Err(KikitoriError::ModelUnavailable {
                message: "mock fatal failure".to_string(),
            });
        }
        if self.fail_transient {
            return Err(KikitoriError::Transcription {
                message: "mock transient failure".to_string(),
            });
        }
        Ok(Transcription::from_text(self.response.clone()))
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        !self.fail_fatal
    }
}

/// One scripted recognition pass.
#[derive(Debug, Clone)]
struct ScriptedPass {
    text: String,
    delay_ms: u64,
    transient_error: bool,
}

/// Deterministic transcriber that replays a script of per-pass outputs.
///
/// Pass N returns the Nth scripted entry; once the script is exhausted the
/// last entry repeats. Received prompts are recorded for assertions.
#[derive(Debug, Default)]
pub struct ScriptedTranscriber {
    passes: Vec<ScriptedPass>,
    calls: AtomicUsize,
    prompts: std::sync::Mutex<Vec<Option<String>>>,
}

impl ScriptedTranscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pass returning the given text.
    pub fn with_pass(mut self, text: &str) -> Self {
        self.passes.push(ScriptedPass {
            text: text.to_string(),
            delay_ms: 0,
            transient_error: false,
        });
        self
    }

    /// Append a pass returning the given text after a blocking delay.
    pub fn with_slow_pass(mut self, text: &str, delay_ms: u64) -> Self {
        self.passes.push(ScriptedPass {
            text: text.to_string(),
            delay_ms,
            transient_error: false,
        });
        self
    }

    /// Append a pass that fails transiently.
    pub fn with_failing_pass(mut self) -> Self {
        self.passes.push(ScriptedPass {
            text: String::new(),
            delay_ms: 0,
            transient_error: true,
        });
        self
    }

    /// Number of transcribe calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received per call, in order.
    pub fn recorded_prompts(&self) -> Vec<Option<String>> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Transcriber for ScriptedTranscriber {
    fn transcribe(&self, _samples: &[i16], initial_prompt: Option<&str>) -> Result<Transcription> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap()
            .push(initial_prompt.map(|p| p.to_string()));

        let pass = self
            .passes
            .get(call)
            .or_else(|| self.passes.last())
            .cloned()
            .unwrap_or(ScriptedPass {
                text: String::new(),
                delay_ms: 0,
                transient_error: false,
            });

        if pass.delay_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(pass.delay_ms));
        }

        if pass.transient_error {
            return Err(KikitoriError::Transcription {
                message: "scripted transient failure".to_string(),
            });
        }

        Ok(Transcription::from_text(pass.text))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn is_ready(&self) -> bool {
        true
    }
}

/// Configuration for the Whisper backend.
#[derive(Debug, Clone)]
pub struct WhisperModelConfig {
    /// Path to the ggml model file.
    pub model_path: std::path::PathBuf,
    /// Language code forced on recognition ("ja").
    pub language: String,
    /// Beam size for beam-search decoding.
    pub beam_size: u32,
    /// Whether to use GPU acceleration.
    pub use_gpu: bool,
}

impl Default for WhisperModelConfig {
    fn default() -> Self {
        Self {
            model_path: std::path::PathBuf::from("models/ggml-base.bin"),
            language: crate::defaults::LANGUAGE.to_string(),
            beam_size: crate::defaults::BEAM_SIZE,
            use_gpu: true,
        }
    }
}

/// Whisper-based transcriber implementation.
///
/// The WhisperContext is wrapped in a Mutex to ensure thread safety; cross-
/// session concurrency is additionally gated by the model-set semaphore.
#[cfg(feature = "whisper")]
pub struct WhisperTranscriber {
    context: Mutex<WhisperContext>,
    config: WhisperModelConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl std::fmt::Debug for WhisperTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperTranscriber")
            .field("config", &self.config)
            .field("model_name", &self.model_name)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

/// Whisper-based transcriber placeholder (without whisper feature).
///
/// This is a stub that reports not-ready and errors when used. Enable the
/// `whisper` feature for real transcription.
#[cfg(not(feature = "whisper"))]
#[derive(Debug)]
pub struct WhisperTranscriber {
    config: WhisperModelConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl WhisperTranscriber {
    /// Create a new Whisper transcriber.
    ///
    /// # Errors
    /// Returns `KikitoriError::ModelNotFound` if the model file doesn't
    /// exist and `KikitoriError::ModelUnavailable` if loading fails.
    pub fn new(config: WhisperModelConfig) -> Result<Self> {
        // Install logging hooks to suppress whisper.cpp output (only once)
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !config.model_path.exists() {
            return Err(KikitoriError::ModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }

        let model_name = config
            .model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let mut context_params = WhisperContextParameters::default();
        context_params.use_gpu(config.use_gpu);
        let context = WhisperContext::new_with_params(
            config
                .model_path
                .to_str()
                .ok_or_else(|| KikitoriError::ModelUnavailable {
                    message: "Invalid UTF-8 in model path".to_string(),
                })?,
            context_params,
        )
        .map_err(|e| KikitoriError::ModelUnavailable {
            message: format!("Failed to load Whisper model: {}", e),
        })?;

        Ok(Self {
            context: Mutex::new(context),
            config,
            model_name,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &WhisperModelConfig {
        &self.config
    }

    /// Convert i16 audio samples to f32 normalized to [-1.0, 1.0].
    fn convert_audio(samples: &[i16]) -> Vec<f32> {
        samples
            .iter()
            .map(|&sample| sample as f32 / 32768.0)
            .collect()
    }
}

#[cfg(not(feature = "whisper"))]
impl WhisperTranscriber {
    /// Create a new Whisper transcriber (stub implementation).
    pub fn new(config: WhisperModelConfig) -> Result<Self> {
        let model_name = config
            .model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self { config, model_name })
    }

    /// Get the configuration
    pub fn config(&self) -> &WhisperModelConfig {
        &self.config
    }

    /// Convert i16 audio samples to f32 normalized to [-1.0, 1.0].
    ///
    /// Available without the whisper feature for testing.
    pub fn convert_audio(samples: &[i16]) -> Vec<f32> {
        samples
            .iter()
            .map(|&sample| sample as f32 / 32768.0)
            .collect()
    }
}

#[cfg(feature = "whisper")]
impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, samples: &[i16], initial_prompt: Option<&str>) -> Result<Transcription> {
        let audio_f32 = Self::convert_audio(samples);

        let context = self
            .context
            .lock()
            .map_err(|e| KikitoriError::Transcription {
                message: format!("Failed to acquire context lock: {}", e),
            })?;

        let mut state = context
            .create_state()
            .map_err(|e| KikitoriError::Transcription {
                message: format!("Failed to create Whisper state: {}", e),
            })?;

        let mut params = FullParams::new(SamplingStrategy::BeamSearch {
            beam_size: self.config.beam_size as i32,
            patience: -1.0,
        });
        params.set_language(Some(&self.config.language));
        if let Some(prompt) = initial_prompt {
            params.set_initial_prompt(prompt);
        }

        // Disable printing to stdout/stderr
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &audio_f32)
            .map_err(|e| KikitoriError::Transcription {
                message: format!("Whisper inference failed: {}", e),
            })?;

        let lang_id = state.full_lang_id_from_state();
        let language = whisper_rs::get_lang_str(lang_id).map(|s| s.to_string());

        let mut text = String::new();
        let mut segments = Vec::new();
        for segment in state.as_iter() {
            if let Ok(segment_text) = segment.to_str_lossy() {
                text.push_str(&segment_text);
                segments.push(Segment {
                    // Timestamps arrive in centiseconds.
                    start_sec: segment.start_timestamp() as f32 / 100.0,
                    end_sec: segment.end_timestamp() as f32 / 100.0,
                    text: segment_text.trim().to_string(),
                });
            }
        }

        Ok(Transcription {
            text: text.trim().to_string(),
            segments,
            language,
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(not(feature = "whisper"))]
impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, _samples: &[i16], _initial_prompt: Option<&str>) -> Result<Transcription> {
        Err(KikitoriError::ModelUnavailable {
            message: "built without the whisper feature".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_transcriber_returns_response() {
        let transcriber = MockTranscriber::new("test-model").with_response("こんにちは。");

        let audio = vec![0i16; 1000];
        let result = transcriber.transcribe(&audio, None);

        assert!(result.is_ok());
        assert_eq!(result.unwrap().text, "こんにちは。");
    }

    #[test]
    fn test_mock_transcriber_transient_failure() {
        let transcriber = MockTranscriber::new("test-model").with_transient_failure();

        let result = transcriber.transcribe(&[0i16; 10], None);

        match result {
            Err(e) => assert!(e.is_transient()),
            _ => panic!("Expected transient error"),
        }
    }

    #[test]
    fn test_mock_transcriber_fatal_failure() {
        let transcriber = MockTranscriber::new("test-model").with_fatal_failure();

        let result = transcriber.transcribe(&[0i16; 10], None);

        match result {
            Err(e) => {
                assert!(!e.is_transient());
                assert_eq!(e.wire_code(), "model_fatal");
            }
            _ => panic!("Expected fatal error"),
        }
        assert!(!transcriber.is_ready());
    }

    #[test]
    fn test_transcriber_trait_is_object_safe() {
        let transcriber: Box<dyn Transcriber> =
            Box::new(MockTranscriber::new("test-model").with_response("boxed"));

        assert_eq!(transcriber.model_name(), "test-model");
        assert!(transcriber.is_ready());
        assert_eq!(transcriber.transcribe(&[0i16; 10], None).unwrap().text, "boxed");
    }

    #[test]
    fn test_arc_transcriber_shares() {
        let inner = Arc::new(MockTranscriber::new("shared").with_response("x"));
        let a = inner.clone();
        let b = inner.clone();

        assert_eq!(a.transcribe(&[], None).unwrap().text, "x");
        assert_eq!(b.model_name(), "shared");
    }

    #[test]
    fn test_scripted_transcriber_replays_passes() {
        let transcriber = ScriptedTranscriber::new()
            .with_pass("こんにちは")
            .with_pass("こんにちは。さようなら");

        assert_eq!(transcriber.transcribe(&[], None).unwrap().text, "こんにちは");
        assert_eq!(
            transcriber.transcribe(&[], None).unwrap().text,
            "こんにちは。さようなら"
        );
        // Script exhausted: last pass repeats.
        assert_eq!(
            transcriber.transcribe(&[], None).unwrap().text,
            "こんにちは。さようなら"
        );
        assert_eq!(transcriber.call_count(), 3);
    }

    #[test]
    fn test_scripted_transcriber_records_prompts() {
        let transcriber = ScriptedTranscriber::new().with_pass("a").with_pass("b");

        transcriber.transcribe(&[], None).unwrap();
        transcriber.transcribe(&[], Some("こんにちは。")).unwrap();

        assert_eq!(
            transcriber.recorded_prompts(),
            vec![None, Some("こんにちは。".to_string())]
        );
    }

    #[test]
    fn test_scripted_transcriber_failing_pass() {
        let transcriber = ScriptedTranscriber::new().with_failing_pass().with_pass("ok");

        assert!(transcriber.transcribe(&[], None).is_err());
        assert_eq!(transcriber.transcribe(&[], None).unwrap().text, "ok");
    }

    #[test]
    fn test_transcription_from_text() {
        let t = Transcription::from_text("abc");
        assert_eq!(t.text, "abc");
        assert!(t.segments.is_empty());
        assert_eq!(t.language, None);
    }

    #[cfg(not(feature = "whisper"))]
    #[test]
    fn test_whisper_stub_reports_not_ready() {
        let transcriber = WhisperTranscriber::new(WhisperModelConfig::default()).unwrap();
        assert!(!transcriber.is_ready());
        assert!(transcriber.transcribe(&[0i16; 10], None).is_err());
    }

    #[cfg(not(feature = "whisper"))]
    #[test]
    fn test_convert_audio_normalizes() {
        let samples = vec![0i16, 16384, -16384, i16::MAX, i16::MIN];
        let converted = WhisperTranscriber::convert_audio(&samples);

        assert_eq!(converted[0], 0.0);
        assert!((converted[1] - 0.5).abs() < 0.001);
        assert!((converted[2] + 0.5).abs() < 0.001);
        assert!(converted[3] < 1.0);
        assert_eq!(converted[4], -1.0);
    }
}
