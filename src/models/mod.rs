//! Process-wide model singletons.
//!
//! The acoustic model, the kana normalizer, and the MT backend are loaded
//! once at startup and shared by every session. Transcription throughput is
//! bounded by a semaphore so concurrent sessions cannot oversubscribe the
//! model (capacity 1 serializes it on CPU builds).

pub mod normalizer;
pub mod transcriber;
pub mod translator;

pub use normalizer::{KanaNormalizer, MockNormalizer, Normalizer};
pub use transcriber::{
    MockTranscriber, ScriptedTranscriber, Segment, Transcriber, Transcription,
    WhisperModelConfig, WhisperTranscriber,
};
pub use translator::{CommandTranslator, MockTranslator, Translator, translate_with_retry};

use crate::config::Config;
use crate::error::{KikitoriError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

/// The process-wide model singletons plus the transcription gate.
pub struct ModelSet {
    transcriber: Arc<dyn Transcriber>,
    normalizer: Arc<dyn Normalizer>,
    translator: Option<Arc<dyn Translator>>,
    transcribe_permits: Arc<Semaphore>,
}

impl ModelSet {
    /// Assemble a model set from already-constructed parts.
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        normalizer: Arc<dyn Normalizer>,
        translator: Option<Arc<dyn Translator>>,
        concurrency: usize,
    ) -> Self {
        Self {
            transcriber,
            normalizer,
            translator,
            transcribe_permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Load all models per the configuration.
    ///
    /// # Errors
    /// Fails when the acoustic model cannot be loaded; the caller exits
    /// with status 1 in that case.
    pub fn from_config(config: &Config) -> Result<Self> {
        let model_path = resolve_model_path(config);
        info!(path = %model_path.display(), "loading acoustic model");

        let transcriber = WhisperTranscriber::new(WhisperModelConfig {
            model_path,
            language: config.whisper.language.clone(),
            beam_size: config.whisper.beam_size,
            use_gpu: true,
        })?;

        let translator: Option<Arc<dyn Translator>> = if config.translation.command.is_empty() {
            None
        } else {
            Some(Arc::new(CommandTranslator::new(
                config.translation.command.clone(),
            )?))
        };

        Ok(Self::new(
            Arc::new(transcriber),
            Arc::new(KanaNormalizer::new()),
            translator,
            config.whisper.concurrency,
        ))
    }

    pub fn transcriber(&self) -> &Arc<dyn Transcriber> {
        &self.transcriber
    }

    pub fn normalizer(&self) -> &Arc<dyn Normalizer> {
        &self.normalizer
    }

    pub fn translator(&self) -> Option<&Arc<dyn Translator>> {
        self.translator.as_ref()
    }

    /// Whether the acoustic model is loaded and usable.
    pub fn is_ready(&self) -> bool {
        self.transcriber.is_ready()
    }

    /// Run one recognition pass off the calling task, gated by the
    /// process-wide semaphore.
    ///
    /// The PCM snapshot is owned by the call and released when it returns.
    pub async fn transcribe_gated(
        &self,
        samples: Vec<i16>,
        initial_prompt: Option<String>,
    ) -> Result<Transcription> {
        let _permit = self
            .transcribe_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| KikitoriError::ModelUnavailable {
                message: "transcription gate closed".to_string(),
            })?;

        let transcriber = self.transcriber.clone();
        tokio::task::spawn_blocking(move || {
            transcriber.transcribe(&samples, initial_prompt.as_deref())
        })
        .await
        .map_err(|e| KikitoriError::Transcription {
            message: format!("transcription task panicked: {}", e),
        })?
    }
}

/// Resolve the acoustic model file from config.
fn resolve_model_path(config: &Config) -> PathBuf {
    config
        .whisper
        .model_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("models/ggml-{}.bin", config.whisper.model_size)))
}
