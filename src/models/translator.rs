//! Japanese-to-English translation interface.
//!
//! Translation is an optional post-processing stage backed by an external
//! MT model. The server talks to it through the [`Translator`] trait; the
//! shipping implementation pipes text through a configured external command,
//! and tests use [`MockTranslator`]. Transient failures are retried with a
//! short backoff before the translation field is dropped from the update.

use crate::error::{KikitoriError, Result};
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::warn;

/// Backoff schedule between translation retries.
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_millis(100), Duration::from_millis(500)];

/// Trait for JA->EN translation.
///
/// Implementations may block for seconds; callers run them off the ingest
/// path via `spawn_blocking`.
pub trait Translator: Send + Sync {
    /// Translate Japanese text to English.
    fn translate_ja_en(&self, text: &str) -> Result<String>;

    /// Check if the translator is usable.
    fn is_ready(&self) -> bool;
}

impl<T: Translator + ?Sized> Translator for Arc<T> {
    fn translate_ja_en(&self, text: &str) -> Result<String> {
        (**self).translate_ja_en(text)
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// Translator that pipes text through an external command.
///
/// The command receives Japanese on stdin and must print the English
/// translation to stdout. A non-zero exit status is treated as transient.
#[derive(Debug, Clone)]
pub struct CommandTranslator {
    argv: Vec<String>,
}

impl CommandTranslator {
    /// Create a translator from an argv vector.
    ///
    /// # Errors
    /// Returns `KikitoriError::ConfigInvalidValue` for an empty argv.
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() {
            return Err(KikitoriError::ConfigInvalidValue {
                key: "translation.command".to_string(),
                message: "must name a command".to_string(),
            });
        }
        Ok(Self { argv })
    }
}

impl Translator for CommandTranslator {
    fn translate_ja_en(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }

        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| KikitoriError::Translation {
                message: format!("failed to spawn {}: {}", self.argv[0], e),
            })?;

        child
            .stdin
            .take()
            .ok_or_else(|| KikitoriError::Translation {
                message: "translator stdin unavailable".to_string(),
            })?
            .write_all(text.as_bytes())
            .map_err(|e| KikitoriError::Translation {
                message: format!("failed to write to translator: {}", e),
            })?;

        let output = child
            .wait_with_output()
            .map_err(|e| KikitoriError::Translation {
                message: format!("failed to read translator output: {}", e),
            })?;

        if !output.status.success() {
            return Err(KikitoriError::Translation {
                message: format!("translator exited with {}", output.status),
            });
        }

        let translated = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(translated)
    }

    fn is_ready(&self) -> bool {
        true
    }
}

/// Mock translator for testing
#[derive(Debug, Default)]
pub struct MockTranslator {
    response: Option<String>,
    fail_first: AtomicUsize,
    always_fail: bool,
    calls: AtomicUsize,
}

impl MockTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to return a fixed translation.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = Some(response.to_string());
        self
    }

    /// Configure the mock to fail the first `n` calls, then succeed.
    pub fn with_transient_failures(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Configure the mock to fail every call.
    pub fn with_persistent_failure(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Number of translate calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Translator for MockTranslator {
    fn translate_ja_en(&self, text: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.always_fail {
            return Err(KikitoriError::Translation {
                message: "mock persistent failure".to_string(),
            });
        }

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(KikitoriError::Translation {
                message: "mock transient failure".to_string(),
            });
        }

        Ok(self
            .response
            .clone()
            .unwrap_or_else(|| format!("[en] {}", text)))
    }

    fn is_ready(&self) -> bool {
        true
    }
}

/// Translate with bounded retry.
///
/// Retries transient failures at most twice (100ms, 500ms backoff). Returns
/// `None` once retries are exhausted or on a non-transient error; the caller
/// omits the translation field from the update in that case.
pub async fn translate_with_retry<T>(translator: Arc<T>, text: String) -> Option<String>
where
    T: Translator + ?Sized + 'static,
{
    for attempt in 0..=RETRY_BACKOFF.len() {
        let translator = translator.clone();
        let input = text.clone();
        let result =
            tokio::task::spawn_blocking(move || translator.translate_ja_en(&input)).await;

        match result {
            Ok(Ok(translated)) => return Some(translated),
            Ok(Err(e)) if e.is_transient() && attempt < RETRY_BACKOFF.len() => {
                warn!(attempt = attempt + 1, error = %e, "translation failed, retrying");
                tokio::time::sleep(RETRY_BACKOFF[attempt]).await;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "translation failed, dropping field");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "translation task panicked");
                return None;
            }
        }
    }

    None
}
