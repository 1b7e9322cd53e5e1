//! Per-session transcription scheduler.
//!
//! One task per session consumes pass triggers queued by the ingest loop,
//! runs recognition over a snapshot of the cumulative buffer, feeds the
//! result through the differ, dispatches post-processing, and emits the
//! update. The task is strictly sequential, which gives single-flight
//! transcription and single-flight post-processing for free; triggers
//! arriving mid-pass coalesce into at most one queued follow-up.
//!
//! End-of-stream finalization runs one last pass over unseen audio,
//! promotes the tentative tail, re-runs post-processing over the full
//! confirmed text, and emits `session_end` - all under a deadline after
//! which partial results are emitted instead.

use crate::config::StreamConfig;
use crate::models::{ModelSet, translate_with_retry};
use crate::session::{HistoryEntry, Session};
use crate::streaming::events::{
    ConfirmedText, PerformanceReport, ProgressStep, ServerEvent, TextPair,
};
use crate::text::{DiffOutcome, clean_transcript};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Whether the scheduler loop keeps running after a pass.
enum PassControl {
    Continue,
    Shutdown,
}

/// Spawns and drives the per-session pipeline.
pub struct PipelineScheduler {
    session: Arc<Session>,
    models: Arc<ModelSet>,
    config: StreamConfig,
}

impl PipelineScheduler {
    /// Spawn the scheduler task for a session.
    ///
    /// Takes the session's trigger receivers; spawning twice for the same
    /// session is a no-op returning a finished task.
    pub fn spawn(
        session: Arc<Session>,
        models: Arc<ModelSet>,
        config: StreamConfig,
    ) -> JoinHandle<()> {
        let Some((pass_rx, end_rx)) = session.scheduler_receivers() else {
            warn!(session_id = %session.id(), "scheduler already running for session");
            return tokio::spawn(async {});
        };

        let scheduler = Self {
            session,
            models,
            config,
        };
        tokio::spawn(scheduler.run(pass_rx, end_rx))
    }

    async fn run(
        self,
        mut pass_rx: tokio::sync::mpsc::Receiver<()>,
        mut end_rx: tokio::sync::mpsc::Receiver<()>,
    ) {
        let cancel = self.session.cancel_token();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(session_id = %self.session.id(), "scheduler cancelled");
                    break;
                }

                // End-of-stream supersedes any queued pass: finalization
                // runs its own last transcription over unseen audio.
                end = end_rx.recv() => {
                    if end.is_some() {
                        self.finalize().await;
                    }
                    break;
                }

                pass = pass_rx.recv() => {
                    match pass {
                        Some(()) => {
                            if matches!(self.run_pass().await, PassControl::Shutdown) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }

    /// One recognition pass: snapshot -> transcribe -> diff -> post-process
    /// -> emit.
    async fn run_pass(&self) -> PassControl {
        let pass_started = Instant::now();

        // Snapshot under lock, then release before touching any model.
        let (pcm, prompt, audio_sec) = {
            let mut inner = self.session.inner.lock().await;
            if inner.buffer.is_empty()
                || inner.buffer.duration_sec() < self.config.min_audio_seconds
            {
                return PassControl::Continue;
            }
            inner.unseen_audio = false;
            (
                inner.buffer.snapshot(),
                inner.differ.initial_prompt(self.config.prompt_max_chars),
                inner.buffer.duration_sec(),
            )
        };

        self.session
            .send(ServerEvent::Progress {
                step: ProgressStep::Transcribing,
                message: format!("transcribing {:.1}s of audio", audio_sec),
            })
            .await;

        let transcribe_started = Instant::now();
        let transcription = match self.models.transcribe_gated(pcm, prompt).await {
            Ok(t) => t,
            Err(e) if e.is_transient() => {
                // Skip this pass; the next trigger retries naturally.
                warn!(session_id = %self.session.id(), error = %e, "transcription pass skipped");
                self.session
                    .send(ServerEvent::error("model_transient", e.to_string()))
                    .await;
                return PassControl::Continue;
            }
            Err(e) => {
                error!(session_id = %self.session.id(), error = %e, "fatal model error");
                self.session
                    .send(ServerEvent::error("model_fatal", e.to_string()))
                    .await;
                self.session.close();
                return PassControl::Shutdown;
            }
        };
        let transcription_ms = transcribe_started.elapsed().as_millis() as u64;

        let text = clean_transcript(&transcription.text);
        if text.is_empty() {
            // Silence or markers only; leave the differ untouched.
            debug!(session_id = %self.session.id(), "empty transcription pass");
            return PassControl::Continue;
        }

        // Diff under lock; copy what post-processing needs.
        let (outcome, options) = {
            let mut inner = self.session.inner.lock().await;
            (inner.differ.update(&text), inner.options)
        };

        let (hiragana, normalization_ms) = self.normalize_increment(&options, &outcome).await;
        let (translation_new, translation_ms) =
            self.translate_increment(&options, &outcome).await;

        // Fold results back into the session and emit.
        let event = {
            let mut inner = self.session.inner.lock().await;

            let hiragana_pair = hiragana.map(|(grown, tentative)| {
                inner.confirmed_hiragana.push_str(&grown);
                TextPair::new(inner.confirmed_hiragana.clone(), tentative)
            });

            let translation_pair = if options.enable_translation
                && self.models.translator().is_some()
            {
                if let Some(ref grown) = translation_new
                    && !grown.is_empty()
                {
                    if !inner.confirmed_translation.is_empty() {
                        inner.confirmed_translation.push(' ');
                    }
                    inner.confirmed_translation.push_str(grown);
                }
                // Tentative text churns every pass; MT runs on confirmed
                // growth only.
                Some(TextPair::new(inner.confirmed_translation.clone(), ""))
            } else {
                None
            };

            if !outcome.newly_confirmed.is_empty() {
                let entry = HistoryEntry {
                    timestamp_sec: self.session.elapsed_sec(),
                    text: outcome.newly_confirmed.clone(),
                    hiragana: hiragana_pair
                        .as_ref()
                        .map(|p| p.confirmed.clone()),
                    translation: translation_new.clone(),
                };
                inner.history.push(entry);
            }

            ServerEvent::TranscriptionUpdate {
                sequence: inner.next_sequence(),
                is_final: false,
                transcription: TextPair::new(outcome.confirmed.clone(), outcome.tentative.clone()),
                hiragana: hiragana_pair,
                translation: translation_pair,
                performance: PerformanceReport {
                    transcription_ms,
                    normalization_ms,
                    translation_ms,
                    total_ms: pass_started.elapsed().as_millis() as u64,
                    audio_sec,
                    finalization_timed_out: None,
                },
            }
        };

        self.session.send(event).await;
        PassControl::Continue
    }

    /// Normalize the newly confirmed growth and the current tentative text.
    ///
    /// Returns `(grown_hiragana, tentative_hiragana)` when enabled and
    /// successful.
    async fn normalize_increment(
        &self,
        options: &crate::session::SessionOptions,
        outcome: &DiffOutcome,
    ) -> (Option<(String, String)>, Option<u64>) {
        if !options.enable_hiragana {
            return (None, None);
        }

        self.session
            .send(ServerEvent::Progress {
                step: ProgressStep::Normalizing,
                message: "normalizing confirmed text".to_string(),
            })
            .await;

        let normalizer = self.models.normalizer().clone();
        let grown = outcome.newly_confirmed.clone();
        let tentative = outcome.tentative.clone();
        let started = Instant::now();

        let result = tokio::task::spawn_blocking(move || {
            let grown = normalizer.to_hiragana(&grown)?;
            let tentative = normalizer.to_hiragana(&tentative)?;
            Ok::<_, crate::error::KikitoriError>((grown, tentative))
        })
        .await;

        match result {
            Ok(Ok(pair)) => (Some(pair), Some(started.elapsed().as_millis() as u64)),
            Ok(Err(e)) => {
                // Post-processing failures never fail the session; the
                // field is simply absent from this update.
                warn!(session_id = %self.session.id(), error = %e, "normalization failed");
                (None, None)
            }
            Err(e) => {
                warn!(session_id = %self.session.id(), error = %e, "normalization task panicked");
                (None, None)
            }
        }
    }

    /// Translate the newly confirmed growth, with bounded retry.
    async fn translate_increment(
        &self,
        options: &crate::session::SessionOptions,
        outcome: &DiffOutcome,
    ) -> (Option<String>, Option<u64>) {
        if !options.enable_translation || outcome.newly_confirmed.is_empty() {
            return (None, None);
        }
        let Some(translator) = self.models.translator() else {
            debug!(session_id = %self.session.id(), "translation enabled but no backend configured");
            return (None, None);
        };

        self.session
            .send(ServerEvent::Progress {
                step: ProgressStep::Translating,
                message: "translating confirmed text".to_string(),
            })
            .await;

        let started = Instant::now();
        match translate_with_retry(translator.clone(), outcome.newly_confirmed.clone()).await {
            Some(translated) => (
                Some(translated),
                Some(started.elapsed().as_millis() as u64),
            ),
            None => (None, None),
        }
    }

    /// End-of-stream finalization, bounded by the configured deadline.
    async fn finalize(&self) {
        let finalize_started = Instant::now();
        let deadline = Duration::from_secs(self.config.end_finalization_timeout_seconds);

        let completed = tokio::time::timeout(deadline, self.finalize_inner()).await;
        let timed_out = completed.is_err();
        let perf = completed.unwrap_or_default();

        let event = {
            let mut inner = self.session.inner.lock().await;

            if timed_out {
                // Deadline exceeded: promote whatever is tentative now and
                // ship the results we have.
                let promoted = inner.differ.finalize();
                if !promoted.is_empty() {
                    let entry = HistoryEntry {
                        timestamp_sec: self.session.elapsed_sec(),
                        text: promoted,
                        hiragana: None,
                        translation: None,
                    };
                    inner.history.push(entry);
                }
            }

            let options = inner.options;
            let hiragana = options.enable_hiragana.then(|| ConfirmedText {
                confirmed: inner.confirmed_hiragana.clone(),
            });
            let translation = (options.enable_translation && self.models.translator().is_some())
                .then(|| ConfirmedText {
                    confirmed: inner.confirmed_translation.clone(),
                });

            info!(
                session_id = %self.session.id(),
                chunks = inner.buffer.appended_chunks(),
                confirmed_chars = inner.differ.confirmed().chars().count(),
                history_entries = inner.history.len(),
                timed_out,
                "session finalized"
            );

            ServerEvent::SessionEnd {
                sequence: inner.next_sequence(),
                is_final: true,
                transcription: TextPair::new(inner.differ.confirmed(), ""),
                hiragana,
                translation,
                performance: PerformanceReport {
                    transcription_ms: perf.transcription_ms,
                    normalization_ms: perf.normalization_ms,
                    translation_ms: perf.translation_ms,
                    total_ms: finalize_started.elapsed().as_millis() as u64,
                    audio_sec: inner.buffer.duration_sec(),
                    finalization_timed_out: timed_out.then_some(true),
                },
            }
        };

        self.session.send(event).await;
        self.session.close();
    }

    /// The deadline-bounded half of finalization.
    async fn finalize_inner(&self) -> FinalizeTimings {
        let mut perf = FinalizeTimings::default();

        // One last transcription if audio arrived after the latest pass.
        let (pcm, prompt) = {
            let mut inner = self.session.inner.lock().await;
            if inner.unseen_audio && !inner.buffer.is_empty() {
                inner.unseen_audio = false;
                (
                    Some(inner.buffer.snapshot()),
                    inner.differ.initial_prompt(self.config.prompt_max_chars),
                )
            } else {
                (None, None)
            }
        };

        if let Some(pcm) = pcm {
            self.session
                .send(ServerEvent::Progress {
                    step: ProgressStep::Transcribing,
                    message: "final transcription".to_string(),
                })
                .await;

            let started = Instant::now();
            match self.models.transcribe_gated(pcm, prompt).await {
                Ok(transcription) => {
                    perf.transcription_ms = started.elapsed().as_millis() as u64;
                    let text = clean_transcript(&transcription.text);
                    if !text.is_empty() {
                        let mut inner = self.session.inner.lock().await;
                        inner.differ.update(&text);
                    }
                }
                Err(e) => {
                    // Finalize with what we have.
                    warn!(session_id = %self.session.id(), error = %e, "final transcription failed");
                }
            }
        }

        // Promote the tentative tail.
        let (promoted, full_confirmed, options) = {
            let mut inner = self.session.inner.lock().await;
            let promoted = inner.differ.finalize();
            (
                promoted,
                inner.differ.confirmed().to_string(),
                inner.options,
            )
        };

        // Full-text post-processing replaces the incremental accumulations.
        if options.enable_hiragana && !full_confirmed.is_empty() {
            self.session
                .send(ServerEvent::Progress {
                    step: ProgressStep::Normalizing,
                    message: "normalizing full text".to_string(),
                })
                .await;

            let normalizer = self.models.normalizer().clone();
            let text = full_confirmed.clone();
            let started = Instant::now();
            let result =
                tokio::task::spawn_blocking(move || normalizer.to_hiragana(&text)).await;
            match result {
                Ok(Ok(hiragana)) => {
                    perf.normalization_ms = Some(started.elapsed().as_millis() as u64);
                    self.session.inner.lock().await.confirmed_hiragana = hiragana;
                }
                Ok(Err(e)) => {
                    warn!(session_id = %self.session.id(), error = %e, "final normalization failed")
                }
                Err(e) => {
                    warn!(session_id = %self.session.id(), error = %e, "final normalization panicked")
                }
            }
        }

        if options.enable_translation
            && !full_confirmed.is_empty()
            && let Some(translator) = self.models.translator()
        {
            self.session
                .send(ServerEvent::Progress {
                    step: ProgressStep::Translating,
                    message: "translating full text".to_string(),
                })
                .await;

            let started = Instant::now();
            if let Some(translated) =
                translate_with_retry(translator.clone(), full_confirmed.clone()).await
            {
                perf.translation_ms = Some(started.elapsed().as_millis() as u64);
                self.session.inner.lock().await.confirmed_translation = translated;
            }
        }

        if !promoted.is_empty() {
            let mut inner = self.session.inner.lock().await;
            let entry = HistoryEntry {
                timestamp_sec: self.session.elapsed_sec(),
                text: promoted,
                hiragana: None,
                translation: None,
            };
            inner.history.push(entry);
        }

        perf
    }
}

/// Timings collected during finalization.
#[derive(Debug, Default)]
struct FinalizeTimings {
    transcription_ms: u64,
    normalization_ms: Option<u64>,
    translation_ms: Option<u64>,
}
