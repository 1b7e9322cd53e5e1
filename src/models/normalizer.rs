//! Japanese kana normalization.
//!
//! The server normalizes confirmed text to hiragana for reading-support
//! clients. The built-in [`KanaNormalizer`] folds katakana to hiragana by
//! code-point shift; kanji readings require a dictionary-backed converter
//! plugged in through the [`Normalizer`] trait.

use crate::error::{KikitoriError, Result};
use std::sync::Arc;

/// Trait for text-to-hiragana conversion.
///
/// Implementations must be pure and deterministic; in particular,
/// `to_hiragana` must be idempotent on hiragana-only input.
pub trait Normalizer: Send + Sync {
    /// Convert text to hiragana.
    fn to_hiragana(&self, text: &str) -> Result<String>;
}

impl<T: Normalizer + ?Sized> Normalizer for Arc<T> {
    fn to_hiragana(&self, text: &str) -> Result<String> {
        (**self).to_hiragana(text)
    }
}

/// Katakana-folding normalizer.
///
/// Maps the katakana block onto its hiragana counterparts (ァ..ヶ → ぁ..ゖ,
/// plus the iteration marks ヽヾ → ゝゞ). Characters outside the katakana
/// block, including kanji, pass through unchanged.
#[derive(Debug, Clone, Default)]
pub struct KanaNormalizer;

impl KanaNormalizer {
    pub fn new() -> Self {
        Self
    }

    fn fold_char(ch: char) -> char {
        match ch {
            // ァ (U+30A1) .. ヶ (U+30F6) sit 0x60 above ぁ..ゖ
            '\u{30A1}'..='\u{30F6}' => {
                char::from_u32(ch as u32 - 0x60).unwrap_or(ch)
            }
            // Iteration marks
            '\u{30FD}' => '\u{309D}',
            '\u{30FE}' => '\u{309E}',
            _ => ch,
        }
    }
}

impl Normalizer for KanaNormalizer {
    fn to_hiragana(&self, text: &str) -> Result<String> {
        Ok(text.chars().map(Self::fold_char).collect())
    }
}

/// Mock normalizer for testing
#[derive(Debug, Clone, Default)]
pub struct MockNormalizer {
    replacement: Option<String>,
    should_fail: bool,
}

impl MockNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to return a fixed string for any input.
    pub fn with_replacement(mut self, replacement: &str) -> Self {
        self.replacement = Some(replacement.to_string());
        self
    }

    /// Configure the mock to fail on conversion.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }
}

impl Normalizer for MockNormalizer {
    fn to_hiragana(&self, text: &str) -> Result<String> {
        if self.should_fail {
            return Err(KikitoriError::Normalization {
                message: "mock normalization failure".to_string(),
            });
        }
        Ok(self
            .replacement
            .clone()
            .unwrap_or_else(|| text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn katakana_folds_to_hiragana() {
        let normalizer = KanaNormalizer::new();
        assert_eq!(normalizer.to_hiragana("カタカナ").unwrap(), "かたかな");
        assert_eq!(normalizer.to_hiragana("コンニチハ").unwrap(), "こんにちは");
    }

    #[test]
    fn small_kana_and_voiced_marks_fold() {
        let normalizer = KanaNormalizer::new();
        assert_eq!(normalizer.to_hiragana("ッチャ").unwrap(), "っちゃ");
        assert_eq!(normalizer.to_hiragana("ヴ").unwrap(), "ゔ");
        assert_eq!(normalizer.to_hiragana("ヽヾ").unwrap(), "ゝゞ");
    }

    #[test]
    fn hiragana_input_is_unchanged() {
        let normalizer = KanaNormalizer::new();
        assert_eq!(normalizer.to_hiragana("こんにちは。").unwrap(), "こんにちは。");
    }

    #[test]
    fn idempotent_on_hiragana() {
        let normalizer = KanaNormalizer::new();
        let once = normalizer.to_hiragana("カタカナとひらがな。").unwrap();
        let twice = normalizer.to_hiragana(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn kanji_and_punctuation_pass_through() {
        let normalizer = KanaNormalizer::new();
        assert_eq!(
            normalizer.to_hiragana("日本語！Test 123？").unwrap(),
            "日本語！Test 123？"
        );
    }

    #[test]
    fn katakana_middle_dot_and_prolonged_mark_kept() {
        let normalizer = KanaNormalizer::new();
        // ・ (U+30FB) and ー (U+30FC) have no hiragana counterpart.
        assert_eq!(normalizer.to_hiragana("コー・ヒー").unwrap(), "こー・ひー");
    }

    #[test]
    fn empty_input() {
        let normalizer = KanaNormalizer::new();
        assert_eq!(normalizer.to_hiragana("").unwrap(), "");
    }

    #[test]
    fn mock_normalizer_replacement_and_failure() {
        let mock = MockNormalizer::new().with_replacement("かな");
        assert_eq!(mock.to_hiragana("whatever").unwrap(), "かな");

        let failing = MockNormalizer::new().with_failure();
        assert!(failing.to_hiragana("x").is_err());
    }
}
