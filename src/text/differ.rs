//! Confirmed/tentative transcript stabilizer.
//!
//! Successive recognition passes over an overlapping audio window return
//! texts that agree on a prefix and diverge at the tail. The differ splits
//! each new full transcript into a stable confirmed prefix, which is never
//! revised once emitted, and a tentative suffix that may still change.

use crate::defaults::{PROMPT_MAX_SENTENCES, SENTENCE_TERMINATORS};

/// Recognition output markers stripped before diffing.
const TRANSCRIPT_MARKERS: [&str; 7] = [
    "[BLANK_AUDIO]",
    "[INAUDIBLE]",
    "[MUSIC]",
    "[APPLAUSE]",
    "[LAUGHTER]",
    "(BLANK_AUDIO)",
    "(inaudible)",
];

/// Result of feeding one full transcript into the differ.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffOutcome {
    /// Entire confirmed text after this pass.
    pub confirmed: String,
    /// Tentative suffix after this pass.
    pub tentative: String,
    /// The substring by which `confirmed` grew in this pass.
    pub newly_confirmed: String,
}

/// Stateful confirmed/tentative splitter for one session.
#[derive(Debug, Default)]
pub struct TextDiffer {
    confirmed: String,
    tentative: String,
}

impl TextDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entire confirmed text emitted so far.
    pub fn confirmed(&self) -> &str {
        &self.confirmed
    }

    /// Current tentative suffix.
    pub fn tentative(&self) -> &str {
        &self.tentative
    }

    /// Incorporate the full transcript of the latest recognition pass.
    ///
    /// The confirmed prefix grows to the last sentence boundary (`。`, `！`,
    /// `？`) of the new transcript, provided the new transcript still begins
    /// with everything confirmed so far. Unterminated tails stay tentative,
    /// and if the new transcript disagrees with already-confirmed text, the
    /// confirmed text is kept and the disagreeing span is treated as
    /// tentative.
    pub fn update(&mut self, new_text: &str) -> DiffOutcome {
        let new_chars: Vec<char> = new_text.chars().collect();
        let prev_full: Vec<char> = self.confirmed.chars().chain(self.tentative.chars()).collect();
        let prior_len = self.confirmed.chars().count();

        // Character-level longest common prefix of the previous and new pass.
        let lcp = prev_full
            .iter()
            .zip(new_chars.iter())
            .take_while(|(a, b)| a == b)
            .count();

        // Last sentence boundary of the new transcript.
        let stable_end = (0..new_chars.len())
            .rev()
            .find(|&i| SENTENCE_TERMINATORS.contains(&new_chars[i]))
            .map(|i| i + 1)
            .unwrap_or(0);

        let newly_confirmed: String;
        if stable_end > prior_len && lcp >= prior_len {
            // The new transcript begins with the confirmed text and closes
            // at least one further sentence.
            newly_confirmed = new_chars[prior_len..stable_end].iter().collect();
            self.confirmed.push_str(&newly_confirmed);
        } else {
            // No growth; the emitted confirmed never regresses.
            newly_confirmed = String::new();
        }

        let confirmed_len = self.confirmed.chars().count();
        self.tentative = if confirmed_len < new_chars.len() {
            new_chars[confirmed_len..].iter().collect()
        } else {
            String::new()
        };

        DiffOutcome {
            confirmed: self.confirmed.clone(),
            tentative: self.tentative.clone(),
            newly_confirmed,
        }
    }

    /// Promote all remaining tentative text to confirmed.
    ///
    /// Called once by end-of-stream finalization. Returns the promoted
    /// substring.
    pub fn finalize(&mut self) -> String {
        let promoted = std::mem::take(&mut self.tentative);
        self.confirmed.push_str(&promoted);
        promoted
    }

    /// Short text hint biasing the next recognition pass.
    ///
    /// Returns the last sentences of confirmed text, capped at `max_chars`
    /// code points (tail-truncated), or `None` when nothing is confirmed.
    pub fn initial_prompt(&self, max_chars: usize) -> Option<String> {
        if self.confirmed.is_empty() || max_chars == 0 {
            return None;
        }

        let sentences = split_sentences(&self.confirmed);
        let start = sentences.len().saturating_sub(PROMPT_MAX_SENTENCES);
        let prompt: String = sentences[start..].concat();

        let chars: Vec<char> = prompt.chars().collect();
        let truncated: String = if chars.len() > max_chars {
            chars[chars.len() - max_chars..].iter().collect()
        } else {
            prompt
        };

        if truncated.is_empty() {
            None
        } else {
            Some(truncated)
        }
    }
}

/// Split text into sentences, each keeping its terminator.
///
/// The trailing fragment without a terminator is returned as a final
/// element.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for (idx, ch) in text.char_indices() {
        if SENTENCE_TERMINATORS.contains(&ch) {
            let end = idx + ch.len_utf8();
            sentences.push(&text[start..end]);
            start = end;
        }
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }

    sentences
}

/// Strip recognition markers and collapse digit-internal whitespace.
///
/// The recognizer emits bracketed markers for non-speech audio and
/// occasionally splits multi-digit numbers with spaces; both confuse the
/// prefix diff.
pub fn clean_transcript(text: &str) -> String {
    let mut cleaned = text.to_string();
    for marker in TRANSCRIPT_MARKERS {
        cleaned = cleaned.replace(marker, "");
    }

    let chars: Vec<char> = cleaned.chars().collect();
    let mut out = String::with_capacity(cleaned.len());
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if ch.is_whitespace() {
            let run_end = chars[i..]
                .iter()
                .position(|c| !c.is_whitespace())
                .map(|p| i + p)
                .unwrap_or(chars.len());
            let prev_digit = out.chars().next_back().is_some_and(|c| c.is_ascii_digit());
            let next_digit = chars
                .get(run_end)
                .is_some_and(|c| c.is_ascii_digit());
            if !(prev_digit && next_digit) {
                out.extend(&chars[i..run_end]);
            }
            i = run_end;
        } else {
            out.push(ch);
            i += 1;
        }
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_pass_is_all_tentative_without_boundary() {
        let mut differ = TextDiffer::new();

        let outcome = differ.update("こんにちは");

        assert_eq!(outcome.confirmed, "");
        assert_eq!(outcome.tentative, "こんにちは");
        assert_eq!(outcome.newly_confirmed, "");
    }

    #[test]
    fn first_pass_with_terminator_confirms_immediately() {
        let mut differ = TextDiffer::new();

        let outcome = differ.update("こんにちは。");

        assert_eq!(outcome.confirmed, "こんにちは。");
        assert_eq!(outcome.newly_confirmed, "こんにちは。");
        assert_eq!(outcome.tentative, "");
    }

    #[test]
    fn growth_through_terminator_confirms_sentence() {
        let mut differ = TextDiffer::new();

        differ.update("こんにちは");
        let outcome = differ.update("こんにちは。さようなら");

        assert_eq!(outcome.confirmed, "こんにちは。");
        assert_eq!(outcome.newly_confirmed, "こんにちは。");
        assert_eq!(outcome.tentative, "さようなら");
    }

    #[test]
    fn growth_without_terminator_stays_tentative() {
        let mut differ = TextDiffer::new();

        differ.update("こんにち");
        let outcome = differ.update("こんにちは元気");

        assert_eq!(outcome.confirmed, "");
        assert_eq!(outcome.tentative, "こんにちは元気");
    }

    #[test]
    fn revised_tentative_with_terminator_confirms_new_text() {
        let mut differ = TextDiffer::new();

        // The pass revises the tentative tail and closes the sentence; the
        // closed sentence wins since nothing was confirmed yet.
        differ.update("こんにちは、さよう");
        let outcome = differ.update("こんにちは。さよう");

        assert_eq!(outcome.confirmed, "こんにちは。");
        assert_eq!(outcome.tentative, "さよう");
    }

    #[test]
    fn revision_does_not_regress_confirmed() {
        let mut differ = TextDiffer::new();

        differ.update("あいう");
        let outcome = differ.update("あいえお");

        assert_eq!(outcome.confirmed, "");
        assert_eq!(outcome.tentative, "あいえお");
    }

    #[test]
    fn disagreement_with_confirmed_keeps_confirmed() {
        let mut differ = TextDiffer::new();

        differ.update("こんにちは。");
        differ.update("こんにちは。");
        assert_eq!(differ.confirmed(), "こんにちは。");

        // The model changes its mind about already-confirmed text.
        let outcome = differ.update("こんばんは。さようなら");

        assert_eq!(outcome.confirmed, "こんにちは。");
        assert_eq!(outcome.newly_confirmed, "");
        // Tentative is the new transcript past the confirmed length.
        assert_eq!(outcome.tentative, "さようなら");
    }

    #[test]
    fn multiple_sentences_confirm_together() {
        let mut differ = TextDiffer::new();

        let outcome = differ.update("今日は晴れ。明日は雨。たぶん");

        assert_eq!(outcome.confirmed, "今日は晴れ。明日は雨。");
        assert_eq!(outcome.newly_confirmed, "今日は晴れ。明日は雨。");
        assert_eq!(outcome.tentative, "たぶん");

        let outcome = differ.update("今日は晴れ。明日は雨。たぶん曇り");
        assert_eq!(outcome.confirmed, "今日は晴れ。明日は雨。");
        assert_eq!(outcome.newly_confirmed, "");
        assert_eq!(outcome.tentative, "たぶん曇り");
    }

    #[test]
    fn exclamation_and_question_are_boundaries() {
        let mut differ = TextDiffer::new();

        let outcome = differ.update("すごい！本当？まだ");

        assert_eq!(outcome.confirmed, "すごい！本当？");
        assert_eq!(outcome.tentative, "まだ");
    }

    #[test]
    fn empty_pass_clears_tentative_only() {
        let mut differ = TextDiffer::new();

        differ.update("こんにちは。");
        differ.update("こんにちは。やあ");
        assert_eq!(differ.confirmed(), "こんにちは。");

        let outcome = differ.update("");

        assert_eq!(outcome.confirmed, "こんにちは。");
        assert_eq!(outcome.tentative, "");
    }

    #[test]
    fn finalize_promotes_tentative() {
        let mut differ = TextDiffer::new();

        differ.update("こんにちは。さようなら");
        differ.update("こんにちは。さようなら行く");
        let promoted = differ.finalize();

        assert_eq!(differ.confirmed(), "こんにちは。さようなら行く");
        assert_eq!(promoted, "さようなら行く");
        assert_eq!(differ.tentative(), "");
    }

    #[test]
    fn finalize_with_empty_tentative_is_noop() {
        let mut differ = TextDiffer::new();

        differ.update("こんにちは。");
        differ.update("こんにちは。");
        let promoted = differ.finalize();

        assert_eq!(promoted, "");
        assert_eq!(differ.confirmed(), "こんにちは。");
    }

    #[test]
    fn confirmed_is_prefix_of_every_later_confirmed() {
        let passes = [
            "今日は",
            "今日は晴れ",
            "今日は晴れ。明日",
            "今日は晴れ。明日は雨",
            "今日は晴れ。明日は雨。",
            "今日は晴れ。明日は雨。曇りかも",
        ];

        let mut differ = TextDiffer::new();
        let mut last_confirmed = String::new();
        for pass in passes {
            let outcome = differ.update(pass);
            assert!(
                outcome.confirmed.starts_with(&last_confirmed),
                "confirmed regressed: {:?} -> {:?}",
                last_confirmed,
                outcome.confirmed
            );
            last_confirmed = outcome.confirmed;
        }
    }

    #[test]
    fn initial_prompt_none_when_nothing_confirmed() {
        let differ = TextDiffer::new();
        assert_eq!(differ.initial_prompt(224), None);
    }

    #[test]
    fn initial_prompt_returns_confirmed_tail() {
        let mut differ = TextDiffer::new();
        differ.update("こんにちは。ごきげんよう。x");
        differ.update("こんにちは。ごきげんよう。xy");

        let prompt = differ.initial_prompt(224).unwrap();
        assert_eq!(prompt, "こんにちは。ごきげんよう。");
    }

    #[test]
    fn initial_prompt_caps_at_max_chars() {
        let mut differ = TextDiffer::new();
        let long = format!("{}。おわり", "あ".repeat(300));
        differ.update(&long);
        differ.update(&format!("{}x", long));

        let prompt = differ.initial_prompt(224).unwrap();
        assert_eq!(prompt.chars().count(), 224);
        // Tail-truncated: the end of the confirmed text survives.
        assert!(prompt.ends_with('。'));
    }

    #[test]
    fn initial_prompt_limits_sentence_count() {
        let mut differ = TextDiffer::new();
        let many: String = (0..15).map(|i| format!("文{}。", i)).collect();
        differ.update(&many);
        differ.update(&format!("{}x", many));

        let prompt = differ.initial_prompt(1000).unwrap();
        let sentences = split_sentences(&prompt);
        assert_eq!(sentences.len(), PROMPT_MAX_SENTENCES);
        assert!(prompt.ends_with("文14。"));
    }

    #[test]
    fn split_sentences_keeps_terminators() {
        let sentences = split_sentences("一。二！三？四");
        assert_eq!(sentences, vec!["一。", "二！", "三？", "四"]);
    }

    #[test]
    fn split_sentences_empty() {
        assert!(split_sentences("").is_empty());
    }

    #[test]
    fn clean_transcript_removes_markers() {
        assert_eq!(clean_transcript("[BLANK_AUDIO]"), "");
        assert_eq!(
            clean_transcript("こんにちは [MUSIC] さようなら"),
            "こんにちは  さようなら"
        );
    }

    #[test]
    fn clean_transcript_joins_split_digits() {
        assert_eq!(clean_transcript("12 34"), "1234");
        assert_eq!(clean_transcript("12　34"), "1234");
        assert_eq!(clean_transcript("卵 12 個"), "卵 12 個");
    }

    #[test]
    fn clean_transcript_trims() {
        assert_eq!(clean_transcript("  こんにちは  "), "こんにちは");
    }
}
