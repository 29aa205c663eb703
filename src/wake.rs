//! Wake-phrase gating and command extraction for continuous captures.
//!
//! Recognized text only becomes a command once the configured wake phrase
//! leads it. Matching is token-based over normalized text so punctuation,
//! case, and filler characters from the recognizer do not break detection.

/// Recognized speech may drift slightly before the wake phrase ("um, hey
/// openclaw"); tolerate at most this many leading tokens.
const MAX_PREFIX_TOKENS: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeOutcome {
    /// Wake phrase followed by a command; carries the command text.
    Command(String),
    /// Wake phrase alone; keep listening for the command.
    AwaitingCommand,
    NotDetected,
}

/// Match a transcript against the configured wake phrase.
///
/// An empty wake phrase disables gating: the whole transcript is the
/// command.
#[must_use]
pub fn match_wake(transcript: &str, wake_word: &str) -> WakeOutcome {
    let normalized = normalize(transcript);
    if normalized.is_empty() {
        return WakeOutcome::NotDetected;
    }
    let phrase = normalize(wake_word);
    if phrase.is_empty() {
        return WakeOutcome::Command(normalized);
    }

    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    let phrase_tokens: Vec<&str> = phrase.split_whitespace().collect();
    let Some(start) = find_phrase_start(&tokens, &phrase_tokens) else {
        return WakeOutcome::NotDetected;
    };
    let rest = &tokens[start + phrase_tokens.len()..];
    if rest.is_empty() {
        WakeOutcome::AwaitingCommand
    } else {
        WakeOutcome::Command(rest.join(" "))
    }
}

fn find_phrase_start(tokens: &[&str], phrase_tokens: &[&str]) -> Option<usize> {
    if phrase_tokens.is_empty() || tokens.len() < phrase_tokens.len() {
        return None;
    }
    (0..=MAX_PREFIX_TOKENS.min(tokens.len() - phrase_tokens.len()))
        .find(|&start| tokens[start..start + phrase_tokens.len()] == *phrase_tokens)
}

/// Lowercase, strip punctuation, collapse separators to single spaces.
fn normalize(raw: &str) -> String {
    let mut normalized = String::with_capacity(raw.len());
    let mut previous_was_space = true;
    for ch in raw.chars() {
        if ch.is_alphanumeric() {
            for lowered in ch.to_lowercase() {
                normalized.push(lowered);
            }
            previous_was_space = false;
            continue;
        }
        if previous_was_space {
            continue;
        }
        if ch.is_whitespace() || matches!(ch, '-' | '_' | '\'') {
            normalized.push(' ');
            previous_was_space = true;
        }
    }
    normalized.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn command_after_wake_phrase_is_extracted() {
        assert_eq!(
            match_wake("hey openclaw turn on the lights", "hey openclaw"),
            WakeOutcome::Command("turn on the lights".to_string())
        );
    }

    #[test]
    fn bare_wake_phrase_awaits_a_command() {
        assert_eq!(
            match_wake("hey openclaw", "hey openclaw"),
            WakeOutcome::AwaitingCommand
        );
    }

    #[test]
    fn speech_without_the_wake_phrase_is_ignored() {
        assert_eq!(
            match_wake("turn on the lights", "hey openclaw"),
            WakeOutcome::NotDetected
        );
    }

    #[rstest]
    #[case("Hey, OpenClaw! Turn on the lights.")]
    #[case("  hey   openclaw   turn on the lights ")]
    #[case("um hey openclaw turn on the lights")]
    fn matching_survives_punctuation_case_and_one_filler_token(#[case] transcript: &str) {
        assert_eq!(
            match_wake(transcript, "hey openclaw"),
            WakeOutcome::Command("turn on the lights".to_string())
        );
    }

    #[test]
    fn wake_phrase_buried_in_a_sentence_is_not_a_command() {
        assert_eq!(
            match_wake("I was telling maya that hey openclaw is a thing", "hey openclaw"),
            WakeOutcome::NotDetected
        );
    }

    #[test]
    fn empty_wake_phrase_passes_everything_through() {
        assert_eq!(
            match_wake("Turn on the lights", ""),
            WakeOutcome::Command("turn on the lights".to_string())
        );
    }

    #[test]
    fn empty_transcript_is_not_detected() {
        assert_eq!(match_wake("  ...  ", "hey openclaw"), WakeOutcome::NotDetected);
    }
}
