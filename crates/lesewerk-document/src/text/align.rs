// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Alignment of corrected transcriptions onto recognised word geometry.

use lesewerk_core::{AlignedWord, EngineConfig, RecognizedWord};
use tracing::{debug, instrument};

/// Characters stripped from either end of a token as markup.
const MARKUP_CHARS: &[char] = &['#', '*', '_', '`', '>', '~', '|'];

/// Length difference (in characters) tolerated before the penalty applies.
const LENGTH_SLACK: usize = 2;

/// Replaces word text with tokens from a better transcription while leaving
/// every bounding box, column, and position untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentEngine {
    /// A candidate must score strictly above this to be accepted.
    pub threshold: f64,
    /// Tokens searched from the cursor onward.
    pub window: usize,
    pub length_penalty: f64,
}

impl Default for AlignmentEngine {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for AlignmentEngine {
    fn from(config: &EngineConfig) -> Self {
        Self {
            threshold: config.alignment_threshold,
            window: config.alignment_window.max(1),
            length_penalty: config.length_penalty,
        }
    }
}

impl AlignmentEngine {
    /// Align recognised words against free-form corrected text.
    pub fn align(&self, words: &[RecognizedWord], corrected: &str) -> Vec<AlignedWord> {
        let tokens = tokenize(corrected);
        self.align_tokens(words, &tokens)
    }

    /// Align recognised words against an already tokenised transcription.
    ///
    /// The output always has the same length and order as `words`.
    /// Unmatched words keep their recognised text.
    #[instrument(skip_all, fields(words = words.len(), tokens = tokens.len()))]
    pub fn align_tokens<S: AsRef<str>>(
        &self,
        words: &[RecognizedWord],
        tokens: &[S],
    ) -> Vec<AlignedWord> {
        let mut cursor = 0;
        let mut refined = 0;

        let aligned: Vec<AlignedWord> = words
            .iter()
            .map(|word| {
                let mut aligned = AlignedWord::from(word);
                let end = (cursor + self.window).min(tokens.len());

                let mut best: Option<(usize, f64)> = None;
                for (index, token) in tokens[cursor..end].iter().enumerate() {
                    let score = self.score(&word.text, token.as_ref());
                    if best.is_none_or(|(_, top)| score > top) {
                        best = Some((cursor + index, score));
                    }
                }

                match best {
                    Some((index, score)) if score > self.threshold => {
                        aligned.refine(tokens[index].as_ref());
                        cursor = index + 1;
                        refined += 1;
                    }
                    _ => {}
                }
                aligned
            })
            .collect();

        debug!(refined, "Alignment complete");
        aligned
    }

    /// Normalised edit similarity, penalised when lengths diverge.
    fn score(&self, recognised: &str, candidate: &str) -> f64 {
        let similarity = strsim::normalized_levenshtein(recognised, candidate);
        let a = recognised.chars().count();
        let b = candidate.chars().count();
        if a.abs_diff(b) > LENGTH_SLACK {
            similarity - self.length_penalty
        } else {
            similarity
        }
    }
}

/// Split corrected text into comparable tokens.
///
/// HTML-style tags are removed, markup characters are trimmed from token
/// edges, and tokens made only of markup or list bullets are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    strip_tags(text)
        .split_whitespace()
        .filter_map(|raw| {
            let token = raw.trim_matches(MARKUP_CHARS);
            let is_bullet = matches!(token, "-" | "+" | "---" | "***");
            if token.is_empty() || is_bullet || is_link_target(token) {
                None
            } else {
                Some(strip_link_brackets(token))
            }
        })
        .filter(|token| !token.is_empty())
        .collect()
}

/// Replace HTML-like tags with a space. A `<` opens a tag only when a
/// letter, `/` or `!` follows it and a `>` closes it on the same line;
/// anything else is ordinary text such as `x < 5`.
fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let starts_tag = after
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!');
        let line_end = after.find('\n').unwrap_or(after.len());
        match after[..line_end].find('>') {
            Some(close) if starts_tag => {
                out.push(' ');
                rest = &after[close + 1..];
            }
            _ => {
                out.push('<');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// `(https://...)` halves of markdown links.
fn is_link_target(token: &str) -> bool {
    token.starts_with("](") || (token.starts_with('(') && token.contains("://"))
}

/// `[word]` or `[word](target)` becomes `word`.
fn strip_link_brackets(token: &str) -> String {
    let token = token.strip_prefix('[').unwrap_or(token);
    match token.find("](") {
        Some(end) => token[..end].to_string(),
        None => token.trim_end_matches(']').to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesewerk_core::BoundingBox;

    fn words(texts: &[&str]) -> Vec<RecognizedWord> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| RecognizedWord {
                text: (*t).into(),
                confidence: 0.8,
                bbox: BoundingBox::new(i as f32 * 10.0, 0.0, i as f32 * 10.0 + 8.0, 10.0),
                column: 0,
            })
            .collect()
    }

    fn texts(aligned: &[AlignedWord]) -> Vec<&str> {
        aligned.iter().map(|w| w.text()).collect()
    }

    #[test]
    fn identical_text_refines_everything() {
        let source = words(&["The", "quick", "brown", "fox"]);
        let aligned = AlignmentEngine::default().align(&source, "The quick brown fox");
        assert_eq!(aligned.len(), source.len());
        assert!(aligned.iter().all(|w| w.is_refined()));
        assert_eq!(texts(&aligned), ["The", "quick", "brown", "fox"]);
    }

    #[test]
    fn recognition_errors_are_corrected() {
        let source = words(&["Tbe", "qu1ck", "brovvn", "fox"]);
        let aligned = AlignmentEngine::default().align(&source, "The quick brown fox");
        assert_eq!(texts(&aligned), ["The", "quick", "brown", "fox"]);
    }

    #[test]
    fn truncated_transcription_leaves_tail_untouched() {
        let source = words(&["one", "two", "three", "four", "five"]);
        let aligned = AlignmentEngine::default().align(&source, "one two");
        assert_eq!(aligned.len(), 5);
        assert!(aligned[0].is_refined() && aligned[1].is_refined());
        for word in &aligned[2..] {
            assert!(!word.is_refined());
        }
        assert_eq!(texts(&aligned), ["one", "two", "three", "four", "five"]);
    }

    #[test]
    fn empty_transcription_changes_nothing() {
        let source = words(&["alpha", "beta"]);
        let aligned = AlignmentEngine::default().align(&source, "");
        assert!(aligned.iter().all(|w| !w.is_refined()));
        assert_eq!(texts(&aligned), ["alpha", "beta"]);
    }

    #[test]
    fn geometry_is_never_altered() {
        let source = words(&["Tbe", "page", "42"]);
        let aligned = AlignmentEngine::default().align(&source, "The page");
        for (before, after) in source.iter().zip(&aligned) {
            assert_eq!(before.bbox, after.bbox());
            assert_eq!(before.column, after.column());
        }
    }

    #[test]
    fn page_furniture_is_skipped_without_losing_the_cursor() {
        // The running header "CHAPTER" is absent from the transcription.
        let source = words(&["CHAPTER", "It", "was", "dark"]);
        let aligned = AlignmentEngine::default().align(&source, "It was dark");
        assert!(!aligned[0].is_refined());
        assert_eq!(texts(&aligned), ["CHAPTER", "It", "was", "dark"]);
        assert!(aligned[1..].iter().all(|w| w.is_refined()));
    }

    #[test]
    fn tokens_are_never_reused() {
        let source = words(&["the", "the"]);
        let aligned = AlignmentEngine::default().align(&source, "the");
        assert!(aligned[0].is_refined());
        assert!(!aligned[1].is_refined());
    }

    #[test]
    fn matches_outside_the_window_are_ignored() {
        let source = words(&["target"]);
        let text = "a b c d e target";
        let aligned = AlignmentEngine::default().align(&source, text);
        assert!(!aligned[0].is_refined());

        let wide = AlignmentEngine {
            window: 6,
            ..Default::default()
        };
        assert!(wide.align(&source, text)[0].is_refined());
    }

    #[test]
    fn length_penalty_applies_beyond_slack() {
        let engine = AlignmentEngine::default();
        let plain = strsim::normalized_levenshtein("cat", "catalog");
        assert!((engine.score("cat", "catalog") - (plain - 0.2)).abs() < 1e-9);
        let close = strsim::normalized_levenshtein("cat", "cats");
        assert!((engine.score("cat", "cats") - close).abs() < 1e-9);
    }

    #[test]
    fn tokenize_strips_markup() {
        let tokens = tokenize("# Title\n\n- **bold** and _it_ <br/> [link](https://x.org)\n> quote");
        assert_eq!(tokens, ["Title", "bold", "and", "it", "link", "quote"]);
    }

    #[test]
    fn default_constants_are_exact() {
        let engine = AlignmentEngine::default();
        assert_eq!(engine.threshold, 0.4);
        assert_eq!(engine.length_penalty, 0.2);
    }

    #[test]
    fn bare_angle_brackets_keep_the_text() {
        let tokens = tokenize("if x < 5 then the loop ends here and continues");
        assert_eq!(
            tokens,
            ["if", "x", "<", "5", "then", "the", "loop", "ends", "here", "and", "continues"]
        );

        let tokens = tokenize("a <b>bold</b> b > c <unclosed\nnext line");
        assert_eq!(tokens, ["a", "bold", "b", "c", "<unclosed", "next", "line"]);
    }

    #[test]
    fn token_arrays_align_directly() {
        let source = words(&["helo", "wrld"]);
        let aligned = AlignmentEngine::default().align_tokens(&source, &["hello", "world"]);
        assert_eq!(texts(&aligned), ["hello", "world"]);
    }
}
