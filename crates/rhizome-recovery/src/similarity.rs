//! Text similarity matching.
//!
//! Finds the best location of a text fragment inside a search window using
//! three increasingly fuzzy steps:
//!
//! 1. **Exact** - literal occurrence of the fragment (confidence 1.0).
//! 2. **Context** - the stored `before`/`after` anchors bracket a span of
//!    roughly the fragment's length (confidence 0.9), which catches small
//!    edits inside the annotated text itself.
//! 3. **Trigram** - sliding-window trigram Jaccard similarity, capped below
//!    the auto-apply threshold so fuzzy matches always go to review.
//!
//! All functions are pure. Offsets are character offsets.
//!
//! Ties are broken deterministically: exact and context candidates prefer
//! stronger context agreement, then proximity to the position hint, then
//! the earliest offset; trigram windows with equal scores resolve to the
//! earliest offset.

use std::collections::HashSet;

use rhizome_core::{defaults, RecoveryConfig};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::text::{char_count, head_chars, tail_chars, CharText};

/// How a candidate was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Context,
    Trigram,
}

/// A candidate location for a fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    /// Start character offset (absolute, window offset applied).
    pub start: usize,
    /// End character offset, exclusive.
    pub end: usize,
    pub confidence: f64,
    pub method: MatchMethod,
}

/// The fragment to locate plus the text stored around it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextWithContext<'a> {
    pub text: &'a str,
    pub before: &'a str,
    pub after: &'a str,
    /// Expected start offset, used only to break ties between candidates.
    pub position_hint: Option<usize>,
}

impl<'a> TextWithContext<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            ..Default::default()
        }
    }

    pub fn with_context(mut self, before: &'a str, after: &'a str) -> Self {
        self.before = before;
        self.after = after;
        self
    }

    pub fn with_hint(mut self, offset: usize) -> Self {
        self.position_hint = Some(offset);
        self
    }
}

/// Similarity matcher configured with a floor and a fuzzy confidence cap.
#[derive(Debug, Clone)]
pub struct SimilarityMatcher {
    floor: f64,
    trigram_cap: f64,
}

impl Default for SimilarityMatcher {
    fn default() -> Self {
        Self::new(&RecoveryConfig::default())
    }
}

impl SimilarityMatcher {
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            floor: config.similarity_floor,
            trigram_cap: config.trigram_max_confidence,
        }
    }

    /// Locate `needle` in `haystack`, reporting offsets shifted by
    /// `window_offset`. A position hint on `needle` is interpreted in the
    /// same shifted coordinates.
    ///
    /// Returns `None` when nothing scores at or above the similarity floor.
    pub fn find(
        &self,
        needle: &TextWithContext<'_>,
        haystack: &str,
        window_offset: usize,
    ) -> Option<MatchCandidate> {
        let text = CharText::new(haystack);
        let local = TextWithContext {
            position_hint: needle
                .position_hint
                .map(|h| h.saturating_sub(window_offset)),
            ..*needle
        };
        self.find_in(&local, &text, 0, text.char_len())
            .map(|c| MatchCandidate {
                start: c.start + window_offset,
                end: c.end + window_offset,
                ..c
            })
    }

    /// Locate `needle` within `[start, end)` of an already indexed text.
    /// Offsets are absolute in `text`.
    pub fn find_in(
        &self,
        needle: &TextWithContext<'_>,
        text: &CharText<'_>,
        start: usize,
        end: usize,
    ) -> Option<MatchCandidate> {
        if needle.text.trim().is_empty() {
            return None;
        }
        let end = end.min(text.char_len());
        if start >= end {
            return None;
        }

        if let Some(c) = self.exact_in(needle, text, start, end) {
            return Some(c);
        }
        if let Some(c) = self.context_in(needle, text, start, end) {
            return Some(c);
        }
        self.trigram_in(needle, text, start, end)
    }

    /// Step A: literal occurrences.
    pub fn exact_in(
        &self,
        needle: &TextWithContext<'_>,
        text: &CharText<'_>,
        start: usize,
        end: usize,
    ) -> Option<MatchCandidate> {
        let len = char_count(needle.text);
        let hits = text.find_all(needle.text, start, end);
        let best = hits.into_iter().min_by_key(|&pos| {
            let agreement = context_agreement(needle, text, pos, pos + len);
            (
                std::cmp::Reverse(agreement),
                hint_distance(needle.position_hint, pos),
                pos,
            )
        })?;
        trace!(start = best, "Exact match");
        Some(MatchCandidate {
            start: best,
            end: best + len,
            confidence: defaults::EXACT_CONFIDENCE,
            method: MatchMethod::Exact,
        })
    }

    /// Step B: a span bracketed by both stored context anchors.
    pub fn context_in(
        &self,
        needle: &TextWithContext<'_>,
        text: &CharText<'_>,
        start: usize,
        end: usize,
    ) -> Option<MatchCandidate> {
        let before = tail_chars(needle.before, defaults::CONTEXT_ANCHOR_CHARS);
        let after = head_chars(needle.after, defaults::CONTEXT_ANCHOR_CHARS);
        if before.trim().chars().count() < defaults::CONTEXT_ANCHOR_MIN_CHARS
            || after.trim().chars().count() < defaults::CONTEXT_ANCHOR_MIN_CHARS
        {
            return None;
        }

        let needle_len = char_count(needle.text) as f64;
        let min_gap = (needle_len * (1.0 - defaults::CONTEXT_SPAN_TOLERANCE)).floor() as usize;
        let max_gap = (needle_len * (1.0 + defaults::CONTEXT_SPAN_TOLERANCE)).ceil() as usize;
        let before_len = char_count(before);

        let befores = text.find_all(before, start, end);
        if befores.is_empty() {
            return None;
        }
        let afters = text.find_all(after, start, end);

        let mut best: Option<(usize, usize)> = None;
        for b in befores {
            let span_start = b + before_len;
            // first `after` anchor at or beyond the span start
            let idx = afters.partition_point(|&a| a < span_start);
            let Some(&a) = afters.get(idx) else {
                continue;
            };
            let gap = a - span_start;
            if gap == 0 || gap < min_gap || gap > max_gap {
                continue;
            }
            let better = match best {
                None => true,
                Some((s, _)) => {
                    (hint_distance(needle.position_hint, span_start), span_start)
                        < (hint_distance(needle.position_hint, s), s)
                }
            };
            if better {
                best = Some((span_start, a));
            }
        }

        let (s, e) = best?;
        trace!(start = s, end = e, "Context-anchored match");
        Some(MatchCandidate {
            start: s,
            end: e,
            confidence: defaults::CONTEXT_CONFIDENCE,
            method: MatchMethod::Context,
        })
    }

    /// Step C: best trigram window.
    pub fn trigram_in(
        &self,
        needle: &TextWithContext<'_>,
        text: &CharText<'_>,
        start: usize,
        end: usize,
    ) -> Option<MatchCandidate> {
        let needle_norm = normalize(needle.text);
        let needle_grams = shingles(&needle_norm, defaults::NGRAM_SIZE);
        if needle_grams.is_empty() {
            return None;
        }

        let range = end - start;
        let window = char_count(needle.text).min(range).max(1);
        let last = end - window;
        let step = (window / defaults::SLIDE_STEP_DIVISOR).max(1);

        let score_at = |pos: usize| -> f64 {
            let norm = normalize(text.slice(pos, pos + window));
            jaccard(&needle_grams, &shingles(&norm, defaults::NGRAM_SIZE))
        };

        let mut best_pos = start;
        let mut best_score = f64::MIN;
        let mut consider = |pos: usize, score: f64| {
            if score > best_score || (score == best_score && pos < best_pos) {
                best_score = score;
                best_pos = pos;
            }
        };

        // coarse pass
        let mut pos = start;
        loop {
            consider(pos, score_at(pos));
            if pos >= last {
                break;
            }
            pos = (pos + step).min(last);
        }

        // refine around the best coarse window
        if step > 1 {
            let lo = best_pos.saturating_sub(step - 1).max(start);
            let hi = (best_pos + step - 1).min(last);
            for p in lo..=hi {
                let s = score_at(p);
                if s > best_score || (s == best_score && p < best_pos) {
                    best_score = s;
                    best_pos = p;
                }
            }
        }

        if best_score < self.floor || best_score <= 0.0 {
            return None;
        }
        trace!(start = best_pos, score = best_score, "Trigram match");
        Some(MatchCandidate {
            start: best_pos,
            end: best_pos + window,
            confidence: best_score.min(self.trigram_cap),
            method: MatchMethod::Trigram,
        })
    }
}

/// Lower-case and collapse whitespace runs to single spaces.
pub fn normalize(s: &str) -> Vec<char> {
    let mut out = Vec::with_capacity(s.len());
    let mut in_space = true;
    for c in s.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
                in_space = true;
            }
        } else {
            out.extend(c.to_lowercase());
            in_space = false;
        }
    }
    if out.last() == Some(&' ') {
        out.pop();
    }
    out
}

/// Set of character n-grams. Strings shorter than `n` yield themselves.
pub fn shingles(chars: &[char], n: usize) -> HashSet<&[char]> {
    if chars.is_empty() {
        return HashSet::new();
    }
    if chars.len() < n {
        return std::iter::once(chars).collect();
    }
    chars.windows(n).collect()
}

/// Jaccard similarity of two shingle sets.
pub fn jaccard(a: &HashSet<&[char]>, b: &HashSet<&[char]>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.len() + b.len() - inter;
    inter as f64 / union as f64
}

/// Trigram similarity of two strings after normalization.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let na = normalize(a);
    let nb = normalize(b);
    jaccard(
        &shingles(&na, defaults::NGRAM_SIZE),
        &shingles(&nb, defaults::NGRAM_SIZE),
    )
}

/// Characters of stored context that agree with the text around a span:
/// common suffix with `before` plus common prefix with `after`.
fn context_agreement(
    needle: &TextWithContext<'_>,
    text: &CharText<'_>,
    start: usize,
    end: usize,
) -> usize {
    let before_len = char_count(needle.before);
    let after_len = char_count(needle.after);
    let actual_before = text.slice(start.saturating_sub(before_len), start);
    let actual_after = text.slice(end, end.saturating_add(after_len));

    let suffix = needle
        .before
        .chars()
        .rev()
        .zip(actual_before.chars().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let prefix = needle
        .after
        .chars()
        .zip(actual_after.chars())
        .take_while(|(a, b)| a == b)
        .count();
    suffix + prefix
}

fn hint_distance(hint: Option<usize>, pos: usize) -> usize {
    hint.map(|h| h.abs_diff(pos)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> SimilarityMatcher {
        SimilarityMatcher::default()
    }

    #[test]
    fn test_exact_match_with_window_offset() {
        let c = matcher()
            .find(&TextWithContext::new("brown fox"), "the quick brown fox", 100)
            .unwrap();
        assert_eq!(c.method, MatchMethod::Exact);
        assert_eq!(c.confidence, 1.0);
        assert_eq!((c.start, c.end), (110, 119));
    }

    #[test]
    fn test_exact_prefers_matching_context() {
        let hay = "alpha the cat sat. beta the cat ran.";
        let needle = TextWithContext::new("the cat").with_context("beta ", " ran");
        let c = matcher().find(&needle, hay, 0).unwrap();
        assert_eq!(c.start, 24);
    }

    #[test]
    fn test_exact_uses_hint_when_context_equal() {
        let hay = "xx abc xx abc xx abc";
        let needle = TextWithContext::new("abc").with_hint(11);
        let c = matcher().find(&needle, hay, 0).unwrap();
        assert_eq!(c.start, 10);
    }

    #[test]
    fn test_exact_earliest_without_hint() {
        let hay = "abc abc abc";
        let c = matcher().find(&TextWithContext::new("abc"), hay, 0).unwrap();
        assert_eq!(c.start, 0);
    }

    #[test]
    fn test_context_bracketed_edit() {
        let hay = "Intro paragraph text here. The convergance thesis holds true. Closing remarks follow.";
        let needle = TextWithContext::new("The convergence thesis holds")
            .with_context("Intro paragraph text here. ", " true. Closing remarks follow.");
        let c = matcher().find(&needle, hay, 0).unwrap();
        assert_eq!(c.method, MatchMethod::Context);
        assert_eq!(c.confidence, 0.9);
        assert_eq!(hay[c.start..c.end].to_string(), "The convergance thesis holds");
    }

    #[test]
    fn test_context_rejects_far_too_long_gap() {
        let hay = "Intro paragraph text here. Something completely different and much much longer than before. Closing remarks follow.";
        let needle = TextWithContext::new("short")
            .with_context("Intro paragraph text here. ", " Closing remarks follow.");
        let c = matcher().find(&needle, hay, 0);
        assert!(c.map(|c| c.method != MatchMethod::Context).unwrap_or(true));
    }

    #[test]
    fn test_trigram_capped_below_threshold() {
        let hay = "Some unrelated words then The Quick  Brown Fox jumped and more words";
        let c = matcher()
            .find(&TextWithContext::new("the quick brown fox"), hay, 0)
            .unwrap();
        assert_eq!(c.method, MatchMethod::Trigram);
        assert!(c.confidence <= 0.84);
        assert!(c.confidence >= 0.3);
        assert!(hay[c.start..c.end].to_lowercase().contains("quick"));
    }

    #[test]
    fn test_no_candidate_below_floor() {
        let c = matcher().find(
            &TextWithContext::new("zebra xylophone"),
            "completely unrelated sentence about cooking pasta",
            0,
        );
        assert!(c.is_none());
    }

    #[test]
    fn test_empty_inputs() {
        assert!(matcher().find(&TextWithContext::new(""), "abc", 0).is_none());
        assert!(matcher().find(&TextWithContext::new("   "), "abc", 0).is_none());
        assert!(matcher().find(&TextWithContext::new("abc"), "", 0).is_none());
    }

    #[test]
    fn test_trigram_ties_resolve_to_earliest() {
        let hay = "lorem ipsum dolor sit lorem ipsum dolor sit";
        let needle = TextWithContext::new("lorem ipsum dolxr");
        let m = matcher();
        let text = CharText::new(hay);
        let c = m.trigram_in(&needle, &text, 0, text.char_len()).unwrap();
        assert_eq!(c.start, 0);
    }

    #[test]
    fn test_needle_longer_than_window() {
        let c = matcher().find(&TextWithContext::new("hello world again"), "hello world", 0);
        let c = c.unwrap();
        assert_eq!(c.method, MatchMethod::Trigram);
        assert_eq!((c.start, c.end), (0, 11));
    }

    #[test]
    fn test_normalize() {
        let n: String = normalize("  Hello\n\n  World  ").into_iter().collect();
        assert_eq!(n, "hello world");
    }

    #[test]
    fn test_trigram_similarity_bounds() {
        assert_eq!(trigram_similarity("abcdef", "abcdef"), 1.0);
        assert_eq!(trigram_similarity("abc", "xyz"), 0.0);
        assert_eq!(trigram_similarity("", ""), 0.0);
        let s = trigram_similarity("convergence", "convergance");
        assert!(s > 0.3 && s < 1.0);
    }

    #[test]
    fn test_deterministic() {
        let hay = "one two three four five six seven eight nine ten";
        let needle = TextWithContext::new("three fuor five");
        let a = matcher().find(&needle, hay, 0);
        let b = matcher().find(&needle, hay, 0);
        assert_eq!(a, b);
    }
}
