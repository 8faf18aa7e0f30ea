//! Character-offset view over UTF-8 text.
//!
//! Stored offsets count Unicode scalar values, while Rust string slicing
//! works on bytes. [`CharText`] keeps the byte position of every character
//! so lookups and slices by character offset are O(1) and never split a
//! code point.

use rhizome_core::TextContext;

/// Text indexed by character offset.
#[derive(Debug, Clone)]
pub struct CharText<'a> {
    text: &'a str,
    /// Byte offset of each character, followed by `text.len()`.
    bounds: Vec<usize>,
}

impl<'a> CharText<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut bounds: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        bounds.push(text.len());
        Self { text, bounds }
    }

    pub fn as_str(&self) -> &'a str {
        self.text
    }

    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.bounds.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Slice by character offsets. Out-of-range bounds are clamped.
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        let len = self.char_len();
        let end = end.min(len);
        let start = start.min(end);
        &self.text[self.bounds[start]..self.bounds[end]]
    }

    /// Convert a byte offset (on a char boundary) to a character offset.
    pub fn char_at_byte(&self, byte: usize) -> usize {
        self.bounds.binary_search(&byte).unwrap_or_else(|i| i)
    }

    /// Character offsets of every occurrence of `needle` that lies fully
    /// inside `[start, end)`, in ascending order. Overlapping occurrences
    /// are reported.
    pub fn find_all(&self, needle: &str, start: usize, end: usize) -> Vec<usize> {
        if needle.is_empty() {
            return Vec::new();
        }
        let len = self.char_len();
        let end = end.min(len);
        let start = start.min(end);
        let base = self.bounds[start];
        let hay = self.slice(start, end);

        let mut found = Vec::new();
        let mut from = 0;
        while from <= hay.len() {
            let Some(pos) = hay[from..].find(needle) else {
                break;
            };
            let at = from + pos;
            found.push(self.char_at_byte(base + at));
            let step = hay[at..].chars().next().map(char::len_utf8).unwrap_or(1);
            from = at + step;
        }
        found
    }

    /// Up to `n` characters on each side of `[start, end)`.
    pub fn context_around(&self, start: usize, end: usize, n: usize) -> TextContext {
        TextContext::new(
            self.slice(start.saturating_sub(n), start),
            self.slice(end, end.saturating_add(n)),
        )
    }
}

/// Number of characters in `s`.
pub fn char_count(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of `s`.
pub fn tail_chars(s: &str, n: usize) -> &str {
    let count = char_count(s);
    if count <= n {
        return s;
    }
    let skip = count - n;
    let byte = s.char_indices().nth(skip).map(|(b, _)| b).unwrap_or(s.len());
    &s[byte..]
}

/// First `n` characters of `s`.
pub fn head_chars(s: &str, n: usize) -> &str {
    let byte = s.char_indices().nth(n).map(|(b, _)| b).unwrap_or(s.len());
    &s[..byte]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_multibyte() {
        let t = CharText::new("héllo wörld");
        assert_eq!(t.char_len(), 11);
        assert_eq!(t.slice(1, 5), "éllo");
        assert_eq!(t.slice(6, 100), "wörld");
        assert_eq!(t.slice(9, 3), "");
    }

    #[test]
    fn test_find_all_reports_char_offsets() {
        let t = CharText::new("ééé abc ééé abc");
        assert_eq!(t.find_all("abc", 0, t.char_len()), vec![4, 12]);
        assert_eq!(t.find_all("abc", 5, t.char_len()), vec![12]);
        assert_eq!(t.find_all("abc", 0, 6), Vec::<usize>::new());
    }

    #[test]
    fn test_find_all_overlapping() {
        let t = CharText::new("aaaa");
        assert_eq!(t.find_all("aa", 0, 4), vec![0, 1, 2]);
    }

    #[test]
    fn test_find_all_empty_needle() {
        let t = CharText::new("abc");
        assert!(t.find_all("", 0, 3).is_empty());
    }

    #[test]
    fn test_context_around_clamps() {
        let t = CharText::new("0123456789");
        let ctx = t.context_around(2, 5, 4);
        assert_eq!(ctx.before, "01");
        assert_eq!(ctx.after, "5678");
    }

    #[test]
    fn test_head_tail_chars() {
        assert_eq!(tail_chars("abcdéf", 3), "déf");
        assert_eq!(tail_chars("ab", 3), "ab");
        assert_eq!(head_chars("éabc", 2), "éa");
        assert_eq!(head_chars("ab", 5), "ab");
    }
}
