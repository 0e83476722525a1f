//! Low-level Lua scanning primitives
//!
//! Everything in this module works on byte offsets into UTF-8 text. Lua
//! identifiers, strings and comments are all ASCII-delimited, so treating the
//! input as a byte stream is safe and keeps the scanner allocation-free.
//!
//! All functions are total: an unmatched bracket yields `None`, a malformed
//! string consumes to end of input. Nothing here panics on any input.

use smallvec::SmallVec;

pub(crate) fn is_ident_start(b: u8) -> bool {
    b == b'_' || b.is_ascii_alphabetic()
}

pub(crate) fn is_ident_char(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

/// If `text[i..]` begins a long-bracket opener `[=*[`, returns the `=` count.
///
/// `[[` -> 0, `[=[` -> 1, `[==[` -> 2, anything else -> `None`.
pub fn long_bracket_level(text: &str, i: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if i >= bytes.len() || bytes[i] != b'[' {
        return None;
    }
    let mut j = i + 1;
    while j < bytes.len() && bytes[j] == b'=' {
        j += 1;
    }
    if j < bytes.len() && bytes[j] == b'[' {
        Some(j - i - 1)
    } else {
        None
    }
}

/// Skips a long-bracket string/comment starting at `i`. Returns the index just
/// past the matching `]=*]`, or end of text when unterminated.
pub fn skip_long_bracket(text: &str, i: usize, level: usize) -> usize {
    let opener_len = 2 + level;
    let start = (i + opener_len).min(text.len());
    let mut close = String::with_capacity(level + 2);
    close.push(']');
    for _ in 0..level {
        close.push('=');
    }
    close.push(']');
    match text[start..].find(&close) {
        Some(off) => start + off + close.len(),
        None => text.len(),
    }
}

/// Skips `'...'` or `"..."` starting at `i` (which must point at the quote).
/// A backslash consumes the following byte. Returns the index just past the
/// closing quote, or end of text.
pub fn skip_short_string(text: &str, i: usize, quote: u8) -> usize {
    let bytes = text.as_bytes();
    let n = bytes.len();
    let mut i = i + 1;
    while i < n {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    n
}

/// Skips a comment starting at `i` (which must point at `--`). Handles both
/// `--[=*[ ... ]=*]` block comments and line comments.
pub fn skip_comment(text: &str, i: usize) -> usize {
    let n = text.len();
    if !text[i..].starts_with("--") {
        return i;
    }
    if i + 2 < n {
        if let Some(level) = long_bracket_level(text, i + 2) {
            return skip_long_bracket(text, i + 2, level);
        }
    }
    match text[i + 2..].find('\n') {
        Some(off) => i + 2 + off + 1,
        None => n,
    }
}

/// If position `i` starts a short string or long-bracket string, returns the
/// index just past it; otherwise `None`.
pub fn skip_string_or_long_string(text: &str, i: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if i >= bytes.len() {
        return None;
    }
    match bytes[i] {
        q @ (b'\'' | b'"') => Some(skip_short_string(text, i, q)),
        b'[' => long_bracket_level(text, i).map(|level| skip_long_bracket(text, i, level)),
        _ => None,
    }
}

/// Removes Lua comments while preserving line breaks, so byte-to-line mapping
/// of the remaining code stays stable. String contents are left untouched.
pub fn strip_comments(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let bytes = text.as_bytes();
    let n = bytes.len();
    let mut out = String::with_capacity(n);
    let mut i = 0;
    while i < n {
        if text[i..].starts_with("--") {
            let j = skip_comment(text, i);
            for _ in text[i..j].matches('\n') {
                out.push('\n');
            }
            i = j;
            continue;
        }
        if let Some(j) = skip_string_or_long_string(text, i) {
            out.push_str(&text[i..j]);
            i = j;
            continue;
        }
        // advance one full char so multi-byte sequences stay intact
        let ch_len = text[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&text[i..i + ch_len]);
        i += ch_len;
    }
    out
}

fn open_for(close: u8) -> u8 {
    match close {
        b')' => b'(',
        b'}' => b'{',
        _ => b'[',
    }
}

/// Finds the matching close bracket for the opener at `open_idx`, skipping
/// strings, comments and long brackets along the way. Returns `None` when the
/// bracket is unmatched or `open_idx` does not point at `open`.
pub fn find_matching(text: &str, open_idx: usize, open: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let n = bytes.len();
    if open_idx >= n || bytes[open_idx] != open {
        return None;
    }

    let mut stack: SmallVec<[u8; 16]> = SmallVec::new();
    stack.push(open);
    let mut i = open_idx + 1;
    while i < n && !stack.is_empty() {
        if text[i..].starts_with("--") {
            i = skip_comment(text, i);
            continue;
        }
        if let Some(j) = skip_string_or_long_string(text, i) {
            i = j;
            continue;
        }
        match bytes[i] {
            b @ (b'(' | b'{' | b'[') => {
                stack.push(b);
                i += 1;
            }
            b @ (b')' | b'}' | b']') => {
                if stack.last() == Some(&open_for(b)) {
                    stack.pop();
                }
                i += 1;
            }
            _ => i += 1,
        }
    }

    if stack.is_empty() {
        Some(i - 1)
    } else {
        None
    }
}

/// Lua block keywords tracked by [`BlockStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Block {
    Function,
    If,
    /// `for`/`while` headers, open until their `do` arrives.
    Loop { awaiting_do: bool },
    Repeat,
    Do,
}

/// Tracks `function`/`if`/`for`/`while`/`repeat`/`do` ... `end`/`until`
/// nesting so top-level scans are not misled by keywords inside blocks.
#[derive(Debug, Default)]
pub(crate) struct BlockStack {
    stack: SmallVec<[Block; 8]>,
}

impl BlockStack {
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn push(&mut self, block: Block) {
        self.stack.push(block);
    }

    /// Feeds one identifier word. Returns `true` when the word closed the
    /// outermost frame (`end`/`until` emptying the stack).
    pub fn feed(&mut self, word: &str) -> bool {
        match word {
            "function" => self.stack.push(Block::Function),
            "if" => self.stack.push(Block::If),
            "for" | "while" => self.stack.push(Block::Loop { awaiting_do: true }),
            "repeat" => self.stack.push(Block::Repeat),
            "do" => match self.stack.last_mut() {
                Some(Block::Loop { awaiting_do }) if *awaiting_do => *awaiting_do = false,
                _ => self.stack.push(Block::Do),
            },
            "end" => {
                self.stack.pop();
                return self.stack.is_empty();
            }
            "until" => {
                // close the nearest repeat
                if let Some(idx) = self.stack.iter().rposition(|b| *b == Block::Repeat) {
                    self.stack.truncate(idx);
                }
                return self.stack.is_empty();
            }
            _ => {}
        }
        false
    }
}

/// Splits `text` at `sep`, but only where the bracket stack *and* the block
/// keyword stack are both empty. Strings, comments and long brackets never
/// contribute separators or keywords. Parts are trimmed; a trailing empty
/// part is dropped.
pub fn split_top_level(text: &str, sep: u8) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let bytes = text.as_bytes();
    let n = bytes.len();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;

    let mut brackets: SmallVec<[u8; 16]> = SmallVec::new();
    let mut blocks = BlockStack::default();

    while i < n {
        if text[i..].starts_with("--") {
            i = skip_comment(text, i);
            continue;
        }
        if let Some(j) = skip_string_or_long_string(text, i) {
            i = j;
            continue;
        }

        let b = bytes[i];
        match b {
            b'(' | b'{' | b'[' => {
                brackets.push(b);
                i += 1;
                continue;
            }
            b')' | b'}' | b']' => {
                if brackets.last() == Some(&open_for(b)) {
                    brackets.pop();
                }
                i += 1;
                continue;
            }
            _ => {}
        }

        if is_ident_start(b) {
            let mut j = i + 1;
            while j < n && is_ident_char(bytes[j]) {
                j += 1;
            }
            blocks.feed(&text[i..j]);
            i = j;
            continue;
        }

        if b == sep && brackets.is_empty() && blocks.is_empty() {
            parts.push(text[start..i].trim());
            start = i + 1;
        }
        i += 1;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_bracket_levels() {
        assert_eq!(long_bracket_level("[[x]]", 0), Some(0));
        assert_eq!(long_bracket_level("[=[x]=]", 0), Some(1));
        assert_eq!(long_bracket_level("[==[x]==]", 0), Some(2));
        assert_eq!(long_bracket_level("[=x", 0), None);
        assert_eq!(long_bracket_level("x[[", 0), None);
    }

    #[test]
    fn short_string_escapes() {
        let s = r#""a\"b" rest"#;
        assert_eq!(skip_short_string(s, 0, b'"'), 6);
        // unterminated consumes to end
        assert_eq!(skip_short_string("'abc", 0, b'\''), 4);
    }

    #[test]
    fn comments() {
        assert_eq!(skip_comment("-- line\nnext", 0), 8);
        assert_eq!(skip_comment("--[[ block ]] after", 0), 13);
        assert_eq!(skip_comment("-- no newline", 0), 13);
    }

    #[test]
    fn strip_preserves_lines() {
        let src = "a = 1 -- one\nb = '--not' --[[x\ny]] c = 2\n";
        let clean = strip_comments(src);
        assert_eq!(clean.matches('\n').count(), src.matches('\n').count());
        assert!(clean.contains("'--not'"));
        assert!(!clean.contains("one"));
    }

    #[test]
    fn matching_skips_strings_and_comments() {
        let s = "(a, ')', {b, \"}\"} -- )\n, c)";
        assert_eq!(find_matching(s, 0, b'('), Some(s.len() - 1));
        assert_eq!(find_matching("(unclosed", 0, b'('), None);
        assert_eq!(find_matching("x()", 0, b'('), None);
    }

    #[test]
    fn split_respects_brackets() {
        assert_eq!(split_top_level("a, {b, c}, d(e, f)", b','), ["a", "{b, c}", "d(e, f)"]);
    }

    #[test]
    fn split_respects_blocks() {
        let got = split_top_level("f(), function(a,b) return a,b end, g()", b',');
        assert_eq!(got, ["f()", "function(a,b) return a,b end", "g()"]);
    }

    #[test]
    fn split_handles_loop_do() {
        let got = split_top_level("function() for i=1,3 do x() end end, y", b',');
        assert_eq!(got, ["function() for i=1,3 do x() end end", "y"]);
    }

    #[test]
    fn split_handles_repeat_until() {
        let got = split_top_level("function() repeat a() until done end, y", b',');
        assert_eq!(got, ["function() repeat a() until done end", "y"]);
    }

    #[test]
    fn split_ignores_separators_in_strings() {
        assert_eq!(split_top_level("'a,b', c", b','), ["'a,b'", "c"]);
        assert_eq!(split_top_level("[[a,b]], c", b','), ["[[a,b]]", "c"]);
    }
}
