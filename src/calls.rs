//! Function-call extraction
//!
//! Domain extractors never walk the script text with raw pattern matching:
//! a `Prefab(` inside a string or a comment must not fire. This module is the
//! one sanctioned way to find calls. It scans the text with the same
//! string/comment skipping as [`crate::scan`], follows dotted and colon
//! identifier chains, and matches the parenthesized argument span with
//! [`find_matching`](crate::scan::find_matching).

use serde::Serialize;

use crate::scan::{
    find_matching, is_ident_char, is_ident_start, skip_comment, skip_string_or_long_string,
};

const LUA_KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// One extracted call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Call {
    /// Last segment of the identifier chain (`SetDamage` in
    /// `inst.components.weapon:SetDamage(...)`).
    pub name: String,
    /// Full dotted/colon chain.
    pub full_name: String,
    /// Byte offset of the chain start.
    pub start: usize,
    /// Byte offset just past the closing paren.
    pub end: usize,
    /// Byte offset of the opening paren.
    pub open_paren: usize,
    /// Byte offset of the closing paren.
    pub close_paren: usize,
    /// Raw argument span, parens excluded.
    pub args: String,
    /// Arguments split at top level, empties dropped.
    pub arg_list: Vec<String>,
    /// 1-based line of the chain start.
    pub line: usize,
    /// 1-based column of the chain start.
    pub col: usize,
}

/// How [`CallScanner::iter_calls`] selects call sites.
#[derive(Debug, Clone, Copy)]
pub struct CallFilter {
    /// Accept `obj.Name(...)` / `obj:Name(...)` chains, not only bare
    /// `Name(...)`.
    pub member_calls: bool,
    /// Match the full chain instead of the last segment.
    pub full_name: bool,
}

impl Default for CallFilter {
    fn default() -> Self {
        Self {
            member_calls: true,
            full_name: false,
        }
    }
}

/// Scans one script's text for calls by name.
#[derive(Debug)]
pub struct CallScanner<'t> {
    text: &'t str,
    line_starts: Vec<usize>,
}

impl<'t> CallScanner<'t> {
    pub fn new(text: &'t str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { text, line_starts }
    }

    fn line_col(&self, pos: usize) -> (usize, usize) {
        let idx = self.line_starts.partition_point(|&s| s <= pos) - 1;
        (idx + 1, pos - self.line_starts[idx] + 1)
    }

    /// All calls whose name matches one of `names`, under the default filter.
    pub fn calls(&self, names: &[&str]) -> Vec<Call> {
        self.iter_calls(names, CallFilter::default()).collect()
    }

    /// Iterates over matching calls in source order.
    pub fn iter_calls<'s>(
        &'s self,
        names: &'s [&str],
        filter: CallFilter,
    ) -> impl Iterator<Item = Call> + 's {
        CallIter {
            scanner: self,
            names,
            filter,
            pos: 0,
        }
    }
}

struct CallIter<'s, 't> {
    scanner: &'s CallScanner<'t>,
    names: &'s [&'s str],
    filter: CallFilter,
    pos: usize,
}

impl Iterator for CallIter<'_, '_> {
    type Item = Call;

    fn next(&mut self) -> Option<Call> {
        let text = self.scanner.text;
        let bytes = text.as_bytes();
        let n = bytes.len();
        let mut i = self.pos;

        while i < n {
            if text[i..].starts_with("--") {
                i = skip_comment(text, i);
                continue;
            }
            if let Some(j) = skip_string_or_long_string(text, i) {
                i = j;
                continue;
            }

            if !is_ident_start(bytes[i]) {
                i += 1;
                continue;
            }

            let start = i;
            let mut j = i + 1;
            while j < n && is_ident_char(bytes[j]) {
                j += 1;
            }
            let first = &text[i..j];
            if LUA_KEYWORDS.contains(&first) {
                i = j;
                continue;
            }

            let mut full = first.to_owned();
            let mut last_start = i;
            let mut last_end = j;
            let mut k = j;

            if self.filter.member_calls {
                // extend over ".ident" / ":ident" segments
                loop {
                    let mut kk = k;
                    while kk < n && bytes[kk].is_ascii_whitespace() {
                        kk += 1;
                    }
                    if kk < n && (bytes[kk] == b'.' || bytes[kk] == b':') {
                        let sep = bytes[kk] as char;
                        let mut seg_start = kk + 1;
                        while seg_start < n && bytes[seg_start].is_ascii_whitespace() {
                            seg_start += 1;
                        }
                        if seg_start < n && is_ident_start(bytes[seg_start]) {
                            let mut seg_end = seg_start + 1;
                            while seg_end < n && is_ident_char(bytes[seg_end]) {
                                seg_end += 1;
                            }
                            full.push(sep);
                            full.push_str(&text[seg_start..seg_end]);
                            last_start = seg_start;
                            last_end = seg_end;
                            k = seg_end;
                            continue;
                        }
                    }
                    break;
                }
            }

            let last = &text[last_start..last_end];
            let hit = if self.filter.full_name {
                self.names.contains(&full.as_str())
            } else {
                self.names.contains(&last)
            };

            if hit {
                let mut kk = k;
                while kk < n && bytes[kk].is_ascii_whitespace() {
                    kk += 1;
                }
                if kk < n && bytes[kk] == b'(' {
                    if let Some(close) = find_matching(text, kk, b'(') {
                        let args = &text[kk + 1..close];
                        let arg_list = crate::scan::split_top_level(args, b',')
                            .into_iter()
                            .filter(|p| !p.is_empty())
                            .map(str::to_owned)
                            .collect();
                        let (line, col) = self.scanner.line_col(start);
                        self.pos = close + 1;
                        return Some(Call {
                            name: last.to_owned(),
                            full_name: full,
                            start,
                            end: close + 1,
                            open_paren: kk,
                            close_paren: close,
                            args: args.to_owned(),
                            arg_list,
                            line,
                            col,
                        });
                    }
                }
            }

            i = k;
        }

        self.pos = n;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn bare_call() {
        let scanner = CallScanner::new("Prefab(\"twigs\", fn)");
        let calls = scanner.calls(&["Prefab"]);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arg_list, ["\"twigs\"", "fn"]);
        assert_eq!((calls[0].line, calls[0].col), (1, 1));
    }

    #[test]
    fn member_call_chain() {
        let src = "inst.components.weapon:SetDamage(TUNING.SPEAR_DAMAGE)";
        let scanner = CallScanner::new(src);
        let calls = scanner.calls(&["SetDamage"]);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].full_name, "inst.components.weapon:SetDamage");
        assert_eq!(calls[0].name, "SetDamage");
    }

    #[test]
    fn member_calls_can_be_excluded() {
        let src = "a.Foo(1)\nFoo(2)";
        let scanner = CallScanner::new(src);
        let filter = CallFilter {
            member_calls: false,
            ..CallFilter::default()
        };
        let calls: Vec<_> = scanner.iter_calls(&["Foo"], filter).collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arg_list, ["2"]);
    }

    #[test]
    fn skips_strings_and_comments() {
        let src = indoc! {r#"
            -- Prefab("commented", x)
            local s = 'Prefab("instring", y)'
            Prefab("real", fn)
        "#};
        let scanner = CallScanner::new(src);
        let calls = scanner.calls(&["Prefab"]);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arg_list[0], "\"real\"");
        assert_eq!(calls[0].line, 3);
    }

    #[test]
    fn keywords_never_callable() {
        let scanner = CallScanner::new("if (x) then end");
        assert!(scanner.calls(&["if"]).is_empty());
    }

    #[test]
    fn nested_function_argument_stays_whole() {
        let src = "AddTask(\"t\", function(a, b) return a end, other)";
        let scanner = CallScanner::new(src);
        let calls = scanner.calls(&["AddTask"]);
        assert_eq!(calls[0].arg_list.len(), 3);
        assert_eq!(calls[0].arg_list[1], "function(a, b) return a end");
    }

    #[test]
    fn full_name_matching() {
        let src = "cooking.AddIngredientValues(names, tags)\nAddIngredientValues(x, y)";
        let scanner = CallScanner::new(src);
        let filter = CallFilter {
            full_name: true,
            ..CallFilter::default()
        };
        let calls: Vec<_> = scanner
            .iter_calls(&["cooking.AddIngredientValues"], filter)
            .collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args, "names, tags");
    }
}
