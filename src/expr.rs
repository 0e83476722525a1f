//! Lua expression and table-constructor parsing
//!
//! This is not a full Lua parser. It recognizes the literal and table forms
//! the data scripts actually use and keeps everything else verbatim as
//! [`Value::Raw`], so downstream extractors decide how to interpret symbolic
//! fields like `CHARACTER_INGREDIENT.HEALTH` or inline functions.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::scan::{
    find_matching, long_bracket_level, skip_string_or_long_string, split_top_level, strip_comments,
};

/// A parsed Lua expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Table(Table),
    /// Opaque expression kept as raw source text.
    Raw(String),
}

/// A table key. Lua data tables key on strings and integers; anything else
/// is kept raw.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Key {
    Str(String),
    Int(i64),
    Raw(String),
}

/// A table constructor parsed into its array part and its map part. Both can
/// be populated at the same time; the array preserves source order and the
/// map preserves insertion order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Table {
    pub array: Vec<Value>,
    pub map: IndexMap<Key, Value>,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Flattens to a JSON value, the catalog's native output representation.
    ///
    /// A table with only an array part becomes a JSON array, with only a map
    /// part a JSON object, and with both an object carrying the array under
    /// an `__array__` key.
    pub fn flatten(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Float(f) => json!(f),
            Value::Str(s) | Value::Raw(s) => json!(s),
            Value::Table(t) => {
                let arr: Vec<_> = t.array.iter().map(Value::flatten).collect();
                if t.map.is_empty() {
                    return serde_json::Value::Array(arr);
                }
                let mut obj = serde_json::Map::new();
                if !arr.is_empty() {
                    obj.insert("__array__".into(), serde_json::Value::Array(arr));
                }
                for (k, v) in &t.map {
                    let key = match k {
                        Key::Str(s) | Key::Raw(s) => s.clone(),
                        Key::Int(i) => i.to_string(),
                    };
                    obj.insert(key, v.flatten());
                }
                serde_json::Value::Object(obj)
            }
        }
    }
}

impl Table {
    /// Looks up a map entry by string key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(&Key::Str(key.to_owned()))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }
}

static NUM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(?:\d+\.\d*|\d*\.\d+|\d+)(?:[eE][+-]?\d+)?$").unwrap());

static IDENT_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").unwrap());

pub(crate) fn is_numeric_literal(text: &str) -> bool {
    NUM_RE.is_match(text)
}

pub(crate) fn is_ident_path(text: &str) -> bool {
    IDENT_PATH_RE.is_match(text)
}

/// Parses a numeric literal. Integral values collapse to [`Value::Int`].
pub fn parse_number(text: &str) -> Option<Value> {
    let text = text.trim();
    if !NUM_RE.is_match(text) {
        return None;
    }
    let f: f64 = text.parse().ok()?;
    Some(number_value(f))
}

pub(crate) fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < (1i64 << 53) as f64 {
        Value::Int(f as i64)
    } else {
        Value::Float(f)
    }
}

fn decode_short_string(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Parses a Lua string literal, short (`'..'`, `".."`) or long bracket
/// (`[=*[..]=*]`). Returns `None` on anything else.
pub fn parse_string(text: &str) -> Option<String> {
    let text = text.trim();
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let q = bytes[0];
        if (q == b'\'' || q == b'"') && bytes[bytes.len() - 1] == q {
            return Some(decode_short_string(&text[1..text.len() - 1]));
        }
    }
    if let Some(level) = long_bracket_level(text, 0) {
        let opener_len = 2 + level;
        let close = format!("]{}]", "=".repeat(level));
        if let Some(off) = text[opener_len..].find(&close) {
            return Some(text[opener_len..opener_len + off].to_owned());
        }
    }
    None
}

const FUNCTION_SIG_MAX: usize = 160;

/// Parses a restricted Lua expression into a [`Value`].
pub fn parse_expr(text: &str) -> Value {
    let text = text.trim();
    if text.is_empty() {
        return Value::Raw(String::new());
    }

    if text.starts_with("function") {
        // keep the signature, drop the body
        return match text.find(')') {
            Some(sig_end) if sig_end < FUNCTION_SIG_MAX => {
                Value::Raw(format!("{} ... end", &text[..=sig_end]))
            }
            _ => Value::Raw("<function>".to_owned()),
        };
    }

    match text {
        "nil" => return Value::Nil,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    if let Some(s) = parse_string(text) {
        return Value::Str(s);
    }
    if let Some(n) = parse_number(text) {
        return n;
    }

    if text.starts_with('{') {
        return match find_matching(text, 0, b'{') {
            Some(close) => Value::Table(parse_table(&text[1..close])),
            None => Value::Raw(text.to_owned()),
        };
    }

    Value::Raw(text.to_owned())
}

/// Parses the inside of a table constructor (without the outer braces).
pub fn parse_table(inner: &str) -> Table {
    let inner = strip_comments(inner);
    let mut table = Table::default();

    for item in split_top_level(&inner, b',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        if let Some((key, value)) = split_ident_entry(item) {
            table.map.insert(Key::Str(key.to_owned()), parse_expr(value));
            continue;
        }

        if let Some((key, value)) = split_bracket_entry(item) {
            table.map.insert(key, parse_expr(value));
            continue;
        }

        table.array.push(parse_expr(item));
    }

    table
}

/// Matches `ident = expr` (but not `ident == expr`).
fn split_ident_entry(item: &str) -> Option<(&str, &str)> {
    let bytes = item.as_bytes();
    if !crate::scan::is_ident_start(bytes[0]) {
        return None;
    }
    let mut i = 1;
    while i < bytes.len() && crate::scan::is_ident_char(bytes[i]) {
        i += 1;
    }
    let key = &item[..i];
    let rest = item[i..].trim_start();
    let value = rest.strip_prefix('=')?;
    if value.starts_with('=') {
        return None;
    }
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Some((key, value))
}

/// Matches `[key_expr] = expr`, where the key may be a quoted or long-bracket
/// string or an arbitrary expression. A bare long-bracket string entry like
/// `[[text]]` is not a keyed entry and falls through to the array part.
fn split_bracket_entry(item: &str) -> Option<(Key, &str)> {
    if !item.starts_with('[') {
        return None;
    }

    // `[ "key" ] = v` and `[ [=[key]=] ] = v`: a string directly inside
    let after_open = item[1..].trim_start();
    let offset = item.len() - after_open.len();
    if let Some(end) = skip_string_or_long_string(item, offset) {
        let key_text = &item[offset..end];
        let rest = item[end..].trim_start();
        if let Some(rest) = rest.strip_prefix(']') {
            let value = rest.trim_start().strip_prefix('=')?;
            if value.starts_with('=') {
                return None;
            }
            let key = match parse_string(key_text) {
                Some(s) => Key::Str(s),
                None => Key::Raw(key_text.to_owned()),
            };
            return Some((key, value.trim()));
        }
    }

    // a long-bracket string with nothing after it is an array entry
    if long_bracket_level(item, 0).is_some() {
        return None;
    }

    // `[expr] = v`
    let close = find_matching(item, 0, b'[')?;
    let value = item[close + 1..].trim_start().strip_prefix('=')?;
    if value.starts_with('=') {
        return None;
    }
    let key_text = item[1..close].trim();
    let key = match parse_expr(key_text) {
        Value::Str(s) => Key::Str(s),
        Value::Int(i) => Key::Int(i),
        _ => Key::Raw(key_text.to_owned()),
    };
    Some((key, value.trim()))
}
