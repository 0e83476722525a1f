//! Tuning constant resolver
//!
//! The tuning script is a flat namespace of numeric constants that reference
//! each other (`TUNING.SCALED = base * TUNING.FACTOR`). This resolver parses
//! the common declaration shapes, follows reference chains to a bounded
//! depth, evaluates a whitelisted arithmetic grammar, and records an
//! explainable trace for every hop so front-ends can show *why* a value is
//! what it is.
//!
//! Build once, read many: construction parses the whole source; all query
//! methods take `&self` and are safe to call concurrently.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::expr::{is_ident_path, is_numeric_literal, parse_string};
use crate::scan::{find_matching, split_top_level, strip_comments};

const RESOLVE_DEPTH: u32 = 8;
const TRACE_MAX_HOPS: usize = 16;
const EXPLAIN_MAX_HOPS: usize = 10;

/// A parsed right-hand side: a number, a boolean, or raw expression text
/// (which may be a reference to another symbol).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Binding {
    Num(f64),
    Bool(bool),
    Text(String),
}

/// One hop in a resolution trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceStep {
    pub key: String,
    pub raw: Option<Binding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TraceStep {
    fn plain(key: impl Into<String>, raw: Option<Binding>) -> Self {
        Self {
            key: key.into(),
            raw,
            value: None,
            note: None,
        }
    }
}

/// Structured trace for one tuning key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub key: String,
    pub normalized: String,
    pub value: Option<f64>,
    pub steps: Vec<TraceStep>,
    /// Single-line rendering, e.g. `SCALED -> x * TUNING.BASE -> 20`.
    pub chain: String,
}

/// Trace for an arbitrary expression containing tuning references.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExprTrace {
    pub expr: String,
    pub value: Option<f64>,
    /// The expression with every resolved reference substituted by its value.
    pub expr_resolved: String,
    pub refs: IndexMap<String, Trace>,
    /// All per-reference chains joined with `" ; "`, sorted.
    pub expr_chain: String,
}

static LOCAL_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*local\s+([A-Za-z0-9_]+)\s*=\s*(.+?)\s*$").unwrap());
static TUNING_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*TUNING\.([A-Z0-9_]+)\s*=\s*(.+?)\s*$").unwrap());
static TUNING_TABLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bTUNING\s*=\s*\{").unwrap());
static TABLE_ENTRY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*([A-Z0-9_]+)\s*=\s*(.+?)\s*(?:,|$)").unwrap());
static MATH_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^math\.([A-Za-z_][A-Za-z0-9_]*)\((.*)\)$").unwrap());
static REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"TUNING\.([A-Za-z0-9_]+)|TUNING\[\s*'([A-Za-z0-9_]+)'\s*\]|TUNING\[\s*"([A-Za-z0-9_]+)"\s*\]"#,
    )
    .unwrap()
});

/// Renders a value the way chains display it: integral floats without the
/// fractional part.
pub(crate) fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

fn ref_key<'a>(caps: &'a regex::Captures<'a>) -> &'a str {
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map_or("", |m| m.as_str())
}

/// Resolver over a tuning source. See the module docs.
#[derive(Debug, Default, Clone)]
pub struct TuningResolver {
    raw: IndexMap<String, Binding>,
    locals: IndexMap<String, Binding>,
}

impl TuningResolver {
    pub fn new(content: &str) -> Self {
        let mut this = Self::default();
        if !content.is_empty() {
            this.parse(content);
        }
        this
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.locals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Raw binding for a key, namespaced map first.
    pub fn binding(&self, key: &str) -> Option<&Binding> {
        let key = norm_key(key);
        self.raw.get(key).or_else(|| self.locals.get(key))
    }

    fn parse(&mut self, content: &str) {
        let clean = strip_comments(content);

        // locals may be lower-case; many constants hang off them
        for caps in LOCAL_LINE_RE.captures_iter(&clean) {
            let rhs = caps[2].trim().trim_end_matches(',');
            if let Some(val) = parse_rhs(rhs) {
                self.locals.insert(caps[1].to_owned(), val);
            }
        }

        for caps in TUNING_LINE_RE.captures_iter(&clean) {
            let rhs = caps[2].trim().trim_end_matches(',');
            let val = parse_rhs(rhs).unwrap_or_else(|| Binding::Text(rhs.to_owned()));
            self.raw.insert(caps[1].to_owned(), val);
        }

        // TUNING = { KEY = rhs, ... } blocks; first declaration wins
        for m in TUNING_TABLE_RE.find_iter(&clean) {
            let Some(open_idx) = clean[m.start()..].find('{').map(|o| m.start() + o) else {
                continue;
            };
            let Some(close_idx) = find_matching(&clean, open_idx, b'{') else {
                continue;
            };
            let inner = &clean[open_idx + 1..close_idx];
            for caps in TABLE_ENTRY_RE.captures_iter(inner) {
                let key = &caps[1];
                if self.raw.contains_key(key) {
                    continue;
                }
                let rhs = caps[2].trim().trim_end_matches(',');
                let val = parse_rhs(rhs).unwrap_or_else(|| Binding::Text(rhs.to_owned()));
                self.raw.insert(key.to_owned(), val);
            }
        }
    }

    /// Resolves a reference or expression to a number, if possible.
    pub fn resolve(&self, reference: &str) -> Option<f64> {
        self.resolve_at(reference, RESOLVE_DEPTH)
    }

    fn resolve_at(&self, reference: &str, depth: u32) -> Option<f64> {
        if depth == 0 {
            return None;
        }
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }

        if is_numeric_literal(reference) {
            return reference.parse().ok();
        }

        if let Some(caps) = MATH_CALL_RE.captures(reference) {
            return self.resolve_math_call(&caps[1], &caps[2], depth);
        }

        if is_ident_path(reference) {
            let key = norm_key(reference);
            let binding = self.raw.get(key).or_else(|| self.locals.get(key))?;
            return match binding {
                Binding::Num(n) => Some(*n),
                Binding::Bool(_) => None,
                Binding::Text(s) if !s.is_empty() && s != reference => {
                    self.resolve_at(s, depth - 1)
                }
                Binding::Text(_) => None,
            };
        }

        self.eval_arith(reference, depth)
    }

    fn resolve_math_call(&self, func: &str, args_raw: &str, depth: u32) -> Option<f64> {
        let mut vals = Vec::new();
        for part in split_top_level(args_raw, b',') {
            if part.is_empty() {
                continue;
            }
            vals.push(self.resolve_at(part, depth - 1)?);
        }
        match (func.to_ascii_lowercase().as_str(), vals.as_slice()) {
            ("abs", [v]) => Some(v.abs()),
            ("floor", [v]) => Some(v.floor()),
            ("ceil", [v]) => Some(v.ceil()),
            ("sqrt", [v]) => Some(v.sqrt()),
            ("max", vs) if !vs.is_empty() => vs.iter().copied().reduce(f64::max),
            ("min", vs) if !vs.is_empty() => vs.iter().copied().reduce(f64::min),
            ("pow", [a, b]) => Some(a.powf(*b)),
            _ => None,
        }
    }

    /// Arithmetic over `+ - * / ^ ** ( )`, numbers and resolvable symbols.
    fn eval_arith(&self, expr: &str, depth: u32) -> Option<f64> {
        let tokens = self.tokenize_arith(expr, depth)?;
        let mut parser = ArithParser { tokens: &tokens, pos: 0 };
        let value = parser.parse_add()?;
        if parser.pos != tokens.len() {
            return None;
        }
        value.is_finite().then_some(value)
    }

    fn tokenize_arith(&self, expr: &str, depth: u32) -> Option<Vec<ArithTok>> {
        let bytes = expr.as_bytes();
        let n = bytes.len();
        let mut out = Vec::new();
        let mut i = 0;
        while i < n {
            let b = bytes[i];
            if b.is_ascii_whitespace() {
                i += 1;
                continue;
            }
            match b {
                b'+' => out.push(ArithTok::Add),
                b'-' => out.push(ArithTok::Sub),
                b'/' => out.push(ArithTok::Div),
                b'^' => out.push(ArithTok::Pow),
                b'(' => out.push(ArithTok::Open),
                b')' => out.push(ArithTok::Close),
                b'*' => {
                    if i + 1 < n && bytes[i + 1] == b'*' {
                        out.push(ArithTok::Pow);
                        i += 1;
                    } else {
                        out.push(ArithTok::Mul);
                    }
                }
                b'0'..=b'9' | b'.' => {
                    let mut j = i;
                    while j < n && (bytes[j].is_ascii_digit() || bytes[j] == b'.') {
                        j += 1;
                    }
                    let num: f64 = expr[i..j].parse().ok()?;
                    out.push(ArithTok::Num(num));
                    i = j;
                    continue;
                }
                _ if crate::scan::is_ident_start(b) => {
                    let mut j = i + 1;
                    while j < n && (crate::scan::is_ident_char(bytes[j]) || bytes[j] == b'.') {
                        j += 1;
                    }
                    let val = self.resolve_at(&expr[i..j], depth - 1)?;
                    out.push(ArithTok::Num(val));
                    i = j;
                    continue;
                }
                _ => return None,
            }
            i += 1;
        }
        (!out.is_empty()).then_some(out)
    }

    /// Renders a `chain -> text` explanation and the resolved value.
    pub fn explain(&self, key: &str) -> (String, Option<f64>) {
        let key = norm_key(key);
        if key.is_empty() {
            return (String::new(), None);
        }

        let mut chain: Vec<String> = Vec::new();
        let mut visited: Vec<&str> = Vec::new();
        let mut cur = key;

        for _ in 0..EXPLAIN_MAX_HOPS {
            if visited.contains(&cur) {
                chain.push(format!("{cur} (loop)"));
                break;
            }
            visited.push(cur);

            let Some(binding) = self.raw.get(cur).or_else(|| self.locals.get(cur)) else {
                chain.push(cur.to_owned());
                break;
            };
            chain.push(cur.to_owned());

            match binding {
                Binding::Num(n) => {
                    chain.push(fmt_num(*n));
                    return (chain.join(" -> "), Some(*n));
                }
                Binding::Text(s) => {
                    chain.push(s.clone());
                    if is_ident_path(s) {
                        cur = norm_key(s);
                        continue;
                    }
                    if let Some(val) = self.resolve(s) {
                        chain.push(fmt_num(val));
                        return (chain.join(" -> "), Some(val));
                    }
                    break;
                }
                Binding::Bool(b) => {
                    chain.push(b.to_string());
                    break;
                }
            }
        }

        let val = self.resolve(key);
        let text = if chain.is_empty() {
            key.to_owned()
        } else {
            chain.join(" -> ")
        };
        (text, val)
    }

    /// Structured trace for a single tuning key.
    pub fn trace_key(&self, key: &str) -> Trace {
        let normalized = norm_key(key).to_owned();
        let mut steps: Vec<TraceStep> = Vec::new();
        let mut visited: Vec<String> = Vec::new();
        let mut cur = normalized.clone();

        for _ in 0..TRACE_MAX_HOPS {
            if cur.is_empty() {
                break;
            }
            if visited.contains(&cur) {
                steps.push(TraceStep {
                    key: cur.clone(),
                    raw: None,
                    value: None,
                    note: Some("loop".to_owned()),
                });
                break;
            }
            visited.push(cur.clone());

            let binding = self.raw.get(&cur).or_else(|| self.locals.get(&cur)).cloned();
            steps.push(TraceStep::plain(cur.clone(), binding.clone()));

            match binding {
                Some(Binding::Num(n)) => {
                    let chain = steps
                        .iter()
                        .map(|s| s.key.clone())
                        .chain([fmt_num(n)])
                        .collect::<Vec<_>>()
                        .join(" -> ");
                    return Trace {
                        key: key.to_owned(),
                        normalized,
                        value: Some(n),
                        steps,
                        chain,
                    };
                }
                Some(Binding::Text(s)) if is_ident_path(&s) => {
                    cur = norm_key(&s).to_owned();
                }
                Some(Binding::Text(s)) => {
                    let val = self.resolve(&s);
                    let chain = steps
                        .iter()
                        .map(|st| st.key.clone())
                        .chain([s.clone(), val.map_or_else(|| "nil".to_owned(), fmt_num)])
                        .collect::<Vec<_>>()
                        .join(" -> ");
                    steps.push(TraceStep {
                        key: "<expr>".to_owned(),
                        raw: Some(Binding::Text(s)),
                        value: val,
                        note: None,
                    });
                    return Trace {
                        key: key.to_owned(),
                        normalized,
                        value: val,
                        steps,
                        chain,
                    };
                }
                _ => break,
            }
        }

        // fall back to resolving the key itself
        let val = self.resolve(&normalized);
        let mut parts: Vec<String> = steps.iter().map(|s| s.key.clone()).collect();
        if let Some(v) = val {
            parts.push(fmt_num(v));
        }
        Trace {
            key: key.to_owned(),
            normalized,
            value: val,
            steps,
            chain: parts.join(" -> "),
        }
    }

    /// Traces every `TUNING.X` / `TUNING["X"]` reference in `expr`, resolves
    /// the expression, and renders a normalized form with resolved references
    /// substituted by their values.
    pub fn trace_expr(&self, expr: &str) -> ExprTrace {
        let expr = expr.trim();
        let mut refs: IndexMap<String, Trace> = IndexMap::new();
        for caps in REF_RE.captures_iter(expr) {
            let key = ref_key(&caps);
            if !key.is_empty() && !refs.contains_key(key) {
                refs.insert(key.to_owned(), self.trace_key(key));
            }
        }

        let value = self.resolve(expr);

        let expr_resolved = REF_RE
            .replace_all(expr, |caps: &regex::Captures| {
                let key = ref_key(caps);
                match refs.get(key).and_then(|t| t.value) {
                    Some(v) => fmt_num(v),
                    None => caps[0].to_owned(),
                }
            })
            .into_owned();

        let mut chains: Vec<&str> = refs.values().map(|t| t.chain.as_str()).collect();
        chains.sort_unstable();

        ExprTrace {
            expr: expr.to_owned(),
            value,
            expr_resolved,
            expr_chain: chains.join(" ; "),
            refs,
        }
    }

    /// Inline enrichment: rewrites `TUNING.X` as `TUNING.X (chain)` where the
    /// chain resolves.
    pub fn enrich(&self, text: &str) -> String {
        if !text.contains("TUNING") {
            return text.to_owned();
        }
        REF_RE
            .replace_all(text, |caps: &regex::Captures| {
                let key = ref_key(caps);
                let (chain, val) = self.explain(key);
                if val.is_none() {
                    format!("TUNING.{key}")
                } else {
                    format!("TUNING.{key} ({chain})")
                }
            })
            .into_owned()
    }
}

fn norm_key(reference: &str) -> &str {
    let reference = reference.trim();
    reference.strip_prefix("TUNING.").unwrap_or(reference)
}

fn parse_rhs(rhs: &str) -> Option<Binding> {
    let rhs = rhs.trim().trim_end_matches(',');
    if rhs.is_empty() || rhs == "nil" {
        return None;
    }
    match rhs {
        "true" => return Some(Binding::Bool(true)),
        "false" => return Some(Binding::Bool(false)),
        _ => {}
    }
    if let Some(s) = parse_string(rhs) {
        return Some(Binding::Text(s));
    }
    if is_numeric_literal(rhs) {
        if let Ok(n) = rhs.parse() {
            return Some(Binding::Num(n));
        }
        return None;
    }
    Some(Binding::Text(rhs.to_owned()))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ArithTok {
    Num(f64),
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Open,
    Close,
}

struct ArithParser<'t> {
    tokens: &'t [ArithTok],
    pos: usize,
}

impl ArithParser<'_> {
    fn peek(&self) -> Option<ArithTok> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<ArithTok> {
        let tok = self.peek()?;
        self.pos += 1;
        Some(tok)
    }

    fn parse_add(&mut self) -> Option<f64> {
        let mut lhs = self.parse_mul()?;
        while let Some(op @ (ArithTok::Add | ArithTok::Sub)) = self.peek() {
            self.pos += 1;
            let rhs = self.parse_mul()?;
            lhs = if op == ArithTok::Add { lhs + rhs } else { lhs - rhs };
        }
        Some(lhs)
    }

    fn parse_mul(&mut self) -> Option<f64> {
        let mut lhs = self.parse_unary()?;
        while let Some(op @ (ArithTok::Mul | ArithTok::Div)) = self.peek() {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = if op == ArithTok::Mul { lhs * rhs } else { lhs / rhs };
        }
        Some(lhs)
    }

    fn parse_unary(&mut self) -> Option<f64> {
        match self.peek() {
            Some(ArithTok::Sub) => {
                self.pos += 1;
                Some(-self.parse_unary()?)
            }
            Some(ArithTok::Add) => {
                self.pos += 1;
                self.parse_unary()
            }
            _ => self.parse_pow(),
        }
    }

    fn parse_pow(&mut self) -> Option<f64> {
        let base = self.parse_atom()?;
        if self.peek() == Some(ArithTok::Pow) {
            self.pos += 1;
            // exponentiation is right-associative and binds the exponent's sign
            let exp = self.parse_unary()?;
            return Some(base.powf(exp));
        }
        Some(base)
    }

    fn parse_atom(&mut self) -> Option<f64> {
        match self.bump()? {
            ArithTok::Num(n) => Some(n),
            ArithTok::Open => {
                let inner = self.parse_add()?;
                (self.bump()? == ArithTok::Close).then_some(inner)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn resolver() -> TuningResolver {
        TuningResolver::new(indoc! {r#"
            local x = 2
            local seg_time = 30
            TUNING.BASE = 10
            TUNING.SCALED = "x * TUNING.BASE"
            TUNING.CHAINED = TUNING.SCALED
            TUNING.TOTAL_DAY_TIME = seg_time * 16
            TUNING.HALF = TUNING.BASE / 4
            TUNING.POWERED = 2 ^ 3
            TUNING.CAPPED = math.min(TUNING.BASE, 7)
            TUNING.ROOTED = math.sqrt(16)
            TUNING.CYCLE_A = TUNING.CYCLE_B
            TUNING.CYCLE_B = TUNING.CYCLE_A
        "#})
    }

    #[test]
    fn resolves_chains_and_arith() {
        let t = resolver();
        assert_eq!(t.resolve("TUNING.BASE"), Some(10.0));
        assert_eq!(t.resolve("TUNING.SCALED"), Some(20.0));
        assert_eq!(t.resolve("TUNING.CHAINED"), Some(20.0));
        assert_eq!(t.resolve("TOTAL_DAY_TIME"), Some(480.0));
        assert_eq!(t.resolve("TUNING.HALF"), Some(2.5));
        assert_eq!(t.resolve("TUNING.POWERED"), Some(8.0));
        assert_eq!(t.resolve("TUNING.SCALED + 1"), Some(21.0));
        assert_eq!(t.resolve("TUNING.MISSING"), None);
    }

    #[test]
    fn math_whitelist() {
        let t = resolver();
        assert_eq!(t.resolve("TUNING.CAPPED"), Some(7.0));
        assert_eq!(t.resolve("TUNING.ROOTED"), Some(4.0));
        assert_eq!(t.resolve("math.floor(2.7)"), Some(2.0));
        assert_eq!(t.resolve("math.max(1, 2, 3)"), Some(3.0));
        assert_eq!(t.resolve("math.huge(1)"), None);
        // a nil argument aborts
        assert_eq!(t.resolve("math.max(1, TUNING.MISSING)"), None);
    }

    #[test]
    fn cycles_do_not_hang() {
        let t = resolver();
        assert_eq!(t.resolve("TUNING.CYCLE_A"), None);
        let trace = t.trace_key("CYCLE_A");
        assert_eq!(trace.value, None);
        assert!(trace.steps.iter().any(|s| s.note.as_deref() == Some("loop")));
    }

    #[test]
    fn trace_chain_ends_in_value() {
        let t = resolver();
        let trace = t.trace_key("SCALED");
        assert_eq!(trace.value, Some(20.0));
        assert!(trace.chain.ends_with(" -> 20"), "chain: {}", trace.chain);
    }

    #[test]
    fn trace_expr_substitutes_refs() {
        let t = resolver();
        let et = t.trace_expr("TUNING.SCALED + 1");
        assert_eq!(et.value, Some(21.0));
        assert_eq!(et.expr_resolved, "20 + 1");
        assert!(et.refs.contains_key("SCALED"));
        assert!(et.expr_chain.contains("SCALED"));
    }

    #[test]
    fn trace_expr_bracket_syntax() {
        let t = resolver();
        let et = t.trace_expr(r#"TUNING["BASE"] * 2"#);
        assert_eq!(et.value, None); // bracket refs only resolve via substitution paths
        assert!(et.refs.contains_key("BASE"));
        assert_eq!(et.expr_resolved, "10 * 2");
    }

    #[test]
    fn table_block_first_declaration_wins() {
        let t = TuningResolver::new(indoc! {r#"
            TUNING.EARLY = 1
            TUNING = {
                EARLY = 99,
                LATE = 5,
            }
        "#});
        assert_eq!(t.resolve("EARLY"), Some(1.0));
        assert_eq!(t.resolve("LATE"), Some(5.0));
    }

    #[test]
    fn enrich_annotates_resolvable_refs() {
        let t = resolver();
        let out = t.enrich("damage = TUNING.BASE");
        assert!(out.contains("TUNING.BASE (BASE -> 10)"), "got: {out}");
        assert_eq!(t.enrich("no refs here"), "no refs here");
    }

    #[test]
    fn explain_renders_chain() {
        let t = resolver();
        let (chain, val) = t.explain("CHAINED");
        assert_eq!(val, Some(20.0));
        assert!(chain.starts_with("CHAINED -> TUNING.SCALED"), "got: {chain}");
    }

    #[test]
    fn unresolvable_forms() {
        let t = resolver();
        assert_eq!(t.resolve(""), None);
        assert_eq!(t.resolve("GetPlayer():GetHealth()"), None);
        assert_eq!(t.resolve("1 / 0"), None);
    }
}
