//! Cooking rule decomposition
//!
//! A cooking recipe's match condition is a Lua boolean expression over
//! ingredient-name counts (`names.*`) and tag-weight sums (`tags.*`). This
//! module decomposes the common shapes of that expression into structured
//! constraints the cook-pot evaluator can check. Decomposition is
//! deliberately conservative: anything it cannot take apart stays attached to
//! the recipe as the verbatim expression, and the evaluator falls back to
//! card ingredients.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use strum::{Display, EnumString};

use crate::expr::is_numeric_literal;
use crate::scan::is_ident_char;

/// Comparison operators appearing in rule expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
pub enum CmpOp {
    #[serde(rename = "==")]
    #[strum(serialize = "==")]
    Eq,
    #[serde(rename = "~=")]
    #[strum(serialize = "~=")]
    Ne,
    #[serde(rename = "<")]
    #[strum(serialize = "<")]
    Lt,
    #[serde(rename = "<=")]
    #[strum(serialize = "<=")]
    Le,
    #[serde(rename = ">")]
    #[strum(serialize = ">")]
    Gt,
    #[serde(rename = ">=")]
    #[strum(serialize = ">=")]
    Ge,
}

/// A comparison right-hand side: `nil`, a number, or a bareword.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CmpValue {
    Nil,
    Num(f64),
    Text(String),
}

impl CmpValue {
    /// Numeric coercion used by the evaluator: `nil` counts as 0.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CmpValue::Nil => Some(0.0),
            CmpValue::Num(n) => Some(*n),
            CmpValue::Text(s) => s.parse().ok(),
        }
    }
}

/// `tags.KEY <op> value` or `names.KEY <op> value`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CmpConstraint {
    pub key: String,
    pub op: CmpOp,
    pub value: CmpValue,
    pub text: String,
}

/// "At least one of these ids present."
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamesAny {
    pub keys: Vec<String>,
    pub text: String,
}

/// "Counts of these ids sum to at least `min`."
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamesSum {
    pub keys: Vec<String>,
    pub min: i64,
    pub text: String,
}

/// Structured best-effort decomposition of a test-return expression.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleConstraints {
    pub tags: Vec<CmpConstraint>,
    pub names: Vec<CmpConstraint>,
    pub names_any: Vec<NamesAny>,
    pub names_sum: Vec<NamesSum>,
    pub unparsed: Vec<String>,
}

/// A recipe rule: the normalized source expression plus its decomposition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
    pub kind: &'static str,
    pub expr: String,
    pub constraints: RuleConstraints,
}

impl Rule {
    pub fn test_return(expr: String) -> Self {
        let constraints = decompose(&expr);
        Self {
            kind: "test_return",
            expr,
            constraints,
        }
    }
}

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static PAREN_GROUP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(([^()]+)\)").unwrap());
static NAMES_OR_BODY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*names\.[A-Za-z0-9_]+(?:\s+or\s+names\.[A-Za-z0-9_]+)+\s*$").unwrap()
});
static NAMES_OR_INLINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bnames\.[A-Za-z0-9_]+\b(?:\s+or\s+names\.[A-Za-z0-9_]+\b)+").unwrap()
});
static NAME_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bnames\.([A-Za-z0-9_]+)\b").unwrap());
static PAIR_SUM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\(+\s*names\.([A-Za-z0-9_]+)\s+and\s+names\.([A-Za-z0-9_]+)\s*(?:>=|>)\s*[0-9]+\s*\)+\s+or\s+\(+\s*names\.([A-Za-z0-9_]+)\s+and\s+names\.([A-Za-z0-9_]+)\s*(?:>=|>)\s*[0-9]+\s*\)+\s+or\s+\(+\s*names\.([A-Za-z0-9_]+)\s+and\s+names\.([A-Za-z0-9_]+)\s*\)+",
    )
    .unwrap()
});
static PLUS_SUM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\(?\s*\(?\s*names\.([A-Za-z0-9_]+)\s*(?:or\s*0)?\s*\)?\s*\+\s*\(?\s*names\.([A-Za-z0-9_]+)\s*(?:or\s*0)?\s*\)?\s*\)?\s*(>=|>)\s*([0-9]+)",
    )
    .unwrap()
});
static CMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(tags|names)\.([A-Za-z0-9_]+)\s*(==|~=|<=|>=|<|>)\s*([^\s\)\]]+)").unwrap()
});
static PRESENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(tags|names)\.([A-Za-z0-9_]+)\b").unwrap());
static NOT_PRESENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bnot\s+(tags|names)\.([A-Za-z0-9_]+)\b").unwrap());

/// True when the text before `at` ends with the keyword `not`.
fn preceded_by_not(e: &str, at: usize) -> bool {
    let prefix = e[..at].trim_end();
    if !prefix.ends_with("not") {
        return false;
    }
    let before = prefix.len() - 3;
    before == 0 || !is_ident_char(prefix.as_bytes()[before - 1])
}

fn span_contained(span: (usize, usize), spans: &[(usize, usize)]) -> bool {
    spans.iter().any(|s| span.0 >= s.0 && span.1 <= s.1)
}

/// Decomposes a single-line test-return expression into [`RuleConstraints`].
pub fn decompose(expr: &str) -> RuleConstraints {
    let mut out = RuleConstraints::default();
    let expr = expr.trim();
    if expr.is_empty() {
        return out;
    }
    let e = WS_RE.replace_all(expr, " ").into_owned();

    let mut seen: HashSet<(String, String, String, String)> = HashSet::new();
    let mut sum_seen: HashSet<(String, String, i64)> = HashSet::new();
    let mut or_names: HashSet<String> = HashSet::new();
    let mut or_spans: Vec<(usize, usize)> = Vec::new();

    let mut add_cmp = |bucket: &mut Vec<CmpConstraint>,
                       seen: &mut HashSet<(String, String, String, String)>,
                       scope: &str,
                       key: &str,
                       op: CmpOp,
                       value: CmpValue,
                       text: String| {
        let value_repr = match &value {
            CmpValue::Nil => "nil".to_owned(),
            CmpValue::Num(n) => crate::tuning::fmt_num(*n),
            CmpValue::Text(s) => s.clone(),
        };
        if seen.insert((scope.to_owned(), key.to_owned(), op.to_string(), value_repr)) {
            bucket.push(CmpConstraint {
                key: key.to_owned(),
                op,
                value,
                text,
            });
        }
    };

    let mut add_sum = |out: &mut RuleConstraints,
                       sum_seen: &mut HashSet<(String, String, i64)>,
                       a: &str,
                       b: &str,
                       min: i64,
                       text: &str| {
        let (a, b) = (a.trim(), b.trim());
        if a.is_empty() || b.is_empty() || a == b {
            return;
        }
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        if sum_seen.insert((lo.to_owned(), hi.to_owned(), min)) {
            out.names_sum.push(NamesSum {
                keys: vec![lo.to_owned(), hi.to_owned()],
                min,
                text: text.to_owned(),
            });
        }
    };

    // parenthesized OR groups: (names.a or names.b [or ...])
    for m in PAREN_GROUP_RE.captures_iter(&e) {
        let whole = m.get(0).expect("group 0");
        let body = &m[1];
        if !NAMES_OR_BODY_RE.is_match(body) {
            continue;
        }
        let keys: Vec<String> = NAME_KEY_RE
            .captures_iter(body)
            .map(|c| c[1].to_owned())
            .collect();
        if keys.len() < 2 {
            continue;
        }
        if preceded_by_not(&e, whole.start()) {
            for key in &keys {
                add_cmp(
                    &mut out.names,
                    &mut seen,
                    "names",
                    key,
                    CmpOp::Eq,
                    CmpValue::Num(0.0),
                    format!("not names.{key}"),
                );
            }
        } else {
            out.names_any.push(NamesAny {
                keys: keys.clone(),
                text: body.trim().to_owned(),
            });
        }
        or_names.extend(keys);
        or_spans.push((whole.start(), whole.end()));
    }

    // bare OR chains outside any consumed group
    for m in NAMES_OR_INLINE_RE.find_iter(&e) {
        if span_contained((m.start(), m.end()), &or_spans) {
            continue;
        }
        if preceded_by_not(&e, m.start()) {
            continue;
        }
        let keys: Vec<String> = NAME_KEY_RE
            .captures_iter(m.as_str())
            .map(|c| c[1].to_owned())
            .collect();
        if keys.len() < 2 {
            continue;
        }
        or_names.extend(keys.iter().cloned());
        or_spans.push((m.start(), m.end()));
        out.names_any.push(NamesAny {
            keys,
            text: m.as_str().trim().to_owned(),
        });
    }

    // ((names.a and names.a >= 2) or (names.b and names.b >= 2) or (names.a and names.b))
    for m in PAIR_SUM_RE.captures_iter(&e) {
        let (a1, a2, b1, b2, x, y) = (&m[1], &m[2], &m[3], &m[4], &m[5], &m[6]);
        if a1 != a2 || b1 != b2 {
            continue;
        }
        let pair_matches = (x == a1 && y == b1) || (x == b1 && y == a1);
        if !pair_matches {
            continue;
        }
        add_sum(&mut out, &mut sum_seen, a1, b1, 2, m[0].trim());
    }

    // (names.a or 0) + (names.b or 0) >= N
    for m in PLUS_SUM_RE.captures_iter(&e) {
        let (a, b, op, n) = (&m[1], &m[2], &m[3], &m[4]);
        let Ok(mut min) = n.parse::<i64>() else {
            continue;
        };
        if op == ">" {
            min += 1;
        }
        add_sum(&mut out, &mut sum_seen, a, b, min, m[0].trim());
    }

    // comparisons: tags.X <op> rhs / names.X <op> rhs
    for m in CMP_RE.captures_iter(&e) {
        let scope = &m[1];
        let key = &m[2];
        let Ok(op) = m[3].parse::<CmpOp>() else {
            continue;
        };
        let rhs = m[4].trim_end_matches(',');
        let value = if rhs == "nil" {
            CmpValue::Nil
        } else if is_numeric_literal(rhs) {
            rhs.parse().map_or_else(|_| CmpValue::Text(rhs.to_owned()), CmpValue::Num)
        } else {
            CmpValue::Text(rhs.to_owned())
        };
        let text = m[0].to_owned();
        let bucket = if scope == "tags" { &mut out.tags } else { &mut out.names };
        add_cmp(bucket, &mut seen, scope, key, op, value, text);
    }

    // plain presence: tags.X / names.X with no comparator following
    for m in PRESENCE_RE.captures_iter(&e) {
        let whole = m.get(0).expect("group 0");
        let after = e[whole.end()..].trim_start();
        if after.starts_with("==")
            || after.starts_with("~=")
            || after.starts_with("<")
            || after.starts_with(">")
        {
            continue;
        }
        if preceded_by_not(&e, whole.start()) {
            continue;
        }
        let scope = &m[1];
        let key = &m[2];
        let text = whole.as_str().to_owned();
        let bucket = if scope == "tags" { &mut out.tags } else { &mut out.names };
        add_cmp(bucket, &mut seen, scope, key, CmpOp::Gt, CmpValue::Num(0.0), text);
    }

    // negated presence: not tags.X / not names.X
    for m in NOT_PRESENCE_RE.captures_iter(&e) {
        let scope = &m[1];
        let key = &m[2];
        let text = m[0].to_owned();
        let bucket = if scope == "tags" { &mut out.tags } else { &mut out.names };
        add_cmp(bucket, &mut seen, scope, key, CmpOp::Eq, CmpValue::Num(0.0), text);
    }

    // positive name requirements already covered by an OR group are noise
    let sum_keys: HashSet<&str> = out
        .names_sum
        .iter()
        .flat_map(|g| g.keys.iter().map(String::as_str))
        .collect();
    out.names.retain(|c| {
        let rhs = c.value.as_f64();
        let covered_by_any = or_names.contains(&c.key)
            && matches!(c.op, CmpOp::Gt | CmpOp::Ge)
            && rhs.map_or(true, |v| v <= 0.0);
        let positive = match c.op {
            CmpOp::Gt | CmpOp::Ge => rhs.map_or(true, |v| v >= 0.0),
            CmpOp::Eq => rhs.map_or(false, |v| v > 0.0),
            _ => false,
        };
        let covered_by_sum = sum_keys.contains(c.key.as_str()) && positive;
        !(covered_by_any || covered_by_sum)
    });

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(group: &NamesAny) -> Vec<&str> {
        group.keys.iter().map(String::as_str).collect()
    }

    #[test]
    fn mixed_rule() {
        let c = decompose(
            "(names.meat or names.monstermeat) and tags.veggie >= 0.5 and not names.inedible",
        );
        assert_eq!(c.names_any.len(), 1);
        assert_eq!(keys(&c.names_any[0]), ["meat", "monstermeat"]);
        assert_eq!(c.tags.len(), 1);
        assert_eq!(c.tags[0].key, "veggie");
        assert_eq!(c.tags[0].op, CmpOp::Ge);
        assert_eq!(c.tags[0].value, CmpValue::Num(0.5));
        assert_eq!(c.names.len(), 1);
        assert_eq!(c.names[0].key, "inedible");
        assert_eq!(c.names[0].op, CmpOp::Eq);
        assert_eq!(c.names[0].value, CmpValue::Num(0.0));
    }

    #[test]
    fn negated_or_group_means_absence() {
        let c = decompose("not (names.twigs or names.ice)");
        assert!(c.names_any.is_empty());
        assert_eq!(c.names.len(), 2);
        assert!(c.names.iter().all(|n| n.op == CmpOp::Eq));
    }

    #[test]
    fn inline_or_chain() {
        let c = decompose("names.froglegs or names.drumstick or names.batwing");
        assert_eq!(c.names_any.len(), 1);
        assert_eq!(keys(&c.names_any[0]), ["froglegs", "drumstick", "batwing"]);
        // presence constraints for the chained names are suppressed
        assert!(c.names.is_empty());
    }

    #[test]
    fn pair_sum_idiom() {
        let c = decompose(
            "((names.fish and names.fish >= 2) or (names.eel and names.eel >= 2) or (names.fish and names.eel)) and tags.veggie",
        );
        assert_eq!(c.names_sum.len(), 1);
        assert_eq!(c.names_sum[0].keys, ["eel", "fish"]);
        assert_eq!(c.names_sum[0].min, 2);
        // fish/eel comparisons folded into the sum
        assert!(c.names.is_empty());
        assert_eq!(c.tags.len(), 1);
    }

    #[test]
    fn plus_sum_idiom() {
        let c = decompose("(names.meat or 0) + (names.fish or 0) >= 3");
        assert_eq!(c.names_sum.len(), 1);
        assert_eq!(c.names_sum[0].keys, ["fish", "meat"]);
        assert_eq!(c.names_sum[0].min, 3);
        let c = decompose("(names.meat or 0) + (names.fish or 0) > 1");
        assert_eq!(c.names_sum[0].min, 2);
    }

    #[test]
    fn nil_comparison() {
        let c = decompose("tags.monster == nil");
        assert_eq!(c.tags[0].value, CmpValue::Nil);
        assert_eq!(c.tags[0].value.as_f64(), Some(0.0));
    }

    #[test]
    fn deduplicates_repeats() {
        let c = decompose("tags.meat >= 1 and tags.meat >= 1");
        assert_eq!(c.tags.len(), 1);
    }

    #[test]
    fn idempotent_over_fragments() {
        let exprs = [
            "(names.meat or names.monstermeat) and tags.veggie >= 0.5 and not names.inedible",
            "((names.fish and names.fish >= 2) or (names.eel and names.eel >= 2) or (names.fish and names.eel))",
            "(names.meat or 0) + (names.fish or 0) >= 3",
            "tags.sweetener and not tags.meat and names.honey == 2",
        ];
        for expr in exprs {
            let first = decompose(expr);
            let mut fragments: Vec<&str> = Vec::new();
            fragments.extend(first.tags.iter().map(|c| c.text.as_str()));
            fragments.extend(first.names.iter().map(|c| c.text.as_str()));
            fragments.extend(first.names_any.iter().map(|g| g.text.as_str()));
            fragments.extend(first.names_sum.iter().map(|g| g.text.as_str()));
            let second = decompose(&fragments.join(" and "));
            assert_eq!(first.tags, second.tags, "tags differ for {expr}");
            assert_eq!(first.names, second.names, "names differ for {expr}");
            assert_eq!(first.names_sum, second.names_sum, "sums differ for {expr}");
            let first_any: Vec<_> = first.names_any.iter().map(|g| g.keys.clone()).collect();
            let second_any: Vec<_> = second.names_any.iter().map(|g| g.keys.clone()).collect();
            assert_eq!(first_any, second_any, "any-groups differ for {expr}");
        }
    }
}
