//! Cooking ingredient extraction
//!
//! An ingredient contributes weighted tags to the cook-pot (`meat = 1`,
//! `veggie = 0.5`). Definitions come either from a declared ingredients
//! table or from `AddIngredientValues(names, tags, cancook, candry)` calls,
//! whose cooked/dried variants are derived here. Aliases copy the target's
//! tag map.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::calls::{CallFilter, CallScanner};
use crate::expr::{parse_expr, Key, Table, Value};
use crate::scan::find_matching;

use super::clean_id;

/// One cooking ingredient and its tag contributions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CookingIngredient {
    pub id: String,
    /// tag -> numeric weight
    #[serde(skip_serializing_if = "IndexMap::is_empty", default)]
    pub tags: IndexMap<String, f64>,
    /// tags whose value is not numeric, kept as text
    #[serde(skip_serializing_if = "IndexMap::is_empty", default)]
    pub tags_expr: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefab: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atlas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foodtype: Option<String>,
    /// Source file paths this ingredient was observed in.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub sources: Vec<String>,
}

impl CookingIngredient {
    fn has_content(&self) -> bool {
        !self.tags.is_empty()
            || !self.tags_expr.is_empty()
            || self.prefab.is_some()
            || self.atlas.is_some()
            || self.image.is_some()
            || self.foodtype.is_some()
    }
}

static INGREDIENT_TABLE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?m)^\s*local\s+ingredients\s*=\s*\{",
        r"(?m)^\s*ingredients\s*=\s*\{",
        r"(?m)^\s*INGREDIENTS\s*=\s*\{",
        r"\bcooking\.ingredients\s*=\s*\{",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static COOKING_TABLE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(?m)^\s*local\s+cooking\s*=\s*\{", r"(?m)^\s*cooking\s*=\s*\{"]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

fn extract_table_at(content: &str, re: &Regex) -> Option<Table> {
    let m = re.find(content)?;
    let open_idx = m.start() + content[m.start()..].find('{')?;
    let close_idx = find_matching(content, open_idx, b'{')?;
    Some(crate::expr::parse_table(&content[open_idx + 1..close_idx]))
}

fn find_ingredients_table(content: &str) -> Option<Table> {
    for re in INGREDIENT_TABLE_RES.iter() {
        if let Some(t) = extract_table_at(content, re) {
            return Some(t);
        }
    }
    for re in COOKING_TABLE_RES.iter() {
        if let Some(t) = extract_table_at(content, re) {
            if let Some(Value::Table(ing)) = t.get("ingredients") {
                return Some(ing.clone());
            }
        }
    }
    None
}

fn find_named_table(content: &str, name: &str) -> Option<Table> {
    let escaped = regex::escape(name);
    for pattern in [
        format!(r"(?m)^\s*local\s+{escaped}\s*=\s*\{{"),
        format!(r"(?m)^\s*{escaped}\s*=\s*\{{"),
    ] {
        let re = Regex::new(&pattern).ok()?;
        if let Some(t) = extract_table_at(content, &re) {
            return Some(t);
        }
    }
    None
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Str(s) | Value::Raw(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Nil => "nil".to_owned(),
        Value::Table(_) => value.flatten().to_string(),
    }
}

fn coerce_tag_value(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Str(s) if crate::expr::is_numeric_literal(s.trim()) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Splits a tag table into numeric weights and textual leftovers. Bare array
/// entries count as weight 1.
pub(crate) fn parse_tag_table(tags: &Table) -> (IndexMap<String, f64>, IndexMap<String, String>) {
    let mut numeric = IndexMap::new();
    let mut textual = IndexMap::new();

    for (key, value) in &tags.map {
        let Key::Str(k) = key else { continue };
        let k = k.trim().to_ascii_lowercase();
        if k.is_empty() {
            continue;
        }
        match coerce_tag_value(value) {
            Some(num) => {
                numeric.insert(k, num);
            }
            None => {
                textual.insert(k, value_text(value));
            }
        }
    }

    for entry in &tags.array {
        let Some(k) = entry.as_str() else { continue };
        let k = k.trim().to_ascii_lowercase();
        if k.is_empty() || numeric.contains_key(&k) || textual.contains_key(&k) {
            continue;
        }
        numeric.insert(k, 1.0);
    }

    (numeric, textual)
}

/// Extracts all cooking ingredients from one source file.
#[tracing::instrument(level = "debug", skip_all, fields(source = source))]
pub fn parse_cooking_ingredients(
    content: &str,
    source: &str,
) -> IndexMap<String, CookingIngredient> {
    let mut out = IndexMap::new();

    match find_ingredients_table(content) {
        Some(table) if !table.map.is_empty() || !table.array.is_empty() => {
            for (key, value) in &table.map {
                let Key::Str(raw_id) = key else { continue };
                let Some(id) = clean_id(raw_id) else { continue };
                let mut ing = CookingIngredient {
                    id: id.clone(),
                    ..CookingIngredient::default()
                };
                if let Some(body) = value.as_table() {
                    if let Some(tags) = body.get("tags").and_then(Value::as_table) {
                        (ing.tags, ing.tags_expr) = parse_tag_table(tags);
                    }
                    ing.prefab = body.get_str("prefab").map(str::to_owned);
                    ing.atlas = body.get_str("atlas").map(str::to_owned);
                    ing.image = body.get_str("image").map(str::to_owned);
                    ing.foodtype = body.get("foodtype").map(value_text);
                }
                if ing.has_content() {
                    if !source.is_empty() {
                        ing.sources.push(source.to_owned());
                    }
                    out.insert(id, ing);
                }
            }
        }
        _ => parse_add_ingredient_values(content, source, &mut out),
    }

    apply_aliases(content, source, &mut out);
    out
}

fn parse_add_ingredient_values(
    content: &str,
    source: &str,
    out: &mut IndexMap<String, CookingIngredient>,
) {
    let scanner = CallScanner::new(content);
    let filter = CallFilter {
        member_calls: false,
        ..CallFilter::default()
    };

    let mut set_entry = |out: &mut IndexMap<String, CookingIngredient>,
                         id: String,
                         tags: IndexMap<String, f64>,
                         tags_expr: IndexMap<String, String>| {
        let mut ing = CookingIngredient {
            id: id.clone(),
            tags,
            tags_expr,
            ..CookingIngredient::default()
        };
        if !ing.has_content() {
            return;
        }
        if !source.is_empty() {
            ing.sources.push(source.to_owned());
        }
        out.insert(id, ing);
    };

    for call in scanner.iter_calls(&["AddIngredientValues"], filter) {
        if call.arg_list.len() < 2 {
            continue;
        }
        let names = resolve_names(content, &call.arg_list[0]);
        if names.is_empty() {
            continue;
        }
        let (tags, tags_expr) = match parse_expr(&call.arg_list[1]) {
            Value::Table(t) => parse_tag_table(&t),
            _ => Default::default(),
        };
        let cancook = arg_bool(call.arg_list.get(2));
        let candry = arg_bool(call.arg_list.get(3));

        for name in names {
            let Some(id) = clean_id(&name) else { continue };
            set_entry(out, id.clone(), tags.clone(), tags_expr.clone());

            if cancook {
                let mut cooked = tags.clone();
                cooked.insert("precook".to_owned(), 1.0);
                set_entry(out, format!("{id}_cooked"), cooked, tags_expr.clone());
            }
            if candry {
                let mut dried = tags.clone();
                dried.insert("dried".to_owned(), 1.0);
                set_entry(out, format!("{id}_dried"), dried, tags_expr.clone());
            }
        }
    }
}

/// The names argument of `AddIngredientValues` is a literal array, a single
/// string, or a reference to a named table earlier in the same file.
fn resolve_names(content: &str, expr: &str) -> Vec<String> {
    match parse_expr(expr) {
        Value::Table(t) => t.array.iter().filter_map(Value::as_str).map(str::to_owned).collect(),
        Value::Str(s) => vec![s],
        Value::Raw(reference) => {
            let reference = reference.trim();
            if reference.is_empty() {
                return Vec::new();
            }
            find_named_table(content, reference)
                .map(|t| {
                    t.array
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

fn arg_bool(arg: Option<&String>) -> bool {
    let Some(arg) = arg else { return false };
    match parse_expr(arg) {
        Value::Bool(b) => b,
        Value::Int(i) => i != 0,
        Value::Float(f) => f != 0.0,
        Value::Raw(raw) => raw.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn apply_aliases(content: &str, source: &str, out: &mut IndexMap<String, CookingIngredient>) {
    let Some(aliases) = find_named_table(content, "aliases") else {
        return;
    };
    for (key, value) in &aliases.map {
        let Key::Str(alias_raw) = key else { continue };
        let Some(alias) = clean_id(alias_raw) else { continue };
        let Some(target) = value.as_str().and_then(clean_id) else {
            continue;
        };
        if out.contains_key(&alias) {
            continue;
        }
        let Some(src) = out.get(&target) else { continue };
        let mut ing = CookingIngredient {
            id: alias.clone(),
            tags: src.tags.clone(),
            tags_expr: src.tags_expr.clone(),
            foodtype: src.foodtype.clone(),
            sources: src.sources.clone(),
            ..CookingIngredient::default()
        };
        if !source.is_empty() && ing.sources.is_empty() {
            ing.sources.push(source.to_owned());
        }
        if ing.has_content() {
            out.insert(alias, ing);
        }
    }
}

/// Merges ingredient maps from several files. Existing tag weights win;
/// zero-weight entries may be upgraded; sources union.
pub fn merge_ingredients(
    base: &mut IndexMap<String, CookingIngredient>,
    extra: IndexMap<String, CookingIngredient>,
) {
    for (id, row) in extra {
        let Some(cur) = base.get_mut(&id) else {
            base.insert(id, row);
            continue;
        };
        for src in row.sources {
            if !cur.sources.contains(&src) {
                cur.sources.push(src);
            }
        }
        for (tag, val) in row.tags {
            let existing = cur.tags.get(&tag).copied();
            if existing.is_none() || existing == Some(0.0) {
                cur.tags.insert(tag, val);
            }
        }
        for (tag, val) in row.tags_expr {
            cur.tags_expr.entry(tag).or_insert(val);
        }
        cur.prefab = cur.prefab.take().or(row.prefab);
        cur.atlas = cur.atlas.take().or(row.atlas);
        cur.image = cur.image.take().or(row.image);
        cur.foodtype = cur.foodtype.take().or(row.foodtype);
    }
}
