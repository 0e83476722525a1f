//! Cooking recipe extraction
//!
//! Cook-pot recipes live in a `local foods = { name = { ... }, ... }` table.
//! The named sub-tables are walked with bracket-matched scanning (a recipe
//! body routinely contains nested functions and tables that defeat any
//! line-based approach). Each body yields stable stat fields, an optional
//! card ingredient list, and an optional match rule captured from the
//! `test = function(...) return <expr> end` closure.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::expr::{parse_table, Table, Value};
use crate::scan::{
    find_matching, is_ident_char, is_ident_start, skip_comment, skip_string_or_long_string,
    strip_comments, Block, BlockStack,
};

use super::rule::Rule;

/// A recipe stat that is either already numeric or still an expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    Num(f64),
    Text(String),
}

impl StatValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StatValue::Num(n) => Some(*n),
            StatValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            StatValue::Text(s) => Some(s),
            StatValue::Num(_) => None,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(StatValue::Num(*i as f64)),
            Value::Float(f) => Some(StatValue::Num(*f)),
            Value::Str(s) | Value::Raw(s) => Some(StatValue::Text(s.clone())),
            Value::Bool(b) => Some(StatValue::Num(if *b { 1.0 } else { 0.0 })),
            _ => None,
        }
    }
}

/// One cook-pot recipe as declared in the foods table.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct CookingRecipe {
    pub name: String,
    pub priority: f64,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foodtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hunger: Option<StatValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<StatValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanity: Option<StatValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perishtime: Option<StatValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooktime: Option<StatValue>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
    /// Fixed `(item, count)` fallback list, non-positive counts dropped.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub card_ingredients: Vec<(String, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<Rule>,
}

const DEFAULT_WEIGHT: f64 = 1.0;

static FOODS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*(?:local\s+)?foods\s*=\s*\{").unwrap());
static TEST_FN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\btest\s*=\s*function\b").unwrap());
static RETURN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\breturn\b\s*(.*?)\bend\b").unwrap());
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Parses every recipe in a prepared-foods source.
#[tracing::instrument(level = "debug", skip_all, fields(len = content.len()))]
pub fn parse_cooking_recipes(content: &str) -> IndexMap<String, CookingRecipe> {
    let mut out = IndexMap::new();
    let Some(m) = FOODS_RE.find(content) else {
        return out;
    };
    let Some(open_idx) = content[m.start()..].find('{').map(|o| m.start() + o) else {
        return out;
    };
    let Some(close_idx) = find_matching(content, open_idx, b'{') else {
        return out;
    };
    let inner = &content[open_idx + 1..close_idx];

    for (name, body) in iter_named_table_blocks(inner) {
        let recipe = parse_recipe_body(name, body);
        out.insert(name.to_owned(), recipe);
    }
    out
}

fn parse_recipe_body(name: &str, body: &str) -> CookingRecipe {
    let table = parse_table(body);
    let mut recipe = CookingRecipe {
        name: name.to_owned(),
        priority: table.get_f64("priority").unwrap_or(0.0),
        weight: table.get_f64("weight").unwrap_or(DEFAULT_WEIGHT),
        foodtype: table.get("foodtype").and_then(|v| match v {
            Value::Str(s) | Value::Raw(s) => Some(s.clone()),
            _ => None,
        }),
        hunger: table.get("hunger").and_then(StatValue::from_value),
        health: table.get("health").and_then(StatValue::from_value),
        sanity: table.get("sanity").and_then(StatValue::from_value),
        perishtime: table.get("perishtime").and_then(StatValue::from_value),
        cooktime: table.get("cooktime").and_then(StatValue::from_value),
        ..CookingRecipe::default()
    };

    if let Some(tags) = table.get("tags").and_then(Value::as_table) {
        recipe.tags = tags
            .array
            .iter()
            .filter_map(Value::as_str)
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
    }

    recipe.card_ingredients = card_ingredients(&table);

    if let Some(expr) = extract_test_return_expr(body) {
        recipe.rule = Some(Rule::test_return(expr));
    }

    recipe
}

fn card_ingredients(table: &Table) -> Vec<(String, f64)> {
    let Some(rows) = table
        .get("card_def")
        .and_then(Value::as_table)
        .and_then(|card| card.get("ingredients"))
        .and_then(Value::as_table)
    else {
        return Vec::new();
    };
    rows.array
        .iter()
        .filter_map(Value::as_table)
        .filter_map(|row| {
            let item = row.array.first()?.as_str()?;
            let count = row.array.get(1)?.as_f64()?;
            (count > 0.0).then(|| (item.to_owned(), count))
        })
        .collect()
}

/// Iterates top-level `name = { ... }` blocks inside a table body (without
/// its outer braces), skipping strings/comments and nested braces.
pub(crate) fn iter_named_table_blocks(text: &str) -> Vec<(&str, &str)> {
    let bytes = text.as_bytes();
    let n = bytes.len();
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;

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
            b'{' => {
                depth += 1;
                i += 1;
                continue;
            }
            b'}' => {
                depth = depth.saturating_sub(1);
                i += 1;
                continue;
            }
            _ => {}
        }

        if depth == 0 {
            if b.is_ascii_whitespace() || b == b',' {
                i += 1;
                continue;
            }
            if is_ident_start(b) {
                let mut j = i + 1;
                while j < n && is_ident_char(bytes[j]) {
                    j += 1;
                }
                let name = &text[i..j];

                let mut k = j;
                while k < n && bytes[k].is_ascii_whitespace() {
                    k += 1;
                }
                if k < n && bytes[k] == b'=' {
                    k += 1;
                    while k < n && bytes[k].is_ascii_whitespace() {
                        k += 1;
                    }
                    if k < n && bytes[k] == b'{' {
                        match find_matching(text, k, b'{') {
                            Some(close) => {
                                out.push((name, &text[k + 1..close]));
                                i = close + 1;
                                continue;
                            }
                            None => {
                                i = j;
                                continue;
                            }
                        }
                    }
                }
                i = j;
                continue;
            }
        }

        i += 1;
    }

    out
}

/// Returns the index just past the `end` that closes the `function` keyword
/// starting at `fn_start`.
pub(crate) fn find_function_end(text: &str, fn_start: usize) -> Option<usize> {
    if !text[fn_start..].starts_with("function") {
        return None;
    }
    let bytes = text.as_bytes();
    let n = bytes.len();
    let mut blocks = BlockStack::default();
    blocks.push(Block::Function);
    let mut i = fn_start + "function".len();

    while i < n && !blocks.is_empty() {
        if text[i..].starts_with("--") {
            i = skip_comment(text, i);
            continue;
        }
        if let Some(j) = skip_string_or_long_string(text, i) {
            i = j;
            continue;
        }

        if is_ident_start(bytes[i]) {
            let mut j = i + 1;
            while j < n && is_ident_char(bytes[j]) {
                j += 1;
            }
            if blocks.feed(&text[i..j]) {
                return Some(j);
            }
            i = j;
            continue;
        }

        i += 1;
    }

    None
}

/// Captures the boolean return expression of `test = function(...) ... end`,
/// whitespace-normalized to a single line.
pub(crate) fn extract_test_return_expr(body: &str) -> Option<String> {
    let m = TEST_FN_RE.find(body)?;
    let fn_start = m.end() - "function".len();
    let fn_end = find_function_end(body, fn_start)?;

    let clean = strip_comments(&body[fn_start..fn_end]);
    let caps = RETURN_RE.captures(&clean)?;
    let expr = WS_RE.replace_all(caps[1].trim(), " ").into_owned();
    (!expr.is_empty()).then_some(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::rule::CmpOp;
    use indoc::indoc;

    const FOODS: &str = indoc! {r#"
        local cooking = require("cooking")

        local foods = {
            meatballs = {
                test = function(cooker, names, tags)
                    return tags.meat and not tags.inedible
                end,
                priority = -1,
                foodtype = FOODTYPE.MEAT,
                health = TUNING.HEALING_SMALL,
                hunger = TUNING.CALORIES_SMALL * 5/2,
                perishtime = TUNING.PERISH_MED,
                sanity = 0,
                cooktime = 0.25,
                tags = { "masterfood" },
            },

            honeynuggets = {
                test = function(cooker, names, tags)
                    return names.honey and tags.meat and tags.meat <= 1.5
                end,
                priority = 2,
                weight = 1,
                hunger = 37.5,
                cooktime = 2,
                card_def = {
                    ingredients = { { "honey", 1 }, { "smallmeat", 1 }, { "twigs", 2 } },
                },
            },

            wetgoop = {
                test = function(cooker, names, tags) return true end,
                priority = -2,
                hunger = 10,
                cooktime = 0.25,
            },
        }
    "#};

    #[test]
    fn walks_named_blocks() {
        let recipes = parse_cooking_recipes(FOODS);
        assert_eq!(
            recipes.keys().collect::<Vec<_>>(),
            ["meatballs", "honeynuggets", "wetgoop"]
        );
    }

    #[test]
    fn stable_fields() {
        let recipes = parse_cooking_recipes(FOODS);
        let mb = &recipes["meatballs"];
        assert_eq!(mb.priority, -1.0);
        assert_eq!(mb.weight, 1.0);
        assert_eq!(mb.foodtype.as_deref(), Some("FOODTYPE.MEAT"));
        assert_eq!(mb.sanity, Some(StatValue::Num(0.0)));
        assert_eq!(mb.cooktime, Some(StatValue::Num(0.25)));
        assert_eq!(
            mb.health,
            Some(StatValue::Text("TUNING.HEALING_SMALL".into()))
        );
        assert_eq!(
            mb.hunger,
            Some(StatValue::Text("TUNING.CALORIES_SMALL * 5/2".into()))
        );
        assert_eq!(mb.tags, ["masterfood"]);
    }

    #[test]
    fn card_ingredients_reified() {
        let recipes = parse_cooking_recipes(FOODS);
        let hn = &recipes["honeynuggets"];
        assert_eq!(
            hn.card_ingredients,
            [
                ("honey".to_owned(), 1.0),
                ("smallmeat".to_owned(), 1.0),
                ("twigs".to_owned(), 2.0)
            ]
        );
    }

    #[test]
    fn rule_captured_and_decomposed() {
        let recipes = parse_cooking_recipes(FOODS);
        let rule = recipes["meatballs"].rule.as_ref().unwrap();
        assert_eq!(rule.expr, "tags.meat and not tags.inedible");
        let tags = &rule.constraints.tags;
        assert!(tags.iter().any(|c| c.key == "meat" && c.op == CmpOp::Gt));
        assert!(tags.iter().any(|c| c.key == "inedible" && c.op == CmpOp::Eq));
    }

    #[test]
    fn function_end_handles_nested_blocks() {
        let src = "function(a) if a then for i=1,2 do x() end end return a end tail";
        let end = find_function_end(src, 0).unwrap();
        assert_eq!(&src[end..], " tail");
    }

    #[test]
    fn test_expr_normalized_to_one_line() {
        let body = indoc! {r#"
            test = function(cooker, names, tags)
                return tags.fruit >= 3
                    and not tags.meat
            end,
            priority = 1,
        "#};
        let expr = extract_test_return_expr(body).unwrap();
        assert_eq!(expr, "tags.fruit >= 3 and not tags.meat");
    }

    #[test]
    fn card_drops_non_positive_counts() {
        let src = indoc! {r#"
            local foods = {
                thing = {
                    card_def = { ingredients = { { "a", 1 }, { "b", 0 }, { "c", -2 } } },
                },
            }
        "#};
        let recipes = parse_cooking_recipes(src);
        assert_eq!(recipes["thing"].card_ingredients, [("a".to_owned(), 1.0)]);
    }

    #[test]
    fn missing_foods_table_yields_empty() {
        assert!(parse_cooking_recipes("local x = 1").is_empty());
    }
}
