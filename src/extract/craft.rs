//! Craft recipe extraction
//!
//! Crafting recipes are declared through `Recipe(...)`, `Recipe2(...)` and
//! `AddRecipe2(...)` with positional parameters that changed across game
//! versions. Extraction therefore keys on shape, not position: the first
//! string argument is the name, an array-of-tables argument is the
//! ingredient list, `RECIPETABS.*` / `TECH.*` barewords carry tab and tech,
//! and a trailing map table carries the named config fields.

use indexmap::IndexMap;
use serde::Serialize;

use crate::calls::CallScanner;
use crate::expr::{parse_expr, parse_string, Table, Value};
use crate::report::BuildReport;
use crate::scan::find_matching;
use crate::tuning::TuningResolver;

use super::clean_id;

/// One craft ingredient with its resolved amount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CraftIngredient {
    pub item: String,
    /// Amount expression exactly as written.
    pub amount_raw: String,
    /// Amount when the expression is numeric or resolves through tuning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_num: Option<f64>,
    /// Final amount used by queries; mirrors `amount_num`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_value: Option<f64>,
}

/// One crafting recipe.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CraftRecipe {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tech: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub filters: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub builder_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub builder_skill: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station_tag: Option<String>,
    pub ingredients: Vec<CraftIngredient>,
    /// Ingredient rows whose item or amount could not be resolved, verbatim.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ingredients_unresolved: Vec<String>,
}

/// A crafting-menu filter definition row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atlas: Option<String>,
}

/// All craft recipes plus filter metadata, with query helpers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CraftIndex {
    pub recipes: IndexMap<String, CraftRecipe>,
    /// product id -> recipe name, for the entries where they differ
    pub aliases: IndexMap<String, String>,
    pub filter_defs: Vec<FilterDef>,
    pub filter_order: Vec<String>,
}

impl CraftIndex {
    pub fn get(&self, name: &str) -> Option<&CraftRecipe> {
        self.recipes
            .get(name)
            .or_else(|| self.aliases.get(name).and_then(|n| self.recipes.get(n)))
    }

    pub fn list_by_tab(&self, tab: &str) -> Vec<&str> {
        self.recipes
            .values()
            .filter(|r| r.tab.as_deref().is_some_and(|t| t.eq_ignore_ascii_case(tab)))
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn list_by_filter(&self, filter: &str) -> Vec<&str> {
        self.recipes
            .values()
            .filter(|r| r.filters.iter().any(|f| f.eq_ignore_ascii_case(filter)))
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn list_by_ingredient(&self, item: &str) -> Vec<&str> {
        self.recipes
            .values()
            .filter(|r| r.ingredients.iter().any(|i| i.item == item))
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn list_by_product(&self, product: &str) -> Vec<&str> {
        self.recipes
            .values()
            .filter(|r| r.product.as_deref() == Some(product))
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Recipes fully covered by `inventory` (item -> count on hand).
    pub fn craftable(&self, inventory: &IndexMap<String, f64>) -> Vec<&str> {
        self.recipes
            .values()
            .filter(|r| !r.ingredients.is_empty() && self.missing_for(r, inventory).is_empty())
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Ingredients of `recipe` not covered by `inventory`.
    pub fn missing_for<'r>(
        &self,
        recipe: &'r CraftRecipe,
        inventory: &IndexMap<String, f64>,
    ) -> Vec<&'r CraftIngredient> {
        recipe
            .ingredients
            .iter()
            .filter(|ing| {
                let need = ing.amount_value.or(ing.amount_num).unwrap_or(1.0);
                inventory.get(&ing.item).copied().unwrap_or(0.0) + 1e-9 < need
            })
            .collect()
    }
}

const RECIPE_CALLS: &[&str] = &["Recipe", "Recipe2", "AddRecipe2"];

/// Extracts all recipe declarations from one source file into `index`.
#[tracing::instrument(level = "debug", skip_all, fields(path = path))]
pub fn parse_craft_recipes(
    content: &str,
    path: &str,
    tuning: &TuningResolver,
    index: &mut CraftIndex,
    report: &mut BuildReport,
) {
    let scanner = CallScanner::new(content);

    for call in scanner.calls(RECIPE_CALLS) {
        let Some(name) = call
            .arg_list
            .first()
            .and_then(|a| parse_string(a))
            .as_deref()
            .and_then(clean_id)
        else {
            report.skip(path, "craft_recipe", "first argument is not a recipe name");
            continue;
        };

        let mut recipe = CraftRecipe {
            name: name.clone(),
            ..CraftRecipe::default()
        };

        for arg in call.arg_list.iter().skip(1) {
            match parse_expr(arg) {
                Value::Table(table) => {
                    if is_ingredient_list(&table) {
                        parse_ingredient_rows(&table, tuning, &mut recipe);
                    } else if !table.map.is_empty() {
                        apply_config(&table, &mut recipe);
                    }
                }
                Value::Raw(raw) => {
                    if let Some(tab) = raw.strip_prefix("RECIPETABS.") {
                        recipe.tab = Some(tab.to_owned());
                    } else if let Some(tech) = raw.strip_prefix("TECH.") {
                        recipe.tech = Some(tech.to_owned());
                    }
                }
                _ => {}
            }
        }

        if recipe.product.is_none() {
            recipe.product = Some(name.clone());
        }
        if let Some(product) = recipe.product.clone() {
            if product != name {
                index.aliases.insert(product, name.clone());
            }
        }
        index.recipes.insert(name, recipe);
    }

    for call in scanner.calls(&["AddRecipeToFilter"]) {
        if call.arg_list.len() < 2 {
            continue;
        }
        let Some(name) = call
            .arg_list
            .first()
            .and_then(|a| parse_string(a))
            .as_deref()
            .and_then(clean_id)
        else {
            continue;
        };
        let Some(filter) = filter_label(&call.arg_list[1]) else {
            continue;
        };
        if let Some(recipe) = index.recipes.get_mut(&name) {
            if !recipe.filters.contains(&filter) {
                recipe.filters.push(filter);
            }
        }
    }
}

/// Extracts `AddRecipeFilter({ name = ..., image = ..., atlas = ... })` rows
/// and their declaration order.
pub fn parse_filter_defs(content: &str, index: &mut CraftIndex) {
    let scanner = CallScanner::new(content);
    for call in scanner.calls(&["AddRecipeFilter"]) {
        let Some(arg) = call.arg_list.first() else {
            continue;
        };
        let Value::Table(table) = parse_expr(arg) else {
            continue;
        };
        let Some(name) = table.get("name").and_then(filter_label_value) else {
            continue;
        };
        if !index.filter_order.contains(&name) {
            index.filter_order.push(name.clone());
        }
        index.filter_defs.push(FilterDef {
            name,
            image: table.get_str("image").map(str::to_owned),
            atlas: table.get_str("atlas").map(str::to_owned),
        });
    }
}

fn filter_label(arg: &str) -> Option<String> {
    filter_label_value(&parse_expr(arg))
}

/// Filter labels appear both quoted and as `CRAFTING_FILTERS.X` barewords.
fn filter_label_value(value: &Value) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.clone()),
        Value::Raw(raw) => {
            let raw = raw.trim();
            let label = raw
                .strip_prefix("CRAFTING_FILTERS.")
                .unwrap_or(raw)
                .rsplit('.')
                .next()
                .unwrap_or(raw);
            (!label.is_empty()).then(|| label.to_owned())
        }
        _ => None,
    }
}

/// An ingredient list is an array of `{"item", amount}` tables or
/// `Ingredient("item", amount)` calls.
fn is_ingredient_list(table: &Table) -> bool {
    !table.array.is_empty()
        && table.array.iter().all(|v| match v {
            Value::Table(row) => !row.array.is_empty(),
            Value::Raw(raw) => raw.trim_start().starts_with("Ingredient"),
            _ => false,
        })
}

fn parse_ingredient_rows(table: &Table, tuning: &TuningResolver, recipe: &mut CraftRecipe) {
    for row in &table.array {
        match row {
            Value::Table(cells) => {
                let item = cells.array.first().and_then(Value::as_str);
                let amount_raw = cells.array.get(1);
                push_ingredient(recipe, tuning, item, amount_raw, || {
                    row.flatten().to_string()
                });
            }
            Value::Raw(raw) => {
                let Some((item_arg, amount_arg)) = split_ingredient_call(raw) else {
                    recipe.ingredients_unresolved.push(raw.trim().to_owned());
                    continue;
                };
                let item = parse_string(&item_arg);
                let amount = parse_expr(&amount_arg);
                push_ingredient(
                    recipe,
                    tuning,
                    item.as_deref(),
                    Some(&amount),
                    || raw.trim().to_owned(),
                );
            }
            _ => {}
        }
    }
}

fn push_ingredient(
    recipe: &mut CraftRecipe,
    tuning: &TuningResolver,
    item: Option<&str>,
    amount: Option<&Value>,
    raw_row: impl FnOnce() -> String,
) {
    let Some(item) = item.and_then(clean_id) else {
        recipe.ingredients_unresolved.push(raw_row());
        return;
    };

    let (amount_raw, amount_num) = match amount {
        None => (String::new(), Some(1.0)),
        Some(value) => {
            let raw = match value {
                Value::Raw(s) | Value::Str(s) => s.clone(),
                Value::Int(i) => i.to_string(),
                Value::Float(f) => f.to_string(),
                other => format!("{other:?}"),
            };
            match value.as_f64() {
                Some(n) => (raw, Some(n)),
                None => {
                    // symbolic amounts resolve through tuning or stay opaque
                    let resolved = tuning.resolve(&raw);
                    if resolved.is_none() {
                        recipe.ingredients_unresolved.push(format!("{item} x {raw}"));
                        return;
                    }
                    (raw, resolved)
                }
            }
        }
    };

    recipe.ingredients.push(CraftIngredient {
        item,
        amount_raw,
        amount_num,
        amount_value: amount_num,
    });
}

/// Splits an `Ingredient("item", amount, ...)` row into its first two
/// argument texts.
fn split_ingredient_call(raw: &str) -> Option<(String, String)> {
    let raw = raw.trim();
    let rest = raw.strip_prefix("Ingredient")?;
    let open = raw.len() - rest.len() + rest.find('(')?;
    if !rest.trim_start().starts_with('(') {
        return None;
    }
    let close = find_matching(raw, open, b'(')?;
    let args = crate::scan::split_top_level(&raw[open + 1..close], b',');
    let item = args.first()?.to_string();
    let amount = args.get(1)?.to_string();
    Some((item, amount))
}

fn apply_config(table: &Table, recipe: &mut CraftRecipe) {
    if let Some(product) = table.get_str("product").and_then(clean_id) {
        recipe.product = Some(product);
    }
    if let Some(tag) = table.get_str("builder_tag") {
        let tag = tag.trim().to_ascii_lowercase();
        if !tag.is_empty() && !recipe.builder_tags.contains(&tag) {
            recipe.builder_tags.push(tag);
        }
    }
    if let Some(skill) = table.get_str("builder_skill") {
        recipe.builder_skill = Some(skill.trim().to_ascii_lowercase());
    }
    if let Some(station) = table.get_str("station_tag") {
        recipe.station_tag = Some(station.trim().to_ascii_lowercase());
    }
    if let Some(Value::Table(filters)) = table.get("filters") {
        for entry in &filters.array {
            if let Some(label) = filter_label_value(entry) {
                if !recipe.filters.contains(&label) {
                    recipe.filters.push(label);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn parse(content: &str, tuning: &TuningResolver) -> CraftIndex {
        let mut index = CraftIndex::default();
        let mut report = BuildReport::default();
        parse_craft_recipes(content, "scripts/recipes.lua", tuning, &mut index, &mut report);
        index
    }

    #[test]
    fn recipe2_with_table_rows() {
        let tuning = TuningResolver::default();
        let index = parse(
            indoc! {r#"
                Recipe2("spear", { {"twigs", 2}, {"flint", 1}, {"rope", 1} }, TECH.NONE,
                    { product = "spear", filters = { "WEAPONS" } })
            "#},
            &tuning,
        );
        let spear = &index.recipes["spear"];
        assert_eq!(spear.ingredients.len(), 3);
        assert_eq!(spear.ingredients[0].item, "twigs");
        assert_eq!(spear.ingredients[0].amount_num, Some(2.0));
        assert_eq!(spear.tech.as_deref(), Some("NONE"));
        assert_eq!(spear.filters, ["WEAPONS"]);
        assert_eq!(spear.product.as_deref(), Some("spear"));
    }

    #[test]
    fn ingredient_call_rows_and_tuning_amounts() {
        let tuning = TuningResolver::new("TUNING.ROPE_COST = 2");
        let index = parse(
            r#"AddRecipe2("raft", { Ingredient("boards", 4), Ingredient("rope", TUNING.ROPE_COST) }, TECH.SEAFARING_ONE)"#,
            &tuning,
        );
        let raft = &index.recipes["raft"];
        assert_eq!(raft.ingredients.len(), 2);
        assert_eq!(raft.ingredients[1].item, "rope");
        assert_eq!(raft.ingredients[1].amount_raw, "TUNING.ROPE_COST");
        assert_eq!(raft.ingredients[1].amount_value, Some(2.0));
    }

    #[test]
    fn symbolic_amounts_go_unresolved() {
        let tuning = TuningResolver::default();
        let index = parse(
            r#"Recipe2("lifeamulet", { Ingredient("goldnugget", 3), Ingredient("healthitem", CHARACTER_INGREDIENT.HEALTH) }, TECH.MAGIC_TWO)"#,
            &tuning,
        );
        let recipe = &index.recipes["lifeamulet"];
        assert_eq!(recipe.ingredients.len(), 1);
        assert_eq!(
            recipe.ingredients_unresolved,
            ["healthitem x CHARACTER_INGREDIENT.HEALTH"]
        );
    }

    #[test]
    fn legacy_recipe_with_tab() {
        let tuning = TuningResolver::default();
        let index = parse(
            r#"Recipe("axe", { {"twigs", 1}, {"flint", 1} }, RECIPETABS.TOOLS, TECH.NONE)"#,
            &tuning,
        );
        let axe = &index.recipes["axe"];
        assert_eq!(axe.tab.as_deref(), Some("TOOLS"));
        assert_eq!(index.list_by_tab("tools"), ["axe"]);
        assert_eq!(index.list_by_ingredient("flint"), ["axe"]);
    }

    #[test]
    fn config_fields() {
        let tuning = TuningResolver::default();
        let index = parse(
            indoc! {r#"
                AddRecipe2("abigail_flower", { {"petals", 6} }, TECH.NONE,
                    { builder_tag = "ghostlyfriend", builder_skill = "wendy_petals", station_tag = "shadowcrafter" })
            "#},
            &tuning,
        );
        let recipe = &index.recipes["abigail_flower"];
        assert_eq!(recipe.builder_tags, ["ghostlyfriend"]);
        assert_eq!(recipe.builder_skill.as_deref(), Some("wendy_petals"));
        assert_eq!(recipe.station_tag.as_deref(), Some("shadowcrafter"));
    }

    #[test]
    fn filter_defs_and_order() {
        let mut index = CraftIndex::default();
        parse_filter_defs(
            indoc! {r#"
                AddRecipeFilter({ name = "TOOLS", image = "filter_tools.tex", atlas = "images/hud2.xml" })
                AddRecipeFilter({ name = "WEAPONS", image = "filter_weapons.tex" })
            "#},
            &mut index,
        );
        assert_eq!(index.filter_order, ["TOOLS", "WEAPONS"]);
        assert_eq!(index.filter_defs[0].image.as_deref(), Some("filter_tools.tex"));
        assert_eq!(index.filter_defs[1].atlas, None);
    }

    #[test]
    fn add_recipe_to_filter() {
        let tuning = TuningResolver::default();
        let index = parse(
            indoc! {r#"
                Recipe2("axe", { {"twigs", 1} }, TECH.NONE)
                AddRecipeToFilter("axe", CRAFTING_FILTERS.TOOLS)
            "#},
            &tuning,
        );
        assert_eq!(index.recipes["axe"].filters, ["TOOLS"]);
        assert_eq!(index.list_by_filter("TOOLS"), ["axe"]);
    }

    #[test]
    fn craftable_query() {
        let tuning = TuningResolver::default();
        let index = parse(
            r#"Recipe2("torch", { {"cutgrass", 2}, {"twigs", 2} }, TECH.NONE)"#,
            &tuning,
        );
        let mut inv = IndexMap::new();
        inv.insert("cutgrass".to_owned(), 2.0);
        inv.insert("twigs".to_owned(), 3.0);
        assert_eq!(index.craftable(&inv), ["torch"]);
        inv.insert("twigs".to_owned(), 1.0);
        assert!(index.craftable(&inv).is_empty());
        let missing = index.missing_for(&index.recipes["torch"], &inv);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].item, "twigs");
    }
}
