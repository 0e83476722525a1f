//! Cook-pot constraint evaluator
//!
//! Two pure operations over the cooking-recipe catalog:
//!
//! - [`simulate`]: exactly four slotted ingredients in, the recipe the pot
//!   would produce out, with scored candidates and ranked near-misses.
//! - [`explore`]: up to four slotted ingredients plus an optional pantry;
//!   answers "what could this still become".
//!
//! Both take the catalog read-only and hold no state, so a server can call
//! them concurrently. Scoring is `priority * 1000 + weight * 100 - penalty`,
//! where the penalty counts missing pieces (a missing named ingredient costs
//! five times a missing tag unit) and is therefore zero for every passing
//! recipe: the penalty ranks near-misses, it never promotes a failing recipe
//! over a passing one.

mod near_miss;

pub use near_miss::{NearMiss, Tier, TierGroup};

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

use crate::extract::cooking::{CookingRecipe, StatValue};
use crate::extract::ingredient::CookingIngredient;
use crate::extract::rule::{CmpOp, RuleConstraints};

use near_miss::collect_pool;

pub const TAG_PENALTY: f64 = 10.0;
pub const NAME_PENALTY: f64 = 50.0;
/// Above this many pantry extensions, [`explore`] switches from exhaustive
/// enumeration to single-snapshot feasibility.
pub const MAX_AVAILABLE_COMBOS: u64 = 15_000;
pub const SCORE_FORMULA: &str = "score = priority*1000 + weight*100 - missing_penalty";

const EPS: f64 = 1e-9;
const RETURN_TOP: usize = 25;
const FALLBACK_RECIPE: &str = "wetgoop";

/// Structured solver failures.
#[derive(Debug, Clone, Error, Serialize)]
pub enum SolverError {
    #[error("cookpot requires exactly 4 items, got {total}")]
    BadArity {
        total: i64,
        slots: IndexMap<String, i64>,
    },
    #[error("cookpot holds at most 4 items, got {total}")]
    TooManyItems {
        total: i64,
        slots: IndexMap<String, i64>,
    },
    #[error("no recipe matched and no wetgoop fallback exists")]
    NoMatchAndNoFallback,
}

impl SolverError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            SolverError::BadArity { .. } => "cookpot_requires_4_items",
            SolverError::TooManyItems { .. } => "cookpot_requires_max_4_items",
            SolverError::NoMatchAndNoFallback => "no_match_and_no_wetgoop",
        }
    }
}

/// Tag lookup built from the cooking-ingredient catalog.
#[derive(Debug, Default, Clone)]
pub struct IngredientIndex {
    pub(crate) tags_by_item: IndexMap<String, IndexMap<String, f64>>,
    pub(crate) max_by_tag: IndexMap<String, f64>,
}

impl IngredientIndex {
    /// Builds the index; `extra_items` (slot/pantry ids) are registered even
    /// when the catalog does not know them, so they still count by name.
    pub fn build<'a>(
        ingredients: &IndexMap<String, CookingIngredient>,
        extra_items: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut index = Self::default();
        for (id, row) in ingredients {
            let id = id.trim().to_ascii_lowercase();
            if id.is_empty() || row.tags.is_empty() {
                continue;
            }
            let entry = index.tags_by_item.entry(id).or_default();
            for (tag, weight) in &row.tags {
                let tag = tag.trim().to_ascii_lowercase();
                if tag.is_empty() {
                    continue;
                }
                entry.insert(tag.clone(), *weight);
                let max = index.max_by_tag.entry(tag).or_insert(*weight);
                if *weight > *max {
                    *max = *weight;
                }
            }
        }
        for item in extra_items {
            let id = item.trim().to_ascii_lowercase();
            if !id.is_empty() {
                index.tags_by_item.entry(id).or_default();
            }
        }
        index
    }

    pub fn tags_of(&self, item: &str) -> Option<&IndexMap<String, f64>> {
        self.tags_by_item.get(item)
    }
}

/// What a missing piece is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKind {
    Tag,
    Name,
    NameAny,
    NameSum,
}

/// One unmet requirement of a recipe against the current slots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Missing {
    #[serde(rename = "type")]
    pub kind: MissingKind,
    pub key: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub options: Vec<String>,
    pub op: String,
    pub required: f64,
    pub actual: f64,
    pub delta: f64,
    pub direction: &'static str,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub text: String,
}

/// One requirement with its pass/fail state, for UI display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: MissingKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub options: Vec<String>,
    pub op: String,
    pub required: f64,
    pub actual: f64,
    pub ok: bool,
}

/// What the recipe was evaluated against: its decomposed rule, its card
/// ingredient list, or nothing evaluable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMode {
    Rule,
    Card,
    None,
}

/// Display attributes carried along with evaluation rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecipeAttrs {
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
}

/// Full evaluation of one recipe against one slot configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalRow {
    pub name: String,
    pub priority: f64,
    pub weight: f64,
    pub score: f64,
    pub penalty: f64,
    pub missing: Vec<Missing>,
    pub rule_mode: RuleMode,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
    pub req_names: Vec<String>,
    pub req_name_groups: Vec<Vec<String>>,
    pub req_tags: Vec<String>,
    pub attrs: RecipeAttrs,
    pub conditions: Vec<Condition>,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimCandidate {
    pub name: String,
    pub priority: f64,
    pub weight: f64,
}

/// Result of [`simulate`].
#[derive(Debug, Clone, Serialize)]
pub struct SimulateReport {
    pub result: String,
    pub reason: &'static str,
    pub candidates: Vec<SimCandidate>,
    pub cookable: Vec<EvalRow>,
    pub near_miss: Vec<NearMiss>,
    pub near_miss_tiers: Vec<TierGroup>,
    pub slots: IndexMap<String, i64>,
    pub formula: &'static str,
}

/// Result of [`explore`].
#[derive(Debug, Clone, Serialize)]
pub struct ExploreReport {
    pub slots: IndexMap<String, i64>,
    pub total: i64,
    pub remaining: i64,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub available: Vec<String>,
    pub cookable: Vec<EvalRow>,
    pub near_miss: Vec<NearMiss>,
    pub near_miss_tiers: Vec<TierGroup>,
    pub formula: &'static str,
}

/// Normalizes a slot map: lowercased keys, positive integer counts.
pub fn normalize_slots(slots: &IndexMap<String, f64>) -> IndexMap<String, i64> {
    let mut out: IndexMap<String, i64> = IndexMap::new();
    for (key, value) in slots {
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() || !value.is_finite() {
            continue;
        }
        let count = value.round() as i64;
        if count <= 0 {
            continue;
        }
        *out.entry(key).or_insert(0) += count;
    }
    out
}

fn normalize_available(items: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for item in items {
        let id = item.trim().to_ascii_lowercase();
        if !id.is_empty() && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

fn sum_tags(slots: &IndexMap<String, i64>, index: &IngredientIndex) -> IndexMap<String, f64> {
    let mut totals: IndexMap<String, f64> = IndexMap::new();
    for (item, count) in slots {
        let Some(tags) = index.tags_by_item.get(item) else {
            continue;
        };
        for (tag, weight) in tags {
            *totals.entry(tag.clone()).or_insert(0.0) += weight * (*count as f64);
        }
    }
    totals
}

fn sum_names(slots: &IndexMap<String, i64>) -> IndexMap<String, i64> {
    slots.clone()
}

fn compare(lhs: f64, op: CmpOp, rhs: f64) -> bool {
    match op {
        CmpOp::Eq => (lhs - rhs).abs() <= EPS,
        CmpOp::Ne => (lhs - rhs).abs() > EPS,
        CmpOp::Gt => lhs > rhs + EPS,
        CmpOp::Ge => lhs + EPS >= rhs,
        CmpOp::Lt => lhs + EPS < rhs,
        CmpOp::Le => lhs <= rhs + EPS,
    }
}

fn constraint_delta(lhs: f64, op: CmpOp, rhs: f64) -> (f64, &'static str) {
    match op {
        CmpOp::Gt | CmpOp::Ge => ((rhs - lhs).max(0.0), "under"),
        CmpOp::Lt | CmpOp::Le => ((lhs - rhs).max(0.0), "over"),
        CmpOp::Eq => ((lhs - rhs).abs(), "mismatch"),
        CmpOp::Ne => {
            if (lhs - rhs).abs() > EPS {
                (0.0, "equal")
            } else {
                (1.0, "equal")
            }
        }
    }
}

fn is_positive_requirement(op: CmpOp, rhs: Option<f64>) -> bool {
    let Some(rhs) = rhs else { return false };
    match op {
        CmpOp::Gt | CmpOp::Ge => rhs >= 0.0,
        CmpOp::Eq => rhs > 0.0,
        _ => false,
    }
}

/// The evaluable constraints of a recipe, after dropping contradictions a
/// best-effort decomposition can leave behind. `None` only when the recipe
/// has no rule at all (the caller then falls back to card ingredients). A
/// rule whose expression decomposed to zero constraints still dispatches to
/// rule mode and evaluates vacuously true.
fn effective_constraints(recipe: &CookingRecipe) -> Option<RuleConstraints> {
    let rule = recipe.rule.as_ref()?;
    let mut cons = rule.constraints.clone();

    // a negated tag wins over a stray positive presence of the same tag
    let not_keys: BTreeSet<String> = cons
        .tags
        .iter()
        .filter(|c| c.text.trim().to_ascii_lowercase().starts_with("not "))
        .map(|c| c.key.clone())
        .collect();
    if !not_keys.is_empty() {
        cons.tags.retain(|c| {
            let negated_text = c.text.trim().to_ascii_lowercase().starts_with("not ");
            !(not_keys.contains(c.key.as_str())
                && !negated_text
                && matches!(c.op, CmpOp::Gt | CmpOp::Ge))
        });
    }

    let sum_keys: BTreeSet<&str> = cons
        .names_sum
        .iter()
        .flat_map(|g| g.keys.iter().map(String::as_str))
        .collect();
    if !sum_keys.is_empty() {
        let retained: Vec<_> = cons
            .names
            .iter()
            .filter(|c| {
                !(sum_keys.contains(c.key.as_str())
                    && is_positive_requirement(c.op, c.value.as_f64()))
            })
            .cloned()
            .collect();
        cons.names = retained;
    }

    Some(cons)
}

struct Requirements {
    names: Vec<String>,
    groups: Vec<Vec<String>>,
    tags: Vec<String>,
}

fn extract_requirements(recipe: &CookingRecipe) -> Requirements {
    let mut names: BTreeSet<String> = BTreeSet::new();
    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut tags: BTreeSet<String> = BTreeSet::new();

    for (item, need) in &recipe.card_ingredients {
        if *need > 0.0 && !item.is_empty() {
            names.insert(item.clone());
        }
    }

    if let Some(cons) = effective_constraints(recipe) {
        for c in &cons.names {
            if is_positive_requirement(c.op, c.value.as_f64()) {
                names.insert(c.key.clone());
            }
        }
        for g in &cons.names_any {
            if !g.keys.is_empty() {
                groups.push(g.keys.clone());
            }
        }
        for g in &cons.names_sum {
            if !g.keys.is_empty() {
                groups.push(g.keys.clone());
            }
        }
        for c in &cons.tags {
            if is_positive_requirement(c.op, c.value.as_f64()) {
                tags.insert(c.key.clone());
            }
        }
    }

    Requirements {
        names: names.into_iter().collect(),
        groups,
        tags: tags.into_iter().collect(),
    }
}

fn evaluate_constraints(
    cons: &RuleConstraints,
    tags_total: &IndexMap<String, f64>,
    names_total: &IndexMap<String, i64>,
) -> (bool, Vec<Missing>, Vec<String>) {
    let mut missing = Vec::new();
    let mut warnings = Vec::new();

    for g in &cons.names_any {
        if g.keys.is_empty() {
            warnings.push(g.text.clone());
            continue;
        }
        if g.keys.iter().any(|k| names_total.get(k).copied().unwrap_or(0) > 0) {
            continue;
        }
        missing.push(Missing {
            kind: MissingKind::NameAny,
            key: g.keys.join("|"),
            options: g.keys.clone(),
            op: ">".to_owned(),
            required: 1.0,
            actual: 0.0,
            delta: 1.0,
            direction: "under",
            text: g.text.clone(),
        });
    }

    for g in &cons.names_sum {
        if g.keys.is_empty() {
            warnings.push(g.text.clone());
            continue;
        }
        let total: i64 = g.keys.iter().map(|k| names_total.get(k).copied().unwrap_or(0)).sum();
        let total = total as f64;
        let min = g.min as f64;
        if total + EPS < min {
            missing.push(Missing {
                kind: MissingKind::NameSum,
                key: g.keys.join("|"),
                options: g.keys.clone(),
                op: ">=".to_owned(),
                required: min,
                actual: total,
                delta: min - total,
                direction: "under",
                text: g.text.clone(),
            });
        }
    }

    for c in &cons.tags {
        let Some(rhs) = c.value.as_f64() else {
            warnings.push(c.text.clone());
            continue;
        };
        let lhs = tags_total.get(&c.key).copied().unwrap_or(0.0);
        if !compare(lhs, c.op, rhs) {
            let (delta, direction) = constraint_delta(lhs, c.op, rhs);
            missing.push(Missing {
                kind: MissingKind::Tag,
                key: c.key.clone(),
                options: Vec::new(),
                op: c.op.to_string(),
                required: rhs,
                actual: lhs,
                delta,
                direction,
                text: c.text.clone(),
            });
        }
    }

    for c in &cons.names {
        let Some(rhs) = c.value.as_f64() else {
            warnings.push(c.text.clone());
            continue;
        };
        let lhs = names_total.get(&c.key).copied().unwrap_or(0) as f64;
        if !compare(lhs, c.op, rhs) {
            let (delta, direction) = constraint_delta(lhs, c.op, rhs);
            missing.push(Missing {
                kind: MissingKind::Name,
                key: c.key.clone(),
                options: Vec::new(),
                op: c.op.to_string(),
                required: rhs,
                actual: lhs,
                delta,
                direction,
                text: c.text.clone(),
            });
        }
    }

    (missing.is_empty(), missing, warnings)
}

fn build_conditions(
    recipe: &CookingRecipe,
    cons: Option<&RuleConstraints>,
    tags_total: &IndexMap<String, f64>,
    names_total: &IndexMap<String, i64>,
) -> Vec<Condition> {
    let mut out = Vec::new();

    if let Some(cons) = cons {
        for g in &cons.names_any {
            if g.keys.is_empty() {
                continue;
            }
            let ok = g.keys.iter().any(|k| names_total.get(k).copied().unwrap_or(0) > 0);
            out.push(Condition {
                kind: MissingKind::NameAny,
                key: None,
                options: g.keys.clone(),
                op: "any".to_owned(),
                required: 1.0,
                actual: if ok { 1.0 } else { 0.0 },
                ok,
            });
        }
        for g in &cons.names_sum {
            if g.keys.is_empty() {
                continue;
            }
            let total: i64 = g.keys.iter().map(|k| names_total.get(k).copied().unwrap_or(0)).sum();
            let ok = total as f64 + EPS >= g.min as f64;
            out.push(Condition {
                kind: MissingKind::NameSum,
                key: None,
                options: g.keys.clone(),
                op: ">=".to_owned(),
                required: g.min as f64,
                actual: total as f64,
                ok,
            });
        }
        for c in &cons.names {
            let Some(rhs) = c.value.as_f64() else { continue };
            let actual = names_total.get(&c.key).copied().unwrap_or(0) as f64;
            out.push(Condition {
                kind: MissingKind::Name,
                key: Some(c.key.clone()),
                options: Vec::new(),
                op: c.op.to_string(),
                required: rhs,
                actual,
                ok: compare(actual, c.op, rhs),
            });
        }
        for c in &cons.tags {
            let Some(rhs) = c.value.as_f64() else { continue };
            let actual = tags_total.get(&c.key).copied().unwrap_or(0.0);
            out.push(Condition {
                kind: MissingKind::Tag,
                key: Some(c.key.clone()),
                options: Vec::new(),
                op: c.op.to_string(),
                required: rhs,
                actual,
                ok: compare(actual, c.op, rhs),
            });
        }
        return out;
    }

    for (item, need) in &recipe.card_ingredients {
        let actual = names_total.get(item).copied().unwrap_or(0) as f64;
        out.push(Condition {
            kind: MissingKind::Name,
            key: Some(item.clone()),
            options: Vec::new(),
            op: ">=".to_owned(),
            required: *need,
            actual,
            ok: actual + EPS >= *need,
        });
    }
    out
}

struct Evaluation {
    ok: bool,
    missing: Vec<Missing>,
    warnings: Vec<String>,
    tags_total: IndexMap<String, f64>,
    names_total: IndexMap<String, i64>,
    rule_mode: RuleMode,
}

fn evaluate_recipe(
    recipe: &CookingRecipe,
    slots: &IndexMap<String, i64>,
    index: &IngredientIndex,
) -> Evaluation {
    if let Some(cons) = effective_constraints(recipe) {
        let tags_total = sum_tags(slots, index);
        let names_total = sum_names(slots);
        let (ok, missing, warnings) = evaluate_constraints(&cons, &tags_total, &names_total);
        return Evaluation {
            ok,
            missing,
            warnings,
            tags_total,
            names_total,
            rule_mode: RuleMode::Rule,
        };
    }

    if !recipe.card_ingredients.is_empty() {
        let names_total = sum_names(slots);
        let mut missing = Vec::new();
        for (item, need) in &recipe.card_ingredients {
            let have = names_total.get(item).copied().unwrap_or(0) as f64;
            if have + EPS < *need {
                missing.push(Missing {
                    kind: MissingKind::Name,
                    key: item.clone(),
                    options: Vec::new(),
                    op: ">=".to_owned(),
                    required: *need,
                    actual: have,
                    delta: need - have,
                    direction: "under",
                    text: String::new(),
                });
            }
        }
        return Evaluation {
            ok: missing.is_empty(),
            missing,
            warnings: Vec::new(),
            tags_total: IndexMap::new(),
            names_total,
            rule_mode: RuleMode::Card,
        };
    }

    Evaluation {
        ok: false,
        missing: Vec::new(),
        warnings: vec!["no_rule_or_card_ingredients".to_owned()],
        tags_total: IndexMap::new(),
        names_total: sum_names(slots),
        rule_mode: RuleMode::None,
    }
}

fn score_recipe(priority: f64, weight: f64, missing: &[Missing]) -> (f64, f64) {
    let mut penalty = 0.0;
    for m in missing {
        match m.kind {
            MissingKind::Tag => penalty += m.delta * TAG_PENALTY,
            MissingKind::Name | MissingKind::NameAny => penalty += m.delta * NAME_PENALTY,
            MissingKind::NameSum => {}
        }
    }
    (priority * 1000.0 + weight * 100.0 - penalty, penalty)
}

fn make_row(recipe: &CookingRecipe, ev: &Evaluation) -> EvalRow {
    let req = extract_requirements(recipe);
    let (score, penalty) = score_recipe(recipe.priority, recipe.weight, &ev.missing);
    let cons = effective_constraints(recipe);
    let conditions = build_conditions(recipe, cons.as_ref(), &ev.tags_total, &ev.names_total);
    EvalRow {
        name: recipe.name.clone(),
        priority: recipe.priority,
        weight: recipe.weight,
        score,
        penalty,
        missing: ev.missing.clone(),
        rule_mode: ev.rule_mode,
        warnings: ev.warnings.clone(),
        req_names: req.names,
        req_name_groups: req.groups,
        req_tags: req.tags,
        attrs: RecipeAttrs {
            foodtype: recipe.foodtype.clone(),
            hunger: recipe.hunger.clone(),
            health: recipe.health.clone(),
            sanity: recipe.sanity.clone(),
            perishtime: recipe.perishtime.clone(),
            cooktime: recipe.cooktime.clone(),
        },
        conditions,
        ok: ev.ok,
    }
}

fn sort_rows(rows: &mut [EvalRow]) {
    rows.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Decides what exactly four slotted ingredients cook into.
#[tracing::instrument(level = "debug", skip_all)]
pub fn simulate(
    recipes: &[CookingRecipe],
    slots: &IndexMap<String, f64>,
    ingredients: &IndexMap<String, CookingIngredient>,
) -> Result<SimulateReport, SolverError> {
    let slots_i = normalize_slots(slots);
    let total: i64 = slots_i.values().sum();
    if total != 4 {
        return Err(SolverError::BadArity {
            total,
            slots: slots_i,
        });
    }

    let index = IngredientIndex::build(ingredients, slots_i.keys().map(String::as_str));

    let mut passing: Vec<(&CookingRecipe, EvalRow)> = Vec::new();
    let mut near_rows: Vec<EvalRow> = Vec::new();
    for recipe in recipes {
        let ev = evaluate_recipe(recipe, &slots_i, &index);
        let row = make_row(recipe, &ev);
        if ev.ok {
            passing.push((recipe, row));
        } else {
            near_rows.push(row);
        }
    }

    if !passing.is_empty() {
        passing.sort_by(|(a, _), (b, _)| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.weight
                        .partial_cmp(&a.weight)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.name.cmp(&b.name))
        });
        let best = passing[0].0.name.clone();
        let candidates: Vec<SimCandidate> = passing
            .iter()
            .take(RETURN_TOP)
            .map(|(r, _)| SimCandidate {
                name: r.name.clone(),
                priority: r.priority,
                weight: r.weight,
            })
            .collect();
        let mut cookable: Vec<EvalRow> = passing.into_iter().map(|(_, row)| row).collect();
        sort_rows(&mut cookable);
        cookable.truncate(RETURN_TOP);

        let pool = collect_pool(slots_i.keys().map(String::as_str), &index);
        let (near, tiers) = near_miss::rank(near_rows, &pool, &index, RETURN_TOP);
        return Ok(SimulateReport {
            result: best,
            reason: "matched_constraints",
            candidates,
            cookable,
            near_miss: near,
            near_miss_tiers: tiers,
            slots: slots_i,
            formula: SCORE_FORMULA,
        });
    }

    if recipes.iter().any(|r| r.name == FALLBACK_RECIPE) {
        return Ok(SimulateReport {
            result: FALLBACK_RECIPE.to_owned(),
            reason: "fallback_wetgoop",
            candidates: Vec::new(),
            cookable: Vec::new(),
            near_miss: Vec::new(),
            near_miss_tiers: Vec::new(),
            slots: slots_i,
            formula: SCORE_FORMULA,
        });
    }

    Err(SolverError::NoMatchAndNoFallback)
}

/// Multiset combination count `C(n + k - 1, k)`, saturating.
fn combo_count(n: u64, k: u64) -> u64 {
    if k == 0 {
        return 1;
    }
    if n == 0 {
        return 0;
    }
    let mut num: u128 = 1;
    let mut den: u128 = 1;
    for i in 1..=k as u128 {
        num = num.saturating_mul(n as u128 + i - 1);
        den = den.saturating_mul(i);
    }
    u64::try_from(num / den).unwrap_or(u64::MAX)
}

/// Every multiset of size `remaining` drawn from `items`, or `None` when the
/// count would exceed `cap`.
fn build_slot_combos(
    items: &[String],
    remaining: i64,
    cap: u64,
) -> Option<Vec<IndexMap<String, i64>>> {
    if remaining <= 0 {
        return Some(vec![IndexMap::new()]);
    }
    if items.is_empty() {
        return Some(Vec::new());
    }
    if combo_count(items.len() as u64, remaining as u64) > cap {
        return None;
    }

    let mut combos = Vec::new();
    let mut current: IndexMap<String, i64> = IndexMap::new();
    walk_combos(items, 0, remaining, &mut current, &mut combos);
    Some(combos)
}

fn walk_combos(
    items: &[String],
    start: usize,
    remaining: i64,
    current: &mut IndexMap<String, i64>,
    out: &mut Vec<IndexMap<String, i64>>,
) {
    if remaining == 0 {
        out.push(current.clone());
        return;
    }
    for idx in start..items.len() {
        let id = &items[idx];
        *current.entry(id.clone()).or_insert(0) += 1;
        walk_combos(items, idx, remaining - 1, current, out);
        if let Some(count) = current.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                current.shift_remove(id);
            }
        }
    }
}

fn merge_slots(
    base: &IndexMap<String, i64>,
    extra: &IndexMap<String, i64>,
) -> IndexMap<String, i64> {
    let mut out = base.clone();
    for (k, v) in extra {
        *out.entry(k.clone()).or_insert(0) += v;
    }
    out
}

/// Whether the remaining free slots could still satisfy `cons`, given the
/// best tag mass any single ingredient can contribute.
fn possible_with_remaining(
    cons: &RuleConstraints,
    tags_total: &IndexMap<String, f64>,
    names_total: &IndexMap<String, i64>,
    remaining: i64,
    max_by_tag: &IndexMap<String, f64>,
    available_names: Option<&BTreeSet<String>>,
) -> bool {
    let remaining = remaining.max(0) as f64;

    for g in &cons.names_any {
        if g.keys.is_empty() {
            continue;
        }
        if g.keys.iter().any(|k| names_total.get(k).copied().unwrap_or(0) > 0) {
            continue;
        }
        match available_names {
            Some(avail) => {
                if !g.keys.iter().any(|k| avail.contains(k)) {
                    return false;
                }
            }
            None => {
                if remaining <= 0.0 {
                    return false;
                }
            }
        }
    }

    for g in &cons.names_sum {
        if g.keys.is_empty() {
            continue;
        }
        let total: i64 = g.keys.iter().map(|k| names_total.get(k).copied().unwrap_or(0)).sum();
        let total = total as f64;
        let min = g.min as f64;
        if total >= min - EPS {
            continue;
        }
        if let Some(avail) = available_names {
            if !g.keys.iter().any(|k| avail.contains(k)) {
                return false;
            }
        }
        if total + remaining + EPS < min {
            return false;
        }
    }

    for c in &cons.tags {
        let Some(rhs) = c.value.as_f64() else { continue };
        let lhs = tags_total.get(&c.key).copied().unwrap_or(0.0);
        let max_add = max_by_tag.get(&c.key).copied().unwrap_or(0.0) * remaining;
        let max_possible = lhs + max_add;
        match c.op {
            CmpOp::Gt | CmpOp::Ge => {
                if max_possible + EPS < rhs {
                    return false;
                }
            }
            CmpOp::Lt | CmpOp::Le => {
                if lhs > rhs + EPS {
                    return false;
                }
            }
            CmpOp::Eq => {
                if rhs < lhs - EPS || rhs > max_possible + EPS {
                    return false;
                }
            }
            CmpOp::Ne => {
                if (lhs - rhs).abs() <= EPS && max_add <= EPS {
                    return false;
                }
            }
        }
    }

    for c in &cons.names {
        let Some(rhs) = c.value.as_f64() else { continue };
        if let Some(avail) = available_names {
            if matches!(c.op, CmpOp::Gt | CmpOp::Ge | CmpOp::Eq)
                && rhs > 0.0
                && !avail.contains(&c.key)
            {
                return false;
            }
        }
        let lhs = names_total.get(&c.key).copied().unwrap_or(0) as f64;
        let max_possible = lhs + remaining;
        match c.op {
            CmpOp::Gt | CmpOp::Ge => {
                if max_possible + EPS < rhs {
                    return false;
                }
            }
            CmpOp::Lt | CmpOp::Le => {
                if lhs > rhs + EPS {
                    return false;
                }
            }
            CmpOp::Eq => {
                if rhs < lhs - EPS || rhs > max_possible + EPS {
                    return false;
                }
            }
            CmpOp::Ne => {
                if (lhs - rhs).abs() <= EPS && remaining <= 0.0 {
                    return false;
                }
            }
        }
    }

    true
}

/// Explores what up to four slotted ingredients could still become, given an
/// optional pantry of `available` ids.
#[tracing::instrument(level = "debug", skip_all, fields(available = available.len()))]
pub fn explore(
    recipes: &[CookingRecipe],
    slots: &IndexMap<String, f64>,
    ingredients: &IndexMap<String, CookingIngredient>,
    available: &[String],
    limit: usize,
) -> Result<ExploreReport, SolverError> {
    let slots_i = normalize_slots(slots);
    let total: i64 = slots_i.values().sum();
    if total > 4 {
        return Err(SolverError::TooManyItems {
            total,
            slots: slots_i,
        });
    }
    let remaining = 4 - total;
    let limit = limit.clamp(1, 2000);

    let avail_list = normalize_available(available);
    let avail_set: BTreeSet<String> = avail_list.iter().cloned().collect();

    let extra: Vec<&str> = slots_i
        .keys()
        .map(String::as_str)
        .chain(avail_list.iter().map(String::as_str))
        .collect();
    let mut index = IngredientIndex::build(ingredients, extra.iter().copied());

    if !avail_list.is_empty() {
        // only the pantry can fill the remaining slots
        let mut max_by_tag: IndexMap<String, f64> = IndexMap::new();
        for id in &avail_list {
            if let Some(tags) = index.tags_by_item.get(id) {
                for (tag, val) in tags {
                    let cur = max_by_tag.entry(tag.clone()).or_insert(*val);
                    if *val > *cur {
                        *cur = *val;
                    }
                }
            }
        }
        index.max_by_tag = max_by_tag;

        if let Some(combos) = build_slot_combos(&avail_list, remaining, MAX_AVAILABLE_COMBOS) {
            let mut cookable: Vec<EvalRow> = Vec::new();
            let mut near_rows: Vec<EvalRow> = Vec::new();

            let beats = |best: &Option<EvalRow>, score: f64| {
                best.as_ref().map_or(true, |row| score > row.score)
            };
            for recipe in recipes {
                let mut best_ok: Option<EvalRow> = None;
                let mut best_any: Option<EvalRow> = None;
                for combo in &combos {
                    let slots_full = merge_slots(&slots_i, combo);
                    let ev = evaluate_recipe(recipe, &slots_full, &index);
                    let row = make_row(recipe, &ev);
                    if beats(&best_any, row.score) {
                        best_any = Some(row.clone());
                    }
                    if ev.ok && beats(&best_ok, row.score) {
                        best_ok = Some(row);
                    }
                }
                match (best_ok, best_any) {
                    (Some(row), _) => cookable.push(row),
                    (None, Some(row)) => near_rows.push(row),
                    (None, None) => {}
                }
            }

            sort_rows(&mut cookable);
            cookable.truncate(limit);
            let pool = collect_pool(extra.iter().copied(), &index);
            let (near, tiers) = near_miss::rank(near_rows, &pool, &index, limit);
            return Ok(ExploreReport {
                slots: slots_i,
                total,
                remaining,
                available: avail_list,
                cookable,
                near_miss: near,
                near_miss_tiers: tiers,
                formula: SCORE_FORMULA,
            });
        }
    }

    // feasibility fallback: no pantry, or the extension space is too large
    let mut cookable: Vec<EvalRow> = Vec::new();
    let mut near_rows: Vec<EvalRow> = Vec::new();
    for recipe in recipes {
        let ev = evaluate_recipe(recipe, &slots_i, &index);
        let row = make_row(recipe, &ev);
        match ev.rule_mode {
            RuleMode::Rule => {
                let cons = effective_constraints(recipe).unwrap_or_default();
                let possible = possible_with_remaining(
                    &cons,
                    &ev.tags_total,
                    &ev.names_total,
                    remaining,
                    &index.max_by_tag,
                    (!avail_set.is_empty()).then_some(&avail_set),
                );
                if possible {
                    cookable.push(row);
                } else {
                    near_rows.push(row);
                }
            }
            RuleMode::Card if total == 4 => {
                if ev.ok {
                    cookable.push(row);
                } else {
                    near_rows.push(row);
                }
            }
            _ => near_rows.push(row),
        }
    }

    sort_rows(&mut cookable);
    cookable.truncate(limit);
    let pool = collect_pool(extra.iter().copied(), &index);
    let (near, tiers) = near_miss::rank(near_rows, &pool, &index, limit);
    Ok(ExploreReport {
        slots: slots_i,
        total,
        remaining,
        available: avail_list,
        cookable,
        near_miss: near,
        near_miss_tiers: tiers,
        formula: SCORE_FORMULA,
    })
}

/// Recipes whose card ingredients are fully covered by `inventory`, sorted
/// by priority then name.
pub fn find_cookable<'r>(
    recipes: &'r [CookingRecipe],
    inventory: &IndexMap<String, f64>,
    limit: usize,
) -> Vec<&'r CookingRecipe> {
    let inv: IndexMap<String, f64> = inventory
        .iter()
        .filter_map(|(k, v)| {
            let key = k.trim().to_ascii_lowercase();
            (!key.is_empty() && *v > 0.0).then_some((key, *v))
        })
        .collect();
    let limit = limit.clamp(1, 2000);

    let mut out: Vec<&CookingRecipe> = recipes
        .iter()
        .filter(|r| {
            !r.card_ingredients.is_empty()
                && r.card_ingredients
                    .iter()
                    .all(|(item, need)| inv.get(item).copied().unwrap_or(0.0) + EPS >= *need)
        })
        .collect();
    out.sort_by(|a, b| {
        b.priority
            .partial_cmp(&a.priority)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    out.truncate(limit);
    out
}
