//! Catalog assembly
//!
//! Joins every extractor's output on entity identifier and derives the tag
//! profile, per-item stats and source memberships. The catalog is a
//! write-once artifact: build it, then only read it.

pub mod stats;
pub mod tagging;

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use serde::Serialize;

use crate::extract::component::{scan_components, ComponentDef};
use crate::extract::cooking::{parse_cooking_recipes, CookingRecipe, StatValue};
use crate::extract::craft::{parse_craft_recipes, parse_filter_defs, CraftIndex};
use crate::extract::ingredient::{merge_ingredients, parse_cooking_ingredients, CookingIngredient};
use crate::extract::loot::scan_loot_items;
use crate::extract::prefab::{scan_prefabs, Asset, PrefabRecord};
use crate::extract::worldgen::{scan_worldgen, WorldgenIndex};
use crate::mount::SourceMount;
use crate::report::BuildReport;
use crate::tuning::{ExprTrace, TuningResolver};
use crate::{BuildOptions, Domains};

use stats::{extract_stat_exprs, resolve_stat_entry, score_expr, StatEntry};
use tagging::{apply_overrides, infer_tags, Kind};

/// Bumped on breaking output changes.
pub const SCHEMA_VERSION: u32 = 2;

/// Build provenance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Meta {
    pub generated: String,
    pub tool: String,
    /// Opaque truncated content hash of the source mount.
    pub source_signature: String,
}

/// Presentation assets selected for one item.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemAssets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atlas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl ItemAssets {
    pub fn is_empty(&self) -> bool {
        self.atlas.is_none() && self.image.is_none() && self.icon.is_none()
    }
}

/// One fully-joined catalog item.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogItem {
    pub id: String,
    pub kind: Kind,
    pub categories: BTreeSet<String>,
    pub behaviors: BTreeSet<String>,
    pub sources: BTreeSet<String>,
    pub slots: BTreeSet<String>,
    pub components: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub assets: ItemAssets,
    pub prefab_files: Vec<String>,
    pub prefab_assets: Vec<Asset>,
    pub brains: BTreeSet<String>,
    pub stategraphs: BTreeSet<String>,
    pub helpers: BTreeSet<String>,
    pub stats: IndexMap<String, StatEntry>,
}

/// Per-domain record counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Counts {
    pub items: usize,
    pub prefabs: usize,
    pub prefab_files: usize,
    pub craft_recipes: usize,
    pub cooking_recipes: usize,
    pub cooking_ingredients: usize,
    pub loot_items: usize,
    pub components: usize,
    pub rooms: usize,
    pub tasks: usize,
    pub tasksets: usize,
    pub worldgen_presets: usize,
    pub settings_presets: usize,
    pub start_locations: usize,
    pub tuning_keys: usize,
    pub skipped: usize,
}

/// The whole queryable catalog.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    pub schema_version: u32,
    pub meta: Meta,
    pub items: IndexMap<String, CatalogItem>,
    pub assets: IndexMap<String, ItemAssets>,
    pub craft: CraftIndex,
    pub cooking: IndexMap<String, CookingRecipe>,
    pub cooking_ingredients: IndexMap<String, CookingIngredient>,
    pub components: IndexMap<String, ComponentDef>,
    pub worldgen: WorldgenIndex,
    pub stats: Counts,
}

impl Catalog {
    /// Cooking recipes as a slice-friendly list for the cook-pot evaluator.
    pub fn cooking_recipes(&self) -> Vec<CookingRecipe> {
        self.cooking.values().cloned().collect()
    }
}

/// Side-output of tuning traces, keyed `item:<id>:stat:<key>`,
/// `cooking:<name>:<field>` and `craft:<name>:ingredient:<item>`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraceIndex {
    traces: IndexMap<String, ExprTrace>,
}

impl TraceIndex {
    pub fn get(&self, key: &str) -> Option<&ExprTrace> {
        self.traces.get(key)
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Prefix query over trace keys.
    pub fn with_prefix<'s>(
        &'s self,
        prefix: &'s str,
    ) -> impl Iterator<Item = (&'s str, &'s ExprTrace)> + 's {
        self.traces
            .iter()
            .filter(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v))
    }

    fn insert(&mut self, key: String, trace: ExprTrace) {
        self.traces.insert(key, trace);
    }
}

/// Everything a build produces.
#[derive(Debug)]
pub struct BuildOutput {
    pub catalog: Catalog,
    /// Present when the build collected tuning traces.
    pub traces: Option<TraceIndex>,
    pub report: BuildReport,
}

const TUNING_PATH: &str = "scripts/tuning.lua";

fn source_signature(mount: &dyn SourceMount) -> String {
    let mut hasher = DefaultHasher::new();
    for path in mount.file_list() {
        path.hash(&mut hasher);
        if let Some(content) = mount.read(&path) {
            content.hash(&mut hasher);
        }
    }
    format!("{:012x}", hasher.finish() & 0xffff_ffff_ffff)
}

fn infer_sources(
    id: &str,
    craft_products: &BTreeSet<String>,
    cooking_names: &BTreeSet<String>,
    loot_items: &BTreeSet<String>,
    components: &BTreeSet<String>,
    tags: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut sources = BTreeSet::new();
    if craft_products.contains(id) {
        sources.insert("craft".to_owned());
    }
    if cooking_names.contains(id) {
        sources.insert("cook".to_owned());
    }
    if loot_items.contains(id) {
        sources.insert("loot".to_owned());
    }
    if tags.contains("event") || tags.contains("festival") {
        sources.insert("event".to_owned());
    }
    if tags.contains("plant") || tags.contains("tree") || components.contains("pickable") {
        sources.insert("natural".to_owned());
    }
    if ["character", "monster", "animal", "smallcreature", "largecreature", "epic"]
        .iter()
        .any(|t| tags.contains(*t))
    {
        sources.insert("spawn".to_owned());
    }
    sources
}

fn select_assets(prefab_assets: &[Asset]) -> ItemAssets {
    let mut assets = ItemAssets::default();
    for a in prefab_assets {
        if a.path.is_empty() {
            continue;
        }
        match a.kind.to_ascii_uppercase().as_str() {
            "ATLAS" if assets.atlas.is_none() => assets.atlas = Some(a.path.clone()),
            "IMAGE" if assets.image.is_none() => assets.image = Some(a.path.clone()),
            _ => {}
        }
    }
    assets
}

/// Runs the whole extraction pipeline over a mount.
#[tracing::instrument(level = "info", skip_all)]
pub fn build(mount: &dyn SourceMount, options: &BuildOptions) -> BuildOutput {
    let mut report = BuildReport::default();
    let mut traces = options.collect_traces.then(TraceIndex::default);

    // the tuning table is a sequential pre-pass; everything after it only
    // reads the resolver
    let tuning = TuningResolver::new(&mount.read(TUNING_PATH).unwrap_or_default());

    let prefab_index = if options.domains.contains(Domains::PREFABS) {
        scan_prefabs(mount)
    } else {
        Default::default()
    };

    let mut craft = CraftIndex::default();
    if options.domains.contains(Domains::CRAFT) {
        for path in mount.file_list() {
            let stem = crate::extract::file_stem(&path);
            if !path.ends_with(".lua") || !stem.starts_with("recipes") {
                continue;
            }
            let Some(content) = mount.read(&path) else { continue };
            parse_craft_recipes(&content, &path, &tuning, &mut craft, &mut report);
            parse_filter_defs(&content, &mut craft);
        }
        resolve_craft_amounts(&mut craft, &tuning, traces.as_mut());
    }

    let mut cooking: IndexMap<String, CookingRecipe> = IndexMap::new();
    let mut cooking_ingredients: IndexMap<String, CookingIngredient> = IndexMap::new();
    if options.domains.contains(Domains::COOKING) {
        for path in mount.file_list() {
            if !path.ends_with(".lua") {
                continue;
            }
            let stem = crate::extract::file_stem(&path);
            if stem.contains("preparedfoods") {
                if let Some(content) = mount.read(&path) {
                    for (name, recipe) in parse_cooking_recipes(&content) {
                        cooking.entry(name).or_insert(recipe);
                    }
                }
            }
            if stem == "cooking" || stem.starts_with("ingredients") {
                if let Some(content) = mount.read(&path) {
                    merge_ingredients(
                        &mut cooking_ingredients,
                        parse_cooking_ingredients(&content, &path),
                    );
                }
            }
        }
        resolve_cooking_stats(&mut cooking, &tuning, traces.as_mut());
    }

    let loot_items = if options.domains.contains(Domains::LOOT) {
        scan_loot_items(mount)
    } else {
        BTreeSet::new()
    };

    let components = if options.domains.contains(Domains::COMPONENTS) {
        scan_components(mount)
    } else {
        IndexMap::new()
    };

    let worldgen = if options.domains.contains(Domains::WORLDGEN) {
        scan_worldgen(mount)
    } else {
        WorldgenIndex::default()
    };

    // the id universe: everything any domain knows about
    let craft_products: BTreeSet<String> = craft
        .recipes
        .values()
        .filter_map(|r| r.product.clone())
        .collect();
    let cooking_names: BTreeSet<String> = cooking.keys().cloned().collect();

    let mut all_ids: BTreeSet<String> = BTreeSet::new();
    all_ids.extend(prefab_index.items.keys().cloned());
    all_ids.extend(options.icon_ids.iter().cloned());
    all_ids.extend(craft_products.iter().cloned());
    all_ids.extend(craft.recipes.keys().cloned());
    for recipe in craft.recipes.values() {
        all_ids.extend(recipe.ingredients.iter().map(|i| i.item.clone()));
    }
    all_ids.extend(cooking_names.iter().cloned());
    for recipe in cooking.values() {
        all_ids.extend(recipe.card_ingredients.iter().map(|(item, _)| item.clone()));
    }
    all_ids.extend(cooking_ingredients.keys().cloned());
    all_ids.retain(|id| crate::extract::clean_id(id).is_some());

    let mut items: IndexMap<String, CatalogItem> = IndexMap::new();
    let mut assets_out: IndexMap<String, ItemAssets> = IndexMap::new();
    let mut stat_cache: IndexMap<String, IndexMap<String, String>> = IndexMap::new();
    let empty = PrefabRecord::default();

    for id in &all_ids {
        let pf = prefab_index.items.get(id).unwrap_or(&empty);

        let sources = infer_sources(
            id,
            &craft_products,
            &cooking_names,
            &loot_items,
            &pf.components,
            &pf.tags,
        );
        let mut profile = infer_tags(&pf.components, &pf.tags, &sources);
        apply_overrides(id, &mut profile, &options.overrides);

        let mut assets = select_assets(&pf.assets);
        if options.icon_ids.contains(id) {
            assets.icon = Some(format!("icons/{id}.png"));
        }

        // best expression per stat across every contributing file
        let mut stat_exprs: IndexMap<String, String> = IndexMap::new();
        let mut stat_scores: IndexMap<String, u8> = IndexMap::new();
        for file in &pf.files {
            let extracted = stat_cache.entry(file.clone()).or_insert_with(|| {
                mount
                    .read(file)
                    .map(|content| extract_stat_exprs(&content))
                    .unwrap_or_default()
            });
            for (key, expr) in extracted.iter() {
                let score = score_expr(expr);
                if score >= stat_scores.get(key).copied().unwrap_or(0) {
                    stat_exprs.insert(key.clone(), expr.clone());
                    stat_scores.insert(key.clone(), score);
                }
            }
        }

        let mut item_stats: IndexMap<String, StatEntry> = IndexMap::new();
        for (key, expr) in &stat_exprs {
            let trace_key = traces
                .is_some()
                .then(|| format!("item:{id}:stat:{key}"));
            let (entry, trace) = resolve_stat_entry(key, expr, &tuning, trace_key.clone());
            if let (Some(sink), Some(trace), Some(trace_key)) =
                (traces.as_mut(), trace, trace_key)
            {
                sink.insert(trace_key, trace);
            }
            item_stats.insert(key.clone(), entry);
        }

        if !assets.is_empty() {
            assets_out.insert(id.clone(), assets.clone());
        }

        items.insert(
            id.clone(),
            CatalogItem {
                id: id.clone(),
                kind: profile.kind,
                categories: profile.categories,
                behaviors: profile.behaviors,
                sources: profile.sources,
                slots: profile.slots,
                components: pf.components.clone(),
                tags: pf.tags.clone(),
                assets,
                prefab_files: pf.files.clone(),
                prefab_assets: pf.assets.clone(),
                brains: pf.brains.clone(),
                stategraphs: pf.stategraphs.clone(),
                helpers: pf.helpers.clone(),
                stats: item_stats,
            },
        );
    }

    let counts = Counts {
        items: items.len(),
        prefabs: prefab_index.items.len(),
        prefab_files: prefab_index.total_files,
        craft_recipes: craft.recipes.len(),
        cooking_recipes: cooking.len(),
        cooking_ingredients: cooking_ingredients.len(),
        loot_items: loot_items.len(),
        components: components.len(),
        rooms: worldgen.rooms.len(),
        tasks: worldgen.tasks.len(),
        tasksets: worldgen.tasksets.len(),
        worldgen_presets: worldgen.worldgen_presets.len(),
        settings_presets: worldgen.settings_presets.len(),
        start_locations: worldgen.start_locations.len(),
        tuning_keys: tuning.len(),
        skipped: report.skipped().len(),
    };

    let meta = Meta {
        generated: options.generated.clone().unwrap_or_else(|| {
            humantime::format_rfc3339_seconds(std::time::SystemTime::now()).to_string()
        }),
        tool: options.tool.clone(),
        source_signature: options
            .source_signature
            .clone()
            .unwrap_or_else(|| source_signature(mount)),
    };

    BuildOutput {
        catalog: Catalog {
            schema_version: SCHEMA_VERSION,
            meta,
            items,
            assets: assets_out,
            craft,
            cooking,
            cooking_ingredients,
            components,
            worldgen,
            stats: counts,
        },
        traces,
        report,
    }
}

fn resolve_craft_amounts(
    craft: &mut CraftIndex,
    tuning: &TuningResolver,
    mut traces: Option<&mut TraceIndex>,
) {
    for (name, recipe) in &mut craft.recipes {
        for ing in &mut recipe.ingredients {
            if !ing.amount_raw.contains("TUNING.") {
                continue;
            }
            let trace = tuning.trace_expr(&ing.amount_raw);
            if let Some(value) = trace.value {
                ing.amount_num = Some(value);
                ing.amount_value = Some(value);
            }
            if let Some(sink) = traces.as_deref_mut() {
                sink.insert(format!("craft:{name}:ingredient:{}", ing.item), trace);
            }
        }
    }
}

const COOKING_STAT_FIELDS: &[&str] = &["hunger", "health", "sanity", "perishtime", "cooktime"];

fn resolve_cooking_stats(
    cooking: &mut IndexMap<String, CookingRecipe>,
    tuning: &TuningResolver,
    mut traces: Option<&mut TraceIndex>,
) {
    for (name, recipe) in cooking.iter_mut() {
        for field in COOKING_STAT_FIELDS {
            let slot = match *field {
                "hunger" => &mut recipe.hunger,
                "health" => &mut recipe.health,
                "sanity" => &mut recipe.sanity,
                "perishtime" => &mut recipe.perishtime,
                _ => &mut recipe.cooktime,
            };
            let Some(StatValue::Text(expr)) = slot else {
                continue;
            };
            if !expr.contains("TUNING.") {
                continue;
            }
            let trace = tuning.trace_expr(expr);
            if let Some(value) = trace.value {
                *slot = Some(StatValue::Num(value));
            }
            if let Some(sink) = traces.as_deref_mut() {
                sink.insert(format!("cooking:{name}:{field}"), trace);
            }
        }
    }
}
