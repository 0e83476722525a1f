use almanac::catalog::tagging::parse_overrides;
use almanac::{BuildOptions, CatalogBuilder, Kind, MemoryMount};
use indoc::indoc;

const TWIGS_PREFAB: &str = indoc! {r#"
    local assets = {
        Asset("ATLAS", "images/inventoryimages/twigs.xml"),
        Asset("IMAGE", "images/inventoryimages/twigs.tex"),
    }

    local function fn()
        local inst = CreateEntity()
        inst:AddComponent("inventoryitem")
        inst:AddComponent("stackable")
        inst.components.stackable:SetMaxSize(TUNING.STACK_SIZE_SMALLITEM)
        return inst
    end

    return Prefab("twigs", fn, assets)
"#};

const TUNING_SRC: &str = indoc! {r#"
    local CAL = 75
    TUNING.CALORIES_SMALL = CAL
    TUNING.CALORIES_MED = TUNING.CALORIES_SMALL * 2
    TUNING.STACK_SIZE_SMALLITEM = 40
    TUNING.ROPE_COST = 2
"#};

fn builder() -> CatalogBuilder {
    CatalogBuilder::new(BuildOptions {
        generated: Some("2024-01-01T00:00:00Z".to_owned()),
        ..BuildOptions::default()
    })
}

#[test]
fn minimal_prefab_becomes_item() {
    let mount = MemoryMount::from([("scripts/prefabs/twigs.lua", TWIGS_PREFAB)]);
    let output = builder().build(&mount);
    let catalog = &output.catalog;

    let twigs = &catalog.items["twigs"];
    assert_eq!(twigs.kind, Kind::Item);
    assert!(twigs.components.contains("inventoryitem"));
    assert_eq!(
        twigs.assets.image.as_deref(),
        Some("images/inventoryimages/twigs.tex")
    );
    assert_eq!(
        twigs.assets.atlas.as_deref(),
        Some("images/inventoryimages/twigs.xml")
    );
    assert!(output.report.is_clean());
}

#[test]
fn tuning_chain_resolves_through_local() {
    let mount = MemoryMount::from([("scripts/tuning.lua", TUNING_SRC)]);
    let output = builder().build(&mount);
    assert_eq!(output.catalog.stats.tuning_keys, 4);

    // the resolver itself is also usable standalone
    let tuning = almanac::TuningResolver::new(TUNING_SRC);
    assert_eq!(tuning.resolve("CALORIES_MED"), Some(150.0));
    assert_eq!(tuning.resolve("TUNING.CALORIES_MED"), Some(150.0));
}

#[test]
fn stats_resolve_against_tuning_with_traces() {
    let mount = MemoryMount::from([
        ("scripts/tuning.lua", TUNING_SRC),
        ("scripts/prefabs/twigs.lua", TWIGS_PREFAB),
    ]);
    let output = builder().with_traces().build(&mount);
    let twigs = &output.catalog.items["twigs"];

    let stack = &twigs.stats["stack_size"];
    assert_eq!(stack.expr, "TUNING.STACK_SIZE_SMALLITEM");
    assert_eq!(stack.value, Some(40.0));
    assert_eq!(stack.expr_resolved.as_deref(), Some("40"));

    let traces = output.traces.expect("traces requested");
    let trace = traces
        .get("item:twigs:stat:stack_size")
        .expect("trace recorded under the item key");
    assert_eq!(trace.value, Some(40.0));
    assert!(traces.with_prefix("item:twigs:").count() >= 1);
}

#[test]
fn craft_recipes_join_the_catalog() {
    let recipes = indoc! {r#"
        Recipe2("spear", { Ingredient("twigs", 2), Ingredient("rope", TUNING.ROPE_COST) }, TECH.NONE,
            { filters = { "WEAPONS" } })
    "#};
    let mount = MemoryMount::from([
        ("scripts/tuning.lua", TUNING_SRC),
        ("scripts/recipes.lua", recipes),
        ("scripts/prefabs/twigs.lua", TWIGS_PREFAB),
    ]);
    let output = builder().with_traces().build(&mount);
    let catalog = &output.catalog;

    let spear = &catalog.craft.recipes["spear"];
    assert_eq!(spear.ingredients[1].amount_value, Some(2.0));
    // craft products and ingredients enter the id universe
    assert!(catalog.items.contains_key("spear"));
    assert!(catalog.items.contains_key("rope"));
    assert!(catalog.items["spear"].sources.contains("craft"));

    let traces = output.traces.expect("traces requested");
    assert!(traces.get("craft:spear:ingredient:rope").is_some());
}

#[test]
fn cooking_stats_resolved_value_only() {
    let foods = indoc! {r#"
        local foods = {
            meatballs = {
                test = function(cooker, names, tags) return tags.meat >= 1 end,
                priority = -1,
                hunger = TUNING.CALORIES_MED,
                cooktime = 0.25,
            },
        }
    "#};
    let mount = MemoryMount::from([
        ("scripts/tuning.lua", TUNING_SRC),
        ("scripts/preparedfoods.lua", foods),
    ]);
    let output = builder().with_traces().build(&mount);

    let meatballs = &output.catalog.cooking["meatballs"];
    assert_eq!(
        meatballs.hunger,
        Some(almanac::extract::cooking::StatValue::Num(150.0))
    );
    assert!(output.catalog.items.contains_key("meatballs"));
    assert!(output.catalog.items["meatballs"].sources.contains("cook"));

    let traces = output.traces.expect("traces requested");
    assert_eq!(
        traces.get("cooking:meatballs:hunger").and_then(|t| t.value),
        Some(150.0)
    );
}

#[test]
fn overrides_patch_kind_and_categories() {
    let rules = parse_overrides(
        r#"{"rules": [{"match": "xyz", "set": {"kind": "creature"}, "add": {"categories": ["boss"]}}]}"#,
    );
    let mount = MemoryMount::from([(
        "scripts/prefabs/xyz.lua",
        "return Prefab(\"xyz\", fn)",
    )]);
    let output = CatalogBuilder::new(BuildOptions {
        overrides: rules,
        ..BuildOptions::default()
    })
    .build(&mount);

    let item = &output.catalog.items["xyz"];
    assert_eq!(item.kind, Kind::Creature);
    assert!(item.categories.contains("boss"));
}

#[test]
fn loot_membership_marks_sources() {
    let spider = indoc! {r#"
        SetSharedLootTable('spider', {
            {'monstermeat', 0.5},
            {'silk', 0.25},
        })
        return Prefab("spider", fn)
    "#};
    let mount = MemoryMount::from([
        ("scripts/prefabs/spider.lua", spider),
        ("scripts/prefabs/monstermeat.lua", "return Prefab(\"monstermeat\", fn)"),
    ]);
    let output = builder().build(&mount);
    assert!(output.catalog.items["monstermeat"].sources.contains("loot"));
}

#[test]
fn icon_only_ids_enter_the_universe() {
    let mount = MemoryMount::new();
    let mut options = BuildOptions::default();
    options.icon_ids.insert("mystery_item".to_owned());
    let output = CatalogBuilder::new(options).build(&mount);
    let item = &output.catalog.items["mystery_item"];
    assert_eq!(item.kind, Kind::Unknown);
    assert_eq!(item.assets.icon.as_deref(), Some("icons/mystery_item.png"));
}

#[test]
fn worldgen_and_components_counted() {
    let mount = MemoryMount::from([
        (
            "scripts/map/rooms/forest.lua",
            "AddRoom(\"Forest\", { value = WORLD_TILES.FOREST, contents = {} })",
        ),
        (
            "scripts/components/health.lua",
            "local Health = Class(function(self) end)\nreturn Health",
        ),
    ]);
    let output = builder().build(&mount);
    assert_eq!(output.catalog.stats.rooms, 1);
    assert_eq!(output.catalog.stats.components, 1);
    assert!(output.catalog.components.contains_key("health"));
}

#[test]
fn catalog_serializes_with_schema_version() {
    let mount = MemoryMount::from([("scripts/prefabs/twigs.lua", TWIGS_PREFAB)]);
    let output = builder().build(&mount);
    let doc = serde_json::to_value(&output.catalog).expect("catalog serializes");
    assert_eq!(doc["schema_version"], almanac::SCHEMA_VERSION);
    assert_eq!(doc["meta"]["generated"], "2024-01-01T00:00:00Z");
    assert!(doc["items"]["twigs"]["components"]
        .as_array()
        .unwrap()
        .contains(&serde_json::json!("inventoryitem")));
}
