//! Component stat inference
//!
//! Prefab constructors set the numbers players care about through component
//! setters (`inst.components.weapon:SetDamage(TUNING.SPEAR_DAMAGE)`) or
//! direct field writes (`inst.components.equippable.dapperness = ...`). A
//! fixed per-component table maps those to stable stat keys. When a prefab
//! sets the same stat more than once, the more explainable expression wins:
//! tuning references over literals over barewords.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::calls::CallScanner;
use crate::extract::component::component_aliases;
use crate::extract::prefab::parse_prefab_file;
use crate::scan::{skip_string_or_long_string, strip_comments};
use crate::tuning::{ExprTrace, TuningResolver};

/// `(component, [(method, [(stat_key, arg_index)])])`
type MethodTable = &'static [(&'static str, &'static [(&'static str, &'static [(&'static str, usize)])])];

/// `(component, [(field, stat_key)])`
type PropertyTable = &'static [(&'static str, &'static [(&'static str, &'static str)])];

static STAT_METHODS: MethodTable = &[
    ("weapon", &[
        ("SetDamage", &[("weapon_damage", 0)]),
        ("SetRange", &[("weapon_range_min", 0), ("weapon_range_max", 1)]),
        ("SetAttackRange", &[("weapon_range", 0)]),
    ]),
    ("combat", &[
        ("SetDefaultDamage", &[("combat_damage", 0)]),
        ("SetAttackPeriod", &[("attack_period", 0)]),
        ("SetRange", &[("attack_range", 0), ("attack_range_max", 1)]),
        ("SetAreaDamage", &[("area_damage", 0)]),
    ]),
    ("finiteuses", &[
        ("SetMaxUses", &[("uses_max", 0)]),
        ("SetUses", &[("uses", 0)]),
    ]),
    ("armor", &[
        ("InitCondition", &[("armor_condition", 0), ("armor_absorption", 1)]),
        ("SetCondition", &[("armor_condition", 0)]),
        ("SetAbsorption", &[("armor_absorption", 0)]),
    ]),
    ("edible", &[
        ("SetHealth", &[("edible_health", 0)]),
        ("SetHunger", &[("edible_hunger", 0)]),
        ("SetSanity", &[("edible_sanity", 0)]),
    ]),
    ("perishable", &[("SetPerishTime", &[("perish_time", 0)])]),
    ("fueled", &[
        ("SetFuelLevel", &[("fuel_level", 0)]),
        ("InitializeFuelLevel", &[("fuel_level", 0)]),
        ("SetMaxFuel", &[("fuel_max", 0)]),
    ]),
    ("equippable", &[
        ("SetDapperness", &[("dapperness", 0)]),
        ("SetEquipSlot", &[("equip_slot", 0)]),
        ("SetWalkSpeedMult", &[("equip_walk_speed_mult", 0)]),
        ("SetRunSpeedMult", &[("equip_run_speed_mult", 0)]),
    ]),
    ("insulator", &[
        ("SetInsulation", &[("insulation", 0)]),
        ("SetWinterInsulation", &[("insulation_winter", 0)]),
        ("SetSummerInsulation", &[("insulation_summer", 0)]),
    ]),
    ("waterproofer", &[("SetEffectiveness", &[("waterproof", 0)])]),
    ("light", &[
        ("SetRadius", &[("light_radius", 0)]),
        ("SetIntensity", &[("light_intensity", 0)]),
        ("SetFalloff", &[("light_falloff", 0)]),
    ]),
    ("stackable", &[("SetMaxSize", &[("stack_size", 0)])]),
    ("health", &[("SetMaxHealth", &[("health_max", 0)])]),
    ("sanity", &[
        ("SetMax", &[("sanity_max", 0)]),
        ("SetRate", &[("sanity_rate", 0)]),
    ]),
    ("hunger", &[
        ("SetMax", &[("hunger_max", 0)]),
        ("SetRate", &[("hunger_rate", 0)]),
    ]),
    ("locomotor", &[
        ("SetWalkSpeed", &[("walk_speed", 0)]),
        ("SetRunSpeed", &[("run_speed", 0)]),
    ]),
    ("heater", &[("SetHeat", &[("heat", 0)])]),
    ("workable", &[("SetWorkLeft", &[("work_left", 0)])]),
];

static STAT_PROPERTIES: PropertyTable = &[
    ("weapon", &[("damage", "weapon_damage")]),
    ("combat", &[("defaultdamage", "combat_damage")]),
    ("finiteuses", &[("maxuses", "uses_max"), ("uses", "uses")]),
    ("armor", &[("absorption", "armor_absorption"), ("condition", "armor_condition")]),
    ("edible", &[
        ("healthvalue", "edible_health"),
        ("hungervalue", "edible_hunger"),
        ("sanityvalue", "edible_sanity"),
    ]),
    ("perishable", &[("perishtime", "perish_time")]),
    ("fueled", &[("maxfuel", "fuel_max")]),
    ("equippable", &[
        ("dapperness", "dapperness"),
        ("equipslot", "equip_slot"),
        ("walkspeedmult", "equip_walk_speed_mult"),
        ("runspeedmult", "equip_run_speed_mult"),
    ]),
    ("insulator", &[("insulation", "insulation")]),
    ("waterproofer", &[("effectiveness", "waterproof")]),
    ("light", &[
        ("radius", "light_radius"),
        ("intensity", "light_intensity"),
        ("falloff", "light_falloff"),
    ]),
    ("stackable", &[("maxsize", "stack_size")]),
    ("health", &[("maxhealth", "health_max")]),
    ("sanity", &[("max", "sanity_max"), ("rate", "sanity_rate")]),
    ("hunger", &[("max", "hunger_max"), ("rate", "hunger_rate")]),
    ("locomotor", &[("walkspeed", "walk_speed"), ("runspeed", "run_speed")]),
    ("heater", &[("heat", "heat")]),
    ("workable", &[("workleft", "work_left")]),
];

/// One resolved stat on a catalog item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatEntry {
    pub key: String,
    pub expr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expr_resolved: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_key: Option<String>,
}

fn methods_for(component: &str) -> Option<&'static [(&'static str, &'static [(&'static str, usize)])]> {
    STAT_METHODS
        .iter()
        .find(|(c, _)| *c == component)
        .map(|(_, m)| *m)
}

fn properties_for(component: &str) -> Option<&'static [(&'static str, &'static str)]> {
    STAT_PROPERTIES
        .iter()
        .find(|(c, _)| *c == component)
        .map(|(_, p)| *p)
}

/// Ranks expressions on explainability: tuning ref > literal > bareword.
pub(crate) fn score_expr(expr: &str) -> u8 {
    if expr.is_empty() {
        return 0;
    }
    if expr.contains("TUNING.") {
        return 3;
    }
    let trimmed = expr.trim();
    if trimmed == "true" || trimmed == "false" || crate::expr::is_numeric_literal(trimmed) {
        return 2;
    }
    1
}

/// Scans the right-hand side of an assignment: to end of line or `;` at
/// depth zero, skipping strings.
fn scan_assignment_expr(text: &str, start: usize) -> &str {
    let bytes = text.as_bytes();
    let n = bytes.len();
    let mut i = start;
    let mut depth = 0i32;
    let mut started = false;
    while i < n {
        if let Some(j) = skip_string_or_long_string(text, i) {
            started = true;
            i = j;
            continue;
        }
        let b = bytes[i];
        if !started && b.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        started = true;
        if (b == b'\n' || b == b';') && depth == 0 {
            break;
        }
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = (depth - 1).max(0),
            _ => {}
        }
        i += 1;
    }
    text[start..i].trim().trim_end_matches(',')
}

static COMPONENT_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bcomponents\.([A-Za-z0-9_]+)\b").unwrap());

/// Extracts `stat key -> raw expression` from one prefab file's text.
pub fn extract_stat_exprs(content: &str) -> IndexMap<String, String> {
    let mut comp_names: Vec<String> = parse_prefab_file(content)
        .components
        .into_iter()
        .collect();

    let clean = strip_comments(content);
    let aliases = component_aliases(&clean);
    if comp_names.is_empty() {
        comp_names = COMPONENT_REF_RE
            .captures_iter(&clean)
            .map(|c| c[1].to_ascii_lowercase())
            .collect();
        comp_names.sort_unstable();
        comp_names.dedup();
    }

    let mut out: IndexMap<String, String> = IndexMap::new();
    let mut scores: IndexMap<String, u8> = IndexMap::new();

    let mut record = |out: &mut IndexMap<String, String>,
                      scores: &mut IndexMap<String, u8>,
                      stat_key: &str,
                      expr: &str| {
        let expr = expr.trim();
        if expr.is_empty() {
            return;
        }
        let score = score_expr(expr);
        if score >= scores.get(stat_key).copied().unwrap_or(0) {
            out.insert(stat_key.to_owned(), expr.to_owned());
            scores.insert(stat_key.to_owned(), score);
        }
    };

    // setter methods, both `components.x:Set...` and aliased `x:Set...`
    let method_names: Vec<&str> = STAT_METHODS
        .iter()
        .flat_map(|(_, methods)| methods.iter().map(|(name, _)| *name))
        .collect();
    let scanner = CallScanner::new(content);
    for call in scanner.calls(&method_names) {
        let component = match COMPONENT_REF_RE.captures(&call.full_name) {
            Some(caps) => Some(caps[1].to_ascii_lowercase()),
            None => {
                let root = call
                    .full_name
                    .split(['.', ':'])
                    .next()
                    .unwrap_or_default();
                aliases.get(root).cloned()
            }
        };
        let Some(component) = component else { continue };
        if !comp_names.is_empty() && !comp_names.contains(&component) {
            continue;
        }
        let Some(mapping) = methods_for(&component)
            .and_then(|methods| methods.iter().find(|(m, _)| *m == call.name))
            .map(|(_, mapping)| *mapping)
        else {
            continue;
        };
        for (stat_key, arg_idx) in mapping {
            if let Some(expr) = call.arg_list.get(*arg_idx) {
                record(&mut out, &mut scores, stat_key, expr);
            }
        }
    }

    // field assignments, `components.x.prop = ...` and `alias.prop = ...`
    for component in &comp_names {
        let Some(prop_map) = properties_for(component) else {
            continue;
        };

        let direct = Regex::new(&format!(
            r"\bcomponents\.{}\.([A-Za-z0-9_]+)\s*=",
            regex::escape(component)
        ))
        .expect("valid property pattern");
        for caps in direct.captures_iter(&clean) {
            let prop = caps[1].to_ascii_lowercase();
            if let Some((_, stat_key)) = prop_map.iter().find(|(p, _)| *p == prop) {
                let whole = caps.get(0).expect("group 0");
                let expr = scan_assignment_expr(&clean, whole.end());
                record(&mut out, &mut scores, stat_key, expr);
            }
        }

        for (alias, aliased_component) in &aliases {
            if aliased_component != component {
                continue;
            }
            let via_alias = Regex::new(&format!(
                r"\b{}\.([A-Za-z0-9_]+)\s*=",
                regex::escape(alias)
            ))
            .expect("valid alias pattern");
            for caps in via_alias.captures_iter(&clean) {
                let prop = caps[1].to_ascii_lowercase();
                if let Some((_, stat_key)) = prop_map.iter().find(|(p, _)| *p == prop) {
                    let whole = caps.get(0).expect("group 0");
                    let expr = scan_assignment_expr(&clean, whole.end());
                    record(&mut out, &mut scores, stat_key, expr);
                }
            }
        }
    }

    out
}

/// Resolves one stat expression through tuning, returning the entry and the
/// trace when the expression referenced tuning.
pub fn resolve_stat_entry(
    key: &str,
    expr: &str,
    tuning: &TuningResolver,
    trace_key: Option<String>,
) -> (StatEntry, Option<ExprTrace>) {
    let mut entry = StatEntry {
        key: key.to_owned(),
        expr: expr.to_owned(),
        value: None,
        expr_resolved: None,
        trace_key: None,
    };

    if expr.contains("TUNING.") {
        let trace = tuning.trace_expr(expr);
        entry.value = trace.value;
        entry.expr_resolved = Some(trace.expr_resolved.clone());
        entry.trace_key = trace_key.clone();
        return (entry, Some(trace));
    }

    let trimmed = expr.trim();
    if trimmed == "true" || trimmed == "false" {
        entry.value = Some(if trimmed == "true" { 1.0 } else { 0.0 });
        entry.expr_resolved = Some(trimmed.to_owned());
        return (entry, None);
    }
    if let Some(num) = crate::expr::parse_number(trimmed).and_then(|v| v.as_f64()) {
        entry.value = Some(num);
    }
    entry.expr_resolved = Some(trimmed.to_owned());
    (entry, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn setter_methods() {
        let src = indoc! {r#"
            inst:AddComponent("weapon")
            inst.components.weapon:SetDamage(TUNING.SPEAR_DAMAGE)
            inst:AddComponent("finiteuses")
            inst.components.finiteuses:SetMaxUses(TUNING.SPEAR_USES)
            inst.components.finiteuses:SetUses(TUNING.SPEAR_USES)
        "#};
        let stats = extract_stat_exprs(src);
        assert_eq!(stats["weapon_damage"], "TUNING.SPEAR_DAMAGE");
        assert_eq!(stats["uses_max"], "TUNING.SPEAR_USES");
    }

    #[test]
    fn aliased_setter() {
        let src = indoc! {r#"
            local weapon = inst:AddComponent("weapon")
            weapon:SetDamage(34)
        "#};
        let stats = extract_stat_exprs(src);
        assert_eq!(stats["weapon_damage"], "34");
    }

    #[test]
    fn property_assignment() {
        let src = indoc! {r#"
            inst:AddComponent("equippable")
            inst.components.equippable.dapperness = TUNING.DAPPERNESS_SMALL
            inst.components.equippable.walkspeedmult = 1.3
        "#};
        let stats = extract_stat_exprs(src);
        assert_eq!(stats["dapperness"], "TUNING.DAPPERNESS_SMALL");
        assert_eq!(stats["equip_walk_speed_mult"], "1.3");
    }

    #[test]
    fn tuning_beats_literal_on_conflict() {
        let src = indoc! {r#"
            inst:AddComponent("health")
            inst.components.health:SetMaxHealth(100)
            inst.components.health:SetMaxHealth(TUNING.SPIDER_HEALTH)
            inst.components.health:SetMaxHealth(some_variable)
        "#};
        let stats = extract_stat_exprs(src);
        assert_eq!(stats["health_max"], "TUNING.SPIDER_HEALTH");
    }

    #[test]
    fn multi_arg_mapping() {
        let src = indoc! {r#"
            inst:AddComponent("combat")
            inst.components.combat:SetRange(3, 5)
        "#};
        let stats = extract_stat_exprs(src);
        assert_eq!(stats["attack_range"], "3");
        assert_eq!(stats["attack_range_max"], "5");
    }

    #[test]
    fn assignment_scan_stops_at_line_end() {
        let clean = "x = TUNING.A * 2\ny = 3";
        assert_eq!(scan_assignment_expr(clean, 3), "TUNING.A * 2");
        let clean = "x = fn(1,\n 2); y = 3";
        assert_eq!(scan_assignment_expr(clean, 3), "fn(1,\n 2)");
    }

    #[test]
    fn resolve_entry_with_tuning() {
        let tuning = TuningResolver::new("TUNING.SPEAR_DAMAGE = 34");
        let (entry, trace) = resolve_stat_entry(
            "weapon_damage",
            "TUNING.SPEAR_DAMAGE",
            &tuning,
            Some("item:spear:stat:weapon_damage".into()),
        );
        assert_eq!(entry.value, Some(34.0));
        assert_eq!(entry.expr_resolved.as_deref(), Some("34"));
        assert!(trace.is_some());
        assert_eq!(entry.trace_key.as_deref(), Some("item:spear:stat:weapon_damage"));
    }
}
