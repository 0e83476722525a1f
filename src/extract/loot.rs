//! Loot table extraction
//!
//! Loot comes in three declarative shapes: shared loot tables
//! (`SetSharedLootTable("id", { {"item", chance}, ... })`), per-entity chance
//! loot (`AddChanceLoot("item", chance)`) and weighted random loot
//! (`AddRandomLoot("item", weight)`).

use std::collections::BTreeSet;

use serde::Serialize;
use strum::Display;

use crate::calls::CallScanner;
use crate::expr::{parse_expr, parse_string, Value};
use crate::mount::SourceMount;

use super::clean_id;

/// How a loot entry was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum LootMethod {
    TableData,
    Chance,
    Random,
}

/// One loot drop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LootEntry {
    pub item: String,
    pub method: LootMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// Loot extracted from one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LootFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    pub entries: Vec<LootEntry>,
}

/// Extracts loot declarations from one file.
pub fn parse_loot(content: &str) -> LootFile {
    let scanner = CallScanner::new(content);
    let mut out = LootFile::default();

    for call in scanner.calls(&["SetSharedLootTable"]) {
        if let Some(name) = call.arg_list.first().and_then(|a| parse_string(a)) {
            out.table_name = Some(name);
        }
        let Some(rows) = call.arg_list.get(1) else {
            continue;
        };
        let Value::Table(table) = parse_expr(rows) else {
            continue;
        };
        for row in table.array.iter().filter_map(Value::as_table) {
            let (Some(item), Some(chance)) = (
                row.array.first().and_then(Value::as_str),
                row.array.get(1).and_then(Value::as_f64),
            ) else {
                continue;
            };
            out.entries.push(LootEntry {
                item: item.to_owned(),
                method: LootMethod::TableData,
                chance: Some(chance),
                weight: None,
            });
        }
    }

    for call in scanner.calls(&["AddChanceLoot"]) {
        if call.arg_list.len() < 2 {
            continue;
        }
        if let (Some(item), Some(chance)) = (
            parse_string(&call.arg_list[0]),
            parse_expr(&call.arg_list[1]).as_f64(),
        ) {
            out.entries.push(LootEntry {
                item,
                method: LootMethod::Chance,
                chance: Some(chance),
                weight: None,
            });
        }
    }

    for call in scanner.calls(&["AddRandomLoot", "AddRandomLootTable"]) {
        if call.arg_list.len() < 2 {
            continue;
        }
        if let (Some(item), Some(weight)) = (
            parse_string(&call.arg_list[0]),
            parse_expr(&call.arg_list[1]).as_f64(),
        ) {
            out.entries.push(LootEntry {
                item,
                method: LootMethod::Random,
                chance: None,
                weight: Some(weight),
            });
        }
    }

    out
}

const LOOT_TOKENS: &[&str] = &[
    "SetSharedLootTable",
    "AddChanceLoot",
    "AddRandomLoot",
    "AddRandomLootTable",
];

/// Scans the mount for every item id that appears in any loot declaration.
/// Only loot- and prefab-shaped paths are read, and only when a loot token
/// appears in the raw text.
#[tracing::instrument(level = "debug", skip_all)]
pub fn scan_loot_items(mount: &dyn SourceMount) -> BTreeSet<String> {
    let mut items = BTreeSet::new();

    for path in mount.file_list() {
        if !path.ends_with(".lua") {
            continue;
        }
        if !path.contains("loot") && !path.contains("prefabs") {
            continue;
        }
        let Some(content) = mount.read(&path) else {
            continue;
        };
        if !LOOT_TOKENS.iter().any(|tok| content.contains(tok)) {
            continue;
        }
        for entry in parse_loot(&content).entries {
            if let Some(id) = clean_id(&entry.item) {
                items.insert(id);
            }
        }
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn shared_loot_table() {
        let src = indoc! {r#"
            SetSharedLootTable('spider', {
                {'monstermeat', 0.5},
                {'silk', 0.25},
                {'spidergland', 0.25},
            })
        "#};
        let loot = parse_loot(src);
        assert_eq!(loot.table_name.as_deref(), Some("spider"));
        assert_eq!(loot.entries.len(), 3);
        assert_eq!(loot.entries[0].item, "monstermeat");
        assert_eq!(loot.entries[0].chance, Some(0.5));
        assert_eq!(loot.entries[0].method, LootMethod::TableData);
    }

    #[test]
    fn chance_and_random() {
        let src = indoc! {r#"
            inst.components.lootdropper:AddChanceLoot("carrot", 0.4)
            inst.components.lootdropper:AddRandomLoot("meat", 3)
        "#};
        let loot = parse_loot(src);
        assert_eq!(loot.entries.len(), 2);
        assert_eq!(loot.entries[0].method, LootMethod::Chance);
        assert_eq!(loot.entries[1].method, LootMethod::Random);
        assert_eq!(loot.entries[1].weight, Some(3.0));
    }

    #[test]
    fn non_numeric_chance_skipped() {
        let loot = parse_loot("AddChanceLoot(\"x\", chance_var)");
        assert!(loot.entries.is_empty());
    }
}
