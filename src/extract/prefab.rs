//! Prefab extraction
//!
//! A prefab script declares one or more entity templates via `Prefab("id",
//! fn, assets)` plus the component/tag wiring inside the constructor
//! function. One file can declare many prefabs and one prefab can be touched
//! by many files, so extraction happens per file and is aggregated per id.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::calls::CallScanner;
use crate::expr::parse_string;
use crate::mount::SourceMount;
use crate::scan::strip_comments;

use super::{clean_id, file_stem};

/// A declared asset reference, e.g. `Asset("IMAGE", "images/twigs.tex")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Asset {
    /// Asset kind as declared: `ATLAS`, `IMAGE`, `SOUND`, ...
    pub kind: String,
    pub path: String,
}

/// Everything extracted from a single prefab file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrefabFile {
    /// Valid prefab ids declared by `Prefab(...)` calls.
    pub prefabs: Vec<String>,
    /// `Prefab(...)` calls whose first argument was not a valid id.
    pub prefabs_skipped: usize,
    pub assets: Vec<Asset>,
    pub components: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub brain: Option<String>,
    pub stategraph: Option<String>,
    /// Top-level `MakeXxx(...)` helper calls.
    pub helpers: Vec<String>,
    /// Events hooked with `EventHandler("name", ...)`.
    pub events: Vec<String>,
}

/// Aggregated record for one prefab id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrefabRecord {
    pub files: Vec<String>,
    pub components: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub assets: Vec<Asset>,
    pub brains: BTreeSet<String>,
    pub stategraphs: BTreeSet<String>,
    pub helpers: BTreeSet<String>,
}

/// All prefabs of a mount, keyed by id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PrefabIndex {
    pub items: IndexMap<String, PrefabRecord>,
    pub total_files: usize,
    pub prefabs_skipped: usize,
}

static REQUIRE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"require\s*\(?\s*['"]([^'"]+)['"]"#).unwrap());
static HELPER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(Make[A-Za-z0-9_]+)\s*\(").unwrap());

/// Extracts one prefab file.
pub fn parse_prefab_file(content: &str) -> PrefabFile {
    let clean = strip_comments(content);
    let scanner = CallScanner::new(&clean);
    let mut out = PrefabFile::default();

    for call in scanner.calls(&["Prefab"]) {
        let Some(arg) = call.arg_list.first() else {
            continue;
        };
        match parse_string(arg).as_deref().and_then(clean_id) {
            Some(id) => {
                if !out.prefabs.contains(&id) {
                    out.prefabs.push(id);
                }
            }
            None => out.prefabs_skipped += 1,
        }
    }

    for call in scanner.calls(&["Asset"]) {
        if call.arg_list.len() < 2 {
            continue;
        }
        if let (Some(kind), Some(path)) = (
            parse_string(&call.arg_list[0]),
            parse_string(&call.arg_list[1]),
        ) {
            out.assets.push(Asset { kind, path });
        }
    }

    for call in scanner.calls(&["AddComponent"]) {
        if let Some(name) = call.arg_list.first().and_then(|a| parse_string(a)) {
            out.components.insert(name.trim().to_ascii_lowercase());
        }
    }

    for call in scanner.calls(&["AddTag"]) {
        if let Some(tag) = call.arg_list.first().and_then(|a| parse_string(a)) {
            out.tags.insert(tag.trim().to_ascii_lowercase());
        }
    }

    if let Some(call) = scanner.calls(&["SetStateGraph"]).into_iter().next() {
        out.stategraph = call.arg_list.first().and_then(|a| parse_string(a));
    }

    if let Some(call) = scanner.calls(&["SetBrain"]).into_iter().next() {
        // SetBrain(require("brains/spiderbrain"))
        out.brain = call
            .arg_list
            .first()
            .and_then(|a| REQUIRE_RE.captures(a))
            .map(|c| c[1].to_owned());
    }

    for call in scanner.calls(&["EventHandler"]) {
        if let Some(ev) = call.arg_list.first().and_then(|a| parse_string(a)) {
            if !out.events.contains(&ev) {
                out.events.push(ev);
            }
        }
    }

    let mut helpers: Vec<String> = HELPER_RE
        .captures_iter(&clean)
        .map(|c| c[1].to_owned())
        .collect();
    helpers.sort_unstable();
    helpers.dedup();
    out.helpers = helpers;

    out
}

/// Walks every `scripts/prefabs/*.lua` file of the mount and aggregates
/// per-prefab records. Files that declare no `Prefab(...)` fall back to the
/// filename stem when it is a valid id.
#[tracing::instrument(level = "debug", skip_all)]
pub fn scan_prefabs(mount: &dyn SourceMount) -> PrefabIndex {
    let mut index = PrefabIndex::default();

    for path in mount.file_list() {
        if !path.starts_with("scripts/prefabs/") || !path.ends_with(".lua") {
            continue;
        }
        let Some(content) = mount.read(&path) else {
            continue;
        };
        if content.is_empty() {
            continue;
        }
        index.total_files += 1;

        let parsed = parse_prefab_file(&content);
        index.prefabs_skipped += parsed.prefabs_skipped;

        let mut ids = parsed.prefabs.clone();
        if ids.is_empty() {
            if let Some(id) = clean_id(file_stem(&path)) {
                ids.push(id);
            }
        }

        for id in ids {
            let entry = index.items.entry(id).or_default();
            if !entry.files.contains(&path) {
                entry.files.push(path.clone());
            }
            entry.components.extend(parsed.components.iter().cloned());
            entry.tags.extend(parsed.tags.iter().cloned());
            entry.helpers.extend(parsed.helpers.iter().cloned());
            if let Some(brain) = &parsed.brain {
                entry.brains.insert(brain.clone());
            }
            if let Some(sg) = &parsed.stategraph {
                entry.stategraphs.insert(sg.clone());
            }
            for asset in &parsed.assets {
                if !entry.assets.contains(asset) {
                    entry.assets.push(asset.clone());
                }
            }
        }
    }

    index.items.sort_unstable_keys();
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::MemoryMount;
    use indoc::indoc;

    const TWIGS: &str = indoc! {r#"
        local assets = {
            Asset("ATLAS", "images/inventoryimages/twigs.xml"),
            Asset("IMAGE", "images/inventoryimages/twigs.tex"),
        }

        local function fn()
            local inst = CreateEntity()
            inst:AddTag("cattoy")
            MakeInventoryPhysics(inst)
            inst:AddComponent("inventoryitem")
            inst:AddComponent("stackable")
            return inst
        end

        return Prefab("twigs", fn, assets)
    "#};

    #[test]
    fn parses_single_prefab() {
        let parsed = parse_prefab_file(TWIGS);
        assert_eq!(parsed.prefabs, ["twigs"]);
        assert!(parsed.components.contains("inventoryitem"));
        assert!(parsed.components.contains("stackable"));
        assert!(parsed.tags.contains("cattoy"));
        assert_eq!(parsed.assets.len(), 2);
        assert_eq!(parsed.helpers, ["MakeInventoryPhysics"]);
    }

    #[test]
    fn brain_and_stategraph() {
        let src = indoc! {r#"
            inst:SetStateGraph("SGspider")
            inst:SetBrain(require("brains/spiderbrain"))
        "#};
        let parsed = parse_prefab_file(src);
        assert_eq!(parsed.stategraph.as_deref(), Some("SGspider"));
        assert_eq!(parsed.brain.as_deref(), Some("brains/spiderbrain"));
    }

    #[test]
    fn filename_fallback_and_aggregation() {
        let mount = MemoryMount::from([
            ("scripts/prefabs/twigs.lua", TWIGS),
            (
                "scripts/prefabs/twigs_extra.lua",
                "inst:AddComponent(\"fuel\") -- no Prefab call here",
            ),
        ]);
        let index = scan_prefabs(&mount);
        assert_eq!(index.total_files, 2);
        assert!(index.items.contains_key("twigs"));
        // fallback id from the filename stem
        let extra = &index.items["twigs_extra"];
        assert!(extra.components.contains("fuel"));
    }

    #[test]
    fn asset_dedup_across_files() {
        let mount = MemoryMount::from([
            ("scripts/prefabs/a.lua", "Prefab(\"thing\", fn)\nAsset(\"IMAGE\", \"x.tex\")"),
            ("scripts/prefabs/b.lua", "Prefab(\"thing\", fn)\nAsset(\"IMAGE\", \"x.tex\")"),
        ]);
        let index = scan_prefabs(&mount);
        let rec = &index.items["thing"];
        assert_eq!(rec.files.len(), 2);
        assert_eq!(rec.assets.len(), 1);
    }

    #[test]
    fn commented_prefab_ignored() {
        let parsed = parse_prefab_file("-- Prefab(\"ghost\", fn)\nPrefab(\"real\", fn)");
        assert_eq!(parsed.prefabs, ["real"]);
    }
}
