//! World-generation extraction
//!
//! Rooms, tasks, task sets, level presets and start locations are all
//! declared as `AddXxx("id", { ... })` calls in `scripts/map/`. The table
//! argument is frequently a reference to a `local` table declared earlier in
//! the file, so extraction first maps local table declarations and resolves
//! through them.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value as Json;

use crate::calls::CallScanner;
use crate::expr::{parse_expr, parse_string, Table, Value};
use crate::mount::SourceMount;
use crate::scan::{find_matching, strip_comments};

/// A room: terrain patch with weighted spawn contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Room {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Json>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<Json>,
}

/// A worldgen task: a group of rooms gated by lock/key progression.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Task {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub locks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub keys_given: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_choices: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_bg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_room: Option<String>,
}

/// A task set: the task list used by one world type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskSet {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tasks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub optionaltasks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numoptionaltasks: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub valid_start_tasks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub required_prefabs: Vec<String>,
}

/// A level preset, either worldgen or settings flavored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LevelPreset {
    pub id: String,
    /// `AddLevel` / `AddWorldGenLevel` / `AddSettingsPreset` first argument.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_set: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_location: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub required_setpieces: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub random_set_pieces: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numrandom_set_pieces: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overrides: Option<Json>,
}

/// A start location preset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StartLocation {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_setpeice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_node: Option<Json>,
}

/// Everything worldgen in one place.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorldgenIndex {
    pub rooms: IndexMap<String, Room>,
    pub tasks: IndexMap<String, Task>,
    pub tasksets: IndexMap<String, TaskSet>,
    pub worldgen_presets: IndexMap<String, LevelPreset>,
    pub settings_presets: IndexMap<String, LevelPreset>,
    pub start_locations: IndexMap<String, StartLocation>,
}

static LOCAL_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^A-Za-z0-9_])(?:local\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*=\s*\{").unwrap());

/// Maps `local name = { ... }` declarations to their brace-delimited text.
pub(crate) fn extract_local_tables(content: &str) -> IndexMap<String, String> {
    let text = strip_comments(content);
    let mut out = IndexMap::new();
    let mut i = 0;
    while let Some(m) = LOCAL_TABLE_RE.captures_at(&text, i) {
        let whole = m.get(0).expect("group 0");
        let name = m.get(1).expect("group 1").as_str();
        let Some(open) = text[whole.start()..].find('{').map(|o| whole.start() + o) else {
            break;
        };
        match find_matching(&text, open, b'{') {
            Some(close) => {
                out.insert(name.to_owned(), text[open..=close].to_owned());
                i = close + 1;
            }
            None => i = whole.end(),
        }
    }
    out
}

/// Resolves a table argument: either a table literal or the name of a local
/// table declared earlier in the file.
fn resolve_table(expr: &str, locals: &IndexMap<String, String>) -> Option<Table> {
    let expr = expr.trim();
    if let Some(raw) = locals.get(expr) {
        if let Value::Table(t) = parse_expr(raw) {
            return Some(t);
        }
    }
    match parse_expr(expr) {
        Value::Table(t) => Some(t),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Table(t)) = value else {
        return Vec::new();
    };
    t.array
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_owned)
        .collect()
}

fn json_field(value: Option<&Value>) -> Option<Json> {
    value.map(Value::flatten)
}

fn text_field(table: &Table, key: &str) -> Option<String> {
    match table.get(key) {
        Some(Value::Str(s)) | Some(Value::Raw(s)) => Some(s.clone()),
        _ => None,
    }
}

fn arg_id(arg: &str) -> Option<String> {
    let id = parse_string(arg)?;
    let id = id.trim().to_owned();
    (!id.is_empty()).then_some(id)
}

/// Extracts the whole worldgen surface of a mount.
#[tracing::instrument(level = "debug", skip_all)]
pub fn scan_worldgen(mount: &dyn SourceMount) -> WorldgenIndex {
    let mut index = WorldgenIndex::default();

    for path in mount.file_list() {
        if !path.starts_with("scripts/map/") || !path.ends_with(".lua") {
            continue;
        }
        let Some(content) = mount.read(&path) else {
            continue;
        };

        if path.starts_with("scripts/map/rooms") && content.contains("AddRoom") {
            extract_rooms(&content, &mut index);
        }
        if path.starts_with("scripts/map/tasksets") && content.contains("AddTaskSet") {
            extract_tasksets(&content, &mut index);
        } else if path.starts_with("scripts/map/tasks") && content.contains("AddTask") {
            extract_tasks(&content, &mut index);
        }
        if path.starts_with("scripts/map/levels")
            && ["AddLevel", "AddWorldGenLevel", "AddSettingsPreset"]
                .iter()
                .any(|t| content.contains(t))
        {
            extract_presets(&content, &mut index);
        }
        if path == "scripts/map/startlocations.lua" && content.contains("AddStartLocation") {
            extract_start_locations(&content, &mut index);
        }
    }

    index
}

fn extract_rooms(content: &str, index: &mut WorldgenIndex) {
    let locals = extract_local_tables(content);
    let scanner = CallScanner::new(content);
    for call in scanner.calls(&["AddRoom"]) {
        if call.arg_list.len() < 2 {
            continue;
        }
        let Some(id) = arg_id(&call.arg_list[0]) else { continue };
        let Some(table) = resolve_table(&call.arg_list[1], &locals) else {
            continue;
        };
        index.rooms.insert(
            id.clone(),
            Room {
                id,
                value: json_field(table.get("value")),
                tags: string_list(table.get("tags")),
                contents: json_field(table.get("contents")),
            },
        );
    }
}

fn extract_tasks(content: &str, index: &mut WorldgenIndex) {
    let locals = extract_local_tables(content);
    let scanner = CallScanner::new(content);
    for call in scanner.calls(&["AddTask"]) {
        if call.arg_list.len() < 2 {
            continue;
        }
        let Some(id) = arg_id(&call.arg_list[0]) else { continue };
        let Some(table) = resolve_table(&call.arg_list[1], &locals) else {
            continue;
        };
        index.tasks.insert(
            id.clone(),
            Task {
                id,
                locks: raw_or_string_list(table.get("locks")),
                keys_given: raw_or_string_list(table.get("keys_given")),
                room_choices: json_field(table.get("room_choices")),
                room_bg: text_field(&table, "room_bg"),
                background_room: text_field(&table, "background_room"),
            },
        );
    }
}

/// Lock/key lists hold barewords (`LOCKS.TIER1`); keep their raw text too.
fn raw_or_string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Table(t)) = value else {
        return Vec::new();
    };
    t.array
        .iter()
        .filter_map(|v| match v {
            Value::Str(s) | Value::Raw(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

fn extract_tasksets(content: &str, index: &mut WorldgenIndex) {
    let scanner = CallScanner::new(content);
    for call in scanner.calls(&["AddTaskSet"]) {
        if call.arg_list.len() < 2 {
            continue;
        }
        let Some(id) = arg_id(&call.arg_list[0]) else { continue };
        let Some(table) = resolve_table(&call.arg_list[1], &IndexMap::new()) else {
            continue;
        };
        index.tasksets.insert(
            id.clone(),
            TaskSet {
                id,
                name: text_field(&table, "name"),
                location: text_field(&table, "location"),
                tasks: string_list(table.get("tasks")),
                optionaltasks: string_list(table.get("optionaltasks")),
                numoptionaltasks: table.get_f64("numoptionaltasks"),
                valid_start_tasks: string_list(table.get("valid_start_tasks")),
                required_prefabs: string_list(table.get("required_prefabs")),
            },
        );
    }
}

fn extract_presets(content: &str, index: &mut WorldgenIndex) {
    let locals = extract_local_tables(content);
    let scanner = CallScanner::new(content);
    for call in scanner.calls(&["AddLevel", "AddWorldGenLevel", "AddSettingsPreset"]) {
        if call.arg_list.len() < 2 {
            continue;
        }
        let level_type = match parse_expr(&call.arg_list[0]) {
            Value::Str(s) | Value::Raw(s) => Some(s),
            _ => None,
        };
        let Some(table) = resolve_table(&call.arg_list[1], &locals) else {
            continue;
        };
        let Some(id) = text_field(&table, "id") else { continue };

        let overrides = table.get("overrides").and_then(Value::as_table);
        let preset = LevelPreset {
            id: id.clone(),
            level_type,
            name: text_field(&table, "name"),
            desc: text_field(&table, "desc"),
            location: text_field(&table, "location"),
            version: table.get_f64("version"),
            task_set: overrides.and_then(|o| text_field(o, "task_set")),
            start_location: overrides.and_then(|o| text_field(o, "start_location")),
            required_setpieces: string_list(table.get("required_setpieces")),
            random_set_pieces: string_list(table.get("random_set_pieces")),
            numrandom_set_pieces: table.get_f64("numrandom_set_pieces"),
            overrides: overrides.map(|o| Value::Table(o.clone()).flatten()),
        };

        if call.name == "AddSettingsPreset" {
            index.settings_presets.insert(id, preset);
        } else {
            index.worldgen_presets.insert(id, preset);
        }
    }
}

fn extract_start_locations(content: &str, index: &mut WorldgenIndex) {
    let locals = extract_local_tables(content);
    let scanner = CallScanner::new(content);
    for call in scanner.calls(&["AddStartLocation"]) {
        if call.arg_list.len() < 2 {
            continue;
        }
        let Some(id) = arg_id(&call.arg_list[0]) else { continue };
        let Some(table) = resolve_table(&call.arg_list[1], &locals) else {
            continue;
        };
        index.start_locations.insert(
            id.clone(),
            StartLocation {
                id,
                name: text_field(&table, "name"),
                location: text_field(&table, "location"),
                start_setpeice: text_field(&table, "start_setpeice"),
                start_node: json_field(table.get("start_node")),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::MemoryMount;
    use indoc::indoc;

    #[test]
    fn rooms_with_local_table() {
        let src = indoc! {r#"
            local forest_contents = {
                value = WORLD_TILES.FOREST,
                tags = {"ExitPiece", "Chester_Eyebone"},
                contents = {
                    distributepercent = 0.3,
                    distributeprefabs = { evergreen = 6, berrybush = 0.5 },
                },
            }
            AddRoom("Forest", forest_contents)
            AddRoom("DeepForest", {
                value = WORLD_TILES.FOREST,
                contents = { distributeprefabs = { evergreen = 9 } },
            })
        "#};
        let mount = MemoryMount::from([("scripts/map/rooms/forest.lua", src)]);
        let index = scan_worldgen(&mount);
        assert_eq!(index.rooms.len(), 2);
        let forest = &index.rooms["Forest"];
        assert_eq!(forest.tags, ["ExitPiece", "Chester_Eyebone"]);
        let contents = forest.contents.as_ref().unwrap();
        assert_eq!(contents["distributeprefabs"]["evergreen"], 6);
    }

    #[test]
    fn tasks_and_tasksets() {
        let mount = MemoryMount::from([
            (
                "scripts/map/tasks/basic.lua",
                indoc! {r#"
                    AddTask("Make a pick", {
                        locks = {LOCKS.NONE},
                        keys_given = {KEYS.PICKAXE, KEYS.GRASS},
                        room_choices = { ["Forest"] = 1, ["Rocky"] = 1 },
                        room_bg = WORLD_TILES.GRASS,
                    })
                "#},
            ),
            (
                "scripts/map/tasksets/forest.lua",
                indoc! {r#"
                    AddTaskSet("default", {
                        name = "Together Forever",
                        location = "forest",
                        tasks = { "Make a pick", "Dig that rock" },
                        numoptionaltasks = 4,
                    })
                "#},
            ),
        ]);
        let index = scan_worldgen(&mount);
        let task = &index.tasks["Make a pick"];
        assert_eq!(task.locks, ["LOCKS.NONE"]);
        assert_eq!(task.keys_given.len(), 2);
        let ts = &index.tasksets["default"];
        assert_eq!(ts.tasks, ["Make a pick", "Dig that rock"]);
        assert_eq!(ts.numoptionaltasks, Some(4.0));
    }

    #[test]
    fn levels_split_by_kind() {
        let src = indoc! {r#"
            AddLevel(LEVELTYPE.SURVIVAL, {
                id = "SURVIVAL_TOGETHER",
                name = STRINGS.UI.CUSTOMIZATIONSCREEN.PRESETLEVELS.SURVIVAL_TOGETHER,
                location = "forest",
                version = 4,
                overrides = { task_set = "default", start_location = "default" },
            })
            AddSettingsPreset(LEVELTYPE.SURVIVAL, {
                id = "SURVIVAL_SETTINGS",
                overrides = { autumn = "verylongseason" },
            })
        "#};
        let mount = MemoryMount::from([("scripts/map/levels.lua", src)]);
        let index = scan_worldgen(&mount);
        let wg = &index.worldgen_presets["SURVIVAL_TOGETHER"];
        assert_eq!(wg.task_set.as_deref(), Some("default"));
        assert_eq!(wg.version, Some(4.0));
        assert_eq!(wg.level_type.as_deref(), Some("LEVELTYPE.SURVIVAL"));
        assert!(index.settings_presets.contains_key("SURVIVAL_SETTINGS"));
        assert!(!index.worldgen_presets.contains_key("SURVIVAL_SETTINGS"));
    }

    #[test]
    fn start_locations() {
        let src = indoc! {r#"
            AddStartLocation("default", {
                name = STRINGS.UI.SANDBOXMENU.DEFAULTSTART,
                location = "forest",
                start_setpeice = "DefaultStart",
                start_node = {"Clearing", "BGGrass"},
            })
        "#};
        let mount = MemoryMount::from([("scripts/map/startlocations.lua", src)]);
        let index = scan_worldgen(&mount);
        let start = &index.start_locations["default"];
        assert_eq!(start.start_setpeice.as_deref(), Some("DefaultStart"));
        assert_eq!(start.start_node, Some(serde_json::json!(["Clearing", "BGGrass"])));
    }
}
