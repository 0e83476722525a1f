//! Tag inference and overrides
//!
//! Raw prefab tags and components are folded into a small, queryable tag
//! profile: one exclusive `kind`, plus open `categories`/`behaviors`/
//! `sources`/`slots` sets. A hand-maintained override list patches the
//! inevitable misclassifications by id glob.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum::Display;

/// Exclusive coarse classification of a catalog item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Kind {
    Character,
    Creature,
    Structure,
    Plant,
    Item,
    Fx,
    #[default]
    Unknown,
}

const CREATURE_TAGS: &[&str] = &[
    "monster",
    "animal",
    "smallcreature",
    "largecreature",
    "epic",
    "hostile",
    "bird",
    "scarytoprey",
];

const PLANT_TAGS: &[&str] = &["plant", "tree", "crop", "flower", "berrybush", "mushroom"];

const STRUCTURE_TAGS: &[&str] = &["structure", "wall", "house", "ruins"];

const FX_TAGS: &[&str] = &["fx", "noclick", "notarget"];

const COMP_BEHAVIORS: &[(&str, &str)] = &[
    ("equippable", "equippable"),
    ("edible", "edible"),
    ("stackable", "stackable"),
    ("burnable", "burnable"),
    ("perishable", "perishable"),
    ("repairable", "repairable"),
    ("fuel", "fuel"),
    ("tradable", "tradable"),
    ("hauntable", "hauntable"),
    ("deployable", "deployable"),
];

const COMP_CATEGORIES: &[(&str, &str)] = &[
    ("weapon", "weapon"),
    ("armor", "armor"),
    ("edible", "food"),
    ("container", "container"),
    ("inventory", "container"),
    ("light", "light"),
    ("fueled", "light"),
    ("deployable", "deployable"),
    ("trap", "trap"),
    ("boat", "boat"),
    ("farmplanttendable", "farm"),
    ("tool", "tool"),
];

const TAG_CATEGORIES: &[(&str, &str)] = &[
    ("weapon", "weapon"),
    ("armor", "armor"),
    ("food", "food"),
    ("cookable", "food"),
    ("magic", "magic"),
    ("container", "container"),
    ("boat", "boat"),
    ("decor", "decor"),
    ("toy", "toy"),
    ("cattoy", "toy"),
    ("light", "light"),
    ("deploykititem", "deployable"),
];

/// Derived tag profile of one catalog item.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TagProfile {
    pub kind: Kind,
    pub categories: BTreeSet<String>,
    pub behaviors: BTreeSet<String>,
    pub sources: BTreeSet<String>,
    pub slots: BTreeSet<String>,
}

fn any_tag(tags: &BTreeSet<String>, wanted: &[&str]) -> bool {
    wanted.iter().any(|t| tags.contains(*t))
}

fn pick_kind(tags: &BTreeSet<String>, components: &BTreeSet<String>) -> Kind {
    if tags.contains("character") {
        return Kind::Character;
    }
    let combat_ready = ["brain", "health", "combat"]
        .iter()
        .all(|c| components.contains(*c));
    if any_tag(tags, CREATURE_TAGS) || combat_ready {
        return Kind::Creature;
    }
    if any_tag(tags, STRUCTURE_TAGS) {
        return Kind::Structure;
    }
    if any_tag(tags, PLANT_TAGS) || components.contains("pickable") || components.contains("crop") {
        return Kind::Plant;
    }
    if any_tag(tags, FX_TAGS) {
        return Kind::Fx;
    }
    if components.contains("inventoryitem") {
        return Kind::Item;
    }
    Kind::Unknown
}

/// Folds components/tags/sources into a [`TagProfile`].
pub fn infer_tags(
    components: &BTreeSet<String>,
    tags: &BTreeSet<String>,
    sources: &BTreeSet<String>,
) -> TagProfile {
    let mut profile = TagProfile {
        kind: pick_kind(tags, components),
        ..TagProfile::default()
    };

    for component in components {
        if let Some((_, b)) = COMP_BEHAVIORS.iter().find(|(c, _)| c == component) {
            profile.behaviors.insert((*b).to_owned());
        }
        if let Some((_, cat)) = COMP_CATEGORIES.iter().find(|(c, _)| c == component) {
            profile.categories.insert((*cat).to_owned());
        }
    }

    for tag in tags {
        if let Some((_, cat)) = TAG_CATEGORIES.iter().find(|(t, _)| t == tag) {
            profile.categories.insert((*cat).to_owned());
        }
    }

    // food category without an edible component means a cooking resource
    if profile.kind == Kind::Item
        && profile.categories.contains("food")
        && !profile.behaviors.contains("edible")
    {
        profile.categories.insert("resource".to_owned());
    }

    profile.sources.extend(sources.iter().cloned());
    profile
}

/// Fields an override rule can patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideFields {
    pub kind: Option<Kind>,
    pub categories: Option<Vec<String>>,
    pub behaviors: Option<Vec<String>>,
    pub sources: Option<Vec<String>>,
    pub slots: Option<Vec<String>>,
}

/// One override rule; the first rule whose glob matches an id fires.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideRule {
    #[serde(rename = "match")]
    pub pattern: String,
    pub set: OverrideFields,
    pub add: OverrideFields,
    pub remove: OverrideFields,
}

/// Parses an override rule list from its JSON file contents
/// (`{"rules": [...]}`); a missing or malformed document is an empty list.
pub fn parse_overrides(text: &str) -> Vec<OverrideRule> {
    #[derive(Deserialize)]
    struct Doc {
        #[serde(default)]
        rules: Vec<OverrideRule>,
    }
    match serde_json::from_str::<Doc>(text) {
        Ok(doc) => doc.rules,
        Err(err) => {
            tracing::warn!(%err, "ignoring malformed tag override document");
            Vec::new()
        }
    }
}

/// Shell-style glob match supporting `*` and `?`.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0usize, 0usize);
    let (mut star, mut mark) = (usize::MAX, 0usize);

    while t < txt.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = p;
            mark = t;
            p += 1;
        } else if star != usize::MAX {
            p = star + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }
    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

fn apply_set_field(target: &mut BTreeSet<String>, fields: &Option<Vec<String>>) {
    if let Some(values) = fields {
        target.clear();
        target.extend(values.iter().filter(|v| !v.is_empty()).cloned());
    }
}

fn apply_add_remove(target: &mut BTreeSet<String>, add: &Option<Vec<String>>, remove: &Option<Vec<String>>) {
    if let Some(values) = add {
        target.extend(values.iter().filter(|v| !v.is_empty()).cloned());
    }
    if let Some(values) = remove {
        for v in values {
            target.remove(v);
        }
    }
}

/// Applies the first matching rule to `profile`. `set` replaces, `add`
/// unions, `remove` subtracts.
pub fn apply_overrides(item_id: &str, profile: &mut TagProfile, rules: &[OverrideRule]) {
    let id = item_id.trim();
    if id.is_empty() {
        return;
    }

    for rule in rules {
        let pattern = rule.pattern.trim();
        if pattern.is_empty() {
            continue;
        }
        if pattern != id && !glob_match(pattern, id) {
            continue;
        }

        if let Some(kind) = rule.set.kind {
            profile.kind = kind;
        }
        apply_set_field(&mut profile.categories, &rule.set.categories);
        apply_set_field(&mut profile.behaviors, &rule.set.behaviors);
        apply_set_field(&mut profile.sources, &rule.set.sources);
        apply_set_field(&mut profile.slots, &rule.set.slots);

        apply_add_remove(&mut profile.categories, &rule.add.categories, &rule.remove.categories);
        apply_add_remove(&mut profile.behaviors, &rule.add.behaviors, &rule.remove.behaviors);
        apply_add_remove(&mut profile.sources, &rule.add.sources, &rule.remove.sources);
        apply_add_remove(&mut profile.slots, &rule.add.slots, &rule.remove.slots);
        break;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn kind_selection_order() {
        assert_eq!(pick_kind(&set(&["character", "monster"]), &set(&[])), Kind::Character);
        assert_eq!(pick_kind(&set(&["monster"]), &set(&[])), Kind::Creature);
        assert_eq!(pick_kind(&set(&[]), &set(&["brain", "health", "combat"])), Kind::Creature);
        assert_eq!(pick_kind(&set(&["structure"]), &set(&[])), Kind::Structure);
        assert_eq!(pick_kind(&set(&[]), &set(&["pickable"])), Kind::Plant);
        assert_eq!(pick_kind(&set(&["fx"]), &set(&[])), Kind::Fx);
        assert_eq!(pick_kind(&set(&[]), &set(&["inventoryitem"])), Kind::Item);
        assert_eq!(pick_kind(&set(&[]), &set(&[])), Kind::Unknown);
    }

    #[test]
    fn behaviors_and_categories() {
        let profile = infer_tags(
            &set(&["inventoryitem", "weapon", "equippable"]),
            &set(&["sharp"]),
            &set(&["craft"]),
        );
        assert_eq!(profile.kind, Kind::Item);
        assert!(profile.categories.contains("weapon"));
        assert!(profile.behaviors.contains("equippable"));
        assert!(profile.sources.contains("craft"));
    }

    #[test]
    fn food_without_edible_is_resource() {
        let profile = infer_tags(&set(&["inventoryitem"]), &set(&["cookable"]), &set(&[]));
        assert!(profile.categories.contains("food"));
        assert!(profile.categories.contains("resource"));
    }

    #[test]
    fn globs() {
        assert!(glob_match("xyz", "xyz"));
        assert!(glob_match("spider*", "spider_warrior"));
        assert!(glob_match("*_cooked", "fish_cooked"));
        assert!(glob_match("ab?", "abc"));
        assert!(!glob_match("spider*", "wasp"));
        assert!(!glob_match("ab?", "ab"));
    }

    #[test]
    fn override_set_and_add() {
        let rules = parse_overrides(
            r#"{"rules": [{"match": "xyz", "set": {"kind": "creature"}, "add": {"categories": ["boss"]}}]}"#,
        );
        let mut profile = infer_tags(&set(&["inventoryitem"]), &set(&[]), &set(&[]));
        apply_overrides("xyz", &mut profile, &rules);
        assert_eq!(profile.kind, Kind::Creature);
        assert!(profile.categories.contains("boss"));
        // non-matching id untouched
        let mut other = TagProfile::default();
        apply_overrides("abc", &mut other, &rules);
        assert_eq!(other.kind, Kind::Unknown);
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = parse_overrides(
            r#"{"rules": [
                {"match": "spider*", "set": {"kind": "creature"}},
                {"match": "spider_warrior", "set": {"kind": "item"}}
            ]}"#,
        );
        let mut profile = TagProfile::default();
        apply_overrides("spider_warrior", &mut profile, &rules);
        assert_eq!(profile.kind, Kind::Creature);
    }

    #[test]
    fn malformed_overrides_are_empty() {
        assert!(parse_overrides("not json").is_empty());
        assert!(parse_overrides("{}").is_empty());
    }
}
