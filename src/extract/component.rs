//! Component definition extraction
//!
//! Components (`scripts/components/*.lua`) define the behavior surface the
//! stat extractor attributes setter calls to. A component file declares a
//! class (`local Health = Class(function(self, inst) ... end)`), methods
//! (`function Health:SetMaxHealth(amount)`), fields (`self.maxhealth = ...`)
//! and listened events.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::calls::CallScanner;
use crate::expr::parse_string;
use crate::mount::SourceMount;
use crate::scan::strip_comments;

use super::file_stem;

/// API surface of one component.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComponentDef {
    /// Component id, from the filename.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub aliases: Vec<String>,
    pub methods: Vec<String>,
    /// `self.x = ...` assignments.
    pub fields: Vec<String>,
    /// Events hooked with `ListenForEvent`.
    pub events: Vec<String>,
    /// `require`d module paths.
    pub requires: Vec<String>,
    pub path: String,
}

static CLASS_ALIAS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:local\s+)?([A-Za-z0-9_]+)\s*=\s*Class\b").unwrap());
static RETURN_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\breturn\s+([A-Za-z0-9_]+)\b").unwrap());
static METHOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bfunction\s+([A-Za-z0-9_]+)[:.]([A-Za-z0-9_]+)\s*\(").unwrap());
static FIELD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bself\.([A-Za-z0-9_]+)\s*=").unwrap());
static REQUIRE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"require\s*\(?\s*["']([^"']+)["']\s*\)?"#).unwrap());

/// Local aliases used when prefab code binds a component to a variable, e.g.
/// `local weapon = inst:AddComponent("weapon")`. Keys are the alias, values
/// the component id.
static ALIAS_ADD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?:local\s+)?([A-Za-z0-9_]+)\s*=\s*(?:inst|self)[.:]AddComponent\(\s*['"]([A-Za-z0-9_]+)['"]"#,
    )
    .unwrap()
});
static ALIAS_REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:local\s+)?([A-Za-z0-9_]+)\s*=\s*(?:inst|self)\.components\.([A-Za-z0-9_]+)")
        .unwrap()
});

fn guess_class_name(component_id: &str) -> String {
    component_id
        .split('_')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut chars = p.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Parses one component file.
pub fn parse_component(content: &str, path: &str) -> ComponentDef {
    let clean = strip_comments(content);
    let id = file_stem(path).trim().to_ascii_lowercase();

    let mut aliases: Vec<String> = CLASS_ALIAS_RE
        .captures_iter(&clean)
        .map(|c| c[1].to_owned())
        .collect();
    aliases.sort_unstable();
    aliases.dedup();

    // an explicit `return Alias` names the class
    let mut class_name = RETURN_NAME_RE
        .captures_iter(&clean)
        .map(|c| c[1].to_owned())
        .find(|cand| aliases.contains(cand));
    if class_name.is_none() {
        class_name = aliases.first().cloned();
    }
    if aliases.is_empty() && !id.is_empty() {
        let guess = guess_class_name(&id);
        class_name = Some(guess.clone());
        aliases.push(guess);
    }

    let mut methods: Vec<String> = METHOD_RE
        .captures_iter(&clean)
        .filter(|c| aliases.is_empty() || aliases.iter().any(|a| a == &c[1]))
        .map(|c| c[2].to_owned())
        .collect();
    methods.sort_unstable();
    methods.dedup();

    let mut fields: Vec<String> = FIELD_RE.captures_iter(&clean).map(|c| c[1].to_owned()).collect();
    fields.sort_unstable();
    fields.dedup();

    let scanner = CallScanner::new(content);
    let mut events: Vec<String> = scanner
        .calls(&["ListenForEvent"])
        .into_iter()
        .filter_map(|call| call.arg_list.first().and_then(|a| parse_string(a)))
        .collect();
    events.sort_unstable();
    events.dedup();

    let requires = REQUIRE_RE
        .captures_iter(&clean)
        .map(|c| c[1].to_owned())
        .collect();

    ComponentDef {
        id,
        class_name,
        aliases,
        methods,
        fields,
        events,
        requires,
        path: path.to_owned(),
    }
}

/// Discovers local component aliases in (comment-stripped) prefab code so
/// stat setters called through a variable still attribute to the right
/// component.
pub(crate) fn component_aliases(clean: &str) -> IndexMap<String, String> {
    let mut aliases = IndexMap::new();
    for re in [&*ALIAS_ADD_RE, &*ALIAS_REF_RE] {
        for caps in re.captures_iter(clean) {
            let alias = caps[1].to_owned();
            let component = caps[2].to_ascii_lowercase();
            aliases.entry(alias).or_insert(component);
        }
    }
    aliases
}

/// Parses every `scripts/components/*.lua` file of the mount.
#[tracing::instrument(level = "debug", skip_all)]
pub fn scan_components(mount: &dyn SourceMount) -> IndexMap<String, ComponentDef> {
    let mut out = IndexMap::new();
    for path in mount.file_list() {
        if !path.starts_with("scripts/components/") || !path.ends_with(".lua") {
            continue;
        }
        let Some(content) = mount.read(&path) else {
            continue;
        };
        let def = parse_component(&content, &path);
        if !def.id.is_empty() {
            out.insert(def.id.clone(), def);
        }
    }
    out.sort_unstable_keys();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const HEALTH: &str = indoc! {r#"
        local Health = Class(function(self, inst)
            self.inst = inst
            self.maxhealth = 100
            self.currenthealth = self.maxhealth
            self.inst:ListenForEvent("attacked", OnAttacked)
        end)

        function Health:SetMaxHealth(amount)
            self.maxhealth = amount
            self.currenthealth = amount
        end

        function Health:DoDelta(amount, overtime)
            self.currenthealth = self.currenthealth + amount
        end

        return Health
    "#};

    #[test]
    fn class_surface() {
        let def = parse_component(HEALTH, "scripts/components/health.lua");
        assert_eq!(def.id, "health");
        assert_eq!(def.class_name.as_deref(), Some("Health"));
        assert_eq!(def.methods, ["DoDelta", "SetMaxHealth"]);
        assert!(def.fields.contains(&"maxhealth".to_owned()));
        assert_eq!(def.events, ["attacked"]);
    }

    #[test]
    fn class_name_guessed_without_class_call() {
        let def = parse_component("-- stub", "scripts/components/finite_uses.lua");
        assert_eq!(def.class_name.as_deref(), Some("FiniteUses"));
    }

    #[test]
    fn alias_discovery() {
        let clean = indoc! {r#"
            local weapon = inst:AddComponent("weapon")
            weapon.damage = 10
            local hp = inst.components.health
        "#};
        let aliases = component_aliases(clean);
        assert_eq!(aliases["weapon"], "weapon");
        assert_eq!(aliases["hp"], "health");
    }

    #[test]
    fn methods_of_other_classes_ignored() {
        let src = indoc! {r#"
            local Armor = Class(function(self) end)
            function Armor:SetAbsorption(amount) end
            function Helper:DoThing() end
            return Armor
        "#};
        let def = parse_component(src, "scripts/components/armor.lua");
        assert_eq!(def.methods, ["SetAbsorption"]);
    }
}
