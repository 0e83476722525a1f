//! Domain extractors
//!
//! Each extractor consumes raw source text (through the scanner and call
//! extractor, never raw pattern matching over code) and returns a structured
//! record set. Extraction is best-effort: records that fail to parse are
//! skipped into the [`BuildReport`](crate::report::BuildReport) and the rest
//! of the file still contributes.

pub mod component;
pub mod cooking;
pub mod craft;
pub mod ingredient;
pub mod loot;
pub mod prefab;
pub mod rule;
pub mod worldgen;

use once_cell::sync::Lazy;
use regex::Regex;

static ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_]+$").unwrap());

/// Normalizes an entity identifier: trimmed, lowercased, `[a-z0-9_]+` only.
pub(crate) fn clean_id(raw: &str) -> Option<String> {
    let id = raw.trim().to_ascii_lowercase();
    if !id.is_empty() && ID_RE.is_match(&id) {
        Some(id)
    } else {
        None
    }
}

/// Filename stem of a POSIX path, without a `.lua` suffix.
pub(crate) fn file_stem(path: &str) -> &str {
    let base = path.rsplit('/').next().unwrap_or(path);
    base.strip_suffix(".lua").unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids() {
        assert_eq!(clean_id(" Twigs "), Some("twigs".into()));
        assert_eq!(clean_id("spider_warrior"), Some("spider_warrior".into()));
        assert_eq!(clean_id("bad id"), None);
        assert_eq!(clean_id(""), None);
    }

    #[test]
    fn stems() {
        assert_eq!(file_stem("scripts/prefabs/twigs.lua"), "twigs");
        assert_eq!(file_stem("twigs.lua"), "twigs");
        assert_eq!(file_stem("scripts/tuning.lua"), "tuning");
    }
}
