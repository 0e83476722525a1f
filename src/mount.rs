//! Source mounts
//!
//! The pipeline reads scripts through a [`SourceMount`]: a read-only bundle
//! of named text blobs keyed by POSIX-style path. Paths conventionally carry
//! a `scripts/` prefix; lookups succeed with or without it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const SCRIPTS_PREFIX: &str = "scripts/";

/// A read-only bundle of named script sources.
pub trait SourceMount {
    /// Reads a blob by path, tolerating a missing or extra `scripts/` prefix.
    fn read(&self, path: &str) -> Option<String>;

    /// All known paths, in their canonical (prefixed) form.
    fn file_list(&self) -> Vec<String>;
}

/// Returns the canonical form of a path: forward slashes, `scripts/` prefix.
pub fn canonical_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let path = path.trim_start_matches('/');
    if path.starts_with(SCRIPTS_PREFIX) {
        path.to_owned()
    } else {
        format!("{SCRIPTS_PREFIX}{path}")
    }
}

/// In-memory mount, mostly for tests and embedded fixtures.
#[derive(Debug, Default, Clone)]
pub struct MemoryMount {
    files: BTreeMap<String, String>,
}

impl MemoryMount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, content: impl Into<String>) -> &mut Self {
        self.files.insert(canonical_path(path), content.into());
        self
    }
}

impl<const N: usize> From<[(&str, &str); N]> for MemoryMount {
    fn from(entries: [(&str, &str); N]) -> Self {
        let mut mount = Self::new();
        for (path, content) in entries {
            mount.insert(path, content);
        }
        mount
    }
}

impl SourceMount for MemoryMount {
    fn read(&self, path: &str) -> Option<String> {
        self.files.get(&canonical_path(path)).cloned()
    }

    fn file_list(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }
}

/// Mount over a directory tree on disk. The file list is walked once at
/// construction; reads go to disk.
#[derive(Debug)]
pub struct FsMount {
    root: PathBuf,
    files: Vec<String>,
}

impl FsMount {
    /// Mounts `root`, which should be the directory that *contains* the
    /// script tree (so `root/tuning.lua` is addressed as
    /// `scripts/tuning.lua`).
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        let mut files = Vec::new();
        walk(&root, &root, &mut files)?;
        files.sort_unstable();
        Ok(Self { root, files })
    }

    fn on_disk(&self, path: &str) -> PathBuf {
        let canonical = canonical_path(path);
        let rel = canonical.strip_prefix(SCRIPTS_PREFIX).unwrap_or(&canonical);
        self.root.join(rel)
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let rel = rel.to_string_lossy().replace('\\', "/");
            out.push(canonical_path(&rel));
        }
    }
    Ok(())
}

impl SourceMount for FsMount {
    fn read(&self, path: &str) -> Option<String> {
        std::fs::read_to_string(self.on_disk(path)).ok()
    }

    fn file_list(&self) -> Vec<String> {
        self.files.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_tolerance() {
        let mount = MemoryMount::from([("prefabs/twigs.lua", "return 1")]);
        assert!(mount.read("scripts/prefabs/twigs.lua").is_some());
        assert!(mount.read("prefabs/twigs.lua").is_some());
        assert!(mount.read("prefabs/other.lua").is_none());
        assert_eq!(mount.file_list(), ["scripts/prefabs/twigs.lua"]);
    }

    #[test]
    fn canonical_forms() {
        assert_eq!(canonical_path("tuning.lua"), "scripts/tuning.lua");
        assert_eq!(canonical_path("scripts/tuning.lua"), "scripts/tuning.lua");
        assert_eq!(canonical_path("scripts\\map\\rooms.lua"), "scripts/map/rooms.lua");
    }
}
