//! Build report
//!
//! Nothing in the extraction pipeline is fatal: a record that fails its
//! best-effort parse is skipped and noted here, and the build carries on
//! with partial data.

use serde::Serialize;

/// One skipped record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    /// Source path the record came from.
    pub path: String,
    /// What was being extracted (`"craft_recipe"`, `"loot_entry"`, ...).
    pub what: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Collected skip notes for a whole build.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BuildReport {
    skipped: Vec<Skipped>,
}

impl BuildReport {
    pub fn skip(
        &mut self,
        path: impl Into<String>,
        what: impl Into<String>,
        reason: impl Into<String>,
    ) {
        let entry = Skipped {
            path: path.into(),
            what: what.into(),
            reason: reason.into(),
        };
        tracing::debug!(path = %entry.path, what = %entry.what, reason = %entry.reason, "skipped record");
        self.skipped.push(entry);
    }

    pub fn skipped(&self) -> &[Skipped] {
        &self.skipped
    }

    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn merge(&mut self, other: BuildReport) {
        self.skipped.extend(other.skipped);
    }
}
