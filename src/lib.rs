//! Static extraction and indexing of Lua game data scripts.
//!
//! `almanac` ingests a game's data-driven scripting layer (prefab
//! declarations, crafting and cooking recipes, tuning constants, loot
//! tables, world generation) and produces a coherent, queryable catalog of
//! entities and their relationships. It is **not** a Lua execution engine:
//! everything works by static scanning, with a balanced-bracket scanner, a
//! table-literal parser and a whitelisted constant resolver. Anything those
//! cannot take apart is preserved verbatim rather than guessed at.
//!
//! # Basic usage
//!
//! Mount a script tree (a directory via [`FsMount`], or in-memory blobs via
//! [`MemoryMount`]) and build:
//!
//! ```rust
//! use almanac::{CatalogBuilder, MemoryMount};
//!
//! let mount = MemoryMount::from([(
//!     "scripts/prefabs/twigs.lua",
//!     r#"return Prefab("twigs", fn, { Asset("IMAGE", "images/twigs.tex") })"#,
//! )]);
//! let output = CatalogBuilder::default().build(&mount);
//! assert!(output.catalog.items.contains_key("twigs"));
//! ```
//!
//! The catalog is build-once, read-many: after [`CatalogBuilder::build`]
//! returns, nothing mutates it. The cook-pot queries
//! ([`cookpot::simulate`], [`cookpot::explore`]) are pure functions over the
//! catalog and can run concurrently.
//!
//! The lower layers ([`scan`], [`expr`], [`calls`], [`tuning`]) are public:
//! front-ends that need one-off extraction can use them directly without
//! building a full catalog.

#![warn(rustdoc::broken_intra_doc_links, clippy::doc_markdown)]

pub mod calls;
pub mod catalog;
pub mod cookpot;
pub mod expr;
pub mod extract;
pub mod mount;
pub mod report;
pub mod scan;
pub mod tuning;

use std::collections::BTreeSet;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub use catalog::tagging::{Kind, OverrideRule, TagProfile};
pub use catalog::{BuildOutput, Catalog, CatalogItem, Meta, TraceIndex, SCHEMA_VERSION};
pub use cookpot::{ExploreReport, SimulateReport, SolverError};
pub use mount::{FsMount, MemoryMount, SourceMount};
pub use report::{BuildReport, Skipped};
pub use tuning::TuningResolver;

bitflags! {
    /// Extractor families to run during a build.
    ///
    /// [`Domains::default`] enables everything; front-ends that only need
    /// one domain (a cooking planner, a craft browser) can skip the rest.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Domains: u32 {
        const PREFABS    = 1 << 0;
        const CRAFT      = 1 << 1;
        const COOKING    = 1 << 2;
        const LOOT       = 1 << 3;
        const COMPONENTS = 1 << 4;
        const WORLDGEN   = 1 << 5;
    }
}

impl Default for Domains {
    /// Enables all domains.
    fn default() -> Self {
        Self::all()
    }
}

/// Build configuration.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub domains: Domains,
    /// Tool name recorded in [`Meta`].
    pub tool: String,
    /// Timestamp recorded in [`Meta`]; defaults to the build wall clock.
    pub generated: Option<String>,
    /// Overrides the computed source signature in [`Meta`].
    pub source_signature: Option<String>,
    /// Tag override rules, usually from
    /// [`catalog::tagging::parse_overrides`]. A missing override file is an
    /// empty list.
    pub overrides: Vec<OverrideRule>,
    /// Ids known only from inventory icons; they join the id universe even
    /// without a prefab.
    pub icon_ids: BTreeSet<String>,
    /// Collect a [`TraceIndex`] of tuning resolutions alongside the catalog.
    pub collect_traces: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            domains: Domains::default(),
            tool: env!("CARGO_PKG_NAME").to_owned(),
            generated: None,
            source_signature: None,
            overrides: Vec::new(),
            icon_ids: BTreeSet::new(),
            collect_traces: false,
        }
    }
}

/// The catalog builder.
///
/// Cheap to construct; reuse one per source mount if you build repeatedly.
#[derive(Debug, Clone, Default)]
pub struct CatalogBuilder {
    options: BuildOptions,
}

impl CatalogBuilder {
    pub fn new(options: BuildOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Enables trace collection; see [`TraceIndex`].
    pub fn with_traces(mut self) -> Self {
        self.options.collect_traces = true;
        self
    }

    /// Runs every enabled extractor over `mount` and assembles the catalog.
    ///
    /// Never fails: records that cannot be extracted are skipped into the
    /// output's [`BuildReport`] and the rest of the catalog still builds.
    pub fn build(&self, mount: &dyn SourceMount) -> BuildOutput {
        catalog::build(mount, &self.options)
    }
}

/// Builds a catalog with default options. If you build more than once,
/// construct a [`CatalogBuilder`] and reuse it.
pub fn build_catalog(mount: &dyn SourceMount) -> BuildOutput {
    CatalogBuilder::default().build(mount)
}
