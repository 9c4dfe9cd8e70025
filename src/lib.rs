//! # Chronotree - Reconstruct historical source trees
//!
//! Rebuilds the source tree of an old release from the artifacts that
//! survived: full snapshot tarballs for some versions and diffs between
//! consecutive versions for the rest. The reconstructed tree is rewritten so
//! it builds on a current toolchain, then synced into a persistent working
//! directory with as little churn as possible.
//!
//! ## Overview
//!
//! A request flows through four stages:
//!
//! 1. **Resolve**: [`VersionResolver`] turns a version into an ordered
//!    [`DependencyChain`], one snapshot followed by the diffs leading from it
//! 2. **Materialize**: [`TreeMaterializer`] unpacks the snapshot and applies
//!    the diffs in order
//! 3. **Rewrite**: [`PatchPipeline`] runs ordered, idempotent textual rules
//!    that repair legacy constructs (K&R varargs, missing prototypes, stale
//!    configure probes)
//! 4. **Sync**: [`TreeSynchronizer`] makes the destination match while leaving
//!    unchanged files and build artifacts alone
//!
//! [`Reconstructor`] runs the whole flow and owns the scratch directories.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chronotree::{Reconstructor, ReconstructorBuilder};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let reconstructor = ReconstructorBuilder::new()
//!     .archive_dir("/srv/ruby-archives")
//!     .build()?;
//!
//! // Which artifacts make up 0.68?
//! for name in reconstructor.dependencies("0.68")? {
//!     println!("{}", name);
//! }
//!
//! // Rebuild it into ./ruby; running again changes nothing
//! let report = reconstructor.reconstruct("0.68", Path::new("./ruby"), false)?;
//! for action in &report.sync.actions {
//!     println!("{}", action);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### Catalog
//!
//! An [`ArchiveCatalog`] records which versions have a snapshot and, for the
//! others, the previous version and the diff that leads from it. The built-in
//! [`ArchiveCatalog::ruby`] covers the early Ruby releases; a JSON catalog can
//! replace it.
//!
//! ### Rewrite Rules
//!
//! Each [`Rule`] targets specific files and only fires when its pattern
//! matches. A missing file or an unmatched pattern is a no-op. Writes are
//! skipped when content is unchanged, so a second pipeline run reports no
//! changed files.
//!
//! ### Build Artifacts
//!
//! [`BuildArtifacts`] lists paths and globs (`Makefile`, `config.h`, `*.o`,
//! ...) that a build in the destination produces. The synchronizer never
//! copies, updates, or deletes them.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, ChronoError>`. Failures carry the version
//! and artifact involved; [`ChronoError::user_message`] adds remediation
//! hints for the CLI.
//!
//! ## Module Organization
//!
//! - [`catalog`]: snapshot and diff-step tables
//! - [`resolver`]: dependency chain resolution
//! - [`materialize`]: extraction and diff application
//! - [`patcher`]: rewrite rules and the pipeline running them
//! - [`sync`]: minimal-churn tree synchronization
//! - [`reconstructor`]: end-to-end façade and builder
//! - [`types`]: configuration and report types
//! - [`utils`]: tree copy and digest helpers
//! - [`error`]: error types and handling

// Public API modules
pub mod catalog;
pub mod error;
pub mod materialize;
pub mod patcher;
pub mod reconstructor;
pub mod resolver;
pub mod sync;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use catalog::{ArchiveCatalog, ArtifactKind, DiffStep};
pub use error::{ChronoError, Result};
pub use materialize::{Extractor, PatchApplier, PatchCommand, TarExtractor, TreeMaterializer};
pub use patcher::{PatchPipeline, PatchReport, Rule, RuleOutcome, WorkingTree};
pub use reconstructor::{Reconstructor, ReconstructorBuilder};
pub use resolver::{Artifact, DependencyChain, VersionResolver};
pub use sync::{BuildArtifacts, SyncAction, SyncPlan, SyncReport, TreeSynchronizer};
pub use types::*;
