//! End-to-end reconstruction
//!
//! [`Reconstructor`] wires the catalog, materializer, rewrite pipeline, and
//! synchronizer together and owns the scratch directories each request needs.
//! Every request works in its own [`tempfile::TempDir`], so concurrent
//! requests share nothing mutable and scratch trees are cleaned up on return.
//!
//! ## Operations
//!
//! - [`Reconstructor::materialize`]: unpatched tree for a version
//! - [`Reconstructor::make_patched`]: replace a directory with a patched copy
//!   of another
//! - [`Reconstructor::sync_patched`]: patch a copy of a tree and sync it into
//!   a persistent destination
//! - [`Reconstructor::reconstruct`]: all of the above for one version
//!
//! ## Example
//!
//! ```rust,no_run
//! use chronotree::ReconstructorBuilder;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let reconstructor = ReconstructorBuilder::new()
//!     .archive_dir("/srv/ruby-archives")
//!     .build()?;
//!
//! let report = reconstructor.reconstruct("0.52", Path::new("./ruby"), false)?;
//! println!("{}", report.sync.summary());
//! # Ok(())
//! # }
//! ```

use crate::catalog::ArchiveCatalog;
use crate::error::Result;
use crate::materialize::{Extractor, PatchApplier, PatchCommand, TarExtractor, TreeMaterializer};
use crate::patcher::{PatchPipeline, PatchReport};
use crate::resolver::{DependencyChain, VersionResolver};
use crate::sync::{BuildArtifacts, SyncPlan, SyncReport, TreeSynchronizer};
use crate::types::{ReconstructConfig, ReconstructReport};
use crate::utils;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{info, instrument};

/// Reconstructs historical trees into persistent destinations
///
/// Construct with [`ReconstructorBuilder`] or [`Reconstructor::from_config`].
#[derive(Debug)]
pub struct Reconstructor {
    materializer: TreeMaterializer,
    pipeline: PatchPipeline,
    synchronizer: TreeSynchronizer,
}

impl Reconstructor {
    /// Builder with default settings
    pub fn builder() -> ReconstructorBuilder {
        ReconstructorBuilder::new()
    }

    /// Build from a configuration file's settings
    pub fn from_config(config: &ReconstructConfig) -> Result<Self> {
        ReconstructorBuilder::new()
            .archive_dir(config.archive_dir())
            .catalog(config.load_catalog()?)
            .build_artifacts(config.load_build_artifacts()?)
            .pipeline(config.pipeline()?)
            .patch_applier(Box::new(PatchCommand::new(config.patch_program())))
            .build()
    }

    /// Catalog in use
    pub fn catalog(&self) -> &ArchiveCatalog {
        self.materializer.catalog()
    }

    /// Resolver over the catalog
    pub fn resolver(&self) -> VersionResolver<'_> {
        VersionResolver::new(self.catalog())
    }

    /// Ordered artifact names needed for `version`
    pub fn dependencies(&self, version: &str) -> Result<Vec<String>> {
        self.resolver().dependencies(version)
    }

    /// Rewrite pipeline in use
    pub fn pipeline(&self) -> &PatchPipeline {
        &self.pipeline
    }

    /// Synchronizer in use
    pub fn synchronizer(&self) -> &TreeSynchronizer {
        &self.synchronizer
    }

    /// Materialize `version` at `dest` without patching
    ///
    /// Destructive at `dest`.
    pub fn materialize(&self, version: &str, dest: &Path) -> Result<DependencyChain> {
        self.materializer.materialize(version, dest)
    }

    /// Run the rewrite pipeline over `dir` in place
    pub fn patch(&self, dir: &Path) -> Result<PatchReport> {
        self.pipeline.apply(dir)
    }

    /// Replace `dest` with a copy of `src` and patch the copy
    #[instrument(skip(self), fields(src = %src.display(), dest = %dest.display()))]
    pub fn make_patched(&self, src: &Path, dest: &Path) -> Result<PatchReport> {
        utils::copy_tree(src, dest)?;
        self.pipeline.apply(dest)
    }

    /// Patch a scratch copy of `src` and sync it into `dest`
    ///
    /// `src` itself is never modified.
    #[instrument(skip(self), fields(src = %src.display(), dest = %dest.display()))]
    pub fn sync_patched(&self, src: &Path, dest: &Path) -> Result<(PatchReport, SyncReport)> {
        fs::create_dir_all(dest)?;
        let scratch = TempDir::new()?;
        let patched = scratch.path().join("tree");
        let patch = self.make_patched(src, &patched)?;
        let sync = self.synchronizer.sync(&patched, dest)?;
        Ok((patch, sync))
    }

    /// Like [`Reconstructor::sync_patched`] but only plans the sync
    pub fn plan_patched(&self, src: &Path, dest: &Path) -> Result<(PatchReport, SyncPlan)> {
        let scratch = TempDir::new()?;
        let patched = scratch.path().join("tree");
        let patch = self.make_patched(src, &patched)?;
        let plan = self.synchronizer.plan(&patched, dest)?;
        Ok((patch, plan))
    }

    /// Materialize `version`, patch it, and sync it into `dest`
    ///
    /// With `dry_run` the destination is left untouched and the report lists
    /// the actions a real run would perform.
    #[instrument(skip(self), fields(dest = %dest.display()))]
    pub fn reconstruct(&self, version: &str, dest: &Path, dry_run: bool) -> Result<ReconstructReport> {
        let scratch = TempDir::new()?;
        let extracted = scratch.path().join("extracted");
        let chain = self.materializer.materialize(version, &extracted)?;

        let (patch, sync) = if dry_run {
            let (patch, plan) = self.plan_patched(&extracted, dest)?;
            let sync = SyncReport {
                actions: plan.actions,
                duration: Duration::ZERO,
            };
            (patch, sync)
        } else {
            self.sync_patched(&extracted, dest)?
        };

        info!(
            "Reconstructed {} from {} artifact(s): {}",
            version,
            chain.artifacts.len(),
            sync.summary()
        );
        Ok(ReconstructReport {
            chain,
            patch,
            sync,
            dry_run,
        })
    }
}

/// Builder for [`Reconstructor`]
///
/// # Default Values
///
/// - `archive_dir`: current directory
/// - `catalog`: [`ArchiveCatalog::ruby`]
/// - `extractor`: [`TarExtractor`]
/// - `patch_applier`: [`PatchCommand`] running `patch`
/// - `pipeline`: [`PatchPipeline::standard`]
/// - `build_artifacts`: [`BuildArtifacts::default`]
pub struct ReconstructorBuilder {
    archive_dir: PathBuf,
    catalog: ArchiveCatalog,
    extractor: Box<dyn Extractor>,
    patch_applier: Box<dyn PatchApplier>,
    pipeline: PatchPipeline,
    build_artifacts: BuildArtifacts,
}

impl std::fmt::Debug for ReconstructorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconstructorBuilder")
            .field("archive_dir", &self.archive_dir)
            .field("versions", &self.catalog.versions().count())
            .field("rules", &self.pipeline.rules().len())
            .field("build_artifacts", &self.build_artifacts.patterns())
            .finish()
    }
}

impl ReconstructorBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            archive_dir: PathBuf::from("."),
            catalog: ArchiveCatalog::ruby(),
            extractor: Box::new(TarExtractor),
            patch_applier: Box::new(PatchCommand::default()),
            pipeline: PatchPipeline::standard(),
            build_artifacts: BuildArtifacts::default(),
        }
    }

    /// Set the directory holding snapshots and diffs
    pub fn archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = dir.into();
        self
    }

    /// Replace the catalog
    pub fn catalog(mut self, catalog: ArchiveCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Replace the snapshot extractor
    pub fn extractor(mut self, extractor: Box<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replace the diff applier
    pub fn patch_applier(mut self, patch_applier: Box<dyn PatchApplier>) -> Self {
        self.patch_applier = patch_applier;
        self
    }

    /// Replace the rewrite pipeline
    pub fn pipeline(mut self, pipeline: PatchPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Replace the sync exclusion set
    pub fn build_artifacts(mut self, artifacts: BuildArtifacts) -> Self {
        self.build_artifacts = artifacts;
        self
    }

    /// Validate the catalog and build the reconstructor
    pub fn build(self) -> Result<Reconstructor> {
        self.catalog.validate()?;
        let materializer = TreeMaterializer::new(self.catalog, self.archive_dir)
            .with_extractor(self.extractor)
            .with_patch_applier(self.patch_applier);
        Ok(Reconstructor {
            materializer,
            pipeline: self.pipeline,
            synchronizer: TreeSynchronizer::new(self.build_artifacts),
        })
    }
}

impl Default for ReconstructorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
