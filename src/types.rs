//! Configuration and result types shared across chronotree
//!
//! ## Overview
//!
//! - **Configuration**: [`ReconstructConfig`], the optional JSON file that
//!   tunes archive location, catalog, exclusions, patch tool, and rules
//! - **Results**: [`ReconstructReport`], the outcome of one end-to-end
//!   reconstruction
//!
//! ## Examples
//!
//! ```rust
//! use chronotree::types::ReconstructConfig;
//!
//! let config: ReconstructConfig = serde_json::from_str(r#"{
//!     "archive_dir": "/srv/ruby-archives",
//!     "disabled_rules": ["use_crypt"]
//! }"#).unwrap();
//! assert_eq!(config.disabled_rules, vec!["use_crypt"]);
//! ```

use crate::catalog::ArchiveCatalog;
use crate::error::{ChronoError, Result};
use crate::patcher::{PatchPipeline, PatchReport};
use crate::resolver::DependencyChain;
use crate::sync::{BuildArtifacts, SyncReport};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default external patch program
pub const DEFAULT_PATCH_PROGRAM: &str = "patch";

/// File-based configuration
///
/// Every key is optional. Command-line flags take precedence over values
/// read from the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconstructConfig {
    /// Directory holding the snapshot and diff files
    pub archive_dir: Option<PathBuf>,
    /// JSON catalog replacing the built-in Ruby catalog
    pub catalog: Option<PathBuf>,
    /// Exclusion list replacing the default build artifacts
    pub build_artifacts: Option<Vec<String>>,
    /// Program used to apply diffs
    pub patch_program: Option<PathBuf>,
    /// Rules left out of the rewrite pipeline
    pub disabled_rules: Vec<String>,
}

impl ReconstructConfig {
    /// Read a configuration file
    ///
    /// # Errors
    ///
    /// - [`ChronoError::Io`] if the file cannot be read
    /// - [`ChronoError::Json`] if it is not valid configuration JSON
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Archive directory, defaulting to the current directory
    pub fn archive_dir(&self) -> PathBuf {
        self.archive_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Configured catalog, or the built-in one
    pub fn load_catalog(&self) -> Result<ArchiveCatalog> {
        match &self.catalog {
            Some(path) => ArchiveCatalog::load(path),
            None => Ok(ArchiveCatalog::ruby()),
        }
    }

    /// Configured exclusion set, or the defaults
    pub fn load_build_artifacts(&self) -> Result<BuildArtifacts> {
        match &self.build_artifacts {
            Some(patterns) => BuildArtifacts::new(patterns.iter().cloned()),
            None => Ok(BuildArtifacts::default()),
        }
    }

    /// Standard pipeline minus the disabled rules
    pub fn pipeline(&self) -> Result<PatchPipeline> {
        PatchPipeline::standard().without(&self.disabled_rules)
    }

    /// Patch program, defaulting to [`DEFAULT_PATCH_PROGRAM`]
    pub fn patch_program(&self) -> PathBuf {
        self.patch_program
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PATCH_PROGRAM))
    }

    /// Check every referenced resource parses
    pub fn validate(&self) -> Result<()> {
        self.load_catalog()?;
        self.load_build_artifacts()?;
        self.pipeline()?;
        if let Some(program) = &self.patch_program {
            if program.as_os_str().is_empty() {
                return Err(ChronoError::config("patch_program must not be empty"));
            }
        }
        Ok(())
    }
}

/// Outcome of reconstructing one version into a destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructReport {
    /// Artifacts used, snapshot first
    pub chain: DependencyChain,
    /// Files the rewrite rules changed in the scratch copy
    pub patch: PatchReport,
    /// Destination changes, planned only when `dry_run` is set
    pub sync: SyncReport,
    /// Whether the destination was left untouched
    pub dry_run: bool,
}
