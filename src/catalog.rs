//! Archive catalog
//!
//! The catalog is the read-only table of everything the resolver may use: the
//! artifact files available in the archive directory, the versions that can be
//! reconstructed, and the hand-curated diff steps that derive a version from
//! its predecessor.
//!
//! A version is *direct* when it is listed and its snapshot artifact
//! (`<snapshot_prefix><version><snapshot_suffix>`) is one of the archives.
//! Every other listed version has to be reachable through [`DiffStep`]s.
//!
//! The built-in catalog ([`ArchiveCatalog::ruby`]) covers the early Ruby
//! releases from 0.49 to 1.0-971225. Other catalogs can be loaded from JSON.

use crate::error::{ChronoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// How a previous version becomes a derived one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStep {
    /// Version the diff applies to
    pub previous: String,
    /// Diff artifact name
    pub artifact: String,
}

/// Kind of an artifact, decided by its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// Self-contained tree contents
    Snapshot,
    /// Incremental patch against a prior tree
    Diff,
}

/// Static table of archives, versions and diff steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveCatalog {
    /// Prefix of snapshot artifact names
    #[serde(default)]
    pub snapshot_prefix: String,
    /// Suffix of snapshot artifact names
    pub snapshot_suffix: String,
    /// Artifact files present in the archive directory
    pub archives: BTreeSet<String>,
    /// Versions that can be reconstructed, oldest first
    pub versions: Vec<String>,
    /// Derived version -> how to reach it
    #[serde(default)]
    pub diff_steps: BTreeMap<String, DiffStep>,
}

impl ArchiveCatalog {
    /// Create an empty catalog with the given snapshot naming
    pub fn new(snapshot_prefix: impl Into<String>, snapshot_suffix: impl Into<String>) -> Self {
        Self {
            snapshot_prefix: snapshot_prefix.into(),
            snapshot_suffix: snapshot_suffix.into(),
            archives: BTreeSet::new(),
            versions: Vec::new(),
            diff_steps: BTreeMap::new(),
        }
    }

    /// Register a version backed by its own snapshot archive
    pub fn with_snapshot(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        self.archives.insert(self.snapshot_name(&version));
        self.versions.push(version);
        self
    }

    /// Register a version derived from `previous` by applying `artifact`
    pub fn with_diff(
        mut self,
        previous: impl Into<String>,
        version: impl Into<String>,
        artifact: impl Into<String>,
    ) -> Self {
        let version = version.into();
        let artifact = artifact.into();
        self.archives.insert(artifact.clone());
        self.diff_steps.insert(
            version.clone(),
            DiffStep {
                previous: previous.into(),
                artifact,
            },
        );
        self.versions.push(version);
        self
    }

    /// The catalog of early Ruby releases
    pub fn ruby() -> Self {
        const ARCHIVES: &[&str] = &[
            "ruby-0.49.tar.gz",
            "ruby-0.50.tar.gz",
            "ruby-0.51-0.52.diff.gz",
            "ruby-0.51.tar.gz",
            "ruby-0.54.tar.gz",
            "ruby-0.55-0.56.diff.gz",
            "ruby-0.55.tar.gz",
            "ruby-0.60.tar.gz",
            "ruby-0.62.tar.gz",
            "ruby-0.62.tar.gz.broken",
            "ruby-0.63.tar.gz",
            "ruby-0.63.tar.gz.broken",
            "ruby-0.64.tar.gz",
            "ruby-0.65-0.66.diff.gz",
            "ruby-0.65.tar.gz",
            "ruby-0.66-0.67.diff.gz",
            "ruby-0.67-0.68.diff.gz",
            "ruby-0.69.tar.gz",
            "ruby-0.70-patch",
            "ruby-0.71-0.72.diff.gz",
            "ruby-0.71.tar.gz",
            "ruby-0.73-950413.tar.gz",
            "ruby-0.73.tar.gz",
            "ruby-0.76.tar.gz",
            "ruby-0.95.tar.gz",
            "ruby-0.99.4-961224.tar.gz",
            "ruby-1.0-961225.tar.gz",
            "ruby-1.0-971002.tar.gz",
            "ruby-1.0-971003.tar.gz",
            "ruby-1.0-971015.tar.gz",
            "ruby-1.0-971021.tar.gz",
            "ruby-1.0-971118.tar.gz",
            "ruby-1.0-971125.tar.gz",
            "ruby-1.0-971204.tar.gz",
            "ruby-1.0-971209.tar.gz",
            "ruby-1.0-971225.tar.gz",
        ];
        const VERSIONS: &[&str] = &[
            "0.49",
            "0.50",
            "0.51",
            "0.52",
            "0.54",
            "0.55",
            "0.56",
            "0.60",
            "0.62",
            "0.63",
            "0.64",
            "0.65",
            "0.66",
            "0.67",
            "0.68",
            "0.69",
            "0.70",
            "0.71",
            "0.72",
            "0.73-950413",
            "0.73",
            "0.76",
            "0.95",
            "0.99.4-961224",
            "1.0-961225",
            "1.0-971002",
            "1.0-971003",
            "1.0-971015",
            "1.0-971021",
            "1.0-971118",
            "1.0-971125",
            "1.0-971204",
            "1.0-971209",
            "1.0-971225",
        ];
        const DIFF_STEPS: &[(&str, &str, &str)] = &[
            ("0.51", "0.52", "ruby-0.51-0.52.diff.gz"),
            ("0.55", "0.56", "ruby-0.55-0.56.diff.gz"),
            ("0.65", "0.66", "ruby-0.65-0.66.diff.gz"),
            ("0.66", "0.67", "ruby-0.66-0.67.diff.gz"),
            ("0.67", "0.68", "ruby-0.67-0.68.diff.gz"),
            ("0.69", "0.70", "ruby-0.70-patch"),
            ("0.71", "0.72", "ruby-0.71-0.72.diff.gz"),
        ];

        Self {
            snapshot_prefix: "ruby-".to_string(),
            snapshot_suffix: ".tar.gz".to_string(),
            archives: ARCHIVES.iter().map(|s| s.to_string()).collect(),
            versions: VERSIONS.iter().map(|s| s.to_string()).collect(),
            diff_steps: DIFF_STEPS
                .iter()
                .map(|(previous, version, artifact)| {
                    (
                        version.to_string(),
                        DiffStep {
                            previous: previous.to_string(),
                            artifact: artifact.to_string(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Load a catalog from a JSON file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let catalog: Self = serde_json::from_str(&content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Name of the snapshot artifact for `version`
    pub fn snapshot_name(&self, version: &str) -> String {
        format!("{}{}{}", self.snapshot_prefix, version, self.snapshot_suffix)
    }

    /// Classify an artifact name by the snapshot naming convention
    pub fn classify(&self, artifact: &str) -> ArtifactKind {
        let is_snapshot = artifact.len() > self.snapshot_prefix.len() + self.snapshot_suffix.len()
            && artifact.starts_with(&self.snapshot_prefix)
            && artifact.ends_with(&self.snapshot_suffix);
        if is_snapshot {
            ArtifactKind::Snapshot
        } else {
            ArtifactKind::Diff
        }
    }

    /// Whether `version` is backed directly by a snapshot archive
    pub fn is_direct(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
            && self.archives.contains(&self.snapshot_name(version))
    }

    /// The diff step producing `version`, if one is registered
    pub fn diff_step(&self, version: &str) -> Option<&DiffStep> {
        self.diff_steps.get(version)
    }

    /// Versions in catalog order
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.versions.iter().map(String::as_str)
    }

    /// Check that every diff step points at a known artifact and version
    pub fn validate(&self) -> Result<()> {
        if self.snapshot_suffix.is_empty() {
            return Err(ChronoError::config("catalog snapshot_suffix must not be empty"));
        }
        for (version, step) in &self.diff_steps {
            if !self.archives.contains(&step.artifact) {
                return Err(ChronoError::config(format!(
                    "diff step for {} names unknown artifact {}",
                    version, step.artifact
                )));
            }
            if self.classify(&step.artifact) != ArtifactKind::Diff {
                return Err(ChronoError::config(format!(
                    "diff step for {} uses snapshot artifact {}",
                    version, step.artifact
                )));
            }
            if !self.versions.iter().any(|v| v == &step.previous) {
                return Err(ChronoError::config(format!(
                    "diff step for {} starts from unknown version {}",
                    version, step.previous
                )));
            }
        }
        Ok(())
    }
}

impl Default for ArchiveCatalog {
    fn default() -> Self {
        Self::ruby()
    }
}
