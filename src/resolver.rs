//! Version dependency resolution
//!
//! Turns a version identifier into the ordered chain of artifacts needed to
//! materialize it: exactly one snapshot followed by the diffs that lead from
//! the snapshot's version to the requested one, oldest first.
//!
//! Resolution walks the catalog's diff-step table backwards from the
//! requested version until it reaches a directly-backed version. The walk
//! tracks visited versions so a malformed table fails with
//! [`ChronoError::CircularDependency`] instead of looping.
//!
//! ```rust
//! use chronotree::{ArchiveCatalog, VersionResolver};
//!
//! let catalog = ArchiveCatalog::ruby();
//! let resolver = VersionResolver::new(&catalog);
//! assert_eq!(
//!     resolver.dependencies("0.52").unwrap(),
//!     vec!["ruby-0.51.tar.gz", "ruby-0.51-0.52.diff.gz"],
//! );
//! ```

use crate::catalog::{ArchiveCatalog, ArtifactKind};
use crate::error::{ChronoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::trace;

/// One element of a dependency chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact file name
    pub name: String,
    /// Snapshot or diff, by naming convention
    pub kind: ArtifactKind,
    /// Version the tree is at once this artifact has been applied
    pub version: String,
}

/// Ordered artifacts reconstructing one version
///
/// Always starts with exactly one snapshot. Diffs follow in application order
/// and must not be reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyChain {
    /// Requested version
    pub version: String,
    /// Snapshot first, then diffs
    pub artifacts: Vec<Artifact>,
}

impl DependencyChain {
    /// The leading snapshot
    pub fn snapshot(&self) -> &Artifact {
        &self.artifacts[0]
    }

    /// Diffs applied after the snapshot, in order
    pub fn diffs(&self) -> &[Artifact] {
        &self.artifacts[1..]
    }

    /// Artifact names in application order
    pub fn names(&self) -> Vec<String> {
        self.artifacts.iter().map(|a| a.name.clone()).collect()
    }
}

/// Resolves versions against an [`ArchiveCatalog`]
#[derive(Debug, Clone, Copy)]
pub struct VersionResolver<'a> {
    catalog: &'a ArchiveCatalog,
}

impl<'a> VersionResolver<'a> {
    /// Create a resolver over `catalog`
    pub fn new(catalog: &'a ArchiveCatalog) -> Self {
        Self { catalog }
    }

    /// Ordered artifact names required to materialize `version`
    ///
    /// # Errors
    ///
    /// - [`ChronoError::UnknownVersion`] if some version on the way is neither
    ///   direct nor a registered diff step
    /// - [`ChronoError::CircularDependency`] if the diff-step table loops
    pub fn dependencies(&self, version: &str) -> Result<Vec<String>> {
        Ok(self.chain(version)?.names())
    }

    /// Typed dependency chain for `version`
    pub fn chain(&self, version: &str) -> Result<DependencyChain> {
        let mut visited = HashSet::new();
        let mut diffs = Vec::new();
        let mut current = version.to_string();

        loop {
            if !visited.insert(current.clone()) {
                return Err(ChronoError::CircularDependency(current));
            }

            if self.catalog.is_direct(&current) {
                let snapshot = Artifact {
                    name: self.catalog.snapshot_name(&current),
                    kind: ArtifactKind::Snapshot,
                    version: current,
                };
                let mut artifacts = Vec::with_capacity(diffs.len() + 1);
                artifacts.push(snapshot);
                artifacts.extend(diffs.into_iter().rev());
                trace!("Resolved {} to {} artifacts", version, artifacts.len());
                return Ok(DependencyChain {
                    version: version.to_string(),
                    artifacts,
                });
            }

            let step = self
                .catalog
                .diff_step(&current)
                .ok_or_else(|| ChronoError::UnknownVersion(current.clone()))?;
            diffs.push(Artifact {
                name: step.artifact.clone(),
                kind: self.catalog.classify(&step.artifact),
                version: current,
            });
            current = step.previous.clone();
        }
    }
}
