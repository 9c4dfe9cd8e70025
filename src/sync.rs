//! Tree synchronization with minimal churn
//!
//! [`TreeSynchronizer`] makes a destination tree match a freshly produced
//! source tree using the fewest filesystem operations: files whose bytes are
//! unchanged are never rewritten, so their modification times survive and a
//! build system in the destination only redoes work for files that really
//! changed.
//!
//! Build artifacts (object files, generated Makefiles, the built interpreter)
//! are invisible to the synchronizer on both sides. They are neither copied
//! nor deleted, and an excluded directory hides its whole subtree.
//!
//! ## Example
//!
//! ```rust,no_run
//! use chronotree::TreeSynchronizer;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let synchronizer = TreeSynchronizer::default();
//! let report = synchronizer.sync(Path::new("/tmp/patched"), Path::new("./ruby"))?;
//! for action in &report.actions {
//!     println!("{}", action);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::utils::create_symlink;
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// Build outputs excluded from synchronization by default
pub const DEFAULT_BUILD_ARTIFACTS: &[&str] = &[
    "Makefile",
    "ext/Makefile",
    "ext/extmk.rb",
    "config.cache",
    "config.h",
    "config.log",
    "config.status",
    "ruby",
    "*.o",
];

/// Set of relative paths and glob patterns excluded from sync
///
/// A pattern containing any of `*?[{` is a glob matched against the whole
/// relative path (so `*.o` matches at every depth). Anything else is an exact
/// relative path.
#[derive(Debug, Clone)]
pub struct BuildArtifacts {
    patterns: Vec<String>,
    exact: BTreeSet<PathBuf>,
    globs: GlobSet,
}

impl BuildArtifacts {
    /// Compile `patterns`
    ///
    /// # Errors
    ///
    /// [`crate::ChronoError::InvalidPattern`] if a glob does not parse.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let mut exact = BTreeSet::new();
        let mut builder = GlobSetBuilder::new();

        for pattern in &patterns {
            if pattern.contains(['*', '?', '[', '{']) {
                builder.add(Glob::new(pattern)?);
            } else {
                exact.insert(PathBuf::from(pattern));
            }
        }

        Ok(Self {
            patterns,
            exact,
            globs: builder.build()?,
        })
    }

    /// Whether the relative path `rel_path` is a build artifact
    pub fn is_excluded(&self, rel_path: &Path) -> bool {
        self.exact.contains(rel_path) || self.globs.is_match(rel_path)
    }

    /// Patterns as given, in order
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for BuildArtifacts {
    fn default() -> Self {
        Self::new(DEFAULT_BUILD_ARTIFACTS.iter().copied())
            .expect("default build artifact patterns are valid")
    }
}

/// One filesystem operation performed on the destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum SyncAction {
    /// Path exists only in the source
    Create {
        /// Relative path
        path: PathBuf,
        /// Created as an empty directory rather than a file copy
        is_dir: bool,
    },
    /// Path exists on both sides with different content or type
    Update {
        /// Relative path
        path: PathBuf,
    },
    /// Path exists only in the destination
    Delete {
        /// Relative path of the topmost removed entry
        path: PathBuf,
        /// Removed recursively as a directory
        is_dir: bool,
    },
}

impl SyncAction {
    /// Relative path the action applies to
    pub fn path(&self) -> &Path {
        match self {
            SyncAction::Create { path, .. }
            | SyncAction::Update { path }
            | SyncAction::Delete { path, .. } => path,
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Create { path, is_dir: true } => write!(f, "mkdir {}", path.display()),
            SyncAction::Create { path, is_dir: false } => write!(f, "create {}", path.display()),
            SyncAction::Update { path } => write!(f, "update {}", path.display()),
            SyncAction::Delete { path, is_dir: true } => write!(f, "rmdir {}", path.display()),
            SyncAction::Delete { path, is_dir: false } => write!(f, "rm {}", path.display()),
        }
    }
}

/// Actions needed to bring a destination in line with a source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    /// Creates and updates in path order, then deletes in path order
    pub actions: Vec<SyncAction>,
}

impl SyncPlan {
    /// Whether the destination already matches
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of planned actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// (creates, updates, deletes)
    pub fn counts(&self) -> (usize, usize, usize) {
        count_actions(&self.actions)
    }
}

fn count_actions(actions: &[SyncAction]) -> (usize, usize, usize) {
    actions.iter().fold((0, 0, 0), |(c, u, d), action| match action {
        SyncAction::Create { .. } => (c + 1, u, d),
        SyncAction::Update { .. } => (c, u + 1, d),
        SyncAction::Delete { .. } => (c, u, d + 1),
    })
}

/// Result of an applied sync
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    /// Actions performed, in order
    pub actions: Vec<SyncAction>,
    /// Wall time spent applying
    pub duration: Duration,
}

impl SyncReport {
    /// Whether nothing had to change
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }

    /// One-line summary, e.g. `2 created, 1 updated, 0 removed`
    pub fn summary(&self) -> String {
        let (created, updated, deleted) = count_actions(&self.actions);
        format!("{} created, {} updated, {} removed", created, updated, deleted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Dir,
    Symlink,
}

/// Reconciles destination trees against source trees
#[derive(Debug, Clone, Default)]
pub struct TreeSynchronizer {
    artifacts: BuildArtifacts,
}

impl TreeSynchronizer {
    /// Create a synchronizer excluding `artifacts`
    pub fn new(artifacts: BuildArtifacts) -> Self {
        Self { artifacts }
    }

    /// Exclusion set in use
    pub fn artifacts(&self) -> &BuildArtifacts {
        &self.artifacts
    }

    /// Compute the actions `sync` would perform, touching nothing
    #[instrument(skip(self), fields(source = %source.display(), destination = %destination.display()))]
    pub fn plan(&self, source: &Path, destination: &Path) -> Result<SyncPlan> {
        let ours = self.scan(source)?.entries;
        let Scan {
            entries: theirs,
            holders,
        } = self.scan(destination)?;

        // Byte comparison of files present on both sides
        let candidates: Vec<&PathBuf> = ours
            .iter()
            .filter(|(path, kind)| {
                **kind == EntryKind::File && theirs.get(*path) == Some(&EntryKind::File)
            })
            .map(|(path, _)| path)
            .collect();
        let differing: HashSet<&PathBuf> = candidates
            .into_par_iter()
            .map(|path| -> Result<(&PathBuf, bool)> {
                Ok((path, files_differ(&source.join(path), &destination.join(path))?))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter_map(|(path, differ)| differ.then_some(path))
            .collect();

        let mut actions = Vec::new();
        let mut replaced_dirs = Vec::new();

        for (path, kind) in &ours {
            match (kind, theirs.get(path)) {
                (kind, None) => actions.push(SyncAction::Create {
                    path: path.clone(),
                    is_dir: *kind == EntryKind::Dir,
                }),
                (EntryKind::File, Some(EntryKind::File)) => {
                    if differing.contains(path) {
                        actions.push(SyncAction::Update { path: path.clone() });
                    }
                }
                (EntryKind::Dir, Some(EntryKind::Dir)) => {}
                (EntryKind::Symlink, Some(EntryKind::Symlink)) => {
                    if fs::read_link(source.join(path))? != fs::read_link(destination.join(path))? {
                        actions.push(SyncAction::Update { path: path.clone() });
                    }
                }
                (_, Some(their_kind)) => {
                    if *their_kind == EntryKind::Dir {
                        replaced_dirs.push(path.clone());
                    }
                    actions.push(SyncAction::Update { path: path.clone() });
                }
            }
        }

        // Entries under a removed or replaced directory go with it. A
        // directory holding build artifacts stays, only its contents go.
        let mut removed: Vec<PathBuf> = replaced_dirs;
        for (path, kind) in &theirs {
            if ours.contains_key(path) || removed.iter().any(|root| path.starts_with(root)) {
                continue;
            }
            let is_dir = *kind == EntryKind::Dir;
            if is_dir && holders.contains(path) {
                continue;
            }
            if is_dir {
                removed.push(path.clone());
            }
            actions.push(SyncAction::Delete {
                path: path.clone(),
                is_dir,
            });
        }

        debug!("Planned {} sync actions", actions.len());
        Ok(SyncPlan { actions })
    }

    /// Perform `plan` against `destination`, reading new content from `source`
    pub fn apply(&self, plan: &SyncPlan, source: &Path, destination: &Path) -> Result<SyncReport> {
        let start = Instant::now();
        fs::create_dir_all(destination)?;

        for action in &plan.actions {
            info!("{}", action);
            let from = source.join(action.path());
            let to = destination.join(action.path());
            match action {
                SyncAction::Create { is_dir: true, .. } => fs::create_dir_all(&to)?,
                SyncAction::Create { is_dir: false, .. } => {
                    place(&from, &to, fs::symlink_metadata(&from)?.file_type())?
                }
                SyncAction::Update { path } => {
                    let from_type = fs::symlink_metadata(&from)?.file_type();
                    let to_type = fs::symlink_metadata(&to)?.file_type();
                    if to_type.is_dir() && !from_type.is_dir() {
                        warn!("Replacing directory {} and everything under it", path.display());
                        fs::remove_dir_all(&to)?;
                    } else if !(from_type.is_file() && to_type.is_file()) {
                        // Links are replaced, never written through
                        fs::remove_file(&to)?;
                    }
                    place(&from, &to, from_type)?;
                }
                SyncAction::Delete { is_dir: true, .. } => fs::remove_dir_all(&to)?,
                SyncAction::Delete { is_dir: false, .. } => fs::remove_file(&to)?,
            }
        }

        Ok(SyncReport {
            actions: plan.actions.clone(),
            duration: start.elapsed(),
        })
    }

    /// Make `destination` match `source`, creating it if needed
    #[instrument(skip(self), fields(source = %source.display(), destination = %destination.display()))]
    pub fn sync(&self, source: &Path, destination: &Path) -> Result<SyncReport> {
        fs::create_dir_all(destination)?;
        let plan = self.plan(source, destination)?;
        let report = self.apply(&plan, source, destination)?;
        info!("Sync complete: {}", report.summary());
        Ok(report)
    }

    /// Relative paths under `root` with their kind, build artifacts pruned
    fn scan(&self, root: &Path) -> Result<Scan> {
        let mut scan = Scan::default();
        if !root.exists() {
            return Ok(scan);
        }

        let mut pruned = Vec::new();
        let walker = WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| match entry.path().strip_prefix(root) {
                Ok(rel) if self.artifacts.is_excluded(rel) => {
                    pruned.push(rel.to_path_buf());
                    false
                }
                _ => true,
            });

        for entry in walker {
            let entry = entry?;
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| crate::error::ChronoError::internal(e.to_string()))?
                .to_path_buf();
            // Links are not followed, so a dangling one is still an entry
            let file_type = entry.file_type();
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            scan.entries.insert(rel, kind);
        }

        for artifact in pruned {
            scan.holders
                .extend(artifact.ancestors().skip(1).map(Path::to_path_buf));
        }
        Ok(scan)
    }
}

/// Tracked entries of one side plus the directories holding build artifacts
#[derive(Debug, Default)]
struct Scan {
    entries: BTreeMap<PathBuf, EntryKind>,
    holders: BTreeSet<PathBuf>,
}

fn files_differ(a: &Path, b: &Path) -> Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(true);
    }
    Ok(fs::read(a)? != fs::read(b)?)
}

/// Put a copy of the source entry `from` at `to`, recreating links as links
fn place(from: &Path, to: &Path, kind: fs::FileType) -> Result<()> {
    if kind.is_dir() {
        fs::create_dir_all(to)?;
        return Ok(());
    }
    if kind.is_symlink() {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        return create_symlink(&fs::read_link(from)?, to);
    }
    copy_file(from, to)
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, to)?;
    Ok(())
}
