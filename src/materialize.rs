//! Tree materialization
//!
//! Builds the working tree for a version from its [`DependencyChain`]: the
//! snapshot is unpacked into a freshly cleared destination, then every diff is
//! applied in order on top of it.
//!
//! Extraction and diff application are delegated to the [`Extractor`] and
//! [`PatchApplier`] traits so the tools can be swapped (or faked in tests).
//! The defaults are:
//!
//! - [`TarExtractor`]: reads plain or gzip-compressed tarballs natively
//! - [`PatchCommand`]: runs the system `patch` program with `-p1`, feeding the
//!   diff on stdin and gunzipping `*.gz` diffs first
//!
//! ## Wrapping directories
//!
//! Old release tarballs wrap the tree in a top-level directory, and some of
//! them were created from inside the parent directory so every entry also
//! starts with `./` (`./ruby-0.49/eval.c`). The materializer lists the entries
//! first and strips two leading components in that case, one otherwise, so the
//! destination always holds the tree root directly.
//!
//! ## Failure behaviour
//!
//! Materialization is destructive at the destination and is not rolled back on
//! failure. A partially built tree stays on disk for inspection.

use crate::catalog::ArchiveCatalog;
use crate::error::{ChronoError, Result};
use crate::resolver::{Artifact, DependencyChain, VersionResolver};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use tar::Archive;
use tracing::{debug, info, instrument, trace, warn};

/// Lists and unpacks snapshot archives
pub trait Extractor: Send + Sync {
    /// Paths of all entries stored in `archive`, as recorded
    fn entries(&self, archive: &Path) -> Result<Vec<PathBuf>>;

    /// Unpack `archive` into `dest`, dropping `strip_components` leading
    /// path components from every entry
    fn extract(&self, archive: &Path, dest: &Path, strip_components: usize) -> Result<()>;
}

/// Applies a diff artifact to a tree in place
pub trait PatchApplier: Send + Sync {
    /// Apply `diff` against the tree rooted at `target`
    fn apply_patch(&self, diff: &Path, target: &Path) -> Result<()>;
}

/// Native tar reader with gzip support
#[derive(Debug, Clone, Copy, Default)]
pub struct TarExtractor;

impl TarExtractor {
    fn open(archive: &Path) -> Result<Archive<Box<dyn Read>>> {
        let file = File::open(archive)?;
        let reader: Box<dyn Read> = if is_gzip(archive) {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Archive::new(reader))
    }
}

impl Extractor for TarExtractor {
    fn entries(&self, archive: &Path) -> Result<Vec<PathBuf>> {
        let mut tarball = Self::open(archive)?;
        let mut paths = Vec::new();
        for entry in tarball.entries()? {
            let entry = entry?;
            paths.push(entry.path()?.into_owned());
        }
        Ok(paths)
    }

    fn extract(&self, archive: &Path, dest: &Path, strip_components: usize) -> Result<()> {
        let mut tarball = Self::open(archive)?;
        for entry in tarball.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.into_owned();
            let Some(relative) = strip_path(&path, strip_components) else {
                trace!("Skipping wrapper entry {:?}", path);
                continue;
            };
            if !is_contained(&relative) {
                warn!("Skipping entry escaping the destination: {:?}", path);
                continue;
            }

            let target = dest.join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            if entry.header().entry_type().is_hard_link() {
                // Link names are archive paths and need the same stripping
                let link = entry
                    .link_name()?
                    .map(|l| l.into_owned())
                    .and_then(|l| strip_path(&l, strip_components));
                match link {
                    Some(link) if is_contained(&link) => {
                        fs::hard_link(dest.join(link), &target)?;
                    }
                    _ => warn!("Skipping hard link with unusable target: {:?}", path),
                }
                continue;
            }

            entry.unpack(&target)?;
        }
        Ok(())
    }
}

/// Runs an external `patch` program
#[derive(Debug, Clone)]
pub struct PatchCommand {
    program: PathBuf,
}

impl PatchCommand {
    /// Use `program` instead of `patch` from `PATH`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for PatchCommand {
    fn default() -> Self {
        Self::new("patch")
    }
}

impl PatchApplier for PatchCommand {
    fn apply_patch(&self, diff: &Path, target: &Path) -> Result<()> {
        let mut data = Vec::new();
        if is_gzip(diff) {
            GzDecoder::new(File::open(diff)?).read_to_end(&mut data)?;
        } else {
            File::open(diff)?.read_to_end(&mut data)?;
        }

        let mut child = Command::new(&self.program)
            .arg("-p1")
            .arg("-s")
            .arg("-d")
            .arg(target)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ChronoError::internal("patch stdin was not captured"))?;
        let writer = std::thread::spawn(move || stdin.write_all(&data));
        let output = child.wait_with_output()?;
        let written = writer
            .join()
            .map_err(|_| ChronoError::internal("patch input writer panicked"))?;

        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
            stderr.push_str(&String::from_utf8_lossy(&output.stdout));
            return Err(ChronoError::CommandFailed {
                program: self.program.display().to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }
        written?;
        Ok(())
    }
}

/// Builds working trees for catalog versions
pub struct TreeMaterializer {
    catalog: ArchiveCatalog,
    archive_dir: PathBuf,
    extractor: Box<dyn Extractor>,
    patch_applier: Box<dyn PatchApplier>,
}

impl std::fmt::Debug for TreeMaterializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeMaterializer")
            .field("archive_dir", &self.archive_dir)
            .field("versions", &self.catalog.versions.len())
            .finish()
    }
}

impl TreeMaterializer {
    /// Create a materializer using the default tar reader and `patch` program
    pub fn new(catalog: ArchiveCatalog, archive_dir: PathBuf) -> Self {
        Self {
            catalog,
            archive_dir,
            extractor: Box::new(TarExtractor),
            patch_applier: Box::new(PatchCommand::default()),
        }
    }

    /// Replace the snapshot extractor
    pub fn with_extractor(mut self, extractor: Box<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replace the diff applier
    pub fn with_patch_applier(mut self, patch_applier: Box<dyn PatchApplier>) -> Self {
        self.patch_applier = patch_applier;
        self
    }

    /// Catalog versions are resolved against
    pub fn catalog(&self) -> &ArchiveCatalog {
        &self.catalog
    }

    /// Directory holding the artifact files
    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Materialize `version` at `dest`
    ///
    /// Clears `dest`, unpacks the version's snapshot and applies its diffs in
    /// chain order. Returns the chain that was used.
    ///
    /// # Errors
    ///
    /// - [`ChronoError::UnknownVersion`] / [`ChronoError::CircularDependency`]
    ///   from resolution
    /// - [`ChronoError::ArchiveMissing`] if an artifact file is absent
    /// - [`ChronoError::ExtractionFailed`] if the snapshot cannot be unpacked
    /// - [`ChronoError::PatchFailed`] naming the version and diff that failed
    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    pub fn materialize(&self, version: &str, dest: &Path) -> Result<DependencyChain> {
        let chain = VersionResolver::new(&self.catalog).chain(version)?;
        info!(
            "Materializing {} from {} artifact(s)",
            version,
            chain.artifacts.len()
        );

        self.extract_snapshot(chain.snapshot(), dest)?;
        for diff in chain.diffs() {
            self.apply_diff(diff, dest)?;
        }

        Ok(chain)
    }

    fn artifact_path(&self, artifact: &Artifact) -> Result<PathBuf> {
        let path = self.archive_dir.join(&artifact.name);
        if !path.is_file() {
            return Err(ChronoError::ArchiveMissing(path));
        }
        Ok(path)
    }

    fn extract_snapshot(&self, snapshot: &Artifact, dest: &Path) -> Result<()> {
        let archive = self.artifact_path(snapshot)?;
        let failed = |e: ChronoError| ChronoError::ExtractionFailed {
            version: snapshot.version.clone(),
            artifact: snapshot.name.clone(),
            message: e.to_string(),
        };

        clear_directory(dest)?;

        let entries = self.extractor.entries(&archive).map_err(failed)?;
        let strip = strip_depth(&entries);
        debug!(
            "Extracting {} ({} entries, stripping {} component(s))",
            snapshot.name,
            entries.len(),
            strip
        );
        self.extractor
            .extract(&archive, dest, strip)
            .map_err(failed)
    }

    fn apply_diff(&self, diff: &Artifact, dest: &Path) -> Result<()> {
        let path = self.artifact_path(diff)?;
        debug!("Applying {} to reach {}", diff.name, diff.version);
        self.patch_applier
            .apply_patch(&path, dest)
            .map_err(|e| ChronoError::PatchFailed {
                version: diff.version.clone(),
                diff: diff.name.clone(),
                message: e.to_string(),
            })
    }
}

/// Number of leading components that wrap the tree root in a listing
///
/// Two when entries are rooted at `./`, one otherwise.
pub fn strip_depth(entries: &[PathBuf]) -> usize {
    let dot_rooted = entries
        .iter()
        .any(|p| matches!(p.components().next(), Some(Component::CurDir)));
    if dot_rooted {
        2
    } else {
        1
    }
}

/// Drop `count` leading components, `None` if nothing is left
fn strip_path(path: &Path, count: usize) -> Option<PathBuf> {
    let rest: PathBuf = path.components().skip(count).collect();
    if rest.as_os_str().is_empty() {
        None
    } else {
        Some(rest)
    }
}

fn is_contained(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn is_gzip(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("gz") | Some("tgz")
    )
}

fn clear_directory(dest: &Path) -> Result<()> {
    match fs::symlink_metadata(dest) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(dest)?,
        Ok(_) => fs::remove_file(dest)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::create_dir_all(dest)?;
    Ok(())
}
