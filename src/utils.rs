//! Utility functions for chronotree
//!
//! Tree-level helpers shared by the reconstruction steps and the CLI.
//!
//! ## Categories of Utilities
//!
//! ### Tree Operations
//! - Recursive copy that preserves permissions and symbolic links
//! - Content digest of a whole tree, build artifacts excluded
//!
//! ### File Operations
//! - File content hashing (SHA-256)
//! - Symbolic link creation (cross-platform)
//!
//! ### Formatting
//! - Byte formatting (human-readable sizes)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use chronotree::utils::{copy_tree, hash_tree};
//! use chronotree::BuildArtifacts;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! copy_tree(Path::new("ruby-0.49"), Path::new("/tmp/work"))?;
//! let digest = hash_tree(Path::new("/tmp/work"), &BuildArtifacts::default())?;
//! println!("{} ({} files)", digest.digest, digest.files);
//! # Ok(())
//! # }
//! ```

use crate::error::{ChronoError, Result};
use crate::sync::BuildArtifacts;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Calculate SHA-256 hash of file content
///
/// Reads the file in chunks so large archives do not have to fit in memory.
///
/// # Arguments
///
/// * `path` - Path to the file to hash
///
/// # Returns
///
/// Returns the SHA-256 hash as a 64-character hexadecimal string.
///
/// # Errors
///
/// - [`ChronoError::Io`] if the file cannot be opened or read
pub fn hash_file_content(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Content digest of a tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDigest {
    /// SHA-256 over every path, entry kind, and file content, in path order
    pub digest: String,
    /// Number of regular files covered
    pub files: usize,
    /// Total size of those files
    pub total_bytes: u64,
}

/// Compute a digest identifying the content of the tree at `root`
///
/// Two trees have the same digest exactly when they hold the same relative
/// paths with the same kinds and byte-identical file contents. Build
/// artifacts are skipped the same way the synchronizer skips them, and
/// modification times are ignored.
///
/// # Errors
///
/// - [`ChronoError::Io`] or [`ChronoError::WalkDir`] on unreadable entries
pub fn hash_tree(root: &Path, artifacts: &BuildArtifacts) -> Result<TreeDigest> {
    let mut hasher = Sha256::new();
    let mut files = 0;
    let mut total_bytes = 0;

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            make_relative(entry.path(), root)
                .map(|rel| !artifacts.is_excluded(&rel))
                .unwrap_or(true)
        });

    for entry in walker {
        let entry = entry?;
        let rel = make_relative(entry.path(), root)?;
        hasher.update(rel.as_os_str().as_encoded_bytes());
        hasher.update(b"\0");

        let file_type = entry.file_type();
        if file_type.is_dir() {
            hasher.update(b"d");
        } else if file_type.is_symlink() {
            hasher.update(b"l");
            hasher.update(fs::read_link(entry.path())?.as_os_str().as_encoded_bytes());
        } else {
            hasher.update(b"f");
            hasher.update(hash_file_content(entry.path())?.as_bytes());
            files += 1;
            total_bytes += entry.metadata()?.len();
        }
        hasher.update(b"\0");
    }

    let digest = hex::encode(hasher.finalize());
    debug!("Digest of {:?}: {} ({} files)", root, digest, files);
    Ok(TreeDigest {
        digest,
        files,
        total_bytes,
    })
}

/// Replace `dest` with a recursive copy of `src`
///
/// Any existing `dest` is removed first. File permissions are preserved
/// (`configure` must stay executable) and symbolic links are recreated rather
/// than followed.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    if !src.is_dir() {
        return Err(ChronoError::internal(format!(
            "Source tree {:?} is not a directory",
            src
        )));
    }
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(dest)?,
        Ok(_) => fs::remove_file(dest)?,
        Err(_) => {}
    }
    fs::create_dir_all(dest)?;

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let target = dest.join(make_relative(entry.path(), src)?);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            create_symlink(&fs::read_link(entry.path())?, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
        trace!("Copied {:?}", target);
    }
    Ok(())
}

/// Convert absolute path to relative path from base
///
/// # Errors
///
/// - [`ChronoError::Internal`] if `path` is not under `base`
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .map_err(|_| ChronoError::internal(format!("Path {:?} is not relative to {:?}", path, base)))
}

/// Format bytes in human-readable form
///
/// Uses binary units (1024-based).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Create a symbolic link (cross-platform)
#[cfg(unix)]
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

/// Create a symbolic link (cross-platform)
#[cfg(windows)]
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)?;
    } else {
        std::os::windows::fs::symlink_file(target, link)?;
    }
    Ok(())
}
