//! Error types for chronotree
//!
//! This module defines all error types that can occur while resolving,
//! materializing, patching, or syncing a reconstructed tree. Errors carry the
//! version and artifact involved so a failed request can be diagnosed without
//! re-running it.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the chronotree library
pub type Result<T> = std::result::Result<T, ChronoError>;

/// Main error type for all chronotree operations
#[derive(Debug, Error)]
pub enum ChronoError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Version is neither backed by a snapshot nor reachable through a diff step
    #[error("Unknown version: {0}")]
    UnknownVersion(String),

    /// The diff-step table loops back on itself
    #[error("Circular dependency detected while resolving version {0}")]
    CircularDependency(String),

    /// A snapshot could not be listed or unpacked
    #[error("Extraction of {artifact} for version {version} failed: {message}")]
    ExtractionFailed {
        /// Version being materialized
        version: String,
        /// Snapshot artifact name
        artifact: String,
        /// Underlying failure
        message: String,
    },

    /// A diff did not apply cleanly
    #[error("Applying {diff} for version {version} failed: {message}")]
    PatchFailed {
        /// Version the diff produces
        version: String,
        /// Diff artifact name
        diff: String,
        /// Output of the patch tool or the underlying failure
        message: String,
    },

    /// External program exited unsuccessfully
    #[error("{program} exited with status {code}: {stderr}")]
    CommandFailed {
        /// Program that was run
        program: String,
        /// Exit code, -1 when killed by a signal
        code: i32,
        /// Captured diagnostic output
        stderr: String,
    },

    /// Artifact file is not present in the archive directory
    #[error("Archive not found: {0:?}")]
    ArchiveMissing(PathBuf),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Build-artifact pattern could not be compiled
    #[error("Invalid build artifact pattern: {0}")]
    InvalidPattern(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<globset::Error> for ChronoError {
    fn from(err: globset::Error) -> Self {
        ChronoError::InvalidPattern(err.to_string())
    }
}

impl ChronoError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        ChronoError::Internal(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        ChronoError::InvalidConfiguration(msg.into())
    }

    /// Check if this error was raised by an external extraction or patch step
    pub fn is_tool_failure(&self) -> bool {
        matches!(
            self,
            ChronoError::ExtractionFailed { .. }
                | ChronoError::PatchFailed { .. }
                | ChronoError::ArchiveMissing(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            ChronoError::UnknownVersion(version) => {
                format!("Version '{}' is not in the catalog. Use 'chronotree versions' to see what can be reconstructed.", version)
            }
            ChronoError::ArchiveMissing(path) => {
                format!("Archive {:?} does not exist. Check --archive-dir or the 'archive_dir' configuration key.", path)
            }
            ChronoError::PatchFailed { version, diff, .. } => {
                format!(
                    "{} did not apply while building {}. The working tree was left in place for inspection.",
                    diff, version
                )
            }
            _ => self.to_string(),
        }
    }
}
