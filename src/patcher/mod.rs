//! Rewrite pipeline for reconstructed trees
//!
//! A [`PatchPipeline`] runs an ordered list of [`Rule`]s over a working tree.
//! Each rule targets specific files, checks a precondition on their content,
//! and rewrites them with plain text substitution. Rules are:
//!
//! - **Guarded**: a missing file or an unmatched pattern is a no-op, never an
//!   error. Only I/O failures on files that do exist propagate.
//! - **Idempotent**: applying a rule to already-rewritten content changes
//!   nothing.
//! - **Change-aware**: every write goes through [`WorkingTree::rewrite_file`]
//!   or [`WorkingTree::write`], which compare old and new bytes and skip the
//!   write when they match. Running the pipeline twice therefore reports zero
//!   changed files the second time, and the synchronizer sees no spurious
//!   updates.
//!
//! Rules are not gated by version. Their patterns only match the legacy
//! constructs they repair, and that match is the only scoping they get.
//!
//! ## Rule order
//!
//! [`PatchPipeline::standard`] runs the rules in this order:
//!
//! 1. `convert_varargs_to_stdarg`
//! 2. `add_error_prototype` (keys off the `Error(char *fmt, ...)` definition
//!    produced by step 1, so it must come after it)
//! 3. the remaining rules in alphabetical order
//!
//! ## Example
//!
//! ```rust,no_run
//! use chronotree::PatchPipeline;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let report = PatchPipeline::standard().apply(Path::new("./ruby-0.49"))?;
//! for path in report.changed_files() {
//!     println!("patched {}", path.display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod build_config;
pub mod bytes;
pub mod declarations;
pub mod platform;
pub mod stdarg;

use crate::error::{ChronoError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, trace};

/// A tree being rewritten by the pipeline
///
/// All paths handed to it are relative to the tree root.
#[derive(Debug)]
pub struct WorkingTree {
    root: PathBuf,
    changed: Vec<PathBuf>,
}

impl WorkingTree {
    /// Wrap the directory at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            changed: Vec::new(),
        }
    }

    /// Root directory of the tree
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether anything exists at `rel_path`
    pub fn exists(&self, rel_path: &str) -> bool {
        self.root.join(rel_path).exists()
    }

    /// Whether a regular file exists at `rel_path`
    pub fn is_file(&self, rel_path: &str) -> bool {
        self.root.join(rel_path).is_file()
    }

    /// Content of `rel_path`, `None` when it is not a file
    pub fn read(&self, rel_path: &str) -> Result<Option<Vec<u8>>> {
        let path = self.root.join(rel_path);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }

    /// Rewrite `rel_path` through `f`
    ///
    /// `f` returns `None` to leave the file alone. The file is only written when
    /// the returned bytes differ from the current content. A missing file is a
    /// no-op. Returns whether the file changed.
    pub fn rewrite_file<F>(&mut self, rel_path: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&[u8]) -> Option<Vec<u8>>,
    {
        let Some(src) = self.read(rel_path)? else {
            trace!("{} not present, skipping", rel_path);
            return Ok(false);
        };
        match f(&src) {
            Some(rewritten) => self.write_if_changed(rel_path, &src, &rewritten),
            None => Ok(false),
        }
    }

    /// Write `content` to `rel_path`, creating parent directories
    ///
    /// Skips the write when the file already holds exactly `content`.
    pub fn write(&mut self, rel_path: &str, content: &[u8]) -> Result<bool> {
        let current = self.read(rel_path)?;
        if current.as_deref() == Some(content) {
            return Ok(false);
        }
        let path = self.root.join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        self.changed.push(PathBuf::from(rel_path));
        Ok(true)
    }

    /// Create `rel_path` and its parents as directories
    pub fn create_dir_all(&self, rel_path: &str) -> Result<()> {
        fs::create_dir_all(self.root.join(rel_path))?;
        Ok(())
    }

    /// Top-level files whose extension is `ext`, sorted by name
    pub fn top_level_files(&self, ext: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn write_if_changed(&mut self, rel_path: &str, old: &[u8], new: &[u8]) -> Result<bool> {
        if old == new {
            return Ok(false);
        }
        fs::write(self.root.join(rel_path), new)?;
        self.changed.push(PathBuf::from(rel_path));
        Ok(true)
    }

    fn take_changed(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.changed)
    }
}

/// One named rewrite step
#[derive(Clone, Copy)]
pub struct Rule {
    /// Stable rule name
    pub name: &'static str,
    /// Rule body
    pub apply: fn(&mut WorkingTree) -> Result<()>,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

impl Rule {
    /// Create a rule from a name and a function
    pub const fn new(name: &'static str, apply: fn(&mut WorkingTree) -> Result<()>) -> Self {
        Self { name, apply }
    }
}

/// Files a single rule changed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleOutcome {
    /// Rule name
    pub rule: String,
    /// Relative paths written by the rule, in write order
    pub changed: Vec<PathBuf>,
}

/// Result of running a pipeline over a tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatchReport {
    /// One outcome per rule, in execution order
    pub outcomes: Vec<RuleOutcome>,
}

impl PatchReport {
    /// Distinct files changed by any rule, in first-write order
    pub fn changed_files(&self) -> Vec<&Path> {
        let mut seen = Vec::new();
        for path in self.outcomes.iter().flat_map(|o| o.changed.iter()) {
            if !seen.contains(&path.as_path()) {
                seen.push(path.as_path());
            }
        }
        seen
    }

    /// Whether the run left every file untouched
    pub fn is_noop(&self) -> bool {
        self.outcomes.iter().all(|o| o.changed.is_empty())
    }
}

/// Ordered collection of rewrite rules
#[derive(Debug, Clone)]
pub struct PatchPipeline {
    rules: Vec<Rule>,
}

impl PatchPipeline {
    /// Pipeline running exactly `rules`, in order
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// The built-in rule set, in its documented order
    pub fn standard() -> Self {
        Self::new(vec![
            Rule::new("convert_varargs_to_stdarg", stdarg::convert_varargs_to_stdarg),
            Rule::new("add_error_prototype", declarations::add_error_prototype),
            Rule::new("deduplicate_vars", declarations::deduplicate_vars),
            Rule::new("fix_alloca_prototype", declarations::fix_alloca_prototype),
            Rule::new("fix_dbmcc", build_config::fix_dbmcc),
            Rule::new("fix_dirent_conf", platform::fix_dirent_conf),
            Rule::new("fix_errno_decl", declarations::fix_errno_decl),
            Rule::new("fix_ldshared", build_config::fix_ldshared),
            Rule::new("fix_missing_ext_makefile", build_config::fix_missing_ext_makefile),
            Rule::new("fix_pow_detection", platform::fix_pow_detection),
            Rule::new("fix_re_match_2", declarations::fix_re_match_2),
            Rule::new("fix_renamed_cons", build_config::fix_renamed_cons),
            Rule::new("fix_stdio_pending", platform::fix_stdio_pending),
            Rule::new("fix_struct_va_end", declarations::fix_struct_va_end),
            Rule::new("fix_sys_nerr", declarations::fix_sys_nerr),
            Rule::new("include_time_header", declarations::include_time_header),
            Rule::new("use_crypt", build_config::use_crypt),
            Rule::new("use_gdbm_compat", build_config::use_gdbm_compat),
        ])
    }

    /// Drop the named rules
    ///
    /// # Errors
    ///
    /// [`ChronoError::InvalidConfiguration`] if a name matches no rule.
    pub fn without<S: AsRef<str>>(mut self, names: &[S]) -> Result<Self> {
        for name in names {
            let name = name.as_ref();
            if !self.rules.iter().any(|r| r.name == name) {
                return Err(ChronoError::config(format!("unknown rule '{}'", name)));
            }
            self.rules.retain(|r| r.name != name);
        }
        Ok(self)
    }

    /// Rules in execution order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Run every rule over the tree at `root`
    #[instrument(skip(self), fields(root = %root.display()))]
    pub fn apply(&self, root: &Path) -> Result<PatchReport> {
        let mut tree = WorkingTree::new(root);
        let mut report = PatchReport::default();

        for rule in &self.rules {
            (rule.apply)(&mut tree)?;
            let changed = tree.take_changed();
            if !changed.is_empty() {
                debug!("{} changed {} file(s)", rule.name, changed.len());
            }
            report.outcomes.push(RuleOutcome {
                rule: rule.name.to_string(),
                changed,
            });
        }

        info!(
            "Applied {} rules, {} file(s) changed",
            self.rules.len(),
            report.changed_files().len()
        );
        Ok(report)
    }
}

impl Default for PatchPipeline {
    fn default() -> Self {
        Self::standard()
    }
}
