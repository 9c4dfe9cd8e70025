//! Integration tests for chronotree
//!
//! Builds a small synthetic release history on disk (gzip snapshots with the
//! wrapping styles old releases used, plus diffs) and drives whole
//! reconstructions through it.

use ::chronotree::utils::hash_tree;
use ::chronotree::*;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use tracing::info;

/// Treats each diff line `path=content` as "replace this file"
///
/// A line `path=` deletes the file instead.
pub struct LineDiffApplier;

impl PatchApplier for LineDiffApplier {
    fn apply_patch(&self, diff: &Path, target: &Path) -> Result<()> {
        for line in fs::read_to_string(diff)?.lines() {
            let (path, content) = line
                .split_once('=')
                .ok_or_else(|| ChronoError::internal(format!("malformed test diff line {:?}", line)))?;
            let file = target.join(path);
            if content.is_empty() {
                fs::remove_file(&file)?;
                continue;
            }
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(file, format!("{}\n", content))?;
        }
        Ok(())
    }
}

/// Archive directory holding a synthetic release history
pub struct ReleaseFixture {
    pub archives: TempDir,
    pub catalog: ArchiveCatalog,
}

impl ReleaseFixture {
    /// Empty history with the `ruby-<version>.tar.gz` naming
    pub fn new() -> Self {
        Self {
            archives: TempDir::new().unwrap(),
            catalog: ArchiveCatalog::new("ruby-", ".tar.gz"),
        }
    }

    /// Add a snapshot, wrapped as `<wrapper>ruby-<version>/...`
    pub fn snapshot(mut self, version: &str, wrapper: &str, files: &[(&str, &str)]) -> Self {
        let name = self.catalog.snapshot_name(version);
        let file = File::create(self.archives.path().join(&name)).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (path, content) in files {
            // Raw name bytes keep a leading "./" that set_path would drop
            let entry_name = format!("{}ruby-{}/{}", wrapper, version, path);
            let mut header = tar::Header::new_gnu();
            header.as_old_mut().name[..entry_name.len()].copy_from_slice(entry_name.as_bytes());
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(content.len() as u64);
            header.set_mode(if path.ends_with(".sh") { 0o755 } else { 0o644 });
            header.set_cksum();
            builder.append(&header, content.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();

        self.catalog = self.catalog.with_snapshot(version);
        self
    }

    /// Add a diff step from `previous` to `version`
    pub fn diff(mut self, previous: &str, version: &str, lines: &[&str]) -> Self {
        let name = format!("ruby-{}-{}.diff", previous, version);
        let mut content = lines.join("\n");
        content.push('\n');
        fs::write(self.archives.path().join(&name), content).unwrap();

        self.catalog = self.catalog.with_diff(previous, version, name);
        self
    }

    /// Add a gzipped unified diff step from `previous` to `version`
    pub fn unified_diff(mut self, previous: &str, version: &str, body: &str) -> Self {
        let name = format!("ruby-{}-{}.diff.gz", previous, version);
        let file = File::create(self.archives.path().join(&name)).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(body.as_bytes()).unwrap();
        encoder.finish().unwrap();

        self.catalog = self.catalog.with_diff(previous, version, name);
        self
    }

    /// Reconstructor over this history with the line-diff fake
    pub fn reconstructor(&self) -> Reconstructor {
        ReconstructorBuilder::new()
            .archive_dir(self.archives.path())
            .catalog(self.catalog.clone())
            .patch_applier(Box::new(LineDiffApplier))
            .build()
            .unwrap()
    }
}

impl Default for ReleaseFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A slice of an early interpreter tree that several rewrite rules target
pub fn legacy_tree() -> Vec<(&'static str, &'static str)> {
    vec![
        ("Makefile.in", "CC = @CC@\nDBMCC = cc\n"),
        ("array.c", "#include \"ruby.h\"\n"),
        (
            "error.c",
            "#include <stdio.h>\n#include <varargs.h>\n\nextern int sys_nerr;\n\nvoid\nWarning(fmt, va_alist)\n    char *fmt;\n    va_dcl\n{\n    va_list args;\n\n    va_start(args);\n    vfprintf(stderr, fmt, args);\n    va_end(args);\n}\n",
        ),
        ("glob.c", "char *alloca ();\n"),
        ("struct.c", "    va_end(vargs);\n"),
        ("time.c", "#include <sys/time.h>\nstatic int t;\n"),
        ("lib/tk.rb", "# tk\n"),
        ("ext/extmk.rb.in", "LDSHARED = @LDSHARED@\n"),
    ]
}

fn read_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

#[test]
fn test_materialize_strips_wrapping_directories() {
    let fixture = ReleaseFixture::new()
        .snapshot("0.49", "", &[("eval.c", "a\n"), ("lib/find.rb", "b\n")])
        .snapshot("0.50", "./", &[("eval.c", "a\n"), ("lib/find.rb", "b\n")]);
    let reconstructor = fixture.reconstructor();
    let work = TempDir::new().unwrap();

    let plain = work.path().join("plain");
    let dotted = work.path().join("dotted");
    reconstructor.materialize("0.49", &plain).unwrap();
    reconstructor.materialize("0.50", &dotted).unwrap();

    assert!(plain.join("eval.c").is_file());
    assert!(dotted.join("lib/find.rb").is_file());
    assert!(!dotted.join("ruby-0.50").exists());

    let artifacts = BuildArtifacts::default();
    assert_eq!(
        hash_tree(&plain, &artifacts).unwrap().digest,
        hash_tree(&dotted, &artifacts).unwrap().digest
    );
}

#[test]
fn test_materialize_is_reproducible() {
    let fixture = ReleaseFixture::new()
        .snapshot("0.65", "", &legacy_tree())
        .diff("0.65", "0.66", &["version.h=#define RUBY_VERSION \"0.66\""])
        .diff("0.66", "0.67", &["lib/tk.rb=", "lib/tk/core.rb=# tk core"]);
    let reconstructor = fixture.reconstructor();
    let work = TempDir::new().unwrap();

    let first = work.path().join("first");
    let second = work.path().join("second");
    let chain = reconstructor.materialize("0.67", &first).unwrap();
    reconstructor.materialize("0.67", &second).unwrap();

    assert_eq!(
        chain.names(),
        vec!["ruby-0.65.tar.gz", "ruby-0.65-0.66.diff", "ruby-0.66-0.67.diff"]
    );
    assert_eq!(read_tree(&first), read_tree(&second));
    assert!(!first.join("lib/tk.rb").exists());
    assert_eq!(
        fs::read_to_string(first.join("lib/tk/core.rb")).unwrap(),
        "# tk core\n"
    );
}

#[test]
fn test_materialize_clears_previous_contents() {
    let fixture = ReleaseFixture::new().snapshot("0.49", "", &[("eval.c", "a\n")]);
    let work = TempDir::new().unwrap();
    let dest = work.path().join("tree");
    fs::create_dir_all(dest.join("leftover")).unwrap();
    fs::write(dest.join("leftover/file.c"), "x").unwrap();

    fixture.reconstructor().materialize("0.49", &dest).unwrap();

    assert!(!dest.join("leftover").exists());
    assert!(dest.join("eval.c").is_file());
}

#[test]
fn test_failed_diff_names_version_and_artifact() {
    let fixture = ReleaseFixture::new()
        .snapshot("0.51", "", &[("eval.c", "a\n")])
        .diff("0.51", "0.52", &["this line is not a diff"]);
    let work = TempDir::new().unwrap();

    let err = fixture
        .reconstructor()
        .materialize("0.52", &work.path().join("tree"))
        .unwrap_err();
    match err {
        ChronoError::PatchFailed { version, diff, .. } => {
            assert_eq!(version, "0.52");
            assert_eq!(diff, "ruby-0.51-0.52.diff");
        }
        other => panic!("unexpected error: {}", other),
    }
}

fn patch_available() -> bool {
    Command::new("patch")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[test]
fn test_patch_command_applies_gzipped_diffs() {
    if !patch_available() {
        info!("patch not on PATH, skipping");
        return;
    }
    let fixture = ReleaseFixture::new()
        .snapshot("0.49", "", &[("eval.c", "int eval;\nint version = 49;\n")])
        .unified_diff(
            "0.49",
            "0.50",
            "--- ruby-0.49/eval.c\n\
             +++ ruby-0.50/eval.c\n\
             @@ -1,2 +1,2 @@\n\
             \x20int eval;\n\
             -int version = 49;\n\
             +int version = 50;\n\
             --- /dev/null\n\
             +++ ruby-0.50/version.h\n\
             @@ -0,0 +1 @@\n\
             +#define RUBY_VERSION \"0.50\"\n",
        )
        .unified_diff(
            "0.50",
            "0.51",
            "--- ruby-0.50/eval.c\n\
             +++ ruby-0.51/eval.c\n\
             @@ -1,2 +1,2 @@\n\
             \x20int nothing_like_this;\n\
             -int missing_line = 0;\n\
             +int version = 51;\n",
        );
    let reconstructor = ReconstructorBuilder::new()
        .archive_dir(fixture.archives.path())
        .catalog(fixture.catalog.clone())
        .build()
        .unwrap();
    let work = TempDir::new().unwrap();

    let tree = work.path().join("tree");
    let chain = reconstructor.materialize("0.50", &tree).unwrap();
    assert_eq!(chain.names(), vec!["ruby-0.49.tar.gz", "ruby-0.49-0.50.diff.gz"]);
    assert_eq!(
        fs::read_to_string(tree.join("eval.c")).unwrap(),
        "int eval;\nint version = 50;\n"
    );
    assert_eq!(
        fs::read_to_string(tree.join("version.h")).unwrap(),
        "#define RUBY_VERSION \"0.50\"\n"
    );

    let err = reconstructor
        .materialize("0.51", &work.path().join("broken"))
        .unwrap_err();
    match err {
        ChronoError::PatchFailed { version, diff, message } => {
            assert_eq!(version, "0.51");
            assert_eq!(diff, "ruby-0.50-0.51.diff.gz");
            assert!(message.contains("patch"), "unexpected message: {}", message);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_missing_archive_is_reported() {
    let fixture = ReleaseFixture::new().snapshot("0.49", "", &[("eval.c", "a\n")]);
    fs::remove_file(fixture.archives.path().join("ruby-0.49.tar.gz")).unwrap();
    let work = TempDir::new().unwrap();

    let err = fixture
        .reconstructor()
        .materialize("0.49", &work.path().join("tree"))
        .unwrap_err();
    assert!(matches!(err, ChronoError::ArchiveMissing(_)));
    assert!(err.is_tool_failure());
}

#[test]
fn test_pipeline_second_run_is_noop() {
    let fixture = ReleaseFixture::new().snapshot("0.65", "", &legacy_tree());
    let work = TempDir::new().unwrap();
    let tree = work.path().join("tree");
    let reconstructor = fixture.reconstructor();
    reconstructor.materialize("0.65", &tree).unwrap();

    let first = reconstructor.patch(&tree).unwrap();
    let changed: Vec<&Path> = first.changed_files();
    info!("First pass changed {} file(s)", changed.len());
    for expected in ["Makefile.in", "error.c", "glob.c", "struct.c", "time.c", "ext/extmk.rb.in"] {
        assert!(
            changed.contains(&Path::new(expected)),
            "{} should have been rewritten",
            expected
        );
    }
    assert!(!changed.contains(&Path::new("array.c")));

    let snapshot = read_tree(&tree);
    let second = reconstructor.patch(&tree).unwrap();
    assert!(second.is_noop(), "second pass changed {:?}", second.changed_files());
    assert_eq!(read_tree(&tree), snapshot);

    let error_c = fs::read_to_string(tree.join("error.c")).unwrap();
    assert!(error_c.contains("Warning(char *fmt, ...)"));
    assert!(error_c.contains("#define sys_nerr 256"));
    assert!(error_c.starts_with("#include <errno.h>;\n"));
}

#[test]
fn test_disabled_rules_are_skipped() {
    let fixture = ReleaseFixture::new().snapshot("0.65", "", &legacy_tree());
    let work = TempDir::new().unwrap();
    let tree = work.path().join("tree");

    let reconstructor = ReconstructorBuilder::new()
        .archive_dir(fixture.archives.path())
        .catalog(fixture.catalog.clone())
        .pipeline(PatchPipeline::standard().without(&["fix_dbmcc"]).unwrap())
        .build()
        .unwrap();
    reconstructor.materialize("0.65", &tree).unwrap();
    reconstructor.patch(&tree).unwrap();

    assert_eq!(
        fs::read_to_string(tree.join("Makefile.in")).unwrap(),
        "CC = @CC@\nDBMCC = cc\n"
    );
}

#[test]
fn test_reconstruct_across_versions_keeps_build_outputs() {
    let fixture = ReleaseFixture::new()
        .snapshot("0.65", "", &legacy_tree())
        .diff("0.65", "0.66", &["array.c=#include \"ruby.h\" /* 0.66 */"])
        .diff("0.66", "0.67", &["lib/tk.rb="]);
    let reconstructor = fixture.reconstructor();
    let work = TempDir::new().unwrap();
    let dest = work.path().join("ruby");

    let report = reconstructor.reconstruct("0.65", &dest, false).unwrap();
    assert!(!report.dry_run);
    assert!(report
        .sync
        .actions
        .iter()
        .all(|a| matches!(a, SyncAction::Create { .. })));

    // Simulate a build in the destination
    fs::write(dest.join("Makefile"), "all: ruby\n").unwrap();
    fs::write(dest.join("array.o"), "object").unwrap();
    fs::write(dest.join("ruby"), "binary").unwrap();
    let time_mtime = fs::metadata(dest.join("time.c")).unwrap().modified().unwrap();

    let report = reconstructor.reconstruct("0.66", &dest, false).unwrap();
    let lines: Vec<String> = report.sync.actions.iter().map(|a| a.to_string()).collect();
    assert_eq!(lines, vec!["update array.c"]);

    let report = reconstructor.reconstruct("0.67", &dest, false).unwrap();
    let lines: Vec<String> = report.sync.actions.iter().map(|a| a.to_string()).collect();
    assert_eq!(lines, vec!["rm lib/tk.rb"]);

    assert_eq!(fs::read_to_string(dest.join("Makefile")).unwrap(), "all: ruby\n");
    assert_eq!(fs::read_to_string(dest.join("array.o")).unwrap(), "object");
    assert_eq!(fs::read_to_string(dest.join("ruby")).unwrap(), "binary");
    assert_eq!(
        fs::metadata(dest.join("time.c")).unwrap().modified().unwrap(),
        time_mtime
    );

    // Going back restores the file
    let report = reconstructor.reconstruct("0.65", &dest, false).unwrap();
    let lines: Vec<String> = report.sync.actions.iter().map(|a| a.to_string()).collect();
    assert_eq!(lines, vec!["update array.c", "create lib/tk.rb"]);
}

#[test]
fn test_dry_run_matches_real_run() {
    let fixture = ReleaseFixture::new().snapshot("0.65", "./", &legacy_tree());
    let reconstructor = fixture.reconstructor();
    let work = TempDir::new().unwrap();
    let dest = work.path().join("ruby");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("stale.c"), "old").unwrap();

    let planned = reconstructor.reconstruct("0.65", &dest, true).unwrap();
    assert!(planned.dry_run);
    assert!(dest.join("stale.c").exists());
    assert!(!dest.join("array.c").exists());

    let applied = reconstructor.reconstruct("0.65", &dest, false).unwrap();
    assert_eq!(planned.sync.actions, applied.sync.actions);
    assert!(!dest.join("stale.c").exists());
}

#[test]
fn test_sync_patched_leaves_source_alone() {
    let src = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    for (path, content) in legacy_tree() {
        let file = src.path().join(path);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, content).unwrap();
    }
    let before = read_tree(src.path());

    let reconstructor = ReconstructorBuilder::new().build().unwrap();
    let dest = work.path().join("ruby");
    let (patch, sync) = reconstructor.sync_patched(src.path(), &dest).unwrap();

    assert!(!patch.is_noop());
    assert!(!sync.is_noop());
    assert_eq!(read_tree(src.path()), before);
    assert_eq!(
        fs::read_to_string(dest.join("Makefile.in")).unwrap(),
        "CC = @CC@\nDBMCC = @CC@\n"
    );
}
