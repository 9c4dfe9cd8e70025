//! Property-based testing for chronotree
//!
//! Uses proptest to check resolver and synchronizer invariants over randomly
//! generated catalogs and trees.

use ::chronotree::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Generate relative file paths
///
/// Directory and file names come from disjoint alphabets so a generated path
/// never needs to be both a file and a directory.
fn path_strategy() -> impl Strategy<Value = PathBuf> {
    let dirs = prop::collection::vec("d[a-c]", 0..=2);
    let file = prop_oneof!["f[a-e]\\.c", "f[a-e]\\.rb", "f[a-c]\\.o"];
    (dirs, file).prop_map(|(dirs, file)| {
        let mut path = PathBuf::new();
        for dir in dirs {
            path.push(dir);
        }
        path.push(file);
        path
    })
}

/// Generate a tree as path -> content
fn tree_strategy() -> impl Strategy<Value = BTreeMap<PathBuf, Vec<u8>>> {
    prop::collection::btree_map(
        path_strategy(),
        prop::collection::vec(any::<u8>(), 0..64),
        0..12,
    )
}

fn write_tree(root: &Path, tree: &BTreeMap<PathBuf, Vec<u8>>) {
    fs::create_dir_all(root).unwrap();
    for (path, content) in tree {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
}

fn read_files(root: &Path, artifacts: &BuildArtifacts) -> BTreeMap<PathBuf, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            if artifacts.is_excluded(&rel) {
                None
            } else {
                Some((rel, fs::read(e.path()).unwrap()))
            }
        })
        .collect()
}

/// Catalog where version `v{i}` is a snapshot or a diff from an earlier one
fn catalog_strategy() -> impl Strategy<Value = ArchiveCatalog> {
    prop::collection::vec(prop::option::of(any::<prop::sample::Index>()), 1..16).prop_map(
        |steps| {
            let mut catalog = ArchiveCatalog::new("rel-", ".tar.gz");
            for (i, step) in steps.iter().enumerate() {
                let version = format!("v{}", i);
                catalog = match step {
                    Some(index) if i > 0 => {
                        let previous = format!("v{}", index.index(i));
                        let artifact = format!("rel-{}-{}.diff", previous, version);
                        catalog.with_diff(previous, version, artifact)
                    }
                    _ => catalog.with_snapshot(version),
                };
            }
            catalog
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_sync_reaches_fixed_point(
        source in tree_strategy(),
        destination in tree_strategy(),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dest = temp_dir.path().join("dest");
        write_tree(&src, &source);
        write_tree(&dest, &destination);

        let synchronizer = TreeSynchronizer::default();
        let artifacts = synchronizer.artifacts().clone();
        let dest_artifacts: BTreeMap<PathBuf, Vec<u8>> = destination
            .iter()
            .filter(|(path, _)| artifacts.is_excluded(path))
            .map(|(path, content)| (path.clone(), content.clone()))
            .collect();

        synchronizer.sync(&src, &dest).unwrap();

        // Tracked files match the source exactly
        prop_assert_eq!(read_files(&src, &artifacts), read_files(&dest, &artifacts));

        // Build artifacts in the destination are untouched
        for (path, content) in &dest_artifacts {
            prop_assert_eq!(&fs::read(dest.join(path)).unwrap(), content);
        }

        // Nothing left to do
        prop_assert!(synchronizer.plan(&src, &dest).unwrap().is_empty());
    }

    #[test]
    fn prop_plan_matches_applied_actions(
        source in tree_strategy(),
        destination in tree_strategy(),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dest = temp_dir.path().join("dest");
        write_tree(&src, &source);
        write_tree(&dest, &destination);

        let synchronizer = TreeSynchronizer::default();
        let plan = synchronizer.plan(&src, &dest).unwrap();
        let report = synchronizer.sync(&src, &dest).unwrap();
        prop_assert_eq!(plan.actions, report.actions);
    }

    #[test]
    fn prop_chain_starts_with_snapshot(catalog in catalog_strategy()) {
        let resolver = VersionResolver::new(&catalog);
        for version in catalog.versions() {
            let chain = resolver.chain(version).unwrap();

            prop_assert_eq!(chain.snapshot().kind, ArtifactKind::Snapshot);
            prop_assert!(catalog.is_direct(&chain.snapshot().version));
            prop_assert!(chain.diffs().iter().all(|a| a.kind == ArtifactKind::Diff));
            prop_assert_eq!(&chain.artifacts.last().unwrap().version, version);

            // Resolution is deterministic
            prop_assert_eq!(resolver.dependencies(version).unwrap(), chain.names());
        }
    }
}

#[test]
fn test_cycle_is_detected() {
    let catalog = ArchiveCatalog::new("rel-", ".tar.gz")
        .with_diff("b", "a", "rel-b-a.diff")
        .with_diff("a", "b", "rel-a-b.diff");
    let result = VersionResolver::new(&catalog).chain("a");
    assert!(matches!(result, Err(ChronoError::CircularDependency(_))));
}
