//! Main test module for chronotree
//!
//! This module includes all test suites:
//! - Integration tests for whole reconstructions over synthetic archives
//! - Property-based tests for resolver and sync invariants
//! - Edge cases around unusual trees in the destination

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::chronotree::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_special_filenames_sync() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();

        let names = vec![
            "file with spaces.c",
            "file-with-dashes.h",
            "file.with.dots.rb",
            "file(with)parens.c",
            "file[with]brackets.c",
        ];
        let mut created = Vec::new();
        for name in &names {
            if fs::write(src.path().join(name), format!("/* {} */\n", name)).is_ok() {
                created.push(*name);
            }
        }

        let synchronizer = TreeSynchronizer::new(BuildArtifacts::default());
        let report = synchronizer.sync(src.path(), dest.path()).unwrap();
        assert_eq!(report.actions.len(), created.len());

        for name in &created {
            let content = fs::read_to_string(dest.path().join(name)).unwrap();
            assert_eq!(content, format!("/* {} */\n", name));
        }
        assert!(synchronizer.sync(src.path(), dest.path()).unwrap().is_noop());
    }

    #[test]
    fn test_empty_source_clears_tracked_files_only() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(dest.path().join("eval.c"), "old").unwrap();
        fs::write(dest.path().join("config.h"), "#define X 1\n").unwrap();
        fs::create_dir(dest.path().join("ext")).unwrap();
        fs::write(dest.path().join("ext/Makefile"), "all:\n").unwrap();

        let synchronizer = TreeSynchronizer::new(BuildArtifacts::default());
        let report = synchronizer.sync(src.path(), dest.path()).unwrap();

        assert!(!dest.path().join("eval.c").exists());
        assert!(dest.path().join("config.h").exists());
        assert!(dest.path().join("ext/Makefile").exists());
        assert!(report
            .actions
            .iter()
            .all(|a| matches!(a, SyncAction::Delete { .. })));
    }

    #[test]
    fn test_executable_bit_preserved_through_patching() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let src = TempDir::new().unwrap();
            let work = TempDir::new().unwrap();
            let configure = src.path().join("configure");
            fs::write(&configure, "#!/bin/sh\necho ok\n").unwrap();
            fs::set_permissions(&configure, fs::Permissions::from_mode(0o755)).unwrap();

            let reconstructor = ReconstructorBuilder::new().build().unwrap();
            let dest = work.path().join("ruby");
            reconstructor.sync_patched(src.path(), &dest).unwrap();

            let mode = fs::metadata(dest.join("configure")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_unknown_version_reports_hint() {
        let reconstructor = ReconstructorBuilder::new().build().unwrap();
        let err = reconstructor.dependencies("0.53").unwrap_err();
        assert!(matches!(err, ChronoError::UnknownVersion(ref v) if v == "0.53"));
        assert!(err.user_message().contains("chronotree versions"));
    }
}
