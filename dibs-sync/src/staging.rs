//! Push-directory preparation: wipe, recreate, copy the source tree.
//!
//! The push directory is rebuilt from scratch on every run; nothing is
//! carried over between runs except what the source tree itself contains
//! (including its `.git`, when present).

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::{io_err, SyncError};
use crate::ignore::{absolutize, IgnoreFilter};

/// What a [`sync_tree`] call copied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagingReport {
    pub files: usize,
    pub dirs: usize,
    pub links: usize,
}

/// Replace `dest` with a copy of `src`, skipping everything `filter` ignores.
///
/// `dest` is never copied into itself, even when it lives inside `src` and
/// the filter does not exclude it.
pub fn sync_tree(src: &Path, dest: &Path, filter: &IgnoreFilter) -> Result<StagingReport, SyncError> {
    reset_dir(dest)?;

    let src = absolutize(src);
    let dest_abs = absolutize(dest);
    let mut report = StagingReport::default();

    let walker = WalkDir::new(&src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.path().starts_with(&dest_abs) || filter.is_ignored(entry.path()))
        });

    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(&src)
            .map_err(|_| io_err(entry.path(), std::io::ErrorKind::InvalidInput.into()))?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
            report.dirs += 1;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target).map_err(|e| io_err(entry.path(), e))?;
            report.files += 1;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            report.links += 1;
        }
    }

    tracing::debug!(
        "staged {} files, {} dirs, {} links into {}",
        report.files,
        report.dirs,
        report.links,
        dest.display()
    );
    Ok(report)
}

/// Remove `dir` if present and create it empty.
pub fn reset_dir(dir: &Path) -> Result<(), SyncError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(dir, err)),
    }
    fs::create_dir_all(dir).map_err(|e| io_err(dir, e))
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), SyncError> {
    let points_to = fs::read_link(link).map_err(|e| io_err(link, e))?;
    std::os::unix::fs::symlink(&points_to, target).map_err(|e| io_err(target, e))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), SyncError> {
    fs::copy(link, target).map(|_| ()).map_err(|e| io_err(link, e))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    #[test]
    fn copies_tree_and_wipes_stale_files() {
        let src = TempDir::new().expect("src");
        let dest = TempDir::new().expect("dest");
        write(&src.path().join("main.go"), "package main");
        write(&src.path().join("pkg/util/util.go"), "package util");
        write(&dest.path().join("stale.txt"), "old run");

        let filter = IgnoreFilter::new(src.path(), &[]).expect("filter");
        let report = sync_tree(src.path(), dest.path(), &filter).expect("sync");

        assert_eq!(report.files, 2);
        assert_eq!(report.dirs, 2);
        assert!(!dest.path().join("stale.txt").exists());
        assert_eq!(
            fs::read_to_string(dest.path().join("pkg/util/util.go")).expect("read"),
            "package util"
        );
    }

    #[test]
    fn ignored_paths_are_not_copied() {
        let src = TempDir::new().expect("src");
        let dest = TempDir::new().expect("dest");
        write(&src.path().join("main.go"), "package main");
        write(&src.path().join("target/bin/app"), "binary");
        write(&src.path().join("draft.swp"), "swap");

        let patterns = vec!["target".to_string(), "*.swp".to_string()];
        let filter = IgnoreFilter::new(src.path(), &patterns).expect("filter");
        sync_tree(src.path(), dest.path(), &filter).expect("sync");

        assert!(dest.path().join("main.go").exists());
        assert!(!dest.path().join("target").exists());
        assert!(!dest.path().join("draft.swp").exists());
    }

    #[test]
    fn push_dir_inside_source_is_not_copied_into_itself() {
        let src = TempDir::new().expect("src");
        write(&src.path().join("main.go"), "package main");
        let push = src.path().join(".push");

        let filter = IgnoreFilter::new(src.path(), &[]).expect("filter");
        sync_tree(src.path(), &push, &filter).expect("first sync");
        let report = sync_tree(src.path(), &push, &filter).expect("second sync");

        assert_eq!(report.files, 1);
        assert!(push.join("main.go").exists());
        assert!(!push.join(".push").exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_recreated_not_followed() {
        let src = TempDir::new().expect("src");
        let dest = TempDir::new().expect("dest");
        write(&src.path().join("real.txt"), "data");
        std::os::unix::fs::symlink("real.txt", src.path().join("alias.txt")).expect("symlink");

        let filter = IgnoreFilter::new(src.path(), &[]).expect("filter");
        let report = sync_tree(src.path(), dest.path(), &filter).expect("sync");

        assert_eq!(report.links, 1);
        let link = fs::read_link(dest.path().join("alias.txt")).expect("read_link");
        assert_eq!(link, Path::new("real.txt"));
    }

    #[test]
    fn missing_source_is_an_error() {
        let root = TempDir::new().expect("root");
        let filter = IgnoreFilter::new(root.path(), &[]).expect("filter");
        let err = sync_tree(&root.path().join("absent"), &root.path().join("push"), &filter);
        assert!(err.is_err());
    }
}
