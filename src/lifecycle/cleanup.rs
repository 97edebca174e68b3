//! Filesystem scans over the organized and archive trees.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::Serialize;
use walkdir::WalkDir;

/// A regular file on disk with no store row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UntrackedFile {
    pub path: PathBuf,
    pub size: u64,
}

fn is_empty_dir(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => false,
    }
}

/// Empty directories strictly below `root`. The root itself is never listed.
pub fn find_empty_dirs(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir() && is_empty_dir(entry.path()))
        .map(|entry| entry.into_path())
        .collect()
}

/// Removes empty directories below `root` until a full walk removes nothing.
/// Returns how many were removed.
pub fn remove_empty_dirs(root: &Path) -> usize {
    let mut total = 0;
    loop {
        let mut removed = 0;
        for entry in WalkDir::new(root)
            .min_depth(1)
            .contents_first(true)
            .into_iter()
            .filter_map(|entry| entry.ok())
        {
            if !entry.file_type().is_dir() || !is_empty_dir(entry.path()) {
                continue;
            }
            match fs::remove_dir(entry.path()) {
                Ok(()) => {
                    debug!("Removed empty directory {}", entry.path().display());
                    removed += 1;
                }
                Err(e) => warn!(
                    "Failed to remove empty directory {}: {}",
                    entry.path().display(),
                    e
                ),
            }
        }
        total += removed;
        if removed == 0 {
            return total;
        }
    }
}

/// Regular files under `roots` whose path is not in `tracked`.
pub fn find_untracked_files(roots: &[&Path], tracked: &HashSet<PathBuf>) -> Vec<UntrackedFile> {
    let mut untracked = Vec::new();
    for root in roots {
        for entry in WalkDir::new(root).into_iter().filter_map(|entry| entry.ok()) {
            if !entry.file_type().is_file() || tracked.contains(entry.path()) {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            untracked.push(UntrackedFile {
                path: entry.into_path(),
                size,
            });
        }
    }
    untracked
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cascading_empty_dirs_removed() {
        let root = TempDir::new().unwrap();
        let r = root.path();
        fs::create_dir_all(r.join("a/b/c")).unwrap();
        fs::create_dir_all(r.join("a/d")).unwrap();
        fs::create_dir_all(r.join("x/y")).unwrap();
        fs::write(r.join("x/y/keep.pcap"), b"1").unwrap();

        let mut empty = find_empty_dirs(r);
        empty.sort();
        assert_eq!(empty, vec![r.join("a/b/c"), r.join("a/d")]);

        assert_eq!(remove_empty_dirs(r), 4);
        assert!(!r.join("a").exists());
        assert!(r.join("x/y/keep.pcap").exists());
        assert!(r.exists());
        assert!(find_empty_dirs(r).is_empty());
        assert_eq!(remove_empty_dirs(r), 0);
    }

    #[test]
    fn test_missing_root_is_noop() {
        let root = TempDir::new().unwrap();
        let absent = root.path().join("absent");
        assert!(find_empty_dirs(&absent).is_empty());
        assert_eq!(remove_empty_dirs(&absent), 0);
        assert!(find_untracked_files(&[&absent], &HashSet::new()).is_empty());
    }

    #[test]
    fn test_untracked_files_reported() {
        let root = TempDir::new().unwrap();
        let organized = root.path().join("organized");
        let archive = root.path().join("archive");
        fs::create_dir_all(organized.join("h/t")).unwrap();
        fs::create_dir_all(archive.join("h/t")).unwrap();
        fs::write(organized.join("h/t/tracked.pcap"), b"1").unwrap();
        fs::write(organized.join("h/t/stray.pcap"), b"12345").unwrap();
        fs::write(archive.join("h/t/old.pcap.gz"), b"12").unwrap();

        let tracked: HashSet<PathBuf> = [organized.join("h/t/tracked.pcap")].into_iter().collect();
        let mut found = find_untracked_files(&[&organized, &archive], &tracked);
        found.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(
            found,
            vec![
                UntrackedFile {
                    path: archive.join("h/t/old.pcap.gz"),
                    size: 2
                },
                UntrackedFile {
                    path: organized.join("h/t/stray.pcap"),
                    size: 5
                },
            ]
        );
        assert!(organized.join("h/t/stray.pcap").exists());
    }
}
