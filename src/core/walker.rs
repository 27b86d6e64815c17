use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::audit::AuditLog;
use crate::core::error::JobError;

/// One enumerated source entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Lazy depth-first enumeration of the files and directories under one
/// root. The walk is strictly read-only on the source side; a fresh walker
/// re-walks from scratch, and an unchanged tree yields an identical
/// ordered sequence (children are visited in name order).
///
/// Entries whose path exceeds the configured maximum length are skipped
/// with a WARN audit line; they are not task failures. Symlinks and other
/// special files are skipped and never followed. Unreadable directories
/// are logged and skipped rather than aborting the walk.
pub struct PathWalker {
    stack: Vec<std::vec::IntoIter<PathBuf>>,
    max_path_length: usize,
    audit: AuditLog,
}

impl PathWalker {
    pub fn new(root: &Path, max_path_length: usize, audit: AuditLog) -> Self {
        let mut walker = Self {
            stack: Vec::new(),
            max_path_length,
            audit,
        };
        let children = walker.read_children(root);
        walker.stack.push(children.into_iter());
        walker
    }

    /// Children of `dir` in name order. An unreadable directory produces
    /// an empty list and a WARN, not an error.
    fn read_children(&self, dir: &Path) -> Vec<PathBuf> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Skipping unreadable directory");
                self.audit
                    .warn(format!("unreadable directory skipped: {}", dir.display()));
                return Vec::new();
            }
        };

        let mut children: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Skipping unreadable entry");
                    None
                }
            })
            .collect();
        children.sort();
        children
    }
}

impl Iterator for PathWalker {
    type Item = WalkEntry;

    fn next(&mut self) -> Option<WalkEntry> {
        loop {
            let current = self.stack.last_mut()?;
            let Some(path) = current.next() else {
                self.stack.pop();
                continue;
            };

            if path.as_os_str().len() > self.max_path_length {
                warn!(path = %path.display(), limit = self.max_path_length, "Path too long, skipped");
                self.audit.warn(
                    JobError::PathTooLong {
                        path,
                        limit: self.max_path_length,
                    }
                    .to_string(),
                );
                continue;
            }

            // symlink_metadata so links are classified, not followed
            let metadata = match path.symlink_metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            if metadata.is_dir() {
                let children = self.read_children(&path);
                self.stack.push(children.into_iter());
                return Some(WalkEntry { path, is_dir: true });
            } else if metadata.is_file() {
                return Some(WalkEntry {
                    path,
                    is_dir: false,
                });
            }

            debug!(path = %path.display(), "Skipping special file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditLevel, AuditLimits};
    use std::fs;

    fn test_audit(dir: &Path) -> AuditLog {
        AuditLog::open(
            dir.join("audit.log"),
            AuditLimits {
                max_bytes: 1024 * 1024,
                max_entries: 10_000,
                max_level: AuditLevel::Debug,
            },
        )
    }

    fn entry_names(entries: &[WalkEntry], root: &Path) -> Vec<String> {
        entries
            .iter()
            .map(|e| {
                e.path
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    #[test]
    fn walks_depth_first_in_name_order() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("src");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("b.txt"), b"b").unwrap();
        fs::create_dir(root.join("a")).unwrap();
        fs::write(root.join("a/nested.txt"), b"n").unwrap();
        fs::write(root.join("c.txt"), b"c").unwrap();

        let entries: Vec<WalkEntry> = PathWalker::new(&root, 512, test_audit(temp.path())).collect();
        let names = entry_names(&entries, &root);

        assert_eq!(names, vec!["a", "a/nested.txt", "b.txt", "c.txt"]);
        assert!(entries[0].is_dir);
        assert!(!entries[1].is_dir);
    }

    #[test]
    fn rewalk_of_unchanged_tree_is_identical() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("src");
        fs::create_dir_all(root.join("x/y")).unwrap();
        fs::write(root.join("x/y/deep.dat"), b"d").unwrap();
        fs::write(root.join("top.dat"), b"t").unwrap();

        let first: Vec<WalkEntry> = PathWalker::new(&root, 512, test_audit(temp.path())).collect();
        let second: Vec<WalkEntry> = PathWalker::new(&root, 512, test_audit(temp.path())).collect();

        assert_eq!(first, second);
    }

    #[test]
    fn overlong_paths_are_skipped_with_warning() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("src");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("short.txt"), b"s").unwrap();
        let long_name = "x".repeat(120);
        fs::write(root.join(&long_name), b"l").unwrap();

        let limit = root.join(&long_name).as_os_str().len() - 1;
        let audit = test_audit(temp.path());
        let entries: Vec<WalkEntry> = PathWalker::new(&root, limit, audit.clone()).collect();

        assert_eq!(entries.len(), 1);
        assert!(entries[0].path.ends_with("short.txt"));
        let log = fs::read_to_string(audit.path()).unwrap();
        assert!(log.contains("WARN"));
        assert!(log.contains("skipped"));
    }

    #[test]
    fn missing_root_yields_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("does-not-exist");
        let entries: Vec<WalkEntry> = PathWalker::new(&root, 512, test_audit(temp.path())).collect();
        assert!(entries.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("src");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("real.txt"), b"r").unwrap();
        std::os::unix::fs::symlink(temp.path(), root.join("loop")).unwrap();

        let entries: Vec<WalkEntry> = PathWalker::new(&root, 512, test_audit(temp.path())).collect();
        let names = entry_names(&entries, &root);
        assert_eq!(names, vec!["real.txt"]);
    }
}
