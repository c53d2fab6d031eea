use crate::config::ScanFilters;
use dashmap::DashSet;
use glob::Pattern;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::error;

/// Parallel directory traversal. Returns every regular file under
/// `root_paths` that passes `filters` and no glob in `ignore_globs`, sorted.
/// Symlinks are skipped; zero-byte files are kept unless the size range
/// excludes them.
pub fn enumerate(
    root_paths: &[&str],
    ignore_globs: &[&str],
    filters: &ScanFilters,
) -> io::Result<Vec<PathBuf>> {
    let found: DashSet<PathBuf> = DashSet::new();

    let ignore_patterns: Vec<Pattern> = ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect();

    let walker = Walker {
        found: &found,
        ignore_patterns: &ignore_patterns,
        filters,
    };
    root_paths
        .par_iter()
        .try_for_each(|root_dir| walker.visit_dir(Path::new(root_dir)))?;

    let mut paths: Vec<PathBuf> = found.into_iter().collect();
    paths.sort();
    Ok(paths)
}

struct Walker<'a> {
    found: &'a DashSet<PathBuf>,
    ignore_patterns: &'a [Pattern],
    filters: &'a ScanFilters,
}

impl Walker<'_> {
    fn ignored(&self, path: &Path) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }

    fn visit_dir(&self, dir: &Path) -> io::Result<()> {
        if !dir.is_dir() || self.ignored(dir) {
            return Ok(());
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() == io::ErrorKind::PermissionDenied {
                    error!("Access denied reading directory {}: {}", dir.display(), err);
                    return Ok(());
                } else {
                    return Err(io::Error::new(
                        err.kind(),
                        format!("Error reading directory {}: {}", dir.display(), err),
                    ));
                }
            }
        };

        entries.par_bridge().try_for_each(|entry_result| {
            let entry = entry_result.map_err(|err| {
                io::Error::new(
                    err.kind(),
                    format!("Error reading entry in directory {}: {}", dir.display(), err),
                )
            })?;

            let path = entry.path();
            let metadata = fs::symlink_metadata(&path).map_err(|err| {
                io::Error::new(
                    err.kind(),
                    format!("Error getting metadata for {}: {}", path.display(), err),
                )
            })?;

            if metadata.file_type().is_symlink() {
                return Ok(());
            }
            if metadata.is_dir() {
                if self.filters.recurse {
                    self.visit_dir(&path)?;
                }
            } else if metadata.is_file() && self.accepts(&path, metadata.len()) {
                self.found.insert(path);
            }
            Ok(())
        })
    }

    fn accepts(&self, path: &Path, size: u64) -> bool {
        if size < self.filters.min_size || self.filters.max_size.is_some_and(|max| size > max) {
            return false;
        }
        if self.ignored(path) {
            return false;
        }
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let listed = |list: &[String]| list.iter().any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext));
        if !self.filters.include_extensions.is_empty() && !listed(&self.filters.include_extensions) {
            return false;
        }
        !listed(&self.filters.exclude_extensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn layout() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        fs::create_dir_all(dir.path().join("skip")).unwrap();
        fs::write(dir.path().join("a.jpg"), vec![0u8; 100]).unwrap();
        fs::write(dir.path().join("empty.jpg"), b"").unwrap();
        fs::write(dir.path().join("sub/b.PNG"), vec![0u8; 2000]).unwrap();
        fs::write(dir.path().join("sub/deeper/c.mp3"), vec![0u8; 50]).unwrap();
        fs::write(dir.path().join("skip/d.jpg"), vec![0u8; 10]).unwrap();
        dir
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        let mut v: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        v.sort();
        v
    }

    #[test]
    fn test_enumerate_keeps_empty_files_and_honours_ignores() {
        let dir = layout();
        let root = dir.path().to_string_lossy().into_owned();
        let ignore = format!("{}/skip", root);
        let paths = enumerate(&[&root], &[&ignore], &ScanFilters::default()).unwrap();
        assert_eq!(names(&paths), vec!["a.jpg", "b.PNG", "c.mp3", "empty.jpg"]);
    }

    #[test]
    fn test_enumerate_filters() {
        let dir = layout();
        let root = dir.path().to_string_lossy().into_owned();

        let images = ScanFilters {
            include_extensions: vec!["jpg".into(), "png".into()],
            min_size: 1,
            ..Default::default()
        };
        assert_eq!(names(&enumerate(&[&root], &[], &images).unwrap()), vec!["a.jpg", "b.PNG", "d.jpg"]);

        let shallow = ScanFilters {
            recurse: false,
            exclude_extensions: vec![".jpg".into()],
            ..Default::default()
        };
        assert!(enumerate(&[&root], &[], &shallow).unwrap().is_empty());

        let small = ScanFilters {
            max_size: Some(60),
            min_size: 1,
            ..Default::default()
        };
        assert_eq!(names(&enumerate(&[&root], &[], &small).unwrap()), vec!["c.mp3", "d.jpg"]);
    }
}
