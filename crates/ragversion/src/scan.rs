//! Directory enumeration for batch tracking.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use ragversion_core::{Error, Result};

/// Collect regular files under `root` whose file name or root-relative path
/// matches one of `patterns` (default `*`) and none of `exclude`.
///
/// Non-recursive scans only look at the top level. The result is sorted and
/// holds each path once.
pub fn scan_directory(
    root: &Path,
    patterns: &[String],
    exclude: &[String],
    recursive: bool,
) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(Error::io(
            root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "directory does not exist"),
        ));
    }

    let filter = PathFilter::new(patterns, exclude)?;

    let mut walker = WalkDir::new(root).follow_links(false);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            Error::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if filter.matches(relative, Path::new(entry.file_name())) {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// Include/exclude globs checked against a file name and its root-relative path.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl PathFilter {
    /// Empty `patterns` include every file.
    pub fn new(patterns: &[String], exclude: &[String]) -> Result<Self> {
        let include = if patterns.is_empty() {
            build_globset(&["*".to_string()])?
        } else {
            build_globset(patterns)?
        };
        Ok(Self {
            include,
            exclude: build_globset(exclude)?,
        })
    }

    pub fn matches(&self, relative: &Path, file_name: &Path) -> bool {
        if self.exclude.is_match(relative) || self.exclude.is_match(file_name) {
            return false;
        }
        self.include.is_match(relative) || self.include.is_match(file_name)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            Error::Configuration(format!("invalid glob pattern '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Configuration(format!("invalid glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::create_dir_all(dir.path().join("sub/deep")).unwrap();
        std::fs::write(dir.path().join("sub/c.md"), "c").unwrap();
        std::fs::write(dir.path().join("sub/deep/d.md"), "d").unwrap();
        dir
    }

    fn names(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_default_pattern_matches_everything() {
        let dir = fixture();
        let files = scan_directory(dir.path(), &[], &[], true).unwrap();
        assert_eq!(
            names(dir.path(), &files),
            vec!["a.md", "b.txt", "sub/c.md", "sub/deep/d.md"]
        );
    }

    #[test]
    fn test_pattern_matches_file_name_at_any_depth() {
        let dir = fixture();
        let files = scan_directory(dir.path(), &["*.md".into()], &[], true).unwrap();
        assert_eq!(
            names(dir.path(), &files),
            vec!["a.md", "sub/c.md", "sub/deep/d.md"]
        );
    }

    #[test]
    fn test_non_recursive_stays_at_top_level() {
        let dir = fixture();
        let files = scan_directory(dir.path(), &["*.md".into()], &[], false).unwrap();
        assert_eq!(names(dir.path(), &files), vec!["a.md"]);
    }

    #[test]
    fn test_overlapping_patterns_yield_each_file_once() {
        let dir = fixture();
        let files =
            scan_directory(dir.path(), &["*.md".into(), "a.*".into()], &[], true).unwrap();
        assert_eq!(files.iter().filter(|p| p.ends_with("a.md")).count(), 1);
    }

    #[test]
    fn test_exclude_patterns() {
        let dir = fixture();
        let files = scan_directory(dir.path(), &[], &["sub/deep/**".into()], true).unwrap();
        assert_eq!(names(dir.path(), &files), vec!["a.md", "b.txt", "sub/c.md"]);
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let err = scan_directory(Path::new("/no/such/dir"), &[], &[], true).unwrap_err();
        assert_eq!(err.category().as_str(), "io");
    }

    #[test]
    fn test_bad_glob_is_configuration_error() {
        let dir = fixture();
        let err = scan_directory(dir.path(), &["a[".into()], &[], true).unwrap_err();
        assert_eq!(err.category().as_str(), "configuration");
    }
}
