//! Locating conflicted files to resolve.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob_match::glob_match;
use tracing::{debug, info};

use llmerge_core::config::ScanConfig;
use llmerge_core::has_conflict_markers;

/// Find files under `root` that contain unresolved conflict markers.
///
/// Inside a git repository the index is consulted first: entries in a
/// conflicted state are the candidates. Outside a repository, or when
/// the index lists nothing, the directory tree is walked and every
/// text file is inspected, subject to the scan filters.
pub fn conflicted_files(root: &Path, scan: &ScanConfig) -> Result<Vec<PathBuf>> {
    if let Ok(repo) = git2::Repository::discover(root) {
        let from_index = index_conflicts(&repo)?;
        if !from_index.is_empty() {
            return Ok(from_index);
        }
        debug!("git index lists no conflicts, falling back to directory scan");
    }
    walk_tree(root, scan)
}

fn index_conflicts(repo: &git2::Repository) -> Result<Vec<PathBuf>> {
    let workdir = match repo.workdir() {
        Some(dir) => dir.to_path_buf(),
        None => return Ok(Vec::new()),
    };
    let index = repo.index().context("failed to read git index")?;
    let mut found = BTreeSet::new();
    for conflict in index.conflicts().context("failed to list index conflicts")? {
        let conflict = conflict.context("failed to read a conflict entry")?;
        let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
        let Some(entry) = entry else { continue };
        let rel = String::from_utf8_lossy(&entry.path).into_owned();
        let path = workdir.join(&rel);
        if !path.is_file() {
            continue;
        }
        // Only files whose working copy still carries markers are worth
        // resolving; a file staged after manual cleanup is done.
        let Ok(text) = fs::read_to_string(&path) else {
            continue;
        };
        if has_conflict_markers(&text) {
            found.insert(path);
        }
    }
    let files: Vec<PathBuf> = found.into_iter().collect();
    info!(count = files.len(), "git index scan complete");
    Ok(files)
}

fn walk_tree(root: &Path, scan: &ScanConfig) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk_dir(root, root, scan, &mut files)
        .with_context(|| format!("failed to scan {}", root.display()))?;
    files.sort();
    info!(count = files.len(), "directory scan complete");
    Ok(files)
}

fn walk_dir(root: &Path, dir: &Path, scan: &ScanConfig, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if entry.file_name() == ".git" || dir_excluded(root, &path, scan) {
                continue;
            }
            walk_dir(root, &path, scan, out)?;
        } else if file_type.is_file() && file_selected(root, &path, scan)? {
            out.push(path);
        }
    }
    Ok(())
}

fn rel_str(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

/// Directory pruning: a pattern like `**/target/**` also excludes the
/// `target` directory itself, so the `/**` suffix is matched optionally.
fn dir_excluded(root: &Path, dir: &Path, scan: &ScanConfig) -> bool {
    let rel = rel_str(root, dir);
    scan.exclude.iter().any(|pattern| {
        let trimmed = pattern.strip_suffix("/**").unwrap_or(pattern);
        glob_match(pattern, &rel) || glob_match(trimmed, &rel)
    })
}

fn file_selected(root: &Path, path: &Path, scan: &ScanConfig) -> Result<bool> {
    let rel = rel_str(root, path);
    if scan.exclude.iter().any(|pattern| glob_match(pattern, &rel)) {
        return Ok(false);
    }
    if !scan.include.is_empty() && !scan.include.iter().any(|pattern| glob_match(pattern, &rel)) {
        return Ok(false);
    }
    let meta = fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    if meta.len() > scan.max_file_bytes {
        debug!(path = %path.display(), bytes = meta.len(), "skipping oversized file");
        return Ok(false);
    }
    // Binary files fail UTF-8 decoding and are skipped.
    let Ok(text) = fs::read_to_string(path) else {
        return Ok(false);
    };
    Ok(has_conflict_markers(&text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFLICTED: &str = "\
a
<<<<<<< HEAD
b
=======
c
>>>>>>> branch
d
";

    fn scan_defaults() -> ScanConfig {
        ScanConfig::default()
    }

    #[test]
    fn test_walk_finds_conflicted_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.txt"), CONFLICTED).unwrap();
        fs::write(dir.path().join("clean.txt"), "nothing here\n").unwrap();

        let files = conflicted_files(dir.path(), &scan_defaults()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("broken.txt"));
    }

    #[test]
    fn test_walk_recurses_into_subdirectories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/inner")).unwrap();
        fs::write(dir.path().join("src/inner/deep.rs"), CONFLICTED).unwrap();

        let files = conflicted_files(dir.path(), &scan_defaults()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("src/inner/deep.rs"));
    }

    #[test]
    fn test_excluded_directories_are_pruned() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        fs::write(dir.path().join("target/debug/gen.rs"), CONFLICTED).unwrap();
        fs::write(dir.path().join("kept.rs"), CONFLICTED).unwrap();

        let files = conflicted_files(dir.path(), &scan_defaults()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("kept.rs"));
    }

    #[test]
    fn test_include_filter_limits_candidates() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("code.rs"), CONFLICTED).unwrap();
        fs::write(dir.path().join("notes.md"), CONFLICTED).unwrap();

        let scan = ScanConfig {
            include: vec!["**/*.rs".to_string()],
            ..scan_defaults()
        };
        let files = conflicted_files(dir.path(), &scan).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("code.rs"));
    }

    #[test]
    fn test_oversized_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("big.txt"), CONFLICTED).unwrap();

        let scan = ScanConfig {
            max_file_bytes: 4,
            ..scan_defaults()
        };
        let files = conflicted_files(dir.path(), &scan).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_binary_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut bytes = CONFLICTED.as_bytes().to_vec();
        bytes.push(0xFF);
        bytes.push(0xFE);
        fs::write(dir.path().join("blob.bin"), bytes).unwrap();

        let files = conflicted_files(dir.path(), &scan_defaults()).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_results_are_sorted() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("zeta.txt"), CONFLICTED).unwrap();
        fs::write(dir.path().join("alpha.txt"), CONFLICTED).unwrap();

        let files = conflicted_files(dir.path(), &scan_defaults()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("alpha.txt"));
        assert!(files[1].ends_with("zeta.txt"));
    }
}
