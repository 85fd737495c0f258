//! Log file discovery across configured roots.
//!
//! A root qualifies when it contains a `projects/` directory; candidate log
//! files are the `*.jsonl` files one level below it. The project name is
//! derived from the session directory name, never from record content.

use crate::config::get_config;
use crate::error::ScopeError;
use anyhow::Result;
use glob::glob;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Discover qualifying log roots from configuration.
/// Fails the whole run when none of the configured roots holds any logs.
pub fn discover_roots() -> Result<Vec<PathBuf>, ScopeError> {
    let config = get_config();
    discover_roots_in(&config.paths.roots)
}

/// Root discovery against an explicit candidate list (testable without the
/// global config).
pub fn discover_roots_in(candidates: &[PathBuf]) -> Result<Vec<PathBuf>, ScopeError> {
    let roots: Vec<PathBuf> = candidates
        .iter()
        .filter(|root| root.join("projects").exists())
        .cloned()
        .collect();

    if roots.is_empty() {
        return Err(ScopeError::NoLogDirectories {
            searched: candidates.to_vec(),
        });
    }

    Ok(roots)
}

/// Find all JSONL files under the given roots, paired with their derived
/// project name. Paths reachable through multiple roots are reported once.
pub fn find_log_files(roots: &[PathBuf]) -> Vec<(PathBuf, String)> {
    let mut files = Vec::new();
    let mut seen = HashSet::new();

    for root in roots {
        let pattern = root.join("projects").join("*").join("*.jsonl");
        let Ok(paths) = glob(&pattern.to_string_lossy()) else {
            continue;
        };
        for entry in paths.flatten() {
            if !seen.insert(entry.clone()) {
                continue;
            }
            let project = entry
                .parent()
                .map(project_name)
                .unwrap_or_else(|| "unknown".to_string());
            files.push((entry, project));
        }
    }

    files
}

/// Derive a project name from a session directory. Claude encodes the
/// working directory into the directory name with a leading dash.
pub fn project_name(session_dir: &Path) -> String {
    let name = session_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    name.strip_prefix('-').unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn rejects_empty_roots() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_roots_in(&[dir.path().to_path_buf()]).unwrap_err();
        assert!(matches!(err, ScopeError::NoLogDirectories { .. }));
    }

    #[test]
    fn finds_files_once_across_overlapping_roots() {
        let dir = tempfile::tempdir().unwrap();
        let session = dir.path().join("projects").join("-home-user-demo");
        fs::create_dir_all(&session).unwrap();
        fs::write(session.join("conv.jsonl"), "{}\n").unwrap();

        let root = dir.path().to_path_buf();
        let roots = discover_roots_in(&[root.clone(), root.clone()]).unwrap();
        // Duplicate root entries still yield each file once.
        let files = find_log_files(&roots);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].1, "home-user-demo");
    }
}
