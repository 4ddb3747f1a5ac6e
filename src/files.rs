//! Sandboxed file helpers
//!
//! Reads and writes resolve through the [`SandboxGuard`] first; nothing is
//! created on disk for a path the guard rejects.

use crate::sandbox::SandboxGuard;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

pub const SOURCE_EXTENSION: &str = "py";
const TEST_PREFIX: &str = "test_";
const PACKAGE_INIT: &str = "__init__.py";

pub fn read_file(guard: &SandboxGuard, path: &Path) -> Result<String> {
    let resolved = guard.resolve(path)?;
    fs::read_to_string(&resolved).with_context(|| format!("Failed to read {}", resolved.display()))
}

pub fn write_file(guard: &SandboxGuard, path: &Path, content: &str) -> Result<()> {
    let resolved = guard.resolve(path)?;
    if let Some(parent) = resolved.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(&resolved, content)
        .with_context(|| format!("Failed to write {}", resolved.display()))
}

/// Top-level source files of `dir`, sorted by name. Hidden files are skipped.
pub fn list_source_files(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        anyhow::bail!("Directory not found: {}", dir.display());
    }

    let mut files: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| !name.starts_with('.'))
        .filter(|name| is_source_file(name))
        .collect();
    files.sort();
    Ok(files)
}

/// Source files that can get generated companions (tests, docs).
pub fn generation_candidates(dir: &Path) -> Result<Vec<String>> {
    Ok(list_source_files(dir)?
        .into_iter()
        .filter(|name| !is_test_file(name) && name != PACKAGE_INIT)
        .collect())
}

pub fn is_source_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| ext == SOURCE_EXTENSION)
        .unwrap_or(false)
}

pub fn is_test_file(name: &str) -> bool {
    file_name_of(name).starts_with(TEST_PREFIX) && is_source_file(name)
}

/// `calc.py` -> `test_calc.py`
pub fn test_companion(source: &str) -> String {
    format!("{}{}", TEST_PREFIX, file_name_of(source))
}

/// `calc.py` -> `README_calc.md`
pub fn doc_companion(source: &str) -> String {
    format!("README_{}.md", file_stem_of(source))
}

/// `test_calc.py` -> `calc.py`; `None` for non-test files.
pub fn source_for_test(test_file: &str) -> Option<String> {
    if !is_test_file(test_file) {
        return None;
    }
    file_name_of(test_file)
        .strip_prefix(TEST_PREFIX)
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}

fn file_name_of(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name)
}

fn file_stem_of(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_list_source_files_is_sorted_and_filtered() {
        let tmp = tempdir().unwrap();
        for name in ["b.py", "a.py", "notes.txt", ".hidden.py", "test_a.py"] {
            fs::write(tmp.path().join(name), "").unwrap();
        }
        fs::create_dir_all(tmp.path().join("pkg")).unwrap();
        fs::write(tmp.path().join("pkg/nested.py"), "").unwrap();

        let files = list_source_files(tmp.path()).unwrap();
        assert_eq!(files, vec!["a.py", "b.py", "test_a.py"]);
    }

    #[test]
    fn test_generation_candidates_skip_tests_and_init() {
        let tmp = tempdir().unwrap();
        for name in ["calc.py", "test_calc.py", "__init__.py"] {
            fs::write(tmp.path().join(name), "").unwrap();
        }
        assert_eq!(generation_candidates(tmp.path()).unwrap(), vec!["calc.py"]);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let tmp = tempdir().unwrap();
        assert!(list_source_files(&tmp.path().join("nope")).is_err());
    }

    #[test]
    fn test_companion_names() {
        assert_eq!(test_companion("calc.py"), "test_calc.py");
        assert_eq!(doc_companion("calc.py"), "README_calc.md");
        assert_eq!(source_for_test("test_calc.py").as_deref(), Some("calc.py"));
        assert_eq!(source_for_test("calc.py"), None);
    }

    #[test]
    fn test_write_outside_sandbox_touches_nothing() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("sandbox");
        fs::create_dir_all(&root).unwrap();
        let guard = SandboxGuard::new(&root).unwrap();

        let err = write_file(&guard, Path::new("../escape/evil.py"), "x").unwrap_err();
        let sandbox_err = err.downcast_ref::<crate::sandbox::SandboxError>().unwrap();
        assert!(sandbox_err.is_permission_denied());
        assert!(!tmp.path().join("escape").exists());
    }

    #[test]
    fn test_read_write_round_trip_inside_sandbox() {
        let tmp = tempdir().unwrap();
        let guard = SandboxGuard::new(tmp.path()).unwrap();
        write_file(&guard, Path::new("pkg/mod.py"), "x = 1\n").unwrap();
        assert_eq!(read_file(&guard, Path::new("pkg/mod.py")).unwrap(), "x = 1\n");
    }
}
