//! Sandbox guard
//!
//! Every file the agents read or write goes through [`SandboxGuard::resolve`].
//! Containment is checked on path components of canonicalized paths, so a
//! sibling such as `/work/sandbox-evil` never passes for a root of `/work/sandbox`.

use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("permission denied: {} is outside the sandbox {}", path.display(), root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },
    #[error("path is empty")]
    EmptyPath,
    #[error("failed to resolve {}: {source}", path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SandboxError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, SandboxError::OutsideRoot { .. })
    }
}

impl From<SandboxError> for io::Error {
    fn from(err: SandboxError) -> Self {
        let kind = match &err {
            SandboxError::OutsideRoot { .. } => io::ErrorKind::PermissionDenied,
            SandboxError::EmptyPath => io::ErrorKind::InvalidInput,
            SandboxError::Resolve { source, .. } => source.kind(),
        };
        io::Error::new(kind, err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SandboxGuard {
    root: PathBuf,
}

impl SandboxGuard {
    /// Create a guard rooted at an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|source| SandboxError::Resolve {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `candidate` to an absolute path inside the root.
    ///
    /// Relative paths are taken relative to the root. The path does not need
    /// to exist yet; its deepest existing ancestor is canonicalized so that
    /// symlinks pointing out of the sandbox are caught.
    pub fn resolve(&self, candidate: &Path) -> Result<PathBuf, SandboxError> {
        if candidate.as_os_str().is_empty() {
            return Err(SandboxError::EmptyPath);
        }

        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let normalized = normalize_lexically(&joined);
        let resolved = canonicalize_existing_prefix(&normalized)?;

        if !resolved.starts_with(&self.root) {
            return Err(SandboxError::OutsideRoot {
                path: candidate.to_path_buf(),
                root: self.root.clone(),
            });
        }

        Ok(resolved)
    }
}

/// Drop `.` and fold `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn canonicalize_existing_prefix(path: &Path) -> Result<PathBuf, SandboxError> {
    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();
    // symlink_metadata so a dangling link is treated as present and fails to canonicalize
    while std::fs::symlink_metadata(&existing).is_err() {
        match existing.file_name() {
            Some(name) => missing.push(name.to_os_string()),
            None => break,
        }
        if !existing.pop() {
            break;
        }
    }

    let mut resolved = existing
        .canonicalize()
        .map_err(|source| SandboxError::Resolve {
            path: path.to_path_buf(),
            source,
        })?;
    for name in missing.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn guard_in(dir: &Path) -> SandboxGuard {
        let root = dir.join("sandbox");
        fs::create_dir_all(&root).unwrap();
        SandboxGuard::new(&root).unwrap()
    }

    #[test]
    fn test_accepts_relative_path_inside_root() {
        let tmp = tempdir().unwrap();
        let guard = guard_in(tmp.path());
        fs::write(guard.root().join("code.py"), "x = 1\n").unwrap();

        let resolved = guard.resolve(Path::new("code.py")).unwrap();
        assert_eq!(resolved, guard.root().join("code.py"));
    }

    #[test]
    fn test_accepts_missing_nested_path_inside_root() {
        let tmp = tempdir().unwrap();
        let guard = guard_in(tmp.path());

        let resolved = guard.resolve(Path::new("pkg/new_module.py")).unwrap();
        assert!(resolved.starts_with(guard.root()));
        assert!(resolved.ends_with("pkg/new_module.py"));
        assert!(!guard.root().join("pkg").exists());
    }

    #[test]
    fn test_rejects_parent_traversal() {
        let tmp = tempdir().unwrap();
        let guard = guard_in(tmp.path());

        let err = guard.resolve(Path::new("../outside.py")).unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[test]
    fn test_rejects_absolute_path_outside_root() {
        let tmp = tempdir().unwrap();
        let guard = guard_in(tmp.path());
        let outside = tmp.path().join("elsewhere.py");

        assert!(guard.resolve(&outside).unwrap_err().is_permission_denied());
    }

    #[test]
    fn test_rejects_sibling_directory_sharing_prefix() {
        let tmp = tempdir().unwrap();
        let guard = guard_in(tmp.path());
        let evil = tmp.path().join("sandbox-evil");
        fs::create_dir_all(&evil).unwrap();

        let err = guard.resolve(&evil.join("payload.py")).unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[test]
    fn test_traversal_that_returns_inside_is_allowed() {
        let tmp = tempdir().unwrap();
        let guard = guard_in(tmp.path());
        fs::create_dir_all(guard.root().join("pkg")).unwrap();

        let resolved = guard.resolve(Path::new("pkg/../main.py")).unwrap();
        assert_eq!(resolved, guard.root().join("main.py"));
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escaping_root() {
        let tmp = tempdir().unwrap();
        let guard = guard_in(tmp.path());
        let outside = tmp.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, guard.root().join("link")).unwrap();

        let err = guard.resolve(Path::new("link/file.py")).unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[test]
    fn test_permission_error_converts_to_io_permission_denied() {
        let tmp = tempdir().unwrap();
        let guard = guard_in(tmp.path());
        let err: io::Error = guard.resolve(Path::new("../x.py")).unwrap_err().into();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_empty_path_is_rejected() {
        let tmp = tempdir().unwrap();
        let guard = guard_in(tmp.path());
        assert!(matches!(
            guard.resolve(Path::new("")),
            Err(SandboxError::EmptyPath)
        ));
    }
}
