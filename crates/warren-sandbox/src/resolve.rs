use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use warren_core::{Result, WarrenError};

/// Longest target path accepted, in bytes.
pub const MAX_PATH_BYTES: usize = 4096;

/// Reject paths that could smuggle something past the filesystem layer.
///
/// NUL bytes and control characters other than tab and newline are refused, as is
/// anything longer than [`MAX_PATH_BYTES`].
pub fn path_sanitize(path: &Path) -> Result<()> {
    let bytes = path.as_os_str().as_encoded_bytes();
    if bytes.contains(&0) {
        return Err(WarrenError::InvalidPath("Path contains null byte.".into()));
    }
    if bytes
        .iter()
        .any(|&b| (b < 0x20 && b != b'\t' && b != b'\n') || b == 0x7f)
    {
        return Err(WarrenError::InvalidPath("Path contains control characters.".into()));
    }
    if bytes.len() > MAX_PATH_BYTES {
        return Err(WarrenError::InvalidPath(format!(
            "Path exceeds {MAX_PATH_BYTES} bytes."
        )));
    }
    Ok(())
}

/// Resolve `.` and `..` without touching the filesystem. `..` never climbs above the root.
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// Real path of `path`, even when its tail does not exist yet.
///
/// The deepest existing ancestor is canonicalized (following symlinks) and the
/// missing suffix is re-attached. A dangling symlink on the way is refused, since
/// creating the file would write through it.
pub fn resolve_real(path: &Path) -> Result<PathBuf> {
    if !path.is_absolute() {
        return Err(WarrenError::InvalidPath("Path must be absolute.".into()));
    }
    let normalized = normalize_lexical(path);
    let mut existing = normalized.clone();
    let mut suffix: Vec<OsString> = Vec::new();

    loop {
        match std::fs::canonicalize(&existing) {
            Ok(mut real) => {
                for name in suffix.iter().rev() {
                    real.push(name);
                }
                return Ok(real);
            }
            Err(_) => {
                if std::fs::symlink_metadata(&existing).is_ok() {
                    return Err(WarrenError::PermissionDenied(format!(
                        "Path resolves through a dangling symlink: {}",
                        existing.display()
                    )));
                }
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        suffix.push(name.to_os_string());
                        existing = parent.to_path_buf();
                    }
                    _ => return Ok(normalized),
                }
            }
        }
    }
}

/// A target resolved inside one of the allowed roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub real_path: PathBuf,
    pub allowed_base: PathBuf,
}

/// Resolve `target` and require its real path to fall within one of `allowed_dirs`.
///
/// Both sides are resolved, so `..` segments and symlinks cannot lead outside.
pub fn path_resolve_secure(allowed_dirs: &[PathBuf], target: &Path) -> Result<ResolvedPath> {
    if !target.is_absolute() {
        return Err(WarrenError::InvalidPath("Path must be absolute.".into()));
    }
    path_sanitize(target)?;
    let real_path = resolve_real(target)?;

    for dir in allowed_dirs {
        if !dir.is_absolute() {
            continue;
        }
        let Ok(base) = resolve_real(dir) else {
            continue;
        };
        if real_path.starts_with(&base) {
            return Ok(ResolvedPath {
                real_path,
                allowed_base: base,
            });
        }
    }

    Err(WarrenError::PermissionDenied(
        "Path is outside the allowed directories.".into(),
    ))
}

/// True when `path` lies within `root` after secure resolution of both.
pub fn is_within_secure(root: &Path, path: &Path) -> bool {
    path_resolve_secure(&[root.to_path_buf()], path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lexical() {
        assert_eq!(normalize_lexical(Path::new("/ws/../etc/passwd")), PathBuf::from("/etc/passwd"));
        assert_eq!(normalize_lexical(Path::new("/a/./b/")), PathBuf::from("/a/b"));
        assert_eq!(normalize_lexical(Path::new("/../../x")), PathBuf::from("/x"));
    }

    #[test]
    fn test_sanitize() {
        assert!(path_sanitize(Path::new("/ws/notes.txt")).is_ok());
        assert!(path_sanitize(Path::new("/ws/with\ttab")).is_ok());
        assert!(path_sanitize(Path::new("/ws/nul\0byte")).is_err());
        assert!(path_sanitize(Path::new("/ws/bell\x07")).is_err());
        let long = format!("/{}", "a".repeat(MAX_PATH_BYTES));
        assert!(path_sanitize(Path::new(&long)).is_err());
    }
}
