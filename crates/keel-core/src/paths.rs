//! Path containment checks.
//!
//! Containment is decided in two stages:
//!
//! 1. **Lexical** — the raw path is rejected outright if it contains `..`
//!    components, percent-encoded dots or separators, backslashes, NUL bytes,
//!    or a leading `~`. Relative paths are then joined onto a base directory.
//! 2. **Filesystem** — the longest existing ancestor of the path is
//!    canonicalized (resolving symlinks) and the non-existent remainder is
//!    re-appended. The result must start with the canonicalized root.
//!
//! The second stage reads filesystem metadata synchronously. It never
//! creates or opens files.

use std::path::{Component, Path, PathBuf};

use crate::error::{SecurityError, SecurityResult};

/// Percent-encoded sequences that could smuggle a dot or separator past the
/// lexical check once decoded by some later layer.
const ENCODED_SEQUENCES: [&str; 4] = ["%2e", "%2f", "%5c", "%00"];

/// Reject raw path strings that carry traversal or encoding tricks.
///
/// # Errors
///
/// Returns [`SecurityError::PathTraversal`] naming the rule that matched.
pub fn reject_lexical_tricks(raw: &str) -> SecurityResult<()> {
    let reject = |reason: &str| {
        Err(SecurityError::PathTraversal {
            path: raw.to_string(),
            reason: reason.to_string(),
        })
    };

    if raw.is_empty() {
        return reject("empty path");
    }
    if raw.contains('\0') {
        return reject("NUL byte");
    }
    if raw.contains('\\') {
        return reject("backslash separator");
    }
    if raw.starts_with('~') {
        return reject("home-relative path");
    }
    let lowered = raw.to_ascii_lowercase();
    if ENCODED_SEQUENCES.iter().any(|seq| lowered.contains(seq)) {
        return reject("percent-encoded dot or separator");
    }
    if Path::new(raw)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return reject("contains traversal sequence (..)");
    }
    Ok(())
}

/// Make `path` absolute against `base` and drop `.` components.
///
/// # Errors
///
/// Returns an error if the path fails [`reject_lexical_tricks`].
pub fn absolutize(base: &Path, path: &Path) -> SecurityResult<PathBuf> {
    reject_lexical_tricks(&path.to_string_lossy())?;

    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                // `base` itself carried a `..`; refuse rather than guess.
                return Err(SecurityError::PathTraversal {
                    path: joined.display().to_string(),
                    reason: "base path contains traversal sequence (..)".to_string(),
                });
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Resolve symlinks along the longest existing prefix of an absolute path.
///
/// Components past the existing prefix are appended unchanged; they are
/// guaranteed to be plain names because [`absolutize`] rejected `..`.
///
/// # Errors
///
/// Returns [`SecurityError::Unresolvable`] if an existing component cannot be
/// canonicalized (for example a dangling symlink).
pub fn resolve_existing_prefix(path: &Path) -> SecurityResult<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    // symlink_metadata so a dangling link counts as "existing" and fails
    // canonicalization below instead of being silently skipped.
    while std::fs::symlink_metadata(&existing).is_err() {
        let Some(name) = existing.file_name().map(std::ffi::OsStr::to_os_string) else {
            break;
        };
        tail.push(name);
        if !existing.pop() {
            break;
        }
    }

    let mut resolved = if existing.as_os_str().is_empty() {
        PathBuf::new()
    } else {
        existing
            .canonicalize()
            .map_err(|source| SecurityError::Unresolvable {
                path: existing.display().to_string(),
                source,
            })?
    };

    for name in tail.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// Longest identifier accepted by [`validate_identifier`].
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Check that an identifier is safe to use as a single file name.
///
/// Accepts ASCII letters, digits, `-`, `_` and `.`, not starting with a dot.
///
/// # Errors
///
/// Returns [`SecurityError::InvalidIdentifier`] naming the rule that matched.
pub fn validate_identifier(id: &str) -> SecurityResult<()> {
    let reject = |reason: &str| {
        Err(SecurityError::InvalidIdentifier {
            id: id.to_string(),
            reason: reason.to_string(),
        })
    };

    if id.is_empty() {
        return reject("empty");
    }
    if id.len() > MAX_IDENTIFIER_LEN {
        return reject("too long");
    }
    if id.starts_with('.') {
        return reject("leading dot");
    }
    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return reject(&format!("character {bad:?} not allowed"));
    }
    Ok(())
}

/// Verify that `candidate` resolves to a location inside `root`.
///
/// Both paths are resolved with [`resolve_existing_prefix`]; `candidate` must
/// already be absolute (see [`absolutize`]). Returns the resolved candidate.
///
/// # Errors
///
/// Returns [`SecurityError::PathEscape`] if the resolved candidate is outside
/// the resolved root, or a resolution error.
pub fn ensure_contained(root: &Path, candidate: &Path) -> SecurityResult<PathBuf> {
    let resolved_root = resolve_existing_prefix(root)?;
    let resolved = resolve_existing_prefix(candidate)?;

    if resolved.starts_with(&resolved_root) {
        Ok(resolved)
    } else {
        Err(SecurityError::PathEscape {
            resolved: resolved.display().to_string(),
            root: resolved_root.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rejects_parent_components() {
        assert!(reject_lexical_tricks(".keel/tmp/plans/../../secret.txt").is_err());
        assert!(reject_lexical_tricks("../outside").is_err());
        assert!(reject_lexical_tricks("a/b/c.md").is_ok());
    }

    #[test]
    fn test_rejects_encoded_and_odd_separators() {
        assert!(reject_lexical_tricks("plans/%2e%2e/secret").is_err());
        assert!(reject_lexical_tricks("plans/%2F..").is_err());
        assert!(reject_lexical_tricks("plans\\..\\secret").is_err());
        assert!(reject_lexical_tricks("plans/a\0b").is_err());
        assert!(reject_lexical_tricks("~/secret").is_err());
        assert!(reject_lexical_tricks("").is_err());
    }

    #[test]
    fn test_identifier_rules() {
        assert!(validate_identifier("session-2024_01.a").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("..").is_err());
        assert!(validate_identifier("../etc/passwd").is_err());
        assert!(validate_identifier("a/b").is_err());
        assert!(validate_identifier(&"x".repeat(MAX_IDENTIFIER_LEN.saturating_add(1))).is_err());
    }

    #[test]
    fn test_absolutize_joins_relative_and_drops_cur_dir() {
        let out = absolutize(Path::new("/work"), Path::new("./src/./main.rs")).unwrap();
        assert_eq!(out, PathBuf::from("/work/src/main.rs"));

        let out = absolutize(Path::new("/work"), Path::new("/abs/file")).unwrap();
        assert_eq!(out, PathBuf::from("/abs/file"));
    }

    #[test]
    fn test_contained_nonexistent_child() {
        let dir = TempDir::new().unwrap();
        let candidate = dir.path().join("not/yet/created.md");
        let resolved = ensure_contained(dir.path(), &candidate).unwrap();
        assert!(resolved.ends_with("not/yet/created.md"));
    }

    #[test]
    fn test_sibling_is_not_contained() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir_all(&root).unwrap();
        let sibling = dir.path().join("root-sibling/file");
        assert!(matches!(
            ensure_contained(&root, &sibling),
            Err(SecurityError::PathEscape { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_detected() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let candidate = root.join("link/secret.txt");
        assert!(matches!(
            ensure_contained(&root, &candidate),
            Err(SecurityError::PathEscape { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_unresolvable() {
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("dangling"))
            .unwrap();
        let candidate = dir.path().join("dangling");
        assert!(matches!(
            ensure_contained(dir.path(), &candidate),
            Err(SecurityError::Unresolvable { .. })
        ));
    }
}
