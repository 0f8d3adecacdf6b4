//! Plan-mode scratch scope containment.
//!
//! In plan mode the only writable location is a reserved scratch directory.
//! A target path is inside the scope when it passes the lexical checks in
//! [`keel_core::paths`] and its longest existing ancestor, canonicalized,
//! stays under the canonicalized scratch directory.

use std::path::{Path, PathBuf};

use keel_core::SecurityResult;
use keel_core::paths::{absolutize, ensure_contained, reject_lexical_tricks};

/// The workspace root plus the scratch directory writes are confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanScope {
    workspace_root: PathBuf,
    scratch_dir: PathBuf,
}

impl PlanScope {
    /// Build a scope. A relative `scratch_dir` resolves against
    /// `workspace_root`.
    ///
    /// # Errors
    ///
    /// Returns a security error if either path carries traversal tricks.
    pub fn new(workspace_root: impl Into<PathBuf>, scratch_dir: impl AsRef<Path>) -> SecurityResult<Self> {
        let workspace_root = workspace_root.into();
        let scratch_dir = absolutize(&workspace_root, scratch_dir.as_ref())?;
        Ok(Self {
            workspace_root,
            scratch_dir,
        })
    }

    /// Workspace root that relative targets resolve against.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Absolute scratch directory.
    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Check that `target` lies within the scratch directory.
    ///
    /// Returns the resolved absolute target on success.
    ///
    /// # Errors
    ///
    /// Returns a security error naming the rule that rejected the path.
    pub fn check(&self, target: &Path) -> SecurityResult<PathBuf> {
        reject_lexical_tricks(&target.to_string_lossy())?;
        let absolute = absolutize(&self.workspace_root, target)?;
        ensure_contained(&self.scratch_dir, &absolute)
    }

    /// Whether `target` lies within the scratch directory.
    #[must_use]
    pub fn contains(&self, target: &Path) -> bool {
        self.check(target).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scope(dir: &TempDir) -> PlanScope {
        std::fs::create_dir_all(dir.path().join(".keel/tmp/plans")).unwrap();
        PlanScope::new(dir.path(), ".keel/tmp/plans").unwrap()
    }

    #[test]
    fn test_scratch_examples() {
        let dir = TempDir::new().unwrap();
        let scope = scope(&dir);

        assert!(!scope.contains(Path::new("README.md")));
        assert!(scope.contains(Path::new(".keel/tmp/plans/login-plan.md")));
        assert!(!scope.contains(Path::new(".keel/tmp/plans/../../secret.txt")));
    }

    #[test]
    fn test_absolute_target_inside_scope() {
        let dir = TempDir::new().unwrap();
        let scope = scope(&dir);
        let target = dir.path().join(".keel/tmp/plans/nested/new.md");
        assert!(scope.contains(&target));
    }

    #[test]
    fn test_encoded_and_home_relative_rejected() {
        let dir = TempDir::new().unwrap();
        let scope = scope(&dir);
        assert!(!scope.contains(Path::new(".keel/tmp/plans/%2e%2e/x")));
        assert!(!scope.contains(Path::new("~/.keel/tmp/plans/x.md")));
        assert!(!scope.contains(Path::new(".keel\\tmp\\plans\\x.md")));
    }

    #[test]
    fn test_scope_prefix_is_not_sibling() {
        let dir = TempDir::new().unwrap();
        let scope = scope(&dir);
        std::fs::create_dir_all(dir.path().join(".keel/tmp/plans-evil")).unwrap();
        assert!(!scope.contains(Path::new(".keel/tmp/plans-evil/x.md")));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let scope = scope(&dir);
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join(".keel/tmp/plans/link"))
            .unwrap();

        assert!(!scope.contains(Path::new(".keel/tmp/plans/link/secret.txt")));
    }
}
