//! Splitting a batch into calls that may run together and calls that must
//! run one at a time.
//!
//! - Read-only calls are always independent.
//! - Shell-state and destructive calls always conflict.
//! - Path-mutating calls conflict when the batch holds a shell-state or
//!   destructive call, since those can touch any path. Otherwise they are
//!   independent unless one of their targets overlaps a target of another
//!   path-mutating call in the batch. Two paths overlap when they are equal
//!   or one is an ancestor of the other.
//!
//! Both sets keep proposal order.

use keel_core::MutationClass;
use std::path::{Component, Path, PathBuf};

/// The part of a scheduled call that matters for conflict detection.
#[derive(Debug, Clone)]
pub struct CallFootprint<'a> {
    /// Declared class.
    pub class: &'a MutationClass,
    /// Target paths extracted from the call's path fields.
    pub targets: Vec<PathBuf>,
}

/// Batch indices split by set, each in proposal order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    /// May execute concurrently.
    pub independent: Vec<usize>,
    /// Execute strictly one at a time.
    pub conflicting: Vec<usize>,
}

/// Partition `footprints`, resolving relative targets against
/// `workspace_root`.
#[must_use]
pub fn partition(workspace_root: &Path, footprints: &[CallFootprint<'_>]) -> Partition {
    let resolved: Vec<Vec<PathBuf>> = footprints
        .iter()
        .map(|f| {
            f.targets
                .iter()
                .map(|t| normalize(workspace_root, t))
                .collect()
        })
        .collect();

    let serialized = footprints.iter().any(|f| f.class.is_globally_serialized());

    let mut result = Partition::default();
    for (i, footprint) in footprints.iter().enumerate() {
        let conflicts = match footprint.class {
            MutationClass::ReadOnly => false,
            MutationClass::MutatesShellState | MutationClass::Destructive => true,
            MutationClass::MutatesPath { .. } => {
                serialized
                    || footprints.iter().enumerate().any(|(j, other)| {
                        j != i
                            && matches!(other.class, MutationClass::MutatesPath { .. })
                            && overlaps(&resolved[i], &resolved[j])
                    })
            },
        };
        if conflicts {
            result.conflicting.push(i);
        } else {
            result.independent.push(i);
        }
    }
    result
}

fn overlaps(a: &[PathBuf], b: &[PathBuf]) -> bool {
    a.iter()
        .any(|x| b.iter().any(|y| x.starts_with(y) || y.starts_with(x)))
}

/// Lexical normalization; `..` pops a component.
fn normalize(root: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                out.pop();
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp<'a>(class: &'a MutationClass, targets: &[&str]) -> CallFootprint<'a> {
        CallFootprint {
            class,
            targets: targets.iter().map(PathBuf::from).collect(),
        }
    }

    #[test]
    fn test_read_only_calls_are_independent() {
        let read = MutationClass::ReadOnly;
        let calls = vec![fp(&read, &[]), fp(&read, &[]), fp(&read, &[])];
        let p = partition(Path::new("/ws"), &calls);
        assert_eq!(p.independent, vec![0, 1, 2]);
        assert!(p.conflicting.is_empty());
    }

    #[test]
    fn test_same_path_writes_conflict() {
        let write = MutationClass::mutates_path(["file_path"]);
        let read = MutationClass::ReadOnly;
        let calls = vec![
            fp(&write, &["src/app.ts"]),
            fp(&read, &[]),
            fp(&write, &["./src/app.ts"]),
            fp(&write, &["README.md"]),
        ];
        let p = partition(Path::new("/ws"), &calls);
        assert_eq!(p.conflicting, vec![0, 2]);
        assert_eq!(p.independent, vec![1, 3]);
    }

    #[test]
    fn test_ancestor_paths_overlap() {
        let write = MutationClass::mutates_path(["path"]);
        let calls = vec![
            fp(&write, &["src"]),
            fp(&write, &["/ws/src/lib/mod.rs"]),
            fp(&write, &["docs/x/../guide.md"]),
        ];
        let p = partition(Path::new("/ws"), &calls);
        assert_eq!(p.conflicting, vec![0, 1]);
        assert_eq!(p.independent, vec![2]);
    }

    #[test]
    fn test_shell_and_destructive_always_conflict() {
        let shell = MutationClass::MutatesShellState;
        let destroy = MutationClass::Destructive;
        let read = MutationClass::ReadOnly;
        let calls = vec![fp(&shell, &[]), fp(&read, &[]), fp(&destroy, &[])];
        let p = partition(Path::new("/ws"), &calls);
        assert_eq!(p.conflicting, vec![0, 2]);
        assert_eq!(p.independent, vec![1]);
    }

    #[test]
    fn test_shell_in_batch_serializes_unrelated_writes() {
        let shell = MutationClass::MutatesShellState;
        let write = MutationClass::mutates_path(["p"]);
        let read = MutationClass::ReadOnly;
        let calls = vec![
            fp(&shell, &[]),
            fp(&write, &["a.txt"]),
            fp(&read, &[]),
            fp(&write, &["b.txt"]),
        ];
        let p = partition(Path::new("/ws"), &calls);
        assert_eq!(p.conflicting, vec![0, 1, 3]);
        assert_eq!(p.independent, vec![2]);
    }
}
