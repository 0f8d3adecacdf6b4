//! Content-addressed directory backend.
//!
//! ```text
//! <store>/
//! ├── blobs/<aa>/<blake3>        file content, named by its hash
//! └── manifests/<blake3>.json    relative path -> blob hash, size, mode
//! ```
//!
//! A snapshot's handle is the hash of its manifest, so two snapshots of
//! identical content share one manifest and every unchanged file shares one
//! blob. `.git/` and `.keel/` at the workspace root, and the store itself
//! when it lives inside the workspace, are never captured. Symlinks are
//! recorded by target and never followed: a restore removes any link or
//! file standing where the snapshot had a directory before it writes, so no
//! write lands outside the workspace.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::backend::SnapshotBackend;
use crate::error::{CheckpointError, CheckpointResult};
use crate::record::{RestoreReport, SnapshotHandle};

const MANIFEST_VERSION: u32 = 1;

/// Workspace-root directories never captured.
const SKIPPED_ROOT_DIRS: [&str; 2] = [".git", ".keel"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FileEntry {
    hash: String,
    size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mode: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    files: BTreeMap<String, FileEntry>,
    /// Relative path -> link target, as read from the link.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    links: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryType {
    File,
    Link,
}

/// A regular file or symlink found under the workspace.
#[derive(Debug)]
struct WalkedEntry {
    key: String,
    path: PathBuf,
    kind: EntryType,
}

/// Snapshot backend storing hashed blobs under a store directory.
#[derive(Debug, Clone)]
pub struct DirectoryBackend {
    workspace_root: PathBuf,
    store: PathBuf,
}

impl DirectoryBackend {
    /// Create a backend for `workspace_root` storing under `store`.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>, store: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            store: store.into(),
        }
    }

    /// The store directory.
    #[must_use]
    pub fn store(&self) -> &Path {
        &self.store
    }
}

#[async_trait]
impl SnapshotBackend for DirectoryBackend {
    fn name(&self) -> &'static str {
        "directory"
    }

    async fn snapshot(&self, label: &str) -> CheckpointResult<SnapshotHandle> {
        let this = self.clone();
        let handle = tokio::task::spawn_blocking(move || this.snapshot_blocking())
            .await
            .map_err(|e| CheckpointError::Task(e.to_string()))??;
        debug!(handle = %handle.short(), label, "Directory snapshot stored");
        Ok(handle)
    }

    async fn restore(&self, handle: &SnapshotHandle) -> CheckpointResult<RestoreReport> {
        let this = self.clone();
        let handle = handle.clone();
        tokio::task::spawn_blocking(move || this.restore_blocking(&handle))
            .await
            .map_err(|e| CheckpointError::Task(e.to_string()))?
    }
}

impl DirectoryBackend {
    fn blob_path(&self, hash: &str) -> PathBuf {
        let fan = keel_core::truncate_to_boundary(hash, 2);
        self.store.join("blobs").join(fan).join(hash)
    }

    fn manifest_path(&self, handle: &str) -> PathBuf {
        self.store.join("manifests").join(format!("{handle}.json"))
    }

    fn skipped_dirs(&self) -> Vec<PathBuf> {
        let mut skipped: Vec<PathBuf> = SKIPPED_ROOT_DIRS
            .iter()
            .map(|d| self.workspace_root.join(d))
            .collect();
        if self.store.starts_with(&self.workspace_root) {
            skipped.push(self.store.clone());
        }
        skipped
    }

    /// Regular files and symlinks under the workspace. Links are reported,
    /// never descended.
    fn walk_workspace(&self) -> CheckpointResult<Vec<WalkedEntry>> {
        let skipped = self.skipped_dirs();
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.workspace_root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !skipped.iter().any(|s| e.path() == s))
        {
            let entry = entry.map_err(|e| CheckpointError::Snapshot(e.to_string()))?;
            let kind = if entry.file_type().is_symlink() {
                EntryType::Link
            } else if entry.file_type().is_file() {
                EntryType::File
            } else {
                continue;
            };
            let rel = entry
                .path()
                .strip_prefix(&self.workspace_root)
                .map_err(|e| CheckpointError::Snapshot(e.to_string()))?;
            let key = rel
                .to_str()
                .ok_or_else(|| {
                    CheckpointError::Snapshot(format!(
                        "non-UTF-8 path in workspace: {}",
                        rel.display()
                    ))
                })?
                .replace(std::path::MAIN_SEPARATOR, "/");
            files.push(WalkedEntry {
                key,
                path: entry.path().to_path_buf(),
                kind,
            });
        }
        Ok(files)
    }

    fn snapshot_blocking(&self) -> CheckpointResult<SnapshotHandle> {
        let mut files = BTreeMap::new();
        let mut links = BTreeMap::new();

        for WalkedEntry { key, path, kind } in self.walk_workspace()? {
            if kind == EntryType::Link {
                let target = fs::read_link(&path).map_err(|e| CheckpointError::io(&path, e))?;
                let target = target.to_str().ok_or_else(|| {
                    CheckpointError::Snapshot(format!(
                        "non-UTF-8 link target in workspace: {}",
                        path.display()
                    ))
                })?;
                links.insert(key, target.to_string());
                continue;
            }
            let bytes = fs::read(&path).map_err(|e| CheckpointError::io(&path, e))?;
            let hash = blake3::hash(&bytes).to_hex().to_string();
            let meta = fs::metadata(&path).map_err(|e| CheckpointError::io(&path, e))?;

            let blob = self.blob_path(&hash);
            if !blob.exists() {
                write_atomic(&blob, &bytes).map_err(|e| CheckpointError::io(&blob, e))?;
            }

            files.insert(
                key,
                FileEntry {
                    hash,
                    size: meta.len(),
                    mode: file_mode(&meta),
                },
            );
        }

        let file_count = files.len();
        let link_count = links.len();
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            files,
            links,
        };
        let bytes = serde_json::to_vec_pretty(&manifest)?;
        let handle = blake3::hash(&bytes).to_hex().to_string();
        let path = self.manifest_path(&handle);
        if !path.exists() {
            write_atomic(&path, &bytes).map_err(|e| CheckpointError::io(&path, e))?;
        }

        debug!(files = file_count, links = link_count, "Manifest written");
        Ok(SnapshotHandle::new(handle))
    }

    fn load_manifest(&self, handle: &SnapshotHandle) -> CheckpointResult<Manifest> {
        let path = self.manifest_path(handle.as_str());
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(handle.to_string()));
            },
            Err(e) => return Err(CheckpointError::io(&path, e)),
        };
        if blake3::hash(&bytes).to_hex().as_str() != handle.as_str() {
            return Err(CheckpointError::CorruptBlob {
                hash: handle.to_string(),
                path: path.display().to_string(),
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn restore_blocking(&self, handle: &SnapshotHandle) -> CheckpointResult<RestoreReport> {
        let manifest = self.load_manifest(handle)?;

        // Phase 1: verify everything. Nothing in the workspace is touched.
        let mut staged = Vec::with_capacity(manifest.files.len());
        for (key, entry) in &manifest.files {
            check_key(key)?;
            let blob = self.blob_path(&entry.hash);
            let bytes = match fs::read(&blob) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(CheckpointError::MissingBlob {
                        hash: entry.hash.clone(),
                        path: key.clone(),
                    });
                },
                Err(e) => return Err(CheckpointError::io(&blob, e)),
            };
            if blake3::hash(&bytes).to_hex().as_str() != entry.hash {
                return Err(CheckpointError::CorruptBlob {
                    hash: entry.hash.clone(),
                    path: key.clone(),
                });
            }
            staged.push((key.as_str(), bytes, entry.mode));
        }
        for key in manifest.links.keys() {
            check_key(key)?;
            if let Some(file) = manifest
                .files
                .keys()
                .find(|f| Path::new(f.as_str()).starts_with(key))
            {
                return Err(CheckpointError::Snapshot(format!(
                    "manifest entry {file} lies under link {key}"
                )));
            }
        }

        // Anything standing where the snapshot needs a directory, and any
        // link or directory standing where it needs a file, goes first.
        let mut removals: BTreeMap<PathBuf, String> = BTreeMap::new();
        for key in manifest.files.keys() {
            self.find_obstructions(key, None, &mut removals)?;
        }
        for (key, target) in &manifest.links {
            self.find_obstructions(key, Some(target), &mut removals)?;
        }
        for entry in self.walk_workspace()? {
            let expected = match entry.kind {
                EntryType::File => manifest.files.contains_key(&entry.key),
                EntryType::Link => manifest.links.contains_key(&entry.key),
            };
            if !expected {
                removals.insert(entry.path, entry.key);
            }
        }

        // Phase 2: write. Any failure from here on may leave a mixed tree.
        let mut report = RestoreReport::default();
        let mut touched = 0usize;

        for (path, key) in &removals {
            match remove_entry(path) {
                Ok(true) => {
                    touched = touched.saturating_add(1);
                    report.removed = report.removed.saturating_add(1);
                },
                Ok(false) => {},
                Err(e) => return Err(restore_failure(handle, touched, key, path, e)),
            }
        }

        for (key, bytes, mode) in staged {
            let target = self.workspace_root.join(key);
            if is_plain_file(&target) && fs::read(&target).is_ok_and(|existing| existing == bytes) {
                report.unchanged = report.unchanged.saturating_add(1);
                continue;
            }
            if let Err(e) = write_atomic(&target, &bytes).and_then(|()| apply_mode(&target, mode)) {
                return Err(restore_failure(handle, touched, key, &target, e));
            }
            touched = touched.saturating_add(1);
            report.restored = report.restored.saturating_add(1);
        }

        for (key, link_target) in &manifest.links {
            let path = self.workspace_root.join(key);
            if fs::read_link(&path).is_ok_and(|current| current == Path::new(link_target)) {
                report.unchanged = report.unchanged.saturating_add(1);
                continue;
            }
            if let Err(e) = create_link(link_target, &path) {
                return Err(restore_failure(handle, touched, key, &path, e));
            }
            touched = touched.saturating_add(1);
            report.restored = report.restored.saturating_add(1);
        }

        info!(
            handle = %handle.short(),
            restored = report.restored,
            removed = report.removed,
            unchanged = report.unchanged,
            "Workspace restored from directory snapshot"
        );
        Ok(report)
    }

    /// Queue for removal every entry that would redirect or block writing
    /// `key`: a non-directory at any ancestor, and at `key` itself anything
    /// but a plain file (or, for a link, anything but that same link).
    fn find_obstructions(
        &self,
        key: &str,
        link_target: Option<&str>,
        removals: &mut BTreeMap<PathBuf, String>,
    ) -> CheckpointResult<()> {
        let mut current = self.workspace_root.clone();
        let components: Vec<_> = Path::new(key).components().collect();
        for (i, component) in components.iter().enumerate() {
            current.push(component);
            let meta = match fs::symlink_metadata(&current) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(CheckpointError::io(&current, e)),
            };
            let last = i.saturating_add(1) == components.len();
            let obstructs = if !last {
                !meta.file_type().is_dir()
            } else {
                match link_target {
                    None => !meta.file_type().is_file(),
                    Some(target) => {
                        !meta.file_type().is_symlink()
                            || fs::read_link(&current).is_ok_and(|t| t != Path::new(target))
                    },
                }
            };
            if obstructs {
                let rel = components[..=i]
                    .iter()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                removals.insert(current, rel);
                return Ok(());
            }
        }
        Ok(())
    }
}

fn check_key(key: &str) -> CheckpointResult<()> {
    keel_core::paths::reject_lexical_tricks(key)?;
    if Path::new(key).is_absolute() {
        return Err(CheckpointError::Snapshot(format!(
            "manifest entry is absolute: {key}"
        )));
    }
    Ok(())
}

fn is_plain_file(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_file())
}

/// Remove a file, link or directory tree without following links.
///
/// Returns `false` if nothing was there.
fn remove_entry(path: &Path) -> io::Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if meta.file_type().is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(true)
}

fn restore_failure(
    handle: &SnapshotHandle,
    touched: usize,
    key: &str,
    path: &Path,
    err: io::Error,
) -> CheckpointError {
    if touched == 0 {
        CheckpointError::io(path, err)
    } else {
        CheckpointError::PartialRestore {
            checkpoint: handle.to_string(),
            written: touched,
            path: key.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Write via a sibling temp file and rename so readers never see a torn file.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{name}.keel-tmp"));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode())
}

#[cfg(not(unix))]
fn file_mode(_meta: &fs::Metadata) -> Option<u32> {
    None
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    match mode {
        Some(mode) => fs::set_permissions(path, fs::Permissions::from_mode(mode)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

fn create_link(target: &str, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    symlink(target, path)
}

#[cfg(unix)]
fn symlink(target: &str, path: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, path)
}

#[cfg(not(unix))]
fn symlink(_target: &str, path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot recreate symlink {}", path.display()),
    ))
}
