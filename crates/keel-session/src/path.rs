//! Session file path derivation and containment.
//!
//! The file path comes from the session identifier, which may be supplied
//! from outside the process (resume, import). It is checked on every
//! initialization, synchronously, before any file handle exists:
//!
//! 1. the identifier must be a plain file-name token
//! 2. the storage root must be absolute and must exist
//! 3. the root, the file's parent, and the file itself when it exists are
//!    canonicalized and the file must stay under the canonical root

use keel_core::SessionId;
use keel_core::paths::{ensure_contained, validate_identifier};
use std::path::{Path, PathBuf};
use tracing::error;

use crate::error::{SessionError, SessionResult};
use crate::format::RecordFormat;

/// Resolve and check the file for `session_id` under `root`.
///
/// Returns the resolved absolute path.
///
/// # Errors
///
/// Returns [`SessionError::Security`] for a bad identifier or a path that
/// escapes the root, and [`SessionError::InvalidRoot`] if the root is
/// relative or missing.
pub fn resolve_session_path(
    root: &Path,
    session_id: &SessionId,
    format: RecordFormat,
) -> SessionResult<PathBuf> {
    validate_identifier(session_id.as_str()).inspect_err(|e| {
        error!(session_id = %session_id, error = %e, "Rejected session identifier");
    })?;

    if !root.is_absolute() {
        return Err(SessionError::InvalidRoot {
            path: root.to_path_buf(),
            reason: "storage root must be absolute".into(),
        });
    }
    if !root.is_dir() {
        return Err(SessionError::InvalidRoot {
            path: root.to_path_buf(),
            reason: "storage root does not exist".into(),
        });
    }

    let candidate = root.join(format!("{}.{}", session_id.as_str(), format.extension()));
    let resolved = ensure_contained(root, &candidate).inspect_err(|e| {
        error!(
            session_id = %session_id,
            path = %candidate.display(),
            error = %e,
            "Session path escapes storage root"
        );
    })?;

    if resolved.is_dir() {
        return Err(SessionError::InvalidRoot {
            path: resolved,
            reason: "session path is a directory".into(),
        });
    }
    Ok(resolved)
}
