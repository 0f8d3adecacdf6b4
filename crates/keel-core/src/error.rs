//! Security error types for path containment.

use thiserror::Error;

/// Security rejections raised by path and identifier checks.
///
/// These are always fatal to the operation that triggered them and carry the
/// fully resolved path so the rejection can be logged verbatim.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// The path contains a traversal or encoding trick that is never accepted.
    #[error("path traversal rejected for '{path}': {reason}")]
    PathTraversal {
        /// The path as supplied.
        path: String,
        /// Which rule rejected it.
        reason: String,
    },

    /// The resolved path lies outside the permitted root.
    #[error("resolved path '{resolved}' escapes root '{root}'")]
    PathEscape {
        /// The resolved absolute path.
        resolved: String,
        /// The root it was required to stay within.
        root: String,
    },

    /// An identifier cannot be used to derive a storage location.
    #[error("invalid identifier '{id}': {reason}")]
    InvalidIdentifier {
        /// The identifier as supplied.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The filesystem could not resolve a path that must be checked.
    #[error("cannot resolve '{path}': {source}")]
    Unresolvable {
        /// The path being resolved.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for security checks.
pub type SecurityResult<T> = Result<T, SecurityError>;
