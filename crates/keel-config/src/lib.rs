//! Keel Config - Layered configuration for the Keel orchestration core.
//!
//! # Usage
//!
//! ```rust,no_run
//! use keel_config::Config;
//!
//! let resolved = Config::load(Some(std::path::Path::new("."))).unwrap();
//! println!("approval mode: {}", resolved.config.approval.mode);
//! ```
//!
//! # Precedence
//!
//! From lowest to highest priority:
//!
//! 1. Embedded defaults (`defaults.toml`)
//! 2. User (`~/.keel/config.toml`, or `$KEEL_HOME/config.toml`)
//! 3. Workspace (`<workspace>/.keel/config.toml`), which may only tighten
//!    approval: it cannot loosen the mode, drop deny entries, add allow
//!    entries, or move session and checkpoint storage
//! 4. `KEEL_*` environment variables

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

/// `KEEL_*` environment overrides.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Layered merging with tighten-only enforcement.
pub mod merge;
/// Resolved configuration display.
pub mod show;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use merge::ConfigLayer;
pub use show::ResolvedConfig;
pub use types::*;

impl Config {
    /// Load configuration with the full precedence chain.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any config file is malformed or the final
    /// configuration fails validation.
    pub fn load(workspace_root: Option<&std::path::Path>) -> ConfigResult<ResolvedConfig> {
        loader::load(workspace_root, None)
    }

    /// Load configuration with an explicit home directory.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any config file is malformed or the final
    /// configuration fails validation.
    pub fn load_with_home(
        workspace_root: Option<&std::path::Path>,
        home: &keel_core::dirs::KeelHome,
    ) -> ConfigResult<ResolvedConfig> {
        loader::load(workspace_root, Some(home))
    }

    /// Load configuration from a single file (no layering).
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or fails
    /// validation.
    pub fn load_file(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }
}
