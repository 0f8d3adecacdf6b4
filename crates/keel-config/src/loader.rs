//! Config file discovery and layered loading.
//!
//! 1. Parse the embedded `defaults.toml`
//! 2. Merge `~/.keel/config.toml` (user)
//! 3. Merge `<workspace>/.keel/config.toml` and enforce tighten-only rules
//! 4. Apply `KEEL_*` environment overrides
//! 5. Deserialize and validate

use std::collections::HashMap;
use std::path::Path;

use keel_core::dirs::KeelHome;
use tracing::{debug, info};

use crate::env::{apply_env_overrides, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking, enforce_restrictions, record_leaves};
use crate::show::ResolvedConfig;
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: usize = 1_048_576;

/// Load the layered configuration using the process environment.
///
/// `home` defaults to [`KeelHome::resolve`]. If `workspace_root` is `None`,
/// the workspace layer is skipped.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any layer is malformed or the merged
/// configuration fails validation.
pub fn load(workspace_root: Option<&Path>, home: Option<&KeelHome>) -> ConfigResult<ResolvedConfig> {
    let home = match home {
        Some(h) => h.clone(),
        None => KeelHome::resolve().map_err(ConfigError::NoHomeDir)?,
    };
    load_with_env(workspace_root, &home, &collect_env_vars())
}

/// Load the layered configuration with an explicit environment snapshot.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any layer is malformed or the merged
/// configuration fails validation.
pub fn load_with_env<S: std::hash::BuildHasher>(
    workspace_root: Option<&Path>,
    home: &KeelHome,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<ResolvedConfig> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", ConfigLayer::Defaults, &mut field_sources);

    let user_path = home.config_path();
    if let Some(overlay) = try_load_file(&user_path)? {
        deep_merge_tracking(&mut merged, &overlay, "", ConfigLayer::User, &mut field_sources);
        loaded_files.push(user_path.display().to_string());
        info!(path = %user_path.display(), "loaded user config");
    }

    if let Some(ws_root) = workspace_root {
        let ws_path = ws_root.join(".keel").join("config.toml");
        if let Some(overlay) = try_load_file(&ws_path)? {
            let baseline = merged.clone();
            deep_merge_tracking(
                &mut merged,
                &overlay,
                "",
                ConfigLayer::Workspace,
                &mut field_sources,
            );
            enforce_restrictions(&mut merged, &baseline, &overlay);
            loaded_files.push(ws_path.display().to_string());
            info!(path = %ws_path.display(), "loaded workspace config");
        }
    }

    let env_count = apply_env_overrides(&mut merged, &mut field_sources, env_vars)?;
    if env_count > 0 {
        debug!(count = env_count, "applied environment overrides");
    }

    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load a config from a single file (no layering).
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed, or validated.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let value = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
    })?;
    let config: Config = value
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

/// Read and parse a file, returning `None` if it does not exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_defaults_deserialize_to_default_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_without_files() {
        let dir = TempDir::new().unwrap();
        let home = KeelHome::from_path(dir.path().join("home"));
        let resolved = load_with_env(None, &home, &no_env()).unwrap();
        assert_eq!(resolved.config, Config::default());
        assert!(resolved.loaded_files.is_empty());
        assert_eq!(
            resolved.field_sources.get("approval.mode"),
            Some(&ConfigLayer::Defaults)
        );
    }

    #[test]
    fn test_full_precedence_chain() {
        let dir = TempDir::new().unwrap();
        let home = KeelHome::from_path(dir.path().join("home"));
        std::fs::create_dir_all(home.root()).unwrap();
        std::fs::write(
            home.config_path(),
            "[approval]\nmode = \"auto-edit\"\nexcluded_tools = [\"web_fetch\"]\n[scheduler]\nmax_concurrency = 4\n",
        )
        .unwrap();

        let ws = dir.path().join("ws");
        std::fs::create_dir_all(ws.join(".keel")).unwrap();
        std::fs::write(
            ws.join(".keel/config.toml"),
            "[approval]\nmode = \"yolo\"\nexcluded_tools = [\"shell\"]\n[scheduler]\nmax_concurrency = 2\n",
        )
        .unwrap();

        let env: HashMap<String, String> =
            [("KEEL_LOG_LEVEL".to_owned(), "debug".to_owned())].into_iter().collect();

        let resolved = load_with_env(Some(&ws), &home, &env).unwrap();
        let config = resolved.config;

        assert_eq!(config.approval.mode, "auto-edit");
        assert!(config.approval.excluded_tools.contains(&"web_fetch".to_owned()));
        assert!(config.approval.excluded_tools.contains(&"shell".to_owned()));
        assert_eq!(config.scheduler.max_concurrency, 2);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(resolved.loaded_files.len(), 2);
    }

    #[test]
    fn test_invalid_env_value_fails_validation() {
        let dir = TempDir::new().unwrap();
        let home = KeelHome::from_path(dir.path());
        let env: HashMap<String, String> =
            [("KEEL_APPROVAL_MODE".to_owned(), "reckless".to_owned())].into_iter().collect();
        let err = load_with_env(None, &home, &env).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let home = KeelHome::from_path(dir.path());
        std::fs::write(home.config_path(), "[approval\nmode=").unwrap();
        let err = load_with_env(None, &home, &no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_load_file_nonexistent() {
        let result = load_file(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }
}
