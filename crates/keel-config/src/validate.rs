//! Post-merge configuration validation.

use std::path::{Component, Path};

use crate::error::{ConfigError, ConfigResult};
use crate::merge::normalize_mode;
use crate::types::Config;

/// Upper bound for `scheduler.max_concurrency`.
const MAX_CONCURRENCY_UPPER_BOUND: usize = 256;

/// Validate a fully merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_approval(config)?;
    validate_scheduler(config)?;
    validate_checkpoints(config)?;
    validate_sessions(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_approval(config: &Config) -> ConfigResult<()> {
    let a = &config.approval;

    if !matches!(
        normalize_mode(&a.mode),
        "default" | "auto-edit" | "yolo" | "plan"
    ) {
        return Err(invalid(
            "approval.mode",
            format!(
                "unknown mode '{}'; expected one of: default, auto-edit, yolo, plan",
                a.mode
            ),
        ));
    }

    if a.plan_scratch_dir.trim().is_empty() {
        return Err(invalid("approval.plan_scratch_dir", "must not be empty"));
    }
    if Path::new(&a.plan_scratch_dir)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(invalid(
            "approval.plan_scratch_dir",
            "must not contain '..' segments",
        ));
    }

    for (field, list) in [
        ("approval.allowed_tools", &a.allowed_tools),
        ("approval.excluded_tools", &a.excluded_tools),
    ] {
        if list.iter().any(|p| p.trim().is_empty()) {
            return Err(invalid(field, "tool patterns must not be empty"));
        }
    }

    Ok(())
}

fn validate_scheduler(config: &Config) -> ConfigResult<()> {
    let s = &config.scheduler;
    if s.max_concurrency == 0 || s.max_concurrency > MAX_CONCURRENCY_UPPER_BOUND {
        return Err(invalid(
            "scheduler.max_concurrency",
            format!("must be between 1 and {MAX_CONCURRENCY_UPPER_BOUND}"),
        ));
    }
    Ok(())
}

fn validate_checkpoints(config: &Config) -> ConfigResult<()> {
    let c = &config.checkpoints;
    if !matches!(c.backend.as_str(), "directory" | "git") {
        return Err(invalid(
            "checkpoints.backend",
            format!("unknown backend '{}'; expected directory or git", c.backend),
        ));
    }
    if let Some(dir) = &c.store_dir
        && !Path::new(dir).is_absolute()
    {
        return Err(invalid("checkpoints.store_dir", "must be an absolute path"));
    }
    Ok(())
}

fn validate_sessions(config: &Config) -> ConfigResult<()> {
    let s = &config.sessions;
    if !matches!(s.format.as_str(), "jsonl" | "json") {
        return Err(invalid(
            "sessions.format",
            format!("unknown format '{}'; expected jsonl or json", s.format),
        ));
    }
    if let Some(root) = &s.storage_root
        && !Path::new(root).is_absolute()
    {
        return Err(invalid("sessions.storage_root", "must be an absolute path"));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    if !matches!(
        l.level.as_str(),
        "trace" | "debug" | "info" | "warn" | "error" | "off"
    ) {
        return Err(invalid(
            "logging.level",
            format!("unknown level '{}'", l.level),
        ));
    }
    if !matches!(l.format.as_str(), "pretty" | "compact" | "json") {
        return Err(invalid(
            "logging.format",
            format!("unknown format '{}'; expected pretty, compact or json", l.format),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_mode_aliases_accepted() {
        let mut config = Config::default();
        config.approval.mode = "auto_edit".to_owned();
        assert!(validate(&config).is_ok());
        config.approval.mode = "autoEdit".to_owned();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let mut config = Config::default();
        config.approval.mode = "trusting".to_owned();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("approval.mode"));
    }

    #[test]
    fn test_scratch_dir_traversal_rejected() {
        let mut config = Config::default();
        config.approval.plan_scratch_dir = ".keel/../../etc".to_owned();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = Config::default();
        config.scheduler.max_concurrency = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_relative_storage_root_rejected() {
        let mut config = Config::default();
        config.sessions.storage_root = Some("sessions".to_owned());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut config = Config::default();
        config.checkpoints.backend = "zfs".to_owned();
        assert!(validate(&config).is_err());
    }
}
