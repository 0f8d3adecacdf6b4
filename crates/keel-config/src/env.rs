//! `KEEL_*` environment variable overrides.
//!
//! Environment variables are the last layer: a set variable wins over every
//! file. Values are coerced to the type already present at the target path.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, get_nested, set_nested};

/// Environment variable to dotted config path.
const ENV_MAPPINGS: &[(&str, &str)] = &[
    ("KEEL_APPROVAL_MODE", "approval.mode"),
    ("KEEL_PLAN_SCRATCH_DIR", "approval.plan_scratch_dir"),
    ("KEEL_ALLOWED_TOOLS", "approval.allowed_tools"),
    ("KEEL_EXCLUDED_TOOLS", "approval.excluded_tools"),
    ("KEEL_MAX_CONCURRENCY", "scheduler.max_concurrency"),
    ("KEEL_MAX_OUTPUT_CHARS", "scheduler.max_output_chars"),
    ("KEEL_TOOL_TIMEOUT_SECS", "scheduler.tool_timeout_secs"),
    ("KEEL_CHECKPOINT_BACKEND", "checkpoints.backend"),
    ("KEEL_CHECKPOINT_DIR", "checkpoints.store_dir"),
    ("KEEL_SESSIONS_ROOT", "sessions.storage_root"),
    ("KEEL_SESSION_FORMAT", "sessions.format"),
    ("KEEL_LOG_LEVEL", "logging.level"),
    ("KEEL_LOG_FORMAT", "logging.format"),
];

/// Snapshot the process environment, keeping only `KEEL_*` variables.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("KEEL_"))
        .collect()
}

/// Apply every mapped variable present in `env_vars`.
///
/// Returns the number of overrides applied.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] if a value cannot be coerced to the
/// type of the field it targets.
pub fn apply_env_overrides<S: std::hash::BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<usize> {
    let mut count: usize = 0;

    for (var_name, field_path) in ENV_MAPPINGS {
        let Some(raw) = env_vars.get(*var_name) else {
            continue;
        };
        let path: Vec<&str> = field_path.split('.').collect();
        let value = coerce(get_nested(merged, &path), raw).map_err(|message| {
            ConfigError::EnvError {
                var_name: (*var_name).to_owned(),
                message,
            }
        })?;

        debug!(var = var_name, field = field_path, "applying env override");
        set_nested(merged, &path, value);
        sources.insert((*field_path).to_owned(), ConfigLayer::Environment);
        count = count.saturating_add(1);
    }

    Ok(count)
}

fn coerce(existing: Option<&toml::Value>, raw: &str) -> Result<toml::Value, String> {
    match existing {
        Some(toml::Value::Integer(_)) => raw
            .trim()
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|e| format!("expected an integer: {e}")),
        Some(toml::Value::Boolean(_)) => raw
            .trim()
            .parse::<bool>()
            .map(toml::Value::Boolean)
            .map_err(|e| format!("expected true or false: {e}")),
        Some(toml::Value::Array(_)) => Ok(toml::Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| toml::Value::String(s.to_owned()))
                .collect(),
        )),
        _ => Ok(toml::Value::String(raw.to_owned())),
    }
}
