//! Deep merge of TOML values with restriction enforcement.
//!
//! The merge operates on raw [`toml::Value`] trees rather than deserialized
//! structs, so a key missing from an overlay never resets the base value.

use std::collections::HashMap;

use tracing::warn;

/// Which configuration layer a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayer {
    /// Compiled-in defaults (`defaults.toml`).
    Defaults,
    /// User-level configuration (`~/.keel/config.toml`).
    User,
    /// Workspace-level configuration (`<workspace>/.keel/config.toml`).
    Workspace,
    /// `KEEL_*` environment variable.
    Environment,
}

impl std::fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Defaults => write!(f, "defaults"),
            Self::User => write!(f, "user"),
            Self::Workspace => write!(f, "workspace"),
            Self::Environment => write!(f, "env"),
        }
    }
}

/// Dotted field path to the layer that last set it.
pub type FieldSources = HashMap<String, ConfigLayer>;

/// Approval modes from strictest to most permissive.
const MODE_ORDER: &[&str] = &["plan", "default", "auto-edit", "yolo"];

/// Deep-merge `overlay` into `base`, recording which layer set each leaf.
///
/// Tables merge per key; scalars and arrays from the overlay replace the base.
pub fn deep_merge_tracking(
    base: &mut toml::Value,
    overlay: &toml::Value,
    prefix: &str,
    layer: ConfigLayer,
    sources: &mut FieldSources,
) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let path = join_path(prefix, key);
                if let Some(base_val) = base_table.get_mut(key) {
                    if overlay_val.is_table() {
                        deep_merge_tracking(base_val, overlay_val, &path, layer, sources);
                    } else {
                        *base_val = overlay_val.clone();
                        sources.insert(path, layer);
                    }
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                    record_leaves(overlay_val, &path, layer, sources);
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
            sources.insert(prefix.to_owned(), layer);
        },
    }
}

/// Record every leaf of `val` as set by `layer`.
pub fn record_leaves(val: &toml::Value, prefix: &str, layer: ConfigLayer, sources: &mut FieldSources) {
    if let toml::Value::Table(table) = val {
        for (key, child) in table {
            record_leaves(child, &join_path(prefix, key), layer, sources);
        }
    } else {
        sources.insert(prefix.to_owned(), layer);
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Enforce that the workspace layer can only tighten approval.
///
/// `baseline` is the merged tree before the workspace layer was applied, so
/// enforcement works even when no user config exists.
pub fn enforce_restrictions(
    merged: &mut toml::Value,
    baseline: &toml::Value,
    workspace_layer: &toml::Value,
) {
    enforce_mode_tighten(merged, baseline, workspace_layer, &["approval", "mode"]);

    // The deny list is a union: a workspace may add entries, never remove.
    union_string_arrays(
        merged,
        baseline,
        workspace_layer,
        &["approval", "excluded_tools"],
    );

    // The allow list cannot grow beyond what the user already trusts.
    block_expansion(
        merged,
        baseline,
        workspace_layer,
        &["approval", "allowed_tools"],
    );

    // Storage locations belong to the user, not the project.
    block_override(merged, baseline, workspace_layer, &["sessions", "storage_root"]);
    block_override(merged, baseline, workspace_layer, &["checkpoints", "store_dir"]);
}

/// Canonical spelling of an approval mode, accepting the legacy aliases.
pub(crate) fn normalize_mode(raw: &str) -> &str {
    match raw {
        "auto_edit" | "autoEdit" => "auto-edit",
        other => other,
    }
}

fn enforce_mode_tighten(
    merged: &mut toml::Value,
    baseline: &toml::Value,
    workspace: &toml::Value,
    path: &[&str],
) {
    let base = get_nested(baseline, path)
        .and_then(toml::Value::as_str)
        .map(normalize_mode);
    let ws = get_nested(workspace, path)
        .and_then(toml::Value::as_str)
        .map(normalize_mode);

    let (Some(base), Some(ws)) = (base, ws) else {
        return;
    };
    let base_idx = MODE_ORDER.iter().position(|m| *m == base);
    let ws_idx = MODE_ORDER.iter().position(|m| *m == ws);

    if let (Some(b), Some(w)) = (base_idx, ws_idx)
        && w > b
    {
        warn!(
            field = %path.join("."),
            from = base,
            to = ws,
            "Workspace config tried to loosen approval mode; reverting"
        );
        let base = base.to_owned();
        set_nested(merged, path, toml::Value::String(base));
    }
}

fn union_string_arrays(
    merged: &mut toml::Value,
    baseline: &toml::Value,
    workspace: &toml::Value,
    path: &[&str],
) {
    let Some(baseline_items) = get_nested(baseline, path).and_then(toml::Value::as_array) else {
        return;
    };
    if get_nested(workspace, path).is_none() {
        return;
    }

    let mut result = get_nested(merged, path)
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default();
    for item in baseline_items {
        if !result.contains(item) {
            warn!(
                field = %path.join("."),
                entry = %item,
                "Workspace config removed a deny entry; restoring it"
            );
            result.push(item.clone());
        }
    }
    set_nested(merged, path, toml::Value::Array(result));
}

fn block_expansion(
    merged: &mut toml::Value,
    baseline: &toml::Value,
    workspace: &toml::Value,
    path: &[&str],
) {
    let Some(ws_items) = get_nested(workspace, path).and_then(toml::Value::as_array) else {
        return;
    };
    let baseline_items = get_nested(baseline, path)
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default();

    let kept: Vec<toml::Value> = ws_items
        .iter()
        .filter(|item| {
            let allowed = baseline_items.contains(item);
            if !allowed {
                warn!(
                    field = %path.join("."),
                    entry = %item,
                    "Workspace config tried to add an allow entry; dropping it"
                );
            }
            allowed
        })
        .cloned()
        .collect();
    set_nested(merged, path, toml::Value::Array(kept));
}

fn block_override(
    merged: &mut toml::Value,
    baseline: &toml::Value,
    workspace: &toml::Value,
    path: &[&str],
) {
    if get_nested(workspace, path).is_none() {
        return;
    }
    warn!(
        field = %path.join("."),
        "Workspace config cannot set this field; reverting"
    );
    match get_nested(baseline, path) {
        Some(original) => {
            let original = original.clone();
            set_nested(merged, path, original);
        },
        None => remove_nested(merged, path),
    }
}

/// Navigate into a nested value by path segments.
pub(crate) fn get_nested<'a>(val: &'a toml::Value, path: &[&str]) -> Option<&'a toml::Value> {
    let mut current = val;
    for segment in path {
        current = current.as_table()?.get(*segment)?;
    }
    Some(current)
}

/// Set a value at a nested path, creating intermediate tables as needed.
pub(crate) fn set_nested(val: &mut toml::Value, path: &[&str], new_val: toml::Value) {
    let Some((leaf, parents)) = path.split_last() else {
        return;
    };
    let mut current = val;
    for segment in parents {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        current = table
            .entry((*segment).to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
    if let Some(table) = current.as_table_mut() {
        table.insert((*leaf).to_owned(), new_val);
    }
}

fn remove_nested(val: &mut toml::Value, path: &[&str]) {
    let Some((leaf, parents)) = path.split_last() else {
        return;
    };
    let mut current = val;
    for segment in parents {
        let Some(next) = current.as_table_mut().and_then(|t| t.get_mut(*segment)) else {
            return;
        };
        current = next;
    }
    if let Some(table) = current.as_table_mut() {
        table.remove(*leaf);
    }
}
