//! Source-annotated display for `keel config show`.

use std::fmt::Write as _;

use crate::merge::FieldSources;
use crate::types::Config;

/// A resolved configuration together with source annotations.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The final merged configuration.
    pub config: Config,
    /// Dotted field path to the layer that set it.
    pub field_sources: FieldSources,
    /// Config files that were loaded, in precedence order.
    pub loaded_files: Vec<String>,
}

impl ResolvedConfig {
    /// Render the configuration as TOML, annotating each key with its layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized.
    pub fn show_toml(&self) -> Result<String, toml::ser::Error> {
        let body = toml::to_string_pretty(&self.config)?;

        let mut output = String::from("# Resolved Keel configuration\n");
        for (i, path) in self.loaded_files.iter().enumerate() {
            let _ = writeln!(output, "#   {}. {path}", i.saturating_add(1));
        }
        output.push('\n');

        let mut section = String::new();
        for line in body.lines() {
            let trimmed = line.trim();
            if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                section = name.to_owned();
                output.push_str(line);
                output.push('\n');
                continue;
            }
            let annotation = trimmed
                .split_once('=')
                .map(|(key, _)| format!("{section}.{}", key.trim()))
                .and_then(|path| self.field_sources.get(&path));
            match annotation {
                Some(layer) => {
                    let _ = writeln!(output, "{line}  # [{layer}]");
                },
                None => {
                    output.push_str(line);
                    output.push('\n');
                },
            }
        }

        Ok(output)
    }

    /// Render the configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized.
    pub fn show_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::ConfigLayer;

    #[test]
    fn test_show_toml_annotates_sources() {
        let mut field_sources = FieldSources::new();
        field_sources.insert("approval.mode".to_owned(), ConfigLayer::Workspace);
        let resolved = ResolvedConfig {
            config: Config::default(),
            field_sources,
            loaded_files: vec!["/ws/.keel/config.toml".to_owned()],
        };

        let out = resolved.show_toml().unwrap();
        assert!(out.contains("mode = \"default\"  # [workspace]"));
        assert!(out.contains("1. /ws/.keel/config.toml"));
    }
}
