//! Bridge from `keel_config::Config` to the telemetry types.

use keel_config::Config;
use keel_telemetry::{LogConfig, LogFormat};

/// Convert the `[logging]` section to a [`LogConfig`].
///
/// Unknown formats fall back to compact.
pub(crate) fn to_log_config(cfg: &Config) -> LogConfig {
    let format = match cfg.logging.format.as_str() {
        "pretty" => LogFormat::Pretty,
        "json" => LogFormat::Json,
        _ => LogFormat::Compact,
    };

    let mut log_config = LogConfig::new(&cfg.logging.level).with_format(format);
    for directive in &cfg.logging.directives {
        log_config = log_config.with_directive(directive);
    }
    if let Some(directory) = &cfg.logging.directory {
        log_config = log_config.with_file_logging(directory);
    }
    log_config
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_telemetry::LogTarget;

    #[test]
    fn test_log_config_from_section() {
        let mut cfg = Config::default();
        cfg.logging.level = "debug".into();
        cfg.logging.format = "json".into();
        cfg.logging.directives = vec!["keel::telemetry=info".into()];
        cfg.logging.directory = Some("/var/log/keel".into());

        let lc = to_log_config(&cfg);
        assert_eq!(lc.level, "debug");
        assert_eq!(lc.format, LogFormat::Json);
        assert_eq!(lc.directives, vec!["keel::telemetry=info".to_string()]);
        assert_eq!(lc.target, LogTarget::File("/var/log/keel".into()));
        assert!(!lc.ansi);
    }

    #[test]
    fn test_unknown_format_is_compact() {
        let mut cfg = Config::default();
        cfg.logging.format = "fancy".into();
        assert_eq!(to_log_config(&cfg).format, LogFormat::Compact);
    }
}
