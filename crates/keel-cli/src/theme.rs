//! CLI theme and styling.

use colored::Colorize;

/// CLI theme configuration.
pub(crate) struct Theme;

impl Theme {
    /// Format a header.
    pub(crate) fn header(text: &str) -> String {
        format!("{}", text.bold().cyan())
    }

    /// Format a success message.
    pub(crate) fn success(text: &str) -> String {
        format!("{} {}", "✓".green(), text)
    }

    /// Format a warning message.
    pub(crate) fn warning(text: &str) -> String {
        format!("{} {}", "!".yellow(), text.yellow())
    }

    /// Format an info message.
    pub(crate) fn info(text: &str) -> String {
        format!("{} {}", "i".blue(), text)
    }

    /// Format a separator line.
    pub(crate) fn separator() -> String {
        "━".repeat(60).dimmed().to_string()
    }

    /// Colour a terminal call state label.
    pub(crate) fn state(label: &str) -> String {
        match label {
            "succeeded" => label.green().to_string(),
            "failed" | "denied" => label.red().to_string(),
            "cancelled" => label.yellow().to_string(),
            other => other.to_string(),
        }
    }

    /// Format a session or checkpoint id.
    pub(crate) fn id(text: &str) -> String {
        text.cyan().to_string()
    }
}
