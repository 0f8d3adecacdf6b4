//! Config command - show the resolved configuration.

use anyhow::{Result, bail};

use crate::CliContext;

/// Print the resolved configuration in `format` (`toml` or `json`).
pub(crate) fn show_config(ctx: &CliContext, format: &str) -> Result<()> {
    let rendered = match format {
        "toml" => ctx.resolved.show_toml()?,
        "json" => ctx.resolved.show_json()?,
        other => bail!("unknown format '{other}' (expected toml or json)"),
    };
    println!("{rendered}");
    Ok(())
}
