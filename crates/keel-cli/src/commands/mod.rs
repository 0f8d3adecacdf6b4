//! Subcommand implementations.

pub(crate) mod checkpoints;
pub(crate) mod config;
pub(crate) mod sessions;
