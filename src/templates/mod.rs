//! Embedded templates for project files.

/// Default `agent-sandbox.toml` configuration.
pub(crate) const CONFIG_TOML: &str = include_str!("agent-sandbox.toml");
