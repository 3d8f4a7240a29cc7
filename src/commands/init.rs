//! Write a default `agent-sandbox.toml` into the working directory.
//!
//! The decision logic takes closures for filesystem access so it can be
//! tested without touching disk.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use std::path::Path;
use tracing::info;

use agent_sandbox::config::CONFIG_FILE;

use crate::templates;

/// What happened to the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitOutcome {
    Created,
    Overwritten,
    Skipped,
}

/// Runs the init command.
pub(crate) fn run(force: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let path = cwd.join(CONFIG_FILE);
    info!("Initializing {}", path.display());

    let outcome = write_config(
        force,
        path.exists(),
        |content| {
            fs::write(&path, content)
                .with_context(|| format!("Failed to write {}", path.display()))
        },
    )?;

    print!("{}", format_outcome(outcome, Path::new(CONFIG_FILE)));
    Ok(())
}

/// Writes the template unless the file exists and `force` is off.
fn write_config<W>(force: bool, exists: bool, write: W) -> Result<InitOutcome>
where
    W: FnOnce(&str) -> Result<()>,
{
    if exists && !force {
        return Ok(InitOutcome::Skipped);
    }
    write(templates::CONFIG_TOML)?;
    Ok(if exists {
        InitOutcome::Overwritten
    } else {
        InitOutcome::Created
    })
}

fn format_outcome(outcome: InitOutcome, path: &Path) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    let shown = path.display().to_string();

    match outcome {
        InitOutcome::Created => {
            writeln!(&mut out, "{} Created {}", "✓".green().bold(), shown.cyan()).unwrap();
        }
        InitOutcome::Overwritten => {
            writeln!(&mut out, "{} {} (overwritten)", "↻".blue(), shown.cyan()).unwrap();
        }
        InitOutcome::Skipped => {
            writeln!(
                &mut out,
                "{} {} (already exists, use --force to overwrite)",
                "⊘".yellow(),
                shown
            )
            .unwrap();
            return out;
        }
    }

    writeln!(&mut out, "\n{}", "Next steps:".yellow().bold()).unwrap();
    writeln!(
        &mut out,
        "  1. Set {} and the {} section",
        "region".cyan(),
        "[credentials]".cyan()
    )
    .unwrap();
    writeln!(
        &mut out,
        "  2. Run {} to try the code interpreter",
        "agent-sandbox exec 'print(1 + 1)'".green()
    )
    .unwrap();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_sandbox::Config;
    use std::cell::RefCell;

    #[test]
    fn test_template_parses_to_defaults() {
        let config = Config::parse(templates::CONFIG_TOML).unwrap();
        let defaults = Config::default();
        assert_eq!(config.region, defaults.region);
        assert_eq!(config.credentials, defaults.credentials);
        assert_eq!(config.code_interpreter.identifier, defaults.code_interpreter.identifier);
        assert_eq!(config.browser.navigation_timeout_ms, 30_000);
        assert!(config.browser.viewport.is_none());
    }

    #[test]
    fn test_write_config_creates_when_missing() {
        let written = RefCell::new(None);
        let outcome = write_config(false, false, |content| {
            *written.borrow_mut() = Some(content.to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(outcome, InitOutcome::Created);
        assert_eq!(written.borrow().as_deref(), Some(templates::CONFIG_TOML));
    }

    #[test]
    fn test_write_config_skips_existing_without_force() {
        let outcome = write_config(false, true, |_| panic!("must not write")).unwrap();
        assert_eq!(outcome, InitOutcome::Skipped);
    }

    #[test]
    fn test_write_config_overwrites_with_force() {
        let outcome = write_config(true, true, |_| Ok(())).unwrap();
        assert_eq!(outcome, InitOutcome::Overwritten);
    }

    #[test]
    fn test_write_failure_propagates() {
        let err = write_config(false, false, |_| anyhow::bail!("disk full")).unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_format_outcome() {
        let path = Path::new(CONFIG_FILE);
        assert!(format_outcome(InitOutcome::Created, path).contains("Next steps"));
        assert!(format_outcome(InitOutcome::Overwritten, path).contains("overwritten"));
        let skipped = format_outcome(InitOutcome::Skipped, path);
        assert!(skipped.contains("--force"));
        assert!(!skipped.contains("Next steps"));
    }
}
