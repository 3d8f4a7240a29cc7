//! CLI command implementations.
//!
//! Each submodule runs one subcommand on top of the SDK. Output is built by
//! pure formatting functions in [`format`] so it can be tested without a
//! sandbox.

pub mod browse;
pub mod code;
pub mod format;
pub mod init;
pub mod sessions;

use anyhow::{Context, Result};
use std::future::Future;
use tracing::warn;

use agent_sandbox::Config;

/// Loads `agent-sandbox.toml` from the working directory, applying a
/// `--region` override.
pub(crate) fn load_config(region: Option<&str>) -> Result<Config> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let mut config = Config::load(&cwd).context("Failed to load configuration")?;
    if let Some(region) = region {
        config.region = region.to_string();
    }
    Ok(config)
}

/// Runs `work`, then `stop`, whatever `work` returned.
///
/// A stop failure is reported only when the work itself succeeded.
pub(crate) async fn with_cleanup<T, W, S>(work: W, stop: S) -> Result<T>
where
    W: Future<Output = Result<T>>,
    S: Future<Output = agent_sandbox::Result<Option<agent_sandbox::Session>>>,
{
    let result = work.await;
    match (result, stop.await) {
        (Ok(value), Ok(_)) => Ok(value),
        (Ok(_), Err(err)) => Err(err).context("Failed to stop session"),
        (Err(err), stopped) => {
            if let Err(stop_err) = stopped {
                warn!(error = %stop_err, "Failed to stop session");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_sandbox::SandboxError;

    #[tokio::test]
    async fn test_with_cleanup_runs_stop_after_success() {
        let result = with_cleanup(async { Ok::<_, anyhow::Error>(5) }, async {
            Ok::<_, SandboxError>(None)
        })
        .await;
        assert_eq!(result.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_with_cleanup_reports_stop_failure() {
        let result = with_cleanup(async { Ok::<_, anyhow::Error>(()) }, async {
            Err::<Option<agent_sandbox::Session>, _>(SandboxError::transport("gone"))
        })
        .await;
        assert!(format!("{:#}", result.unwrap_err()).contains("Failed to stop session"));
    }

    #[tokio::test]
    async fn test_with_cleanup_keeps_work_error() {
        let work = async { Err::<(), _>(anyhow::anyhow!("work failed")) };
        let result = with_cleanup(work, async {
            Err::<Option<agent_sandbox::Session>, _>(SandboxError::transport("gone"))
        })
        .await;
        assert_eq!(result.unwrap_err().to_string(), "work failed");
    }
}
