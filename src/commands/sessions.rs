//! `sessions`: list browser sessions known to the service.

use anyhow::{Context, Result};

use agent_sandbox::transport::SessionStatus;
use agent_sandbox::{BrowserClient, Config};

use super::format::format_sessions;

/// Prints browser sessions, optionally filtered by status.
pub(crate) async fn run(config: &Config, status: Option<SessionStatus>) -> Result<()> {
    let client = BrowserClient::new(config).context("Failed to create client")?;
    let sessions = client
        .list_sessions(status)
        .await
        .context("Failed to list browser sessions")?;
    print!("{}", format_sessions(&sessions));
    Ok(())
}
