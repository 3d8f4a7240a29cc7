//! `browse`: open a page in a remote browser and extract from it.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use agent_sandbox::browser::{NavigateParams, ScreenshotParams, WaitUntil};
use agent_sandbox::{BrowserClient, Config, StartSessionParams};

use super::format::{format_screenshot_saved, format_session_started};
use super::with_cleanup;

/// What to collect after navigating.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BrowseRequest {
    pub url: String,
    pub wait_until: WaitUntil,
    pub text_selector: Option<String>,
    pub html: bool,
    pub screenshot: Option<PathBuf>,
    pub full_page: bool,
}

/// Collected page data, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BrowseResult {
    pub text: Option<String>,
    pub html: Option<String>,
    pub screenshot: Option<Vec<u8>>,
}

/// Navigates and collects everything `request` asks for.
pub(crate) async fn collect(client: &BrowserClient, request: &BrowseRequest) -> Result<BrowseResult> {
    client
        .navigate(NavigateParams::new(&request.url).wait_until(request.wait_until))
        .await
        .with_context(|| format!("Failed to open {}", request.url))?;

    let mut result = BrowseResult::default();
    if let Some(selector) = &request.text_selector {
        result.text = Some(client.get_text(selector).await?);
    }
    if request.html {
        result.html = Some(client.get_html(None).await?);
    }
    if request.screenshot.is_some() {
        let shot = client
            .screenshot(ScreenshotParams::default().full_page(request.full_page))
            .await?;
        result.screenshot = Some(shot.into_bytes()?);
    }
    Ok(result)
}

/// Runs the browse command in a fresh session.
pub(crate) async fn run(config: &Config, request: BrowseRequest) -> Result<()> {
    let client = BrowserClient::new(config).context("Failed to create client")?;

    let work = async {
        let session = client
            .start_session(StartSessionParams::default().description("agent-sandbox CLI"))
            .await
            .context("Failed to start browser session")?;
        eprintln!("{}", format_session_started("browser", &session));

        let result = collect(&client, &request).await?;
        eprintln!("{} Loaded {}", "✓".green().bold(), request.url.cyan());
        if let Some(text) = &result.text {
            println!("{text}");
        }
        if let Some(html) = &result.html {
            println!("{html}");
        }
        if let (Some(bytes), Some(path)) = (&result.screenshot, &request.screenshot) {
            tokio::fs::write(path, bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "{}",
                format_screenshot_saved(&path.display().to_string(), bytes.len())
            );
        }
        Ok::<(), anyhow::Error>(())
    };
    with_cleanup(work, client.stop_session()).await
}
