use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use agent_sandbox::browser::WaitUntil;
use agent_sandbox::transport::SessionStatus;
use agent_sandbox::Language;

mod commands;
mod templates;

use commands::browse::BrowseRequest;
use commands::code::CodeOperation;

#[derive(Parser)]
#[command(name = "agent-sandbox")]
#[command(
    author,
    version,
    about = "Run code and drive browsers in cloud-hosted agent sandboxes"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Region override (also read from AGENT_SANDBOX_REGION)
    #[arg(long, global = true, env = "AGENT_SANDBOX_REGION")]
    region: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default agent-sandbox.toml in the current directory
    Init {
        /// Force overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Execute a code snippet in a code-interpreter session
    Exec {
        /// Code to run
        code: String,

        /// Language: python, javascript or typescript
        #[arg(short, long, default_value = "python")]
        language: Language,
    },

    /// Run a shell command in a code-interpreter session
    Run {
        /// Command and its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        argv: Vec<String>,
    },

    /// List files in a code-interpreter session
    Ls {
        /// Directory to list (the session's working directory by default)
        path: Option<String>,
    },

    /// Print files from a code-interpreter session
    Cat {
        /// Files to read
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Open a URL in a browser session
    Browse {
        /// Page to open
        url: String,

        /// Print the text of the first element matching this selector
        #[arg(long, value_name = "SELECTOR")]
        text: Option<String>,

        /// Print the page HTML
        #[arg(long)]
        html: bool,

        /// Save a PNG screenshot to this file
        #[arg(long, value_name = "FILE")]
        screenshot: Option<PathBuf>,

        /// Capture the full scrollable page
        #[arg(long, requires = "screenshot")]
        full_page: bool,

        /// Milestone to wait for: commit, domcontentloaded, load, networkidle
        #[arg(long, default_value = "domcontentloaded")]
        wait_until: WaitUntil,
    },

    /// List browser sessions
    Sessions {
        /// Only show sessions with this status: ready, terminating, terminated
        #[arg(long)]
        status: Option<SessionStatus>,
    },
}

/// Installs the stderr subscriber and, when asked, a plain-text layer
/// appending to `log_file`.
fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("agent_sandbox=debug")
    } else {
        EnvFilter::new("agent_sandbox=info")
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_deref())?;
    let region = cli.region.as_deref();

    match cli.command {
        Commands::Init { force } => {
            commands::init::run(force)?;
        }
        Commands::Exec { code, language } => {
            let config = commands::load_config(region)?;
            commands::code::run(&config, CodeOperation::Exec { code, language }).await?;
        }
        Commands::Run { argv } => {
            let config = commands::load_config(region)?;
            commands::code::run(&config, CodeOperation::run(&argv)).await?;
        }
        Commands::Ls { path } => {
            let config = commands::load_config(region)?;
            commands::code::run(&config, CodeOperation::List { path }).await?;
        }
        Commands::Cat { paths } => {
            let config = commands::load_config(region)?;
            commands::code::run(&config, CodeOperation::Cat { paths }).await?;
        }
        Commands::Browse {
            url,
            text,
            html,
            screenshot,
            full_page,
            wait_until,
        } => {
            let config = commands::load_config(region)?;
            let request = BrowseRequest {
                url,
                wait_until,
                text_selector: text,
                html,
                screenshot,
                full_page,
            };
            commands::browse::run(&config, request).await?;
        }
        Commands::Sessions { status } => {
            let config = commands::load_config(region)?;
            commands::sessions::run(&config, status).await?;
        }
    }

    Ok(())
}
