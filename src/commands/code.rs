//! Code-interpreter commands: `exec`, `run`, `ls` and `cat`.

use anyhow::{Context, Result};

use agent_sandbox::{
    CodeInterpreterClient, Config, ExecuteCodeParams, Language, StartSessionParams, ToolOutput,
};

use super::format::{format_session_started, format_tool_output};
use super::with_cleanup;

/// One code-interpreter operation requested on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CodeOperation {
    Exec { code: String, language: Language },
    Run { command: String },
    List { path: Option<String> },
    Cat { paths: Vec<String> },
}

impl CodeOperation {
    /// Builds a `run` operation from an argv, quoting each word as needed.
    pub(crate) fn run(argv: &[String]) -> Self {
        Self::Run {
            command: shell_words::join(argv),
        }
    }

    async fn apply(&self, client: &CodeInterpreterClient) -> ToolOutput {
        match self {
            Self::Exec { code, language } => {
                client
                    .execute_code(ExecuteCodeParams::new(code.clone()).language(*language))
                    .await
            }
            Self::Run { command } => client.execute_command(command).await,
            Self::List { path } => client.list_files(path.as_deref()).await,
            Self::Cat { paths } => client.read_files(paths).await,
        }
    }
}

/// Runs one operation in a fresh session and stops it afterwards.
///
/// Fails when the operation reports an error, after printing it.
pub(crate) async fn run(config: &Config, operation: CodeOperation) -> Result<()> {
    let client = CodeInterpreterClient::new(config).context("Failed to create client")?;

    let work = async {
        let session = client
            .start_session(StartSessionParams::default().description("agent-sandbox CLI"))
            .await
            .context("Failed to start code-interpreter session")?;
        eprintln!("{}", format_session_started("code-interpreter", &session));

        let output = operation.apply(&client).await;
        print!("{}", format_tool_output(&output));
        if output.is_error {
            anyhow::bail!("Operation failed");
        }
        Ok::<(), anyhow::Error>(())
    };
    with_cleanup(work, client.stop_session()).await
}
