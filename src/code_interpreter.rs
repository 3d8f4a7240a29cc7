//! Remote code execution client.
//!
//! Every operation here resolves to a [`ToolOutput`] and never returns an
//! error: session provisioning failures, transport failures and broken
//! response streams are all rendered as `"Error: <message>"` with
//! `is_error` set.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{CodeInterpreterConfig, Config};
use crate::error::{Result, SandboxError};
use crate::normalize::{collect_stream, ToolOutput};
use crate::session::{ResolvedStart, Session, SessionManager, StartSessionParams};
use crate::transport::{
    HttpTransport, InvokeRequest, SandboxKind, SandboxTransport, SessionInfo, StartSessionRequest,
};

/// Language run by `executeCode`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Python,
    Javascript,
    Typescript,
}

impl Language {
    /// Wire name of the language.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Typescript => "typescript",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "python" | "py" => Ok(Self::Python),
            "javascript" | "js" => Ok(Self::Javascript),
            "typescript" | "ts" => Ok(Self::Typescript),
            _ => Err(SandboxError::config(format!(
                "Unknown language: '{s}'. Supported: python, javascript, typescript"
            ))),
        }
    }
}

/// Arguments of [`CodeInterpreterClient::execute_code`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteCodeParams {
    pub code: String,
    /// Defaults to Python.
    pub language: Option<Language>,
    /// Reset interpreter state before running.
    pub clear_context: Option<bool>,
}

impl ExecuteCodeParams {
    /// Runs `code` with the default language.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    /// Sets the language.
    #[must_use]
    pub fn language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    /// Sets the clear-context flag.
    #[must_use]
    pub fn clear_context(mut self, clear: bool) -> Self {
        self.clear_context = Some(clear);
        self
    }

    fn arguments(&self) -> Value {
        let mut args = json!({
            "code": self.code,
            "language": self.language.unwrap_or_default(),
        });
        if let Some(clear) = self.clear_context {
            args["clearContext"] = Value::Bool(clear);
        }
        args
    }
}

/// One file written by [`CodeInterpreterClient::write_files`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileContent {
    pub path: String,
    pub text: String,
}

impl FileContent {
    /// A file at `path` holding `text`.
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }
}

/// Client for a remote code-interpreter sandbox.
///
/// Holds at most one session at a time; operations provision one with
/// default parameters when none is active.
pub struct CodeInterpreterClient {
    config: CodeInterpreterConfig,
    transport: Arc<dyn SandboxTransport>,
    sessions: SessionManager,
}

impl std::fmt::Debug for CodeInterpreterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeInterpreterClient")
            .field("identifier", &self.config.identifier)
            .finish_non_exhaustive()
    }
}

impl CodeInterpreterClient {
    /// Builds a client talking to the real service.
    pub fn new(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Builds a client over any transport.
    pub fn with_transport(config: &Config, transport: Arc<dyn SandboxTransport>) -> Self {
        let config = config.code_interpreter.clone();
        let sessions = SessionManager::new(config.session_timeout_secs);
        Self {
            config,
            transport,
            sessions,
        }
    }

    /// Starts a session; fails if one is already active.
    pub async fn start_session(&self, params: StartSessionParams) -> Result<Session> {
        self.sessions
            .start(params, |start| self.create_session(start))
            .await
    }

    /// Stops the active session, if any.
    pub async fn stop_session(&self) -> Result<Option<Session>> {
        self.sessions
            .stop(|session| async move {
                self.transport
                    .stop_session(
                        SandboxKind::CodeInterpreter,
                        &self.config.identifier,
                        &session.session_id,
                    )
                    .await
            })
            .await
    }

    /// The active session, if any.
    pub async fn session(&self) -> Option<Session> {
        self.sessions.current().await
    }

    /// Runs a code snippet.
    pub async fn execute_code(&self, params: ExecuteCodeParams) -> ToolOutput {
        self.invoke_tool("executeCode", params.arguments()).await
    }

    /// Runs a shell command.
    pub async fn execute_command(&self, command: &str) -> ToolOutput {
        self.invoke_tool("executeCommand", json!({ "command": command }))
            .await
    }

    /// Reads files by path.
    pub async fn read_files(&self, paths: &[String]) -> ToolOutput {
        self.invoke_tool("readFiles", json!({ "paths": paths })).await
    }

    /// Writes files, creating or replacing them.
    pub async fn write_files(&self, files: &[FileContent]) -> ToolOutput {
        self.invoke_tool("writeFiles", json!({ "content": files }))
            .await
    }

    /// Lists a directory; `None` lists the sandbox working directory.
    pub async fn list_files(&self, path: Option<&str>) -> ToolOutput {
        self.invoke_tool("listFiles", json!({ "directoryPath": path.unwrap_or("") }))
            .await
    }

    /// Removes files by path.
    pub async fn remove_files(&self, paths: &[String]) -> ToolOutput {
        self.invoke_tool("removeFiles", json!({ "paths": paths }))
            .await
    }

    async fn create_session(&self, start: ResolvedStart) -> Result<SessionInfo> {
        let request = StartSessionRequest {
            kind: SandboxKind::CodeInterpreter,
            identifier: self.config.identifier.clone(),
            name: start.name,
            timeout_seconds: start.timeout_seconds,
            viewport: None,
        };
        self.transport.start_session(&request).await
    }

    async fn invoke_tool(&self, name: &str, arguments: Value) -> ToolOutput {
        match self.try_invoke(name, arguments).await {
            Ok(output) => output,
            Err(err) => {
                warn!(operation = name, error = %err, "Operation failed");
                ToolOutput::from_error(&err)
            }
        }
    }

    async fn try_invoke(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        let session = self
            .sessions
            .ensure(|start| self.create_session(start))
            .await?;
        debug!(operation = name, session_id = %session.session_id, "Invoking");
        let request = InvokeRequest {
            identifier: self.config.identifier.clone(),
            session_id: session.session_id,
            name: name.to_string(),
            arguments,
        };
        let stream = self.transport.invoke(&request).await?;
        collect_stream(stream).await
    }
}
