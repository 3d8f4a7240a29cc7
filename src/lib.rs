//! Client SDK for cloud-hosted agent sandboxes.
//!
//! Two client families share one shape:
//!
//! - [`CodeInterpreterClient`] runs code, shell commands and file operations
//!   in a remote sandbox. Its operations always resolve to a [`ToolOutput`].
//! - [`BrowserClient`] drives a remote browser. Its operations return typed
//!   values and propagate errors.
//!
//! Each client owns at most one remote session at a time and provisions one
//! transparently on first use.
//!
//! ```no_run
//! use agent_sandbox::{CodeInterpreterClient, Config, ExecuteCodeParams};
//!
//! # async fn demo() -> agent_sandbox::Result<()> {
//! let client = CodeInterpreterClient::new(&Config::for_region("us-west-2"))?;
//! let output = client.execute_code(ExecuteCodeParams::new("print(1 + 1)")).await;
//! println!("{output}");
//! client.stop_session().await?;
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod code_interpreter;
pub mod config;
pub mod error;
pub mod normalize;
pub mod session;
pub mod signing;
pub mod transport;

pub use browser::BrowserClient;
pub use code_interpreter::{CodeInterpreterClient, ExecuteCodeParams, FileContent, Language};
pub use config::Config;
pub use error::{Result, SandboxError};
pub use normalize::ToolOutput;
pub use session::{Session, StartSessionParams};
