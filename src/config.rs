//! Client configuration.
//!
//! Loaded from `agent-sandbox.toml` in the working directory when present,
//! otherwise built from defaults. A client takes its configuration by value
//! at construction and never mutates it.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SandboxError};
use crate::signing::Credentials;

/// Name of the configuration file looked up in the project directory.
pub const CONFIG_FILE: &str = "agent-sandbox.toml";

/// Well-known code interpreter sandbox type.
pub const DEFAULT_CODE_INTERPRETER_ID: &str = "aws.codeinterpreter.v1";

/// Well-known browser sandbox type.
pub const DEFAULT_BROWSER_ID: &str = "aws.browser.v1";

/// Default remote session lifetime (one hour).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Region the sandbox service is called in
    #[serde(default = "default_region")]
    pub region: String,

    /// Override for the service endpoint (e.g. a VPC endpoint)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// How credentials are resolved
    #[serde(default)]
    pub credentials: CredentialSource,

    /// Code interpreter configuration
    #[serde(default)]
    pub code_interpreter: CodeInterpreterConfig,

    /// Browser configuration
    #[serde(default)]
    pub browser: BrowserConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            credentials: CredentialSource::default(),
            code_interpreter: CodeInterpreterConfig::default(),
            browser: BrowserConfig::default(),
        }
    }
}

/// Credential resolution strategy
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum CredentialSource {
    /// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`
    #[default]
    Environment,
    /// A named profile in `~/.aws/credentials`
    Profile {
        #[serde(default = "default_profile")]
        name: String,
    },
    /// Keys written directly into the config file
    Static {
        access_key_id: String,
        secret_access_key: String,
        #[serde(default)]
        session_token: Option<String>,
    },
}

impl CredentialSource {
    /// Resolve the strategy into concrete credentials.
    pub fn resolve(&self) -> Result<Credentials> {
        match self {
            Self::Environment => Credentials::from_env(),
            Self::Profile { name } => {
                let path = credentials_file()?;
                Credentials::from_profile_file(&path, name)
            }
            Self::Static {
                access_key_id,
                secret_access_key,
                session_token,
            } => Ok(Credentials::new(
                access_key_id.clone(),
                secret_access_key.clone(),
                session_token.clone(),
            )),
        }
    }
}

fn credentials_file() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("AWS_SHARED_CREDENTIALS_FILE") {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir()
        .ok_or_else(|| SandboxError::credentials("Could not determine home directory"))?;
    Ok(home.join(".aws").join("credentials"))
}

/// Code interpreter sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeInterpreterConfig {
    /// Sandbox type identifier
    #[serde(default = "default_code_interpreter_id")]
    pub identifier: String,

    /// Remote session lifetime in seconds
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
}

impl Default for CodeInterpreterConfig {
    fn default() -> Self {
        Self {
            identifier: default_code_interpreter_id(),
            session_timeout_secs: default_session_timeout(),
        }
    }
}

/// Browser sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Sandbox type identifier
    #[serde(default = "default_browser_id")]
    pub identifier: String,

    /// Remote session lifetime in seconds
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Default navigation timeout in milliseconds
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_ms: u64,

    /// Browser viewport requested at session start
    #[serde(default)]
    pub viewport: Option<Viewport>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            identifier: default_browser_id(),
            session_timeout_secs: default_session_timeout(),
            navigation_timeout_ms: default_navigation_timeout(),
            viewport: None,
        }
    }
}

/// Viewport dimensions in CSS pixels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

// Default value functions
fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_profile() -> String {
    "default".to_string()
}

fn default_code_interpreter_id() -> String {
    DEFAULT_CODE_INTERPRETER_ID.to_string()
}

fn default_browser_id() -> String {
    DEFAULT_BROWSER_ID.to_string()
}

fn default_session_timeout() -> u64 {
    DEFAULT_SESSION_TIMEOUT_SECS
}

fn default_navigation_timeout() -> u64 {
    30_000
}

impl Config {
    /// Configuration for a region with everything else defaulted.
    pub fn for_region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..Self::default()
        }
    }

    /// Load configuration from file, using defaults if not found.
    ///
    /// `AWS_REGION` overrides the file's region when set.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).map_err(|e| {
                SandboxError::config(format!(
                    "Failed to read config file {}: {e}",
                    config_path.display()
                ))
            })?;
            Self::parse(&content).map_err(|e| {
                SandboxError::config(format!("{}: {e}", config_path.display()))
            })?
        } else {
            Self::default()
        };

        if let Ok(region) = std::env::var("AWS_REGION") {
            if !region.trim().is_empty() {
                config.region = region;
            }
        }

        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SandboxError::config(e.to_string()))
    }

    /// Service endpoint for this configuration.
    pub fn endpoint_url(&self) -> Result<url::Url> {
        let raw = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://bedrock-agentcore.{}.amazonaws.com", self.region),
        };
        url::Url::parse(&raw).map_err(|e| SandboxError::config(format!("bad endpoint {raw}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.code_interpreter.identifier, "aws.codeinterpreter.v1");
        assert_eq!(config.browser.identifier, "aws.browser.v1");
        assert_eq!(config.code_interpreter.session_timeout_secs, 3600);
        assert_eq!(config.credentials, CredentialSource::Environment);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
region = "eu-central-1"

[credentials]
source = "static"
access_key_id = "AKID"
secret_access_key = "SECRET"

[code_interpreter]
identifier = "my-interpreter-abc"

[browser]
navigation_timeout_ms = 5000
viewport = { width = 1280, height = 720 }
"#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.region, "eu-central-1");
        assert_eq!(config.code_interpreter.identifier, "my-interpreter-abc");
        assert_eq!(config.code_interpreter.session_timeout_secs, 3600);
        assert_eq!(config.browser.identifier, "aws.browser.v1");
        assert_eq!(config.browser.navigation_timeout_ms, 5000);
        assert_eq!(
            config.browser.viewport,
            Some(Viewport {
                width: 1280,
                height: 720
            })
        );
        let creds = config.credentials.resolve().unwrap();
        assert_eq!(creds.access_key_id, "AKID");
        assert!(creds.session_token.is_none());
    }

    #[test]
    fn test_parse_profile_source() {
        let toml = r#"
[credentials]
source = "profile"
"#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(
            config.credentials,
            CredentialSource::Profile {
                name: "default".to_string()
            }
        );
    }

    #[test]
    fn test_parse_invalid_config() {
        let err = Config::parse("region = [").unwrap_err();
        assert!(matches!(err, SandboxError::Config { .. }));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.browser.navigation_timeout_ms, 30_000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "endpoint = \"http://localhost:9000\"\n",
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn test_endpoint_url() {
        let config = Config::for_region("us-east-1");
        assert_eq!(
            config.endpoint_url().unwrap().as_str(),
            "https://bedrock-agentcore.us-east-1.amazonaws.com/"
        );

        let custom = Config {
            endpoint: Some("http://127.0.0.1:8080".to_string()),
            ..Config::default()
        };
        assert_eq!(custom.endpoint_url().unwrap().port(), Some(8080));
    }
}
