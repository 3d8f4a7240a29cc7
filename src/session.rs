//! Session lifecycle shared by both client families.
//!
//! Each client owns exactly one [`SessionManager`], a single slot that is
//! either idle or holds the live [`Session`]. The slot is guarded by an
//! async mutex that stays locked across the remote create/stop call, so
//! concurrent `start`/`ensure` calls on one client serialize instead of
//! both provisioning a sandbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, SandboxError};
use crate::transport::SessionInfo;

/// Name used when the caller does not supply one.
pub const DEFAULT_SESSION_NAME: &str = "default";

/// One provisioned remote sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
}

/// Optional parameters for starting a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartSessionParams {
    pub name: Option<String>,
    pub description: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl StartSessionParams {
    /// Sets the session name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets a free-form description kept with the local record.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the remote session lifetime.
    #[must_use]
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

/// What the remote create call is asked for, after defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStart {
    pub name: String,
    pub description: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Default)]
enum SessionSlot {
    #[default]
    Idle,
    Active(Session),
}

impl SessionSlot {
    fn session(&self) -> Option<&Session> {
        match self {
            Self::Idle => None,
            Self::Active(session) => Some(session),
        }
    }
}

/// Single-slot session state machine.
#[derive(Debug)]
pub(crate) struct SessionManager {
    slot: Mutex<SessionSlot>,
    default_timeout_secs: u64,
}

impl SessionManager {
    pub(crate) fn new(default_timeout_secs: u64) -> Self {
        Self {
            slot: Mutex::new(SessionSlot::Idle),
            default_timeout_secs,
        }
    }

    /// Snapshot of the live session, if any.
    pub(crate) async fn current(&self) -> Option<Session> {
        self.slot.lock().await.session().cloned()
    }

    fn resolve(&self, params: StartSessionParams) -> ResolvedStart {
        ResolvedStart {
            name: params
                .name
                .unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string()),
            description: params.description,
            timeout_seconds: params.timeout_seconds.unwrap_or(self.default_timeout_secs),
        }
    }

    /// Starts a session; fails with `AlreadyActive` if one is live.
    pub(crate) async fn start<F, Fut>(&self, params: StartSessionParams, create: F) -> Result<Session>
    where
        F: FnOnce(ResolvedStart) -> Fut,
        Fut: Future<Output = Result<SessionInfo>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(active) = slot.session() {
            return Err(SandboxError::already_active(&active.session_id));
        }
        let session = self.provision(params, create).await?;
        *slot = SessionSlot::Active(session.clone());
        Ok(session)
    }

    /// Returns the live session, starting one with defaults when idle.
    pub(crate) async fn ensure<F, Fut>(&self, create: F) -> Result<Session>
    where
        F: FnOnce(ResolvedStart) -> Fut,
        Fut: Future<Output = Result<SessionInfo>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(active) = slot.session() {
            return Ok(active.clone());
        }
        debug!("No active session, provisioning one");
        let session = self.provision(StartSessionParams::default(), create).await?;
        *slot = SessionSlot::Active(session.clone());
        Ok(session)
    }

    async fn provision<F, Fut>(&self, params: StartSessionParams, create: F) -> Result<Session>
    where
        F: FnOnce(ResolvedStart) -> Fut,
        Fut: Future<Output = Result<SessionInfo>>,
    {
        let resolved = self.resolve(params);
        let name = resolved.name.clone();
        let description = resolved.description.clone();
        let info = create(resolved).await?;
        info!(session_id = %info.session_id, name = %name, "Session started");
        Ok(Session {
            name,
            session_id: info.session_id,
            created_at: info.created_at,
            description,
        })
    }

    /// Stops the live session. Idle is a no-op that makes no remote call.
    ///
    /// If the stop call fails the session stays in the slot so the caller
    /// can retry.
    pub(crate) async fn stop<F, Fut>(&self, stop: F) -> Result<Option<Session>>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut slot = self.slot.lock().await;
        let SessionSlot::Active(session) = std::mem::take(&mut *slot) else {
            debug!("stop_session called with no active session");
            return Ok(None);
        };

        match stop(session.clone()).await {
            Ok(()) => {
                info!(session_id = %session.session_id, "Session stopped");
                Ok(Some(session))
            }
            Err(err) => {
                *slot = SessionSlot::Active(session);
                Err(err)
            }
        }
    }
}
