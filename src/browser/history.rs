//! Back/forward navigation with progressively weaker completion checks.
//!
//! Pages with persistent background traffic may never go network-idle, so
//! each traversal tries an ordered list of strategies and only moves to the
//! next one when the current one times out.

use std::time::Duration;
use tracing::debug;

use super::driver::AutomationDriver;
use super::types::{HistoryDirection, WaitUntil};
use crate::error::{Result, SandboxError};

/// One way of completing a history traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStrategy {
    /// Traverse and wait for a milestone.
    Wait(WaitUntil, Duration),
    /// Fire the traversal through `history.back()`/`history.forward()`.
    Direct,
}

/// Strategies tried in order.
pub const HISTORY_STRATEGIES: [HistoryStrategy; 3] = [
    HistoryStrategy::Wait(WaitUntil::NetworkIdle, Duration::from_secs(10)),
    HistoryStrategy::Wait(WaitUntil::Load, Duration::from_secs(5)),
    HistoryStrategy::Direct,
];

/// Runs `strategies` in order until one succeeds.
///
/// A timeout advances to the next strategy; any other error is returned
/// immediately. If every strategy times out the last timeout is returned.
pub async fn traverse(
    driver: &dyn AutomationDriver,
    direction: HistoryDirection,
    strategies: &[HistoryStrategy],
) -> Result<()> {
    let mut last_timeout = None;
    for strategy in strategies {
        let attempt = match *strategy {
            HistoryStrategy::Wait(wait_until, timeout) => {
                driver.traverse_history(direction, wait_until, timeout).await
            }
            HistoryStrategy::Direct => driver.traverse_history_direct(direction).await,
        };
        match attempt {
            Ok(()) => return Ok(()),
            Err(err) if err.is_timeout() => {
                debug!(%direction, ?strategy, "History strategy timed out, falling back");
                last_timeout = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_timeout.unwrap_or_else(|| SandboxError::protocol("no history strategy configured")))
}
