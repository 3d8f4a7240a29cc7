//! Formatting functions for command output.
//!
//! Pure functions returning strings; printing happens in the commands.

use colored::Colorize;
use std::fmt::Write;

use agent_sandbox::transport::BrowserSessionSummary;
use agent_sandbox::transport::SessionStatus;
use agent_sandbox::{Session, ToolOutput};

/// Session banner printed to stderr once a command has a session.
pub(crate) fn format_session_started(kind: &str, session: &Session) -> String {
    format!(
        "{} {} session {} ({})",
        "▶".green().bold(),
        kind,
        session.session_id.cyan(),
        session.name
    )
}

/// Output of a code-interpreter operation; failures are shown in red.
pub(crate) fn format_tool_output(output: &ToolOutput) -> String {
    let mut out = String::new();
    if output.is_error {
        writeln!(&mut out, "{} {}", "✗".red().bold(), output.text.red()).unwrap();
    } else if !output.text.is_empty() {
        writeln!(&mut out, "{}", output.text).unwrap();
    }
    out
}

fn format_status(status: SessionStatus) -> String {
    match status {
        SessionStatus::Ready => status.as_str().green().to_string(),
        SessionStatus::Terminating => status.as_str().yellow().to_string(),
        SessionStatus::Terminated => status.as_str().dimmed().to_string(),
    }
}

/// Table of browser sessions.
pub(crate) fn format_sessions(sessions: &[BrowserSessionSummary]) -> String {
    let mut out = String::new();
    if sessions.is_empty() {
        writeln!(&mut out, "{} No browser sessions found.", "ℹ".blue()).unwrap();
        return out;
    }

    writeln!(&mut out, "{}", "━".repeat(72).dimmed()).unwrap();
    writeln!(
        &mut out,
        "  {:<28} {:<12} {:<12} {}",
        "SESSION".bold(),
        "STATUS".bold(),
        "NAME".bold(),
        "CREATED".bold()
    )
    .unwrap();
    for session in sessions {
        writeln!(
            &mut out,
            "  {:<28} {:<12} {:<12} {}",
            session.session_id.cyan(),
            format_status(session.status),
            session.name.as_deref().unwrap_or("-"),
            session.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
        .unwrap();
    }
    writeln!(&mut out, "{}", "━".repeat(72).dimmed()).unwrap();
    writeln!(&mut out, "  {} session(s)", sessions.len()).unwrap();
    out
}

/// Confirmation line for a written screenshot.
pub(crate) fn format_screenshot_saved(path: &str, bytes: usize) -> String {
    format!(
        "{} Screenshot saved to {} ({} bytes)",
        "✓".green().bold(),
        path.cyan(),
        bytes
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    /// Strips ANSI escape sequences so assertions work with or without
    /// colors.
    fn strip_ansi_codes(s: &str) -> String {
        let mut result = String::new();
        let mut chars = s.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch == '\x1b' && chars.peek() == Some(&'[') {
                chars.next();
                while let Some(&c) = chars.peek() {
                    chars.next();
                    if c.is_ascii_alphabetic() {
                        break;
                    }
                }
            } else {
                result.push(ch);
            }
        }
        result
    }

    fn summary(id: &str, status: SessionStatus) -> BrowserSessionSummary {
        BrowserSessionSummary {
            session_id: id.to_string(),
            name: Some("default".to_string()),
            status,
            created_at: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
            last_updated_at: None,
        }
    }

    #[test]
    fn test_strip_ansi_codes() {
        assert_eq!(strip_ansi_codes("\x1b[1;31mred\x1b[0m"), "red");
    }

    #[test]
    fn test_format_tool_output_success() {
        let out = format_tool_output(&ToolOutput::success("2"));
        assert_eq!(strip_ansi_codes(&out), "2\n");
    }

    #[test]
    fn test_format_tool_output_empty_success_prints_nothing() {
        assert!(format_tool_output(&ToolOutput::success("")).is_empty());
    }

    #[test]
    fn test_format_tool_output_error() {
        let out = strip_ansi_codes(&format_tool_output(&ToolOutput::failure("File not found")));
        assert!(out.contains("✗"));
        assert!(out.contains("File not found"));
    }

    #[test]
    fn test_format_sessions_table() {
        let out = strip_ansi_codes(&format_sessions(&[
            summary("s-1", SessionStatus::Ready),
            summary("s-2", SessionStatus::Terminated),
        ]));
        assert!(out.contains("SESSION"));
        assert!(out.contains("s-1"));
        assert!(out.contains("TERMINATED"));
        assert!(out.contains("2025-01-02 03:04:05 UTC"));
        assert!(out.contains("2 session(s)"));
    }

    #[test]
    fn test_format_sessions_empty() {
        let out = strip_ansi_codes(&format_sessions(&[]));
        assert!(out.contains("No browser sessions found"));
    }

    #[test]
    fn test_format_session_started() {
        let session = Session {
            name: "default".to_string(),
            session_id: "abc".to_string(),
            created_at: Utc::now(),
            description: None,
        };
        let out = strip_ansi_codes(&format_session_started("code-interpreter", &session));
        assert_eq!(out, "▶ code-interpreter session abc (default)");
    }

    #[test]
    fn test_format_screenshot_saved() {
        let out = strip_ansi_codes(&format_screenshot_saved("shot.png", 42));
        assert!(out.contains("shot.png"));
        assert!(out.contains("42 bytes"));
    }
}
