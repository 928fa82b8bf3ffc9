use std::fmt;

use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Success,
    Fail,
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Success => f.write_str("Success"),
            SessionOutcome::Fail => f.write_str("Fail"),
        }
    }
}

/// Receives session-level signals for session tracking.
///
/// Reporting must never interrupt the conversation, so implementations swallow
/// their own failures.
pub trait SessionReporter: Send + Sync {
    fn session_started(&self);

    fn session_ended(&self, outcome: SessionOutcome, reason: Option<&str>);
}

/// Reports sessions through `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingReporter;

impl SessionReporter for TracingReporter {
    fn session_started(&self) {
        info!(target: "form_assistant::session", "Session started");
    }

    fn session_ended(&self, outcome: SessionOutcome, reason: Option<&str>) {
        match outcome {
            SessionOutcome::Success => info!(target: "form_assistant::session", %outcome, "Session ended"),
            SessionOutcome::Fail => error!(target: "form_assistant::session", %outcome, reason = reason.unwrap_or(""), "Session ended"),
        }
    }
}
