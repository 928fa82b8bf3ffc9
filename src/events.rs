use std::path::PathBuf;

use crate::telemetry::SessionOutcome;

/// Messages from the session worker to the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Progress line for the conversation log.
    Status(String),
    /// The assistant is ready; the shell should pick a form.
    RequestFile,
    Question(String),
    /// The worker is idle and will accept a reply.
    AwaitingInput,
    Saved { path: PathBuf, answers: usize },
    Error(String),
    /// The worker has stopped and cleaned up.
    Finished(SessionOutcome),
}

/// Messages from the shell to the session worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// `None` when the user declined to pick a file.
    SelectFile(Option<PathBuf>),
    Reply(String),
    Shutdown,
}
