// Terminal chat shell and the background worker that drives a form session.
//
// The worker owns the ConversationSession and does every remote call; the shell
// only prints events and reads input while the worker reports it is idle.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::FormError;
use crate::events::{SessionEvent, ShellCommand};
use crate::session::{ConversationSession, SessionState, TurnOutcome};
use crate::telemetry::{SessionOutcome, SessionReporter};

const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub instructions: String,
    /// Leave the remote assistant and uploaded form in place when the session ends.
    pub keep_assistant: bool,
}

pub struct WorkerHandle {
    pub commands: mpsc::Sender<ShellCommand>,
    pub events: mpsc::Receiver<SessionEvent>,
    pub task: JoinHandle<()>,
}

/// How the shell finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellExit {
    Completed(PathBuf),
    NoFileSelected,
    /// Ctrl-C stopped the session before the form was complete.
    Cancelled,
    Failed,
}

pub fn spawn_worker(
    session: ConversationSession,
    reporter: Arc<dyn SessionReporter>,
    options: WorkerOptions,
    cancel: CancellationToken,
) -> WorkerHandle {
    let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let task = tokio::spawn(run_worker(
        session, reporter, options, cancel, command_rx, event_tx,
    ));
    WorkerHandle {
        commands: command_tx,
        events: event_rx,
        task,
    }
}

async fn run_worker(
    mut session: ConversationSession,
    reporter: Arc<dyn SessionReporter>,
    options: WorkerOptions,
    cancel: CancellationToken,
    mut commands: mpsc::Receiver<ShellCommand>,
    events: mpsc::Sender<SessionEvent>,
) {
    reporter.session_started();
    let mut worker = Worker {
        session: &mut session,
        reporter: reporter.as_ref(),
        cancel: &cancel,
        commands: &mut commands,
        events: &events,
    };
    let outcome = worker.drive(&options.instructions).await;

    if !options.keep_assistant {
        if let Err(e) = session.teardown().await {
            warn!(error = %e, "Cleanup of remote resources incomplete");
        }
    }
    // The shell may already be gone.
    let _ = events.send(SessionEvent::Finished(outcome)).await;
}

struct Worker<'a> {
    session: &'a mut ConversationSession,
    reporter: &'a dyn SessionReporter,
    cancel: &'a CancellationToken,
    commands: &'a mut mpsc::Receiver<ShellCommand>,
    events: &'a mpsc::Sender<SessionEvent>,
}

impl Worker<'_> {
    async fn emit(&self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            warn!("Shell stopped listening for session events");
        }
    }

    async fn status(&self, line: &str) {
        self.emit(SessionEvent::Status(line.to_string())).await;
    }

    async fn report_failure(&self, message: String) {
        self.reporter
            .session_ended(SessionOutcome::Fail, Some(&message));
        self.emit(SessionEvent::Error(message)).await;
    }

    /// End the session because the shell went away or Ctrl-C was pressed.
    async fn stopped(&self) -> SessionOutcome {
        let reason = if self.cancel.is_cancelled() {
            FormError::Cancelled.to_string()
        } else {
            "input closed before the form was completed".to_string()
        };
        self.report_failure(reason).await;
        SessionOutcome::Fail
    }

    async fn next_command(&mut self) -> Option<ShellCommand> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            command = self.commands.recv() => command,
        }
    }

    async fn drive(&mut self, instructions: &str) -> SessionOutcome {
        self.status("🛠 Creating assistant...").await;
        if let Err(e) = self.session.initialize(instructions, self.cancel).await {
            self.report_failure(format!("Failed to create assistant: {}", e)).await;
            return SessionOutcome::Fail;
        }
        self.status("✅ Assistant ready. Please select a form.").await;

        self.emit(SessionEvent::RequestFile).await;
        let path = match self.next_command().await {
            Some(ShellCommand::SelectFile(Some(path))) => path,
            Some(ShellCommand::SelectFile(None)) if !self.cancel.is_cancelled() => {
                info!("No file selected");
                return SessionOutcome::Fail;
            }
            Some(ShellCommand::SelectFile(None)) | Some(ShellCommand::Shutdown) | None => {
                return self.stopped().await;
            }
            Some(ShellCommand::Reply(_)) => {
                self.report_failure("received a reply before a form was selected".to_string())
                    .await;
                return SessionOutcome::Fail;
            }
        };

        self.status("📤 Uploading form...").await;
        if let Err(e) = self.session.upload_document(&path, self.cancel).await {
            self.report_failure(format!("Initialization error: {}", e)).await;
            return SessionOutcome::Fail;
        }
        self.status("✅ File uploaded. Starting thread...").await;
        if let Err(e) = self.session.start_thread(self.cancel).await {
            self.report_failure(format!("Initialization error: {}", e)).await;
            return SessionOutcome::Fail;
        }
        self.status("🧵 Thread created. Asking first question...").await;

        let mut turn = self.session.advance(self.cancel).await;
        loop {
            match turn {
                Ok(TurnOutcome::Question(question)) => {
                    self.emit(SessionEvent::Question(question)).await;
                }
                Ok(TurnOutcome::Completed { output, answers }) => {
                    self.emit(SessionEvent::Saved {
                        path: output,
                        answers,
                    })
                    .await;
                    self.reporter.session_ended(SessionOutcome::Success, None);
                    return SessionOutcome::Success;
                }
                Err(e) => {
                    let message = format!("Error getting assistant response: {}", e);
                    if self.cancel.is_cancelled()
                        || *self.session.state() != SessionState::AwaitingUserInput
                    {
                        self.report_failure(message).await;
                        return SessionOutcome::Fail;
                    }
                    self.emit(SessionEvent::Error(message)).await;
                }
            }

            self.emit(SessionEvent::AwaitingInput).await;
            let reply = loop {
                match self.next_command().await {
                    Some(ShellCommand::Reply(text)) => break text,
                    Some(ShellCommand::SelectFile(_)) => continue,
                    Some(ShellCommand::Shutdown) | None => return self.stopped().await,
                }
            };
            turn = self.session.reply(&reply, self.cancel).await;
        }
    }
}

async fn send_command(worker: &WorkerHandle, command: ShellCommand) {
    if worker.commands.send(command).await.is_err() {
        warn!("Session worker stopped accepting commands");
    }
}

fn log_line<W: Write>(out: &mut W, line: &str) -> Result<()> {
    writeln!(out, "[{}] {}\n", Local::now().format("%H:%M:%S"), line)?;
    out.flush()?;
    Ok(())
}

async fn read_line<R: AsyncBufRead + Unpin>(
    lines: &mut Lines<R>,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    tokio::select! {
        _ = cancel.cancelled() => Ok(None),
        line = lines.next_line() => line.context("Failed to read input"),
    }
}

/// Run the interactive conversation until the worker finishes.
///
/// `form` skips the file prompt. Blank replies are ignored and never reach the
/// session. Ctrl-C cancels whatever the worker is doing.
pub async fn run_shell<R, W>(
    input: R,
    out: &mut W,
    mut worker: WorkerHandle,
    mut form: Option<PathBuf>,
    cancel: CancellationToken,
) -> Result<ShellExit>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    let mut exit = ShellExit::Failed;

    let interrupt = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, cancelling session...");
            interrupt.cancel();
        }
    });

    while let Some(event) = worker.events.recv().await {
        match event {
            SessionEvent::Status(line) => log_line(out, &line)?,
            SessionEvent::RequestFile => {
                let selected = match form.take() {
                    Some(path) => Some(path),
                    None => {
                        write!(out, "📄 Path to form (PDF or image): ")?;
                        out.flush()?;
                        read_line(&mut lines, &cancel)
                            .await?
                            .map(|line| line.trim().to_string())
                            .filter(|line| !line.is_empty())
                            .map(PathBuf::from)
                    }
                };
                if selected.is_none() && !cancel.is_cancelled() {
                    log_line(out, "❌ No file selected. Exiting.")?;
                    exit = ShellExit::NoFileSelected;
                }
                send_command(&worker, ShellCommand::SelectFile(selected)).await;
            }
            SessionEvent::Question(question) => {
                log_line(out, &format!("🤖 Assistant: {}", question))?
            }
            SessionEvent::AwaitingInput => {
                let command = loop {
                    write!(out, "> ")?;
                    out.flush()?;
                    match read_line(&mut lines, &cancel).await? {
                        None => break ShellCommand::Shutdown,
                        Some(line) => {
                            let reply = line.trim();
                            if reply.is_empty() {
                                continue;
                            }
                            log_line(out, &format!("🧑 You: {}", reply))?;
                            break ShellCommand::Reply(reply.to_string());
                        }
                    }
                };
                send_command(&worker, command).await;
            }
            SessionEvent::Saved { path, answers } => {
                log_line(out, &format!("✅ Saved to {}", path.display()))?;
                info!(answers, "Form complete");
                exit = ShellExit::Completed(path);
            }
            SessionEvent::Error(message) => log_line(out, &format!("❌ {}", message))?,
            SessionEvent::Finished(outcome) => {
                info!(%outcome, "Session worker finished");
                break;
            }
        }
    }

    ctrl_c.abort();
    if exit == ShellExit::Failed && cancel.is_cancelled() {
        exit = ShellExit::Cancelled;
    }
    match worker.task.await {
        Ok(()) => {}
        Err(e) if e.is_panic() => error!("Session worker panicked: {:?}", e),
        Err(e) => error!("Session worker failed: {:?}", e),
    }
    Ok(exit)
}
