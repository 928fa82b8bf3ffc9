mod common;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use common::{session_for, write_form, FakeService};
use form_assistant::chat::{self, ShellExit, WorkerOptions};
use form_assistant::constants;
use form_assistant::events::SessionEvent;
use form_assistant::telemetry::{SessionOutcome, SessionReporter};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingReporter {
    started: Mutex<usize>,
    ended: Mutex<Vec<SessionOutcome>>,
}

impl SessionReporter for RecordingReporter {
    fn session_started(&self) {
        *self.started.lock().unwrap() += 1;
    }

    fn session_ended(&self, outcome: SessionOutcome, _reason: Option<&str>) {
        self.ended.lock().unwrap().push(outcome);
    }
}

fn options(keep_assistant: bool) -> WorkerOptions {
    WorkerOptions {
        instructions: constants::FORM_INSTRUCTIONS.to_string(),
        keep_assistant,
    }
}

#[test_log::test(tokio::test)]
async fn test_full_interview_over_the_shell() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("filled_form.json");
    let form = write_form(dir.path(), "intake.pdf");
    let service = FakeService::with_replies([
        "Hi! What is your full name?",
        "{\"filled_form\": true, \"name\": \"Jane Doe\"}",
    ]);
    let reporter = Arc::new(RecordingReporter::default());
    let cancel = CancellationToken::new();
    let worker = chat::spawn_worker(
        session_for(service.clone(), output.clone()),
        reporter.clone(),
        options(false),
        cancel.clone(),
    );

    // A blank line first: it must be ignored, not sent
    let input = format!("{}\n\n   \nJane Doe\n", form.display());
    let mut out = Vec::new();
    let exit = chat::run_shell(input.as_bytes(), &mut out, worker, None, cancel)
        .await
        .unwrap();

    assert_eq!(exit, ShellExit::Completed(output.clone()));
    let transcript = String::from_utf8(out).unwrap();
    assert!(transcript.contains("🛠 Creating assistant..."));
    assert!(transcript.contains("✅ Assistant ready. Please select a form."));
    assert!(transcript.contains("📤 Uploading form..."));
    assert!(transcript.contains("🧵 Thread created. Asking first question..."));
    assert!(transcript.contains("🤖 Assistant: Hi! What is your full name?"));
    assert!(transcript.contains("🧑 You: Jane Doe"));
    assert!(transcript.contains(&format!("✅ Saved to {}", output.display())));
    assert!(!transcript.contains("filled_form\": true"));

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(saved, serde_json::json!({"Hi! What is your full name?": "Jane Doe"}));

    let state = service.state();
    // Only the first message and the one real reply were posted
    assert_eq!(state.posted.len(), 2);
    assert_eq!(state.deleted_assistants.len(), 1);
    assert_eq!(state.deleted_files.len(), 1);
    assert_eq!(*reporter.started.lock().unwrap(), 1);
    assert_eq!(*reporter.ended.lock().unwrap(), vec![SessionOutcome::Success]);
}

#[tokio::test]
async fn test_no_file_selected_exits() {
    let dir = TempDir::new().unwrap();
    let service = FakeService::with_replies(["What is your full name?"]);
    let reporter = Arc::new(RecordingReporter::default());
    let cancel = CancellationToken::new();
    let worker = chat::spawn_worker(
        session_for(service.clone(), dir.path().join("out.json")),
        reporter.clone(),
        options(false),
        cancel.clone(),
    );

    let mut out = Vec::new();
    let exit = chat::run_shell("\n".as_bytes(), &mut out, worker, None, cancel)
        .await
        .unwrap();

    assert_eq!(exit, ShellExit::NoFileSelected);
    assert!(String::from_utf8(out)
        .unwrap()
        .contains("❌ No file selected. Exiting."));
    let state = service.state();
    assert!(state.uploads.is_empty());
    assert_eq!(state.threads_created, 0);
    // The assistant created at startup is still cleaned up
    assert_eq!(state.deleted_assistants.len(), 1);
    assert!(reporter.ended.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    let form = write_form(dir.path(), "intake.pdf");
    let service = FakeService::with_replies(["What is your full name?"]);
    service.state().fail_upload = true;
    let reporter = Arc::new(RecordingReporter::default());
    let cancel = CancellationToken::new();
    let worker = chat::spawn_worker(
        session_for(service.clone(), dir.path().join("out.json")),
        reporter.clone(),
        options(true),
        cancel.clone(),
    );

    let mut out = Vec::new();
    let exit = chat::run_shell(&b""[..], &mut out, worker, Some(form), cancel)
        .await
        .unwrap();

    assert_eq!(exit, ShellExit::Failed);
    let transcript = String::from_utf8(out).unwrap();
    assert!(transcript.contains("❌ Initialization error: failed to upload"));
    let state = service.state();
    assert_eq!(state.threads_created, 0);
    assert_eq!(state.runs_created, 0);
    // keep_assistant leaves remote resources alone
    assert!(state.deleted_assistants.is_empty());
    assert_eq!(*reporter.ended.lock().unwrap(), vec![SessionOutcome::Fail]);
}

#[tokio::test]
async fn test_assistant_creation_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    let service = FakeService::with_replies(Vec::<String>::new());
    service.state().fail_create_assistant = true;
    let reporter = Arc::new(RecordingReporter::default());
    let cancel = CancellationToken::new();
    let worker = chat::spawn_worker(
        session_for(service, dir.path().join("out.json")),
        reporter.clone(),
        options(false),
        cancel.clone(),
    );

    let mut out = Vec::new();
    let exit = chat::run_shell(&b""[..], &mut out, worker, None, cancel)
        .await
        .unwrap();

    assert_eq!(exit, ShellExit::Failed);
    let transcript = String::from_utf8(out).unwrap();
    assert!(transcript.contains("❌ Failed to create assistant"));
    assert!(!transcript.contains("Path to form"));
    assert_eq!(*reporter.ended.lock().unwrap(), vec![SessionOutcome::Fail]);
}

#[tokio::test]
async fn test_turn_error_keeps_shell_interactive() {
    let dir = TempDir::new().unwrap();
    let form = write_form(dir.path(), "intake.pdf");
    let service = FakeService::with_replies(["What is your full name?", "What is your age?"]);
    // The first reply cannot be posted; the user types it again
    service.state().fail_post_after = Some(1);
    let reporter = Arc::new(RecordingReporter::default());
    let cancel = CancellationToken::new();
    let worker = chat::spawn_worker(
        session_for(service.clone(), dir.path().join("out.json")),
        reporter.clone(),
        options(false),
        cancel.clone(),
    );

    let fix_posting = service.clone();
    let input = tokio::io::BufReader::new(RetryInput::new(fix_posting));
    let mut out = Vec::new();
    let exit = chat::run_shell(input, &mut out, worker, Some(form), cancel)
        .await
        .unwrap();

    // Input ran out while waiting for the age, so the session did not complete
    assert_eq!(exit, ShellExit::Failed);
    let transcript = String::from_utf8(out).unwrap();
    assert!(transcript.contains("❌ Error getting assistant response"));
    assert!(transcript.contains("🤖 Assistant: What is your age?"));
    // The retryable turn error is not reported; only the closed input ends the session
    assert_eq!(*reporter.ended.lock().unwrap(), vec![SessionOutcome::Fail]);
}

#[tokio::test]
async fn test_closed_input_at_reply_prompt_reports_failure() {
    let dir = TempDir::new().unwrap();
    let form = write_form(dir.path(), "intake.pdf");
    let service = FakeService::with_replies(["What is your full name?"]);
    let reporter = Arc::new(RecordingReporter::default());
    let cancel = CancellationToken::new();
    let worker = chat::spawn_worker(
        session_for(service.clone(), dir.path().join("out.json")),
        reporter.clone(),
        options(false),
        cancel.clone(),
    );

    let mut out = Vec::new();
    let exit = chat::run_shell(&b""[..], &mut out, worker, Some(form), cancel)
        .await
        .unwrap();

    assert_eq!(exit, ShellExit::Failed);
    let transcript = String::from_utf8(out).unwrap();
    assert!(transcript.contains("🤖 Assistant: What is your full name?"));
    assert!(transcript.contains("❌ input closed before the form was completed"));
    assert_eq!(*reporter.ended.lock().unwrap(), vec![SessionOutcome::Fail]);
    assert_eq!(service.state().deleted_assistants.len(), 1);
}

#[tokio::test]
async fn test_ctrl_c_at_file_prompt_is_not_a_declined_file() {
    let dir = TempDir::new().unwrap();
    let service = FakeService::with_replies(["What is your full name?"]);
    let reporter = Arc::new(RecordingReporter::default());
    let cancel = CancellationToken::new();
    let worker = chat::spawn_worker(
        session_for(service.clone(), dir.path().join("out.json")),
        reporter.clone(),
        options(false),
        cancel.clone(),
    );

    let input = tokio::io::BufReader::new(InterruptOnRead(cancel.clone()));
    let mut out = Vec::new();
    let exit = chat::run_shell(input, &mut out, worker, None, cancel)
        .await
        .unwrap();

    assert_eq!(exit, ShellExit::Cancelled);
    let transcript = String::from_utf8(out).unwrap();
    assert!(!transcript.contains("No file selected"));
    assert!(transcript.contains("❌ operation cancelled"));
    assert_eq!(*reporter.ended.lock().unwrap(), vec![SessionOutcome::Fail]);
    assert!(service.state().uploads.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_shell_survives_a_worker_that_stopped_listening() {
    let (commands, command_rx) = tokio::sync::mpsc::channel(1);
    drop(command_rx);
    let (event_tx, events) = tokio::sync::mpsc::channel(4);
    event_tx.send(SessionEvent::RequestFile).await.unwrap();
    event_tx.send(SessionEvent::AwaitingInput).await.unwrap();
    event_tx
        .send(SessionEvent::Finished(SessionOutcome::Fail))
        .await
        .unwrap();
    let worker = chat::WorkerHandle {
        commands,
        events,
        task: tokio::spawn(async {}),
    };

    let mut out = Vec::new();
    let exit = chat::run_shell(
        "Jane Doe\n".as_bytes(),
        &mut out,
        worker,
        Some(PathBuf::from("intake.pdf")),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    // Undeliverable commands are logged and the shell still drains to the end
    assert_eq!(exit, ShellExit::Failed);
    assert!(String::from_utf8(out).unwrap().contains("🧑 You: Jane Doe"));
}

/// Stands in for a user pressing Ctrl-C while the shell waits for a line.
struct InterruptOnRead(CancellationToken);

impl tokio::io::AsyncRead for InterruptOnRead {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        self.0.cancel();
        std::task::Poll::Pending
    }
}

/// Yields "Jane Doe" twice, re-enabling message posting before the second time.
struct RetryInput {
    service: Arc<FakeService>,
    lines: Vec<&'static [u8]>,
}

impl RetryInput {
    fn new(service: Arc<FakeService>) -> Self {
        Self {
            service,
            lines: vec![b"Jane Doe\n", b"Jane Doe\n"],
        }
    }
}

impl tokio::io::AsyncRead for RetryInput {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if self.lines.len() == 1 {
            self.service.state().fail_post_after = None;
        }
        if !self.lines.is_empty() {
            let line = self.lines.remove(0);
            buf.put_slice(line);
        }
        std::task::Poll::Ready(Ok(()))
    }
}
