//! Conversation session: one assistant, one thread and the answers collected on it.
//!
//! State machine:
//!
//! ```text
//! Idle -> AssistantCreating -> AwaitingUpload -> Uploading -> ThreadStarting
//!      -> RunInProgress -> AwaitingUserInput <-> RunInProgress -> Completed
//! ```
//!
//! Any step may end in `Failed`, which is terminal. A turn that fails after the
//! first question has been shown returns the session to `AwaitingUserInput`.
//!
//! Every remote call observes the caller's cancellation token. Runs go through
//! the session's [`TurnRunner`], whose guard rejects a second overlapping run
//! with `RunInProgress`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::answers::AnswerStore;
use crate::constants;
use crate::error::{FormError, Result};
use crate::interpreter::{self, Interpretation};
use crate::runner::{self, TurnRunner};
use crate::service::{
    AssistantConfig, AssistantHandle, AssistantService, Attachment, DocumentRef, NewMessage,
    RunStatus, ThreadHandle,
};
use crate::uploader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AssistantCreating,
    AwaitingUpload,
    Uploading,
    ThreadStarting,
    RunInProgress,
    AwaitingUserInput,
    Completed,
    Failed(String),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::AssistantCreating => f.write_str("creating assistant"),
            SessionState::AwaitingUpload => f.write_str("awaiting upload"),
            SessionState::Uploading => f.write_str("uploading"),
            SessionState::ThreadStarting => f.write_str("starting thread"),
            SessionState::RunInProgress => f.write_str("running"),
            SessionState::AwaitingUserInput => f.write_str("awaiting user input"),
            SessionState::Completed => f.write_str("completed"),
            SessionState::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub model: String,
    pub output_path: PathBuf,
    pub runner: TurnRunner,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            model: constants::ASSISTANT_MODEL.clone(),
            output_path: PathBuf::from(constants::OUTPUT_PATH.as_str()),
            runner: TurnRunner::default(),
        }
    }
}

/// Result of one completed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Show this question and wait for the user's reply.
    Question(String),
    /// The form is filled and the answers were written to `output`.
    Completed { output: PathBuf, answers: usize },
}

pub struct ConversationSession {
    service: Arc<dyn AssistantService>,
    settings: SessionSettings,
    config: Option<AssistantConfig>,
    assistant: Option<AssistantHandle>,
    document: Option<DocumentRef>,
    thread: Option<ThreadHandle>,
    answers: AnswerStore,
    last_question: String,
    question_shown: bool,
    state: SessionState,
}

impl ConversationSession {
    pub fn new(service: Arc<dyn AssistantService>, settings: SessionSettings) -> Self {
        Self {
            service,
            settings,
            config: None,
            assistant: None,
            document: None,
            thread: None,
            answers: AnswerStore::new(),
            last_question: String::new(),
            question_shown: false,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn answers(&self) -> &AnswerStore {
        &self.answers
    }

    /// Text of the most recent question, the key the next answer is stored under.
    pub fn last_question(&self) -> &str {
        &self.last_question
    }

    pub fn assistant(&self) -> Option<&AssistantHandle> {
        self.assistant.as_ref()
    }

    pub fn assistant_config(&self) -> Option<&AssistantConfig> {
        self.config.as_ref()
    }

    pub fn thread(&self) -> Option<&ThreadHandle> {
        self.thread.as_ref()
    }

    pub fn output_path(&self) -> &Path {
        &self.settings.output_path
    }

    fn expect_state(&self, expected: SessionState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(FormError::InvalidState {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    fn fail(&mut self, err: FormError) -> FormError {
        warn!(error = %err, previous = %self.state, "Session failed");
        self.state = SessionState::Failed(err.to_string());
        err
    }

    /// Create the remote assistant with the given instructions.
    #[instrument(skip(self, instructions, cancel))]
    pub async fn initialize(
        &mut self,
        instructions: &str,
        cancel: &CancellationToken,
    ) -> Result<AssistantHandle> {
        self.expect_state(SessionState::Idle, "create the assistant")?;
        self.state = SessionState::AssistantCreating;

        let config = AssistantConfig::new(self.settings.model.clone(), instructions);
        let created = runner::until_cancelled(cancel, self.service.create_assistant(&config)).await;
        let assistant = match created {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(self.fail(e.into())),
            Err(e) => return Err(self.fail(e)),
        };
        info!(assistant_id = %assistant, "Assistant created");

        self.config = Some(config);
        self.assistant = Some(assistant.clone());
        self.state = SessionState::AwaitingUpload;
        Ok(assistant)
    }

    /// Upload the form, then open a thread whose first message carries it.
    pub async fn attach_document(
        &mut self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<ThreadHandle> {
        self.upload_document(path, cancel).await?;
        self.start_thread(cancel).await
    }

    /// First half of [`ConversationSession::attach_document`].
    pub async fn upload_document(
        &mut self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<DocumentRef> {
        self.expect_state(SessionState::AwaitingUpload, "upload a form")?;
        self.state = SessionState::Uploading;

        let uploaded =
            runner::until_cancelled(cancel, uploader::upload_form(self.service.as_ref(), path)).await;
        let document = match uploaded.and_then(|upload| upload) {
            Ok(document) => document,
            Err(e) => return Err(self.fail(e)),
        };
        self.document = Some(document.clone());
        self.state = SessionState::ThreadStarting;
        Ok(document)
    }

    /// Second half of [`ConversationSession::attach_document`].
    pub async fn start_thread(&mut self, cancel: &CancellationToken) -> Result<ThreadHandle> {
        self.expect_state(SessionState::ThreadStarting, "start a thread")?;
        let Some(document) = self.document.clone() else {
            return Err(FormError::InvalidState {
                operation: "start a thread",
                state: "missing uploaded form".to_string(),
            });
        };

        let thread = match runner::until_cancelled(cancel, self.service.create_thread()).await {
            Ok(Ok(thread)) => thread,
            Ok(Err(e)) => return Err(self.fail(FormError::ThreadCreation(e))),
            Err(e) => return Err(self.fail(e)),
        };
        info!(thread_id = %thread, "Thread started");

        let first = NewMessage::user(constants::FIRST_MESSAGE).with_attachment(Attachment {
            file: document,
            tools: vec![constants::DOCUMENT_TOOL.to_string()],
        });
        match runner::until_cancelled(cancel, self.service.post_message(&thread, first)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.fail(FormError::ThreadCreation(e))),
            Err(e) => return Err(self.fail(e)),
        }

        self.thread = Some(thread.clone());
        self.state = SessionState::RunInProgress;
        Ok(thread)
    }

    /// Append a user message to the thread. Blank text is rejected.
    pub async fn post_user_message(&self, thread: &ThreadHandle, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(FormError::EmptyMessage);
        }
        self.service
            .post_message(thread, NewMessage::user(text))
            .await?;
        Ok(())
    }

    pub fn record_answer(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.answers.record(question, answer);
    }

    /// Run the assistant over the thread and act on its newest message.
    pub async fn advance(&mut self, cancel: &CancellationToken) -> Result<TurnOutcome> {
        self.expect_state(SessionState::RunInProgress, "run the assistant")?;
        let (Some(thread), Some(assistant)) = (self.thread.clone(), self.assistant.clone()) else {
            return Err(FormError::InvalidState {
                operation: "run the assistant",
                state: "missing thread or assistant".to_string(),
            });
        };
        match self.interpret_turn(&thread, &assistant, cancel).await {
            Ok(Interpretation::Question(text)) => {
                self.last_question = text.clone();
                self.question_shown = true;
                self.state = SessionState::AwaitingUserInput;
                Ok(TurnOutcome::Question(text))
            }
            Ok(Interpretation::Completion) => {
                self.state = SessionState::Completed;
                let output = self.settings.output_path.clone();
                self.answers.persist(&output)?;
                Ok(TurnOutcome::Completed {
                    output,
                    answers: self.answers.len(),
                })
            }
            Err(e) if self.question_shown => {
                warn!(error = %e, "Turn failed, waiting for the user to try again");
                self.state = SessionState::AwaitingUserInput;
                Err(e)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn interpret_turn(
        &self,
        thread: &ThreadHandle,
        assistant: &AssistantHandle,
        cancel: &CancellationToken,
    ) -> Result<Interpretation> {
        let status = self
            .settings
            .runner
            .run_to_completion(self.service.as_ref(), thread, assistant, cancel)
            .await?;
        if status != RunStatus::Completed {
            // Still read the thread; the newest assistant message is shown as-is.
            warn!(%status, "Run ended without completing");
        }
        runner::until_cancelled(cancel, interpreter::interpret_latest(self.service.as_ref(), thread))
            .await?
    }

    /// Record `text` as the answer to the last question, send it, and run the next turn.
    #[instrument(skip(self, text, cancel))]
    pub async fn reply(&mut self, text: &str, cancel: &CancellationToken) -> Result<TurnOutcome> {
        self.expect_state(SessionState::AwaitingUserInput, "reply")?;
        let answer = text.trim();
        if answer.is_empty() {
            return Err(FormError::EmptyMessage);
        }
        let Some(thread) = self.thread.clone() else {
            return Err(FormError::InvalidState {
                operation: "reply",
                state: "missing thread".to_string(),
            });
        };

        self.record_answer(self.last_question.clone(), answer);
        runner::until_cancelled(cancel, self.post_user_message(&thread, answer)).await??;
        self.state = SessionState::RunInProgress;
        self.advance(cancel).await
    }

    /// Delete the remote assistant and uploaded form created by this session.
    pub async fn teardown(&mut self) -> Result<()> {
        let mut first_error = None;
        if let Some(assistant) = self.assistant.take() {
            match self.service.delete_assistant(&assistant).await {
                Ok(()) => info!(assistant_id = %assistant, "Assistant deleted"),
                Err(e) => {
                    warn!(assistant_id = %assistant, error = %e, "Failed to delete assistant");
                    first_error.get_or_insert(FormError::from(e));
                }
            }
        }
        if let Some(document) = self.document.take() {
            match self.service.delete_file(&document).await {
                Ok(()) => info!(file_id = %document, "Uploaded form deleted"),
                Err(e) => {
                    warn!(file_id = %document, error = %e, "Failed to delete uploaded form");
                    first_error.get_or_insert(FormError::from(e));
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
