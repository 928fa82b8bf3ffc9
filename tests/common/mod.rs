// Scripted in-memory assistant service shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use form_assistant::error::ServiceError;
use form_assistant::runner::TurnRunner;
use form_assistant::service::{
    AssistantConfig, AssistantHandle, AssistantService, DocumentRef, NewMessage, Role, RunHandle,
    RunStatus, ThreadHandle, ThreadMessage,
};
use form_assistant::session::{ConversationSession, SessionSettings};

#[derive(Debug)]
pub struct FakeState {
    /// Assistant messages released one per run, in order.
    pub replies: VecDeque<String>,
    /// Thread history, oldest first.
    pub history: Vec<ThreadMessage>,
    pub posted: Vec<NewMessage>,
    pub assistants: Vec<AssistantConfig>,
    pub uploads: Vec<(String, usize)>,
    pub threads_created: usize,
    pub runs_created: usize,
    pub polls: usize,
    pub polls_before_done: usize,
    pub final_status: RunStatus,
    pub stall: bool,
    pub cancelled_runs: Vec<RunHandle>,
    pub deleted_assistants: Vec<AssistantHandle>,
    pub deleted_files: Vec<DocumentRef>,
    pub fail_create_assistant: bool,
    pub fail_upload: bool,
    pub fail_create_thread: bool,
    pub fail_post_after: Option<usize>,
    pub fail_list: bool,
    /// Calls that never return, like a request to a host that stopped answering.
    pub hang_create_assistant: bool,
    pub hang_status: bool,
    pub hang_list: bool,
    remaining_polls: usize,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            replies: VecDeque::new(),
            history: Vec::new(),
            posted: Vec::new(),
            assistants: Vec::new(),
            uploads: Vec::new(),
            threads_created: 0,
            runs_created: 0,
            polls: 0,
            polls_before_done: 0,
            final_status: RunStatus::Completed,
            stall: false,
            cancelled_runs: Vec::new(),
            deleted_assistants: Vec::new(),
            deleted_files: Vec::new(),
            fail_create_assistant: false,
            fail_upload: false,
            fail_create_thread: false,
            fail_post_after: None,
            fail_list: false,
            hang_create_assistant: false,
            hang_status: false,
            hang_list: false,
            remaining_polls: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeService {
    state: Mutex<FakeState>,
}

fn unavailable(what: &str) -> ServiceError {
    ServiceError::Api {
        status: 500,
        message: format!("{} unavailable", what),
    }
}

impl FakeService {
    pub fn with_replies<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let service = Self::default();
        service.state().replies = replies.into_iter().map(Into::into).collect();
        Arc::new(service)
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl AssistantService for FakeService {
    async fn create_assistant(&self, config: &AssistantConfig) -> Result<AssistantHandle, ServiceError> {
        let hang = self.state().hang_create_assistant;
        if hang {
            std::future::pending::<()>().await;
        }
        let mut state = self.state();
        if state.fail_create_assistant {
            return Err(unavailable("assistants"));
        }
        state.assistants.push(config.clone());
        Ok(AssistantHandle::from("asst_1"))
    }

    async fn delete_assistant(&self, assistant: &AssistantHandle) -> Result<(), ServiceError> {
        self.state().deleted_assistants.push(assistant.clone());
        Ok(())
    }

    async fn upload_file(&self, file_name: &str, bytes: Vec<u8>) -> Result<DocumentRef, ServiceError> {
        let mut state = self.state();
        if state.fail_upload {
            return Err(unavailable("files"));
        }
        state.uploads.push((file_name.to_string(), bytes.len()));
        Ok(DocumentRef::from("file_1"))
    }

    async fn delete_file(&self, file: &DocumentRef) -> Result<(), ServiceError> {
        self.state().deleted_files.push(file.clone());
        Ok(())
    }

    async fn create_thread(&self) -> Result<ThreadHandle, ServiceError> {
        let mut state = self.state();
        if state.fail_create_thread {
            return Err(unavailable("threads"));
        }
        state.threads_created += 1;
        Ok(ThreadHandle::from("thread_1"))
    }

    async fn post_message(&self, _thread: &ThreadHandle, message: NewMessage) -> Result<(), ServiceError> {
        let mut state = self.state();
        if let Some(limit) = state.fail_post_after {
            if state.posted.len() >= limit {
                return Err(unavailable("messages"));
            }
        }
        state.history.push(ThreadMessage {
            role: message.role,
            text: message.text.clone(),
        });
        state.posted.push(message);
        Ok(())
    }

    async fn create_run(&self, _thread: &ThreadHandle, _assistant: &AssistantHandle) -> Result<RunHandle, ServiceError> {
        let mut state = self.state();
        state.runs_created += 1;
        state.remaining_polls = state.polls_before_done;
        if let Some(reply) = state.replies.pop_front() {
            state.history.push(ThreadMessage {
                role: Role::Assistant,
                text: reply,
            });
        }
        Ok(RunHandle(format!("run_{}", state.runs_created)))
    }

    async fn run_status(&self, _thread: &ThreadHandle, _run: &RunHandle) -> Result<RunStatus, ServiceError> {
        let hang = {
            let mut state = self.state();
            state.polls += 1;
            state.hang_status
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let mut state = self.state();
        if state.stall {
            return Ok(RunStatus::InProgress);
        }
        if state.remaining_polls > 0 {
            state.remaining_polls -= 1;
            return Ok(RunStatus::InProgress);
        }
        Ok(state.final_status)
    }

    async fn cancel_run(&self, _thread: &ThreadHandle, run: &RunHandle) -> Result<(), ServiceError> {
        self.state().cancelled_runs.push(run.clone());
        Ok(())
    }

    async fn list_messages(&self, _thread: &ThreadHandle) -> Result<Vec<ThreadMessage>, ServiceError> {
        let hang = self.state().hang_list;
        if hang {
            std::future::pending::<()>().await;
        }
        let state = self.state();
        if state.fail_list {
            return Err(unavailable("messages"));
        }
        Ok(state.history.iter().rev().cloned().collect())
    }
}

pub fn fast_runner() -> TurnRunner {
    TurnRunner::new(Duration::from_millis(1), Some(Duration::from_secs(5)))
}

pub fn session_for(service: Arc<FakeService>, output_path: PathBuf) -> ConversationSession {
    ConversationSession::new(
        service,
        SessionSettings {
            model: "gpt-4o".to_string(),
            output_path,
            runner: fast_runner(),
        },
    )
}

/// Write a small stand-in form into `dir`.
pub fn write_form(dir: &std::path::Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"%PDF-1.4 fake form").unwrap();
    path
}
