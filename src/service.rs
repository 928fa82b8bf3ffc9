//! Boundary to the hosted assistant service.
//!
//! The conversation loop only talks to the service through [`AssistantService`],
//! so the HTTP client in [`crate::openai`] can be replaced by an in-memory fake
//! in tests.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::ServiceError;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

handle!(
    /// Remote assistant configured with the form instructions.
    AssistantHandle
);
handle!(
    /// Uploaded form, attached once to the first thread message.
    DocumentRef
);
handle!(
    /// One conversation; all messages and runs are scoped to it.
    ThreadHandle
);
handle!(RunHandle);

/// Immutable description of the assistant created at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantConfig {
    pub name: String,
    pub model: String,
    pub instructions: String,
    pub tools: Vec<String>,
}

impl AssistantConfig {
    pub fn new(model: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: constants::ASSISTANT_NAME.to_string(),
            model: model.into(),
            instructions: instructions.into(),
            tools: vec![constants::DOCUMENT_TOOL.to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// File attached to a message, with the tools allowed to read it.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file: DocumentRef,
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: Role,
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl NewMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// A message as listed back from a thread, text parts joined.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadMessage {
    pub role: Role,
    pub text: String,
}

/// Lifecycle of a remote run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
}

impl RunStatus {
    /// `Completed` and `Failed` end a run; the remaining terminal states never
    /// move again, so waiting on them would never return.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed
                | RunStatus::Failed
                | RunStatus::Cancelled
                | RunStatus::Incomplete
                | RunStatus::Expired
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Operations consumed from the hosted assistant service.
#[async_trait]
pub trait AssistantService: Send + Sync {
    async fn create_assistant(&self, config: &AssistantConfig) -> Result<AssistantHandle, ServiceError>;

    async fn delete_assistant(&self, assistant: &AssistantHandle) -> Result<(), ServiceError>;

    async fn upload_file(&self, file_name: &str, bytes: Vec<u8>) -> Result<DocumentRef, ServiceError>;

    async fn delete_file(&self, file: &DocumentRef) -> Result<(), ServiceError>;

    async fn create_thread(&self) -> Result<ThreadHandle, ServiceError>;

    async fn post_message(&self, thread: &ThreadHandle, message: NewMessage) -> Result<(), ServiceError>;

    async fn create_run(&self, thread: &ThreadHandle, assistant: &AssistantHandle) -> Result<RunHandle, ServiceError>;

    async fn run_status(&self, thread: &ThreadHandle, run: &RunHandle) -> Result<RunStatus, ServiceError>;

    async fn cancel_run(&self, thread: &ThreadHandle, run: &RunHandle) -> Result<(), ServiceError>;

    /// Messages on the thread, newest first.
    async fn list_messages(&self, thread: &ThreadHandle) -> Result<Vec<ThreadMessage>, ServiceError>;
}
