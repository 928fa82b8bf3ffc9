use tracing::{debug, instrument};

use crate::error::{FormError, Result};
use crate::service::{AssistantService, Role, ThreadHandle, ThreadMessage};

/// Markers the assistant is instructed to emit once the form is complete.
const COMPLETION_MARKERS: &[&str] = &["true", "filled_form"];

/// What the newest assistant message means for the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpretation {
    /// A follow-up question to show the user; its text keys the next answer.
    Question(String),
    /// The assistant has everything it needs.
    Completion,
}

/// Classify one assistant message.
///
/// Any case-insensitive occurrence of a completion marker counts, so ordinary
/// questions mentioning "true" are classified as completion too.
pub fn classify(text: &str) -> Interpretation {
    let trimmed = text.trim();
    let lowered = trimmed.to_lowercase();
    if COMPLETION_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        Interpretation::Completion
    } else {
        Interpretation::Question(trimmed.to_string())
    }
}

/// Newest assistant message in a newest-first listing.
pub fn latest_assistant_message(messages: &[ThreadMessage]) -> Option<&ThreadMessage> {
    messages.iter().find(|m| m.role == Role::Assistant)
}

#[instrument(skip(service), fields(thread = %thread))]
pub async fn interpret_latest(
    service: &dyn AssistantService,
    thread: &ThreadHandle,
) -> Result<Interpretation> {
    let messages = service.list_messages(thread).await?;
    let latest = latest_assistant_message(&messages).ok_or(FormError::NoResponse)?;
    let interpretation = classify(&latest.text);
    debug!(?interpretation, "Interpreted assistant message");
    Ok(interpretation)
}
