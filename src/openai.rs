use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, instrument};

use crate::constants;
use crate::error::ServiceError;
use crate::service::{
    AssistantConfig, AssistantHandle, AssistantService, DocumentRef, NewMessage, Role, RunHandle,
    RunStatus, ThreadHandle, ThreadMessage,
};

// Request and response bodies of the Assistants v2 endpoints we call

#[derive(Serialize)]
struct ToolSpec<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Serialize)]
struct CreateAssistantRequest<'a> {
    name: &'a str,
    model: &'a str,
    instructions: &'a str,
    tools: Vec<ToolSpec<'a>>,
}

#[derive(Serialize)]
struct AttachmentRequest<'a> {
    file_id: &'a str,
    tools: Vec<ToolSpec<'a>>,
}

#[derive(Serialize)]
struct CreateMessageRequest<'a> {
    role: Role,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<AttachmentRequest<'a>>,
}

#[derive(Serialize)]
struct CreateRunRequest<'a> {
    assistant_id: &'a str,
}

#[derive(Deserialize, Debug)]
struct ObjectId {
    id: String,
}

#[derive(Deserialize, Debug)]
struct RunObject {
    status: RunStatus,
}

#[derive(Deserialize, Debug)]
struct MessageList {
    data: Vec<MessageObject>,
}

#[derive(Deserialize, Debug)]
struct MessageObject {
    role: Role,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: TextValue },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct TextValue {
    value: String,
}

#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize, Debug)]
struct ApiErrorDetail {
    message: String,
}

impl MessageObject {
    fn into_thread_message(self) -> ThreadMessage {
        let text = self
            .content
            .into_iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.value),
                ContentPart::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        ThreadMessage {
            role: self.role,
            text,
        }
    }
}

fn tools(names: &[String]) -> Vec<ToolSpec<'_>> {
    names.iter().map(|kind| ToolSpec { kind: kind.as_str() }).collect()
}

/// HTTP client for the OpenAI Assistants API.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ServiceError> {
        Self::with_base_url(api_key, constants::OPENAI_BASE_URL.clone())
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        Self::with_request_timeout(
            api_key,
            base_url,
            Duration::from_secs(constants::DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    /// Client whose every request fails with a timeout error after `request_timeout`.
    pub fn with_request_timeout(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ServiceError> {
        let response = self.authorized(request).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|parsed| parsed.error.message)
            .unwrap_or(body);
        error!(%status, %message, "Assistant service request failed");
        Err(ServiceError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ServiceError> {
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ServiceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl AssistantService for OpenAiClient {
    #[instrument(skip(self, config), fields(model = %config.model))]
    async fn create_assistant(&self, config: &AssistantConfig) -> Result<AssistantHandle, ServiceError> {
        let body = CreateAssistantRequest {
            name: &config.name,
            model: &config.model,
            instructions: &config.instructions,
            tools: tools(&config.tools),
        };
        let created: ObjectId = self
            .send_json(self.http.post(self.url("/assistants")).json(&body))
            .await?;
        debug!(assistant_id = %created.id, "Assistant created");
        Ok(AssistantHandle(created.id))
    }

    async fn delete_assistant(&self, assistant: &AssistantHandle) -> Result<(), ServiceError> {
        let url = self.url(&format!("/assistants/{}", assistant));
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload_file(&self, file_name: &str, bytes: Vec<u8>) -> Result<DocumentRef, ServiceError> {
        let form = multipart::Form::new()
            .text("purpose", constants::UPLOAD_PURPOSE)
            .part("file", multipart::Part::bytes(bytes).file_name(file_name.to_string()));
        let uploaded: ObjectId = self
            .send_json(self.http.post(self.url("/files")).multipart(form))
            .await?;
        debug!(file_id = %uploaded.id, "File uploaded");
        Ok(DocumentRef(uploaded.id))
    }

    async fn delete_file(&self, file: &DocumentRef) -> Result<(), ServiceError> {
        let url = self.url(&format!("/files/{}", file));
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn create_thread(&self) -> Result<ThreadHandle, ServiceError> {
        let created: ObjectId = self
            .send_json(self.http.post(self.url("/threads")).json(&json!({})))
            .await?;
        debug!(thread_id = %created.id, "Thread started");
        Ok(ThreadHandle(created.id))
    }

    #[instrument(skip(self, message), fields(thread = %thread, role = ?message.role))]
    async fn post_message(&self, thread: &ThreadHandle, message: NewMessage) -> Result<(), ServiceError> {
        let attachments = message
            .attachment
            .as_ref()
            .map(|a| {
                vec![AttachmentRequest {
                    file_id: a.file.as_str(),
                    tools: tools(&a.tools),
                }]
            })
            .unwrap_or_default();
        let body = CreateMessageRequest {
            role: message.role,
            content: &message.text,
            attachments,
        };
        let url = self.url(&format!("/threads/{}/messages", thread));
        self.send(self.http.post(url).json(&body)).await?;
        Ok(())
    }

    async fn create_run(&self, thread: &ThreadHandle, assistant: &AssistantHandle) -> Result<RunHandle, ServiceError> {
        let url = self.url(&format!("/threads/{}/runs", thread));
        let body = CreateRunRequest {
            assistant_id: assistant.as_str(),
        };
        let created: ObjectId = self.send_json(self.http.post(url).json(&body)).await?;
        debug!(run_id = %created.id, "Assistant run started");
        Ok(RunHandle(created.id))
    }

    async fn run_status(&self, thread: &ThreadHandle, run: &RunHandle) -> Result<RunStatus, ServiceError> {
        let url = self.url(&format!("/threads/{}/runs/{}", thread, run));
        let run: RunObject = self.send_json(self.http.get(url)).await?;
        Ok(run.status)
    }

    async fn cancel_run(&self, thread: &ThreadHandle, run: &RunHandle) -> Result<(), ServiceError> {
        let url = self.url(&format!("/threads/{}/runs/{}/cancel", thread, run));
        self.send(self.http.post(url)).await?;
        Ok(())
    }

    async fn list_messages(&self, thread: &ThreadHandle) -> Result<Vec<ThreadMessage>, ServiceError> {
        // Ask for newest-first explicitly instead of relying on the default order.
        let url = self.url(&format!("/threads/{}/messages", thread));
        let list: MessageList = self
            .send_json(self.http.get(url).query(&[("order", "desc")]))
            .await?;
        Ok(list
            .data
            .into_iter()
            .map(MessageObject::into_thread_message)
            .collect())
    }
}
