// Defaults for the assistant service and the form session, overridable from the environment.

use std::env;

lazy_static::lazy_static! {
    pub static ref OPENAI_BASE_URL: String = env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    pub static ref ASSISTANT_MODEL: String = env::var("FORM_ASSISTANT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
    pub static ref OUTPUT_PATH: String = env::var("FORM_ASSISTANT_OUTPUT").unwrap_or_else(|_| "filled_form.json".to_string());
}

pub const ASSISTANT_NAME: &str = "Form Filler";

/// Tool enabled on the assistant and on the uploaded form attachment.
pub const DOCUMENT_TOOL: &str = "code_interpreter";

/// Purpose the upload endpoint expects for files used by assistants.
pub const UPLOAD_PURPOSE: &str = "assistants";

pub const FIRST_MESSAGE: &str = "Please help me fill out this form.";

/// Extensions accepted for the uploaded form, compared case-insensitively.
pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg"];

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Upper bound on any single HTTP request to the assistant service.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

pub const FORM_INSTRUCTIONS: &str = "You are a helpful form-filling assistant. A user will upload a form. Do your best to interpret the form regardless of type.\n\
Immediately greet the user and begin by asking the user questions based on what is required to fill the form.\n\
Avoid listing all the required fields up front. Instead, ask one question at a time immediately after the form has been uploaded.\n\
Ask the least amount of questions needed to gather all information needed to fill out the form.\n\
Once you have all information, output a JSON with each question as an object and the extrapolated answer as a key in the proper format, the first object and value should be filled_form and true.";
