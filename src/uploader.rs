use std::path::Path;

use tracing::{info, instrument};

use crate::constants;
use crate::error::{FormError, Result};
use crate::service::{AssistantService, DocumentRef};

/// Whether the path names a PDF or one of the accepted image types.
pub fn is_supported_form(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            constants::ALLOWED_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// Read a local form and hand its bytes to the assistant service.
#[instrument(skip(service, path), fields(path = %path.display()))]
pub async fn upload_form(service: &dyn AssistantService, path: &Path) -> Result<DocumentRef> {
    let upload_error = |reason: String| FormError::Upload {
        path: path.to_path_buf(),
        reason,
    };

    if !is_supported_form(path) {
        return Err(upload_error(format!(
            "unsupported file type, expected one of: {}",
            constants::ALLOWED_EXTENSIONS.join(", ")
        )));
    }

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| upload_error(e.to_string()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("form")
        .to_string();

    let document = service
        .upload_file(&file_name, bytes)
        .await
        .map_err(|e| upload_error(e.to_string()))?;
    info!(file_id = %document, "File uploaded");
    Ok(document)
}
