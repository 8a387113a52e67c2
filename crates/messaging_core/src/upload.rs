//! Attachment upload with ordered endpoint fallback.
//!
//! Candidates come from [`ClientSettings::upload_endpoints`](crate::config::ClientSettings)
//! and are tried in order. The first one that stores the file wins; a failure
//! moves on to the next. Once every candidate has failed, the last error is
//! returned.

use reqwest::multipart::{Form, Part};
use shared::{domain::Attachment, protocol::UploadResponse};
use tracing::{debug, info, warn};

use crate::{
    api::{read_json, ApiClient},
    error::{Result, SyncError},
};

#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, mime_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type,
            bytes,
        }
    }
}

pub struct AttachmentUploader {
    api: ApiClient,
    endpoints: Vec<String>,
}

impl AttachmentUploader {
    pub fn new(api: ApiClient, endpoints: Vec<String>) -> Self {
        Self { api, endpoints }
    }

    pub async fn upload(&self, file: &UploadFile) -> Result<Attachment> {
        let mut last_error = None;

        for (attempt, endpoint) in self.endpoints.iter().enumerate() {
            let target = resolve_endpoint(self.api.api_base(), endpoint);
            match self.try_upload(&target, file).await {
                Ok(attachment) => {
                    info!(
                        endpoint = %target,
                        attempt = attempt + 1,
                        file = %file.name,
                        "upload: attachment stored"
                    );
                    return Ok(attachment);
                }
                Err(err) => {
                    warn!(
                        endpoint = %target,
                        attempt = attempt + 1,
                        file = %file.name,
                        "upload: candidate failed: {err}"
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or(SyncError::UploadFailed {
            attempts: self.endpoints.len(),
        }))
    }

    async fn try_upload(&self, target: &str, file: &UploadFile) -> Result<Attachment> {
        debug!(endpoint = %target, size = file.bytes.len(), "upload: POST multipart");
        // No explicit content type: reqwest sets multipart/form-data with its boundary.
        let request = self
            .api
            .http()
            .post(target)
            .multipart(Form::new().part("file", file_part(file)));
        let response = self.api.authorize(request).send().await?;
        let body: UploadResponse = read_json(response).await?;
        attachment_from_response(self.api.api_base(), body, file)
    }
}

fn file_part(file: &UploadFile) -> Part {
    let part = || Part::bytes(file.bytes.clone()).file_name(file.name.clone());
    let Some(mime) = file.mime_type.as_deref() else {
        return part();
    };
    part().mime_str(mime).unwrap_or_else(|_| {
        warn!(file = %file.name, mime, "upload: ignoring unparsable mime type");
        part()
    })
}

fn attachment_from_response(
    api_base: &str,
    body: UploadResponse,
    file: &UploadFile,
) -> Result<Attachment> {
    let location = body
        .location()
        .ok_or_else(|| SyncError::Decode("upload response carries neither url nor path".into()))?;

    Ok(Attachment {
        url: absolute_url(api_base, location),
        name: body
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| file.name.clone()),
        mime_type: body.mime_type.or_else(|| file.mime_type.clone()),
        size: body.size.or(Some(file.bytes.len() as u64)),
    })
}

/// Root-relative paths are prefixed with the API base; anything else
/// (absolute or protocol-relative URLs) is returned as is.
pub fn absolute_url(api_base: &str, location: &str) -> String {
    if location.starts_with('/') && !location.starts_with("//") {
        format!("{}{location}", api_base.trim_end_matches('/'))
    } else {
        location.to_string()
    }
}

fn resolve_endpoint(api_base: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else if endpoint.starts_with('/') {
        absolute_url(api_base, endpoint)
    } else {
        format!("{}/{endpoint}", api_base.trim_end_matches('/'))
    }
}

#[cfg(test)]
#[path = "tests/upload_tests.rs"]
mod tests;
