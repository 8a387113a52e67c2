use serde::{Deserialize, Serialize};

use crate::domain::{Attachment, ConversationId, MessageId, UserId};

/// Body of `POST /api/messages/conversations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CreateConversationRequest {
    Participants {
        #[serde(rename = "participantIds")]
        participant_ids: Vec<UserId>,
    },
    Project {
        #[serde(rename = "projectId")]
        project_id: String,
    },
}

impl CreateConversationRequest {
    pub fn with_participants<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<UserId>,
    {
        Self::Participants {
            participant_ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMessagesQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    pub limit: u32,
}

/// `{success: true}` acknowledgement returned by delete and mark-read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl UploadResponse {
    /// `url` wins over `path` when the server sends both. Empty strings count
    /// as absent.
    pub fn location(&self) -> Option<&str> {
        fn non_empty(value: &Option<String>) -> Option<&str> {
            value.as_deref().filter(|v| !v.is_empty())
        }
        non_empty(&self.url).or_else(|| non_empty(&self.path))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn create_request_serializes_both_shapes() {
        let participants = CreateConversationRequest::with_participants(["u1", "u2"]);
        assert_eq!(
            serde_json::to_value(&participants).expect("encode"),
            json!({ "participantIds": ["u1", "u2"] })
        );

        let project = CreateConversationRequest::Project {
            project_id: "p9".into(),
        };
        assert_eq!(
            serde_json::to_value(&project).expect("encode"),
            json!({ "projectId": "p9" })
        );
    }

    #[test]
    fn upload_location_skips_empty_url() {
        let body: UploadResponse =
            serde_json::from_value(json!({ "url": "", "path": "/uploads/a.png" })).expect("decode");
        assert_eq!(body.location(), Some("/uploads/a.png"));

        let body: UploadResponse = serde_json::from_value(
            json!({ "url": "https://cdn.example/a.png", "path": "/uploads/a.png" }),
        )
        .expect("decode");
        assert_eq!(body.location(), Some("https://cdn.example/a.png"));

        let body: UploadResponse =
            serde_json::from_value(json!({ "url": "", "path": "" })).expect("decode");
        assert_eq!(body.location(), None);
    }
}
