use std::{collections::BTreeSet, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

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
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ConversationId);
id_newtype!(MessageId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(alias = "_id")]
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// An uploaded file referenced by a message.
///
/// Older messages store attachments as bare URL strings. Both shapes are
/// accepted when deserializing and normalized into this struct, so nothing
/// past the wire boundary needs to care which one the server sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AttachmentWire")]
pub struct Attachment {
    pub url: String,
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AttachmentWire {
    Legacy(String),
    Structured {
        url: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(rename = "type", default)]
        mime_type: Option<String>,
        #[serde(default)]
        size: Option<u64>,
    },
}

impl From<AttachmentWire> for Attachment {
    fn from(wire: AttachmentWire) -> Self {
        match wire {
            AttachmentWire::Legacy(url) => Self {
                name: file_name_from_url(&url),
                url,
                mime_type: None,
                size: None,
            },
            AttachmentWire::Structured {
                url,
                name,
                mime_type,
                size,
            } => Self {
                name: name
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| file_name_from_url(&url)),
                url,
                mime_type,
                size,
            },
        }
    }
}

fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    match path.rsplit('/').next() {
        Some(segment) if !segment.is_empty() => segment.to_string(),
        _ => url.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(alias = "_id")]
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: Participant,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub read_by: BTreeSet<UserId>,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_visible(&self) -> bool {
        !self.is_deleted
    }

    /// Sort key for a thread: `created_at` ascending, ties broken by id.
    pub fn thread_order(&self) -> (DateTime<Utc>, &MessageId) {
        (self.created_at, &self.id)
    }

    pub fn is_read_by(&self, user_id: &UserId) -> bool {
        self.read_by.contains(user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(alias = "_id")]
    pub id: ConversationId,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default)]
    pub admins: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Group name for groups, otherwise the first participant other than
    /// `current_user`.
    pub fn display_name(&self, current_user: Option<&UserId>) -> String {
        if self.is_group {
            if let Some(name) = self.group_name.as_deref().filter(|name| !name.is_empty()) {
                return name.to_string();
            }
        }

        self.participants
            .iter()
            .find(|participant| Some(&participant.id) != current_user)
            .or_else(|| self.participants.first())
            .map(|participant| {
                if participant.name.is_empty() {
                    participant.id.to_string()
                } else {
                    participant.name.clone()
                }
            })
            .unwrap_or_else(|| self.id.to_string())
    }
}
