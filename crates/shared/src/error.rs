use serde::{Deserialize, Serialize};

/// Body carried by non-2xx responses. Either field may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiErrorBody {
    /// Picks `error`, then `message`, then a fallback naming the status.
    pub fn into_message(self, status: u16) -> String {
        self.error
            .filter(|value| !value.trim().is_empty())
            .or(self.message.filter(|value| !value.trim().is_empty()))
            .unwrap_or_else(|| format!("Request failed with status {status}"))
    }

    /// Lenient parse: a body that is not JSON yields an empty error body.
    pub fn from_body(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }
}
