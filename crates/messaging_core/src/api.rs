use std::sync::Arc;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Conversation, ConversationId, Message, MessageId},
    error::ApiErrorBody,
    protocol::{
        Ack, CreateConversationRequest, EditMessageRequest, ListMessagesQuery, MarkReadRequest,
        SendMessageRequest,
    },
};
use tracing::debug;

use crate::{
    error::{Result, SyncError},
    session::SessionSupplier,
};

const CONVERSATIONS: &str = "/api/messages/conversations";
const MESSAGES: &str = "/api/messages/messages";

/// Thin wrapper over the messaging REST contract. Holds no cache state.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    api_base: String,
    session: Arc<dyn SessionSupplier>,
}

impl ApiClient {
    pub fn new(http: Client, api_base: impl Into<String>, session: Arc<dyn SessionSupplier>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    pub(crate) fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.session.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.execute(self.http.get(self.url(CONVERSATIONS))).await
    }

    pub async fn create_conversation(
        &self,
        body: &CreateConversationRequest,
    ) -> Result<Conversation> {
        self.execute(self.http.post(self.url(CONVERSATIONS)).json(body)).await
    }

    pub async fn list_messages(
        &self,
        conversation_id: &ConversationId,
        before: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let query = ListMessagesQuery {
            before: before.map(str::to_string),
            limit,
        };
        let path = format!("{CONVERSATIONS}/{conversation_id}/messages");
        self.execute(self.http.get(self.url(&path)).query(&query)).await
    }

    pub async fn send_message(&self, body: &SendMessageRequest) -> Result<Message> {
        self.execute(self.http.post(self.url(MESSAGES)).json(body)).await
    }

    pub async fn edit_message(&self, message_id: &MessageId, content: &str) -> Result<Message> {
        let body = EditMessageRequest {
            content: content.to_string(),
        };
        let path = format!("{MESSAGES}/{message_id}");
        self.execute(self.http.patch(self.url(&path)).json(&body)).await
    }

    pub async fn delete_message(&self, message_id: &MessageId) -> Result<Ack> {
        let path = format!("{MESSAGES}/{message_id}");
        self.execute(self.http.delete(self.url(&path))).await
    }

    pub async fn mark_read(&self, message_ids: &[MessageId]) -> Result<Ack> {
        let body = MarkReadRequest {
            message_ids: message_ids.to_vec(),
        };
        let path = format!("{MESSAGES}/read");
        self.execute(self.http.post(self.url(&path)).json(&body)).await
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let request = self.authorize(request).build()?;
        debug!(method = %request.method(), url = %request.url(), "api: request");
        let response = self.http.execute(request).await?;
        read_json(response).await
    }
}

/// Decodes a 2xx body as `T`, or turns a non-2xx response into
/// [`SyncError::Server`] carrying the server's own message.
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = ApiErrorBody::from_body(&body).into_message(status.as_u16());
        return Err(SyncError::Server {
            status: status.as_u16(),
            message,
        });
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| SyncError::Decode(err.to_string()))
}
