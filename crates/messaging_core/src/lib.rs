use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::{Attachment, Conversation, ConversationId, Message, MessageId},
    protocol::{CreateConversationRequest, SendMessageRequest},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

pub mod api;
pub mod config;
pub mod conversations;
pub mod error;
pub mod selection;
pub mod session;
pub mod threads;
pub mod upload;

pub use api::ApiClient;
pub use config::{load_settings, ClientSettings};
pub use error::{Result, SyncError};
pub use session::{SessionSupplier, SharedSession, StaticSession};
pub use upload::{AttachmentUploader, UploadFile};

use conversations::ConversationCache;
use selection::Selection;
use threads::ThreadCache;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    ConversationsChanged,
    ThreadChanged { conversation_id: ConversationId },
    SelectionChanged(Option<ConversationId>),
    Error(String),
}

/// Result of a cache-filling fetch that may legitimately not happen.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Applied(T),
    /// A precondition (signed-in user, selected conversation) was not met;
    /// nothing was requested.
    Disabled,
    /// The response arrived after the selection moved on and was dropped.
    Stale,
}

impl<T> Outcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Self::Applied(value) => Some(value),
            Self::Disabled | Self::Stale => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadingState {
    pub conversations: bool,
    pub messages: bool,
    pub sending: bool,
}

impl LoadingState {
    pub fn is_busy(&self) -> bool {
        self.conversations || self.messages || self.sending
    }
}

#[derive(Default)]
struct InFlight {
    conversations: AtomicUsize,
    messages: AtomicUsize,
    sending: AtomicUsize,
}

struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct SyncState {
    conversations: ConversationCache,
    threads: ThreadCache,
    selection: Selection,
}

pub struct MessagingClient {
    api: ApiClient,
    uploader: AttachmentUploader,
    session: Arc<dyn SessionSupplier>,
    settings: ClientSettings,
    inner: Mutex<SyncState>,
    in_flight: InFlight,
    events: broadcast::Sender<SyncEvent>,
}

impl MessagingClient {
    pub fn new(settings: ClientSettings, session: Arc<dyn SessionSupplier>) -> Result<Arc<Self>> {
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        Self::with_http_client(http, settings, session)
    }

    pub fn with_http_client(
        http: Client,
        settings: ClientSettings,
        session: Arc<dyn SessionSupplier>,
    ) -> Result<Arc<Self>> {
        let settings = settings.validated()?;
        let api = ApiClient::new(http, settings.api_base.clone(), Arc::clone(&session));
        let uploader = AttachmentUploader::new(api.clone(), settings.upload_endpoints.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Arc::new(Self {
            api,
            uploader,
            session,
            settings,
            inner: Mutex::new(SyncState::default()),
            in_flight: InFlight::default(),
            events,
        }))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn loading_state(&self) -> LoadingState {
        LoadingState {
            conversations: self.in_flight.conversations.load(Ordering::SeqCst) > 0,
            messages: self.in_flight.messages.load(Ordering::SeqCst) > 0,
            sending: self.in_flight.sending.load(Ordering::SeqCst) > 0,
        }
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.inner.lock().await.conversations.items().to_vec()
    }

    pub async fn conversation(&self, conversation_id: &ConversationId) -> Option<Conversation> {
        self.inner
            .lock()
            .await
            .conversations
            .get(conversation_id)
            .cloned()
    }

    pub async fn thread(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.inner
            .lock()
            .await
            .threads
            .get(conversation_id)
            .map(<[Message]>::to_vec)
            .unwrap_or_default()
    }

    pub async fn selected_conversation(&self) -> Option<ConversationId> {
        self.inner.lock().await.selection.current().cloned()
    }

    pub async fn selected_thread(&self) -> Vec<Message> {
        let guard = self.inner.lock().await;
        guard
            .selection
            .current()
            .and_then(|conversation_id| guard.threads.get(conversation_id))
            .map(<[Message]>::to_vec)
            .unwrap_or_default()
    }

    pub async fn load_conversations(&self) -> Result<Outcome<Vec<Conversation>>> {
        let Some(user_id) = self.session.user_id() else {
            debug!("messaging: no signed-in user; conversation load skipped");
            return Ok(Outcome::Disabled);
        };

        let _loading = InFlightGuard::enter(&self.in_flight.conversations);
        let conversations = self
            .api
            .list_conversations()
            .await
            .map_err(|err| self.report(err))?;

        let auto_selected = {
            let mut guard = self.inner.lock().await;
            guard.conversations.replace_all(conversations.clone());
            if guard.selection.current().is_some() {
                None
            } else {
                let first = guard.conversations.first_id().cloned();
                if let Some(first) = &first {
                    guard.selection.select(first.clone());
                }
                first
            }
        };

        info!(
            user_id = %user_id,
            count = conversations.len(),
            "messaging: conversations loaded"
        );
        let _ = self.events.send(SyncEvent::ConversationsChanged);
        if let Some(conversation_id) = auto_selected {
            info!(conversation_id = %conversation_id, "messaging: defaulted selection to first conversation");
            let _ = self
                .events
                .send(SyncEvent::SelectionChanged(Some(conversation_id)));
        }

        Ok(Outcome::Applied(conversations))
    }

    pub async fn select_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Outcome<Vec<Message>>> {
        let changed = self
            .inner
            .lock()
            .await
            .selection
            .select(conversation_id.clone());
        if changed {
            info!(conversation_id = %conversation_id, "messaging: conversation selected");
            let _ = self
                .events
                .send(SyncEvent::SelectionChanged(Some(conversation_id)));
        }

        self.load_messages(None, None).await
    }

    /// Loads a page of the selected conversation's thread. Without `before`
    /// the page replaces the cached thread; with it the page is merged in as
    /// older history.
    pub async fn load_messages(
        &self,
        before: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Outcome<Vec<Message>>> {
        let (ticket, since) = {
            let guard = self.inner.lock().await;
            let Some(ticket) = guard.selection.ticket() else {
                debug!("messaging: no conversation selected; thread load skipped");
                return Ok(Outcome::Disabled);
            };
            (ticket, guard.threads.revision())
        };
        let limit = limit.map_or(self.settings.page_limit(), config::clamp_page_limit);

        let _loading = InFlightGuard::enter(&self.in_flight.messages);
        let mut messages = self
            .api
            .list_messages(&ticket.conversation_id, before, limit)
            .await
            .map_err(|err| self.report(err))?;
        messages.sort_by(|a, b| a.thread_order().cmp(&b.thread_order()));

        {
            let mut guard = self.inner.lock().await;
            if !guard.selection.is_current(&ticket) {
                warn!(
                    conversation_id = %ticket.conversation_id,
                    "messaging: selection changed while loading; discarding thread page"
                );
                return Ok(Outcome::Stale);
            }
            if before.is_some() {
                guard
                    .threads
                    .merge(&ticket.conversation_id, messages.clone(), since);
            } else if !guard
                .threads
                .replace(&ticket.conversation_id, messages.clone(), since)
            {
                warn!(
                    conversation_id = %ticket.conversation_id,
                    "messaging: a later first page already landed; discarding thread page"
                );
                return Ok(Outcome::Stale);
            }
        }

        info!(
            conversation_id = %ticket.conversation_id,
            count = messages.len(),
            older = before.is_some(),
            "messaging: thread page applied"
        );
        let _ = self.events.send(SyncEvent::ThreadChanged {
            conversation_id: ticket.conversation_id,
        });
        Ok(Outcome::Applied(messages))
    }

    /// Manual refresh: reloads the conversation list, then the selected thread.
    pub async fn refresh(&self) -> Result<Outcome<()>> {
        if let Outcome::Disabled = self.load_conversations().await? {
            return Ok(Outcome::Disabled);
        }
        match self.load_messages(None, None).await? {
            Outcome::Stale => Ok(Outcome::Stale),
            Outcome::Applied(_) | Outcome::Disabled => Ok(Outcome::Applied(())),
        }
    }

    pub async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<Conversation> {
        let conversation = self
            .api
            .create_conversation(&request)
            .await
            .map_err(|err| self.report(err))?;

        {
            let mut guard = self.inner.lock().await;
            guard.threads.ensure(&conversation.id);
            guard.conversations.upsert_front(conversation.clone());
            guard.selection.select(conversation.id.clone());
        }

        info!(
            conversation_id = %conversation.id,
            is_group = conversation.is_group,
            participants = conversation.participants.len(),
            "messaging: conversation created"
        );
        let _ = self.events.send(SyncEvent::ConversationsChanged);
        let _ = self
            .events
            .send(SyncEvent::SelectionChanged(Some(conversation.id.clone())));
        Ok(conversation)
    }

    /// Sends to the selected conversation. Returns `Ok(None)` without a
    /// request when nothing is selected or there is nothing to send.
    pub async fn send_message(
        &self,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> Result<Option<Message>> {
        if content.trim().is_empty() && attachments.is_empty() {
            return Ok(None);
        }
        let Some(conversation_id) = self.selected_conversation().await else {
            debug!("messaging: no conversation selected; send skipped");
            return Ok(None);
        };

        let _sending = InFlightGuard::enter(&self.in_flight.sending);
        let request = SendMessageRequest {
            conversation_id: conversation_id.clone(),
            content: content.to_string(),
            attachments,
        };
        let message = self
            .api
            .send_message(&request)
            .await
            .map_err(|err| self.report(err))?;

        {
            let mut guard = self.inner.lock().await;
            guard.threads.append(&conversation_id, message.clone());
            guard
                .conversations
                .patch_last_message(&conversation_id, &message);
        }

        info!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            attachments = message.attachments.len(),
            "messaging: message sent"
        );
        let _ = self.events.send(SyncEvent::ThreadChanged { conversation_id });
        let _ = self.events.send(SyncEvent::ConversationsChanged);
        Ok(Some(message))
    }

    /// Uploads every file, then sends them as attachments of one message.
    pub async fn send_with_uploads(
        &self,
        content: &str,
        files: &[UploadFile],
    ) -> Result<Option<Message>> {
        if content.trim().is_empty() && files.is_empty() {
            return Ok(None);
        }
        if self.selected_conversation().await.is_none() {
            debug!("messaging: no conversation selected; send skipped");
            return Ok(None);
        }

        let mut attachments = Vec::with_capacity(files.len());
        for file in files {
            attachments.push(self.upload(file).await?);
        }
        self.send_message(content, attachments).await
    }

    pub async fn edit_message(&self, message_id: &MessageId, content: &str) -> Result<Message> {
        let message = self
            .api
            .edit_message(message_id, content)
            .await
            .map_err(|err| self.report(err))?;

        {
            let mut guard = self.inner.lock().await;
            guard.threads.patch_message(&message);
            guard.conversations.refresh_last_message(&message);
        }

        info!(message_id = %message.id, "messaging: message edited");
        let _ = self.events.send(SyncEvent::ThreadChanged {
            conversation_id: message.conversation_id.clone(),
        });
        Ok(message)
    }

    pub async fn delete_message(&self, message_id: &MessageId) -> Result<()> {
        let ack = self
            .api
            .delete_message(message_id)
            .await
            .map_err(|err| self.report(err))?;
        if !ack.success {
            return Err(self.report(SyncError::NotAcknowledged("message delete")));
        }

        let conversation_id = {
            let mut guard = self.inner.lock().await;
            let conversation_id = guard.threads.mark_deleted(message_id);
            if let Some(conversation_id) = &conversation_id {
                let replacement = guard.threads.newest_visible(conversation_id).cloned();
                guard
                    .conversations
                    .replace_deleted_last_message(conversation_id, message_id, replacement);
            }
            conversation_id
        };

        info!(message_id = %message_id, "messaging: message deleted");
        if let Some(conversation_id) = conversation_id {
            let _ = self.events.send(SyncEvent::ThreadChanged { conversation_id });
            let _ = self.events.send(SyncEvent::ConversationsChanged);
        }
        Ok(())
    }

    /// Marks a batch of messages in the selected conversation as read by the
    /// current user. Batches spanning several conversations are not supported.
    pub async fn mark_read(&self, message_ids: &[MessageId]) -> Result<bool> {
        if message_ids.is_empty() {
            return Ok(false);
        }
        let Some(user_id) = self.session.user_id() else {
            debug!("messaging: no signed-in user; mark-read skipped");
            return Ok(false);
        };
        let Some(ticket) = self.inner.lock().await.selection.ticket() else {
            debug!("messaging: no conversation selected; mark-read skipped");
            return Ok(false);
        };

        let ack = self
            .api
            .mark_read(message_ids)
            .await
            .map_err(|err| self.report(err))?;
        if !ack.success {
            return Err(self.report(SyncError::NotAcknowledged("mark-read")));
        }

        let newly_read = {
            let mut guard = self.inner.lock().await;
            let newly_read =
                guard
                    .threads
                    .patch_read_by(&ticket.conversation_id, message_ids, &user_id);
            guard.conversations.zero_unread(&ticket.conversation_id);
            newly_read
        };

        info!(
            conversation_id = %ticket.conversation_id,
            requested = message_ids.len(),
            newly_read,
            "messaging: read receipts applied"
        );
        let _ = self.events.send(SyncEvent::ThreadChanged {
            conversation_id: ticket.conversation_id,
        });
        let _ = self.events.send(SyncEvent::ConversationsChanged);
        Ok(true)
    }

    pub async fn upload(&self, file: &UploadFile) -> Result<Attachment> {
        let _sending = InFlightGuard::enter(&self.in_flight.sending);
        self.uploader
            .upload(file)
            .await
            .map_err(|err| self.report(err))
    }

    fn report(&self, err: SyncError) -> SyncError {
        let _ = self.events.send(SyncEvent::Error(err.to_string()));
        err
    }
}

#[async_trait]
pub trait MessagingHandle: Send + Sync {
    async fn load_conversations(&self) -> Result<Outcome<Vec<Conversation>>>;
    async fn select_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Outcome<Vec<Message>>>;
    async fn load_older_messages(&self, before: &str) -> Result<Outcome<Vec<Message>>>;
    async fn refresh(&self) -> Result<Outcome<()>>;
    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<Conversation>;
    async fn send_message(
        &self,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> Result<Option<Message>>;
    async fn send_with_uploads(
        &self,
        content: &str,
        files: &[UploadFile],
    ) -> Result<Option<Message>>;
    async fn edit_message(&self, message_id: &MessageId, content: &str) -> Result<Message>;
    async fn delete_message(&self, message_id: &MessageId) -> Result<()>;
    async fn mark_read(&self, message_ids: &[MessageId]) -> Result<bool>;
    async fn upload(&self, file: &UploadFile) -> Result<Attachment>;
    async fn conversations(&self) -> Vec<Conversation>;
    async fn selected_thread(&self) -> Vec<Message>;
    fn loading_state(&self) -> LoadingState;
    fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent>;
}

#[async_trait]
impl MessagingHandle for Arc<MessagingClient> {
    async fn load_conversations(&self) -> Result<Outcome<Vec<Conversation>>> {
        MessagingClient::load_conversations(self).await
    }

    async fn select_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Outcome<Vec<Message>>> {
        MessagingClient::select_conversation(self, conversation_id).await
    }

    async fn load_older_messages(&self, before: &str) -> Result<Outcome<Vec<Message>>> {
        MessagingClient::load_messages(self, Some(before), None).await
    }

    async fn refresh(&self) -> Result<Outcome<()>> {
        MessagingClient::refresh(self).await
    }

    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<Conversation> {
        MessagingClient::create_conversation(self, request).await
    }

    async fn send_message(
        &self,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> Result<Option<Message>> {
        MessagingClient::send_message(self, content, attachments).await
    }

    async fn send_with_uploads(
        &self,
        content: &str,
        files: &[UploadFile],
    ) -> Result<Option<Message>> {
        MessagingClient::send_with_uploads(self, content, files).await
    }

    async fn edit_message(&self, message_id: &MessageId, content: &str) -> Result<Message> {
        MessagingClient::edit_message(self, message_id, content).await
    }

    async fn delete_message(&self, message_id: &MessageId) -> Result<()> {
        MessagingClient::delete_message(self, message_id).await
    }

    async fn mark_read(&self, message_ids: &[MessageId]) -> Result<bool> {
        MessagingClient::mark_read(self, message_ids).await
    }

    async fn upload(&self, file: &UploadFile) -> Result<Attachment> {
        MessagingClient::upload(self, file).await
    }

    async fn conversations(&self) -> Vec<Conversation> {
        MessagingClient::conversations(self).await
    }

    async fn selected_thread(&self) -> Vec<Message> {
        MessagingClient::selected_thread(self).await
    }

    fn loading_state(&self) -> LoadingState {
        MessagingClient::loading_state(self)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        MessagingClient::subscribe_events(self)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
