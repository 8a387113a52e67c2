use shared::domain::{Conversation, ConversationId, Message, MessageId};

/// Conversation list for the signed-in user, in server order.
///
/// Entries are never re-sorted locally; a reload replaces the whole list.
#[derive(Debug, Default)]
pub struct ConversationCache {
    items: Vec<Conversation>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Conversation] {
        &self.items
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.items.iter().find(|conversation| &conversation.id == id)
    }

    pub fn first_id(&self) -> Option<&ConversationId> {
        self.items.first().map(|conversation| &conversation.id)
    }

    pub fn replace_all(&mut self, conversations: Vec<Conversation>) {
        self.items = conversations;
    }

    /// Puts a freshly created conversation at the front. A conversation the
    /// server already knew about (an existing direct chat) is moved rather
    /// than duplicated.
    pub fn upsert_front(&mut self, conversation: Conversation) {
        self.items.retain(|existing| existing.id != conversation.id);
        self.items.insert(0, conversation);
    }

    /// Records a newly appended message. `last_message` and `updated_at` only
    /// move forward, so a late response for an older send cannot roll them back.
    pub fn patch_last_message(&mut self, id: &ConversationId, message: &Message) -> bool {
        let Some(conversation) = self.get_mut(id) else {
            return false;
        };

        let is_newer = conversation
            .last_message
            .as_ref()
            .map_or(true, |current| message.thread_order() >= current.thread_order());
        if is_newer {
            conversation.last_message = Some(message.clone());
        }
        if conversation
            .updated_at
            .map_or(true, |updated_at| message.created_at > updated_at)
        {
            conversation.updated_at = Some(message.created_at);
        }
        is_newer
    }

    /// Replaces the denormalized copy when it is the message that was edited.
    pub fn refresh_last_message(&mut self, message: &Message) -> bool {
        let Some(conversation) = self.get_mut(&message.conversation_id) else {
            return false;
        };
        match &conversation.last_message {
            Some(current) if current.id == message.id => {
                conversation.last_message = Some(message.clone());
                true
            }
            _ => false,
        }
    }

    /// Swaps out `last_message` if it is `deleted`.
    pub fn replace_deleted_last_message(
        &mut self,
        id: &ConversationId,
        deleted: &MessageId,
        replacement: Option<Message>,
    ) -> bool {
        let Some(conversation) = self.get_mut(id) else {
            return false;
        };
        if conversation
            .last_message
            .as_ref()
            .is_some_and(|current| &current.id == deleted)
        {
            conversation.last_message = replacement;
            return true;
        }
        false
    }

    pub fn zero_unread(&mut self, id: &ConversationId) -> bool {
        match self.get_mut(id) {
            Some(conversation) => {
                conversation.unread_count = 0;
                true
            }
            None => false,
        }
    }

    fn get_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        self.items.iter_mut().find(|conversation| &conversation.id == id)
    }
}
