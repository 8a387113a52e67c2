use shared::domain::ConversationId;

/// Which conversation is active.
///
/// `epoch` advances on every change, so switching away and back still
/// invalidates tickets issued before the switch.
#[derive(Debug, Default)]
pub struct Selection {
    current: Option<ConversationId>,
    epoch: u64,
}

/// Conversation a request was issued for, checked again when its
/// response arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub conversation_id: ConversationId,
    epoch: u64,
}

impl Selection {
    pub fn current(&self) -> Option<&ConversationId> {
        self.current.as_ref()
    }

    /// Returns `true` when the selection actually changed.
    pub fn select(&mut self, conversation_id: ConversationId) -> bool {
        if self.current.as_ref() == Some(&conversation_id) {
            return false;
        }
        self.current = Some(conversation_id);
        self.epoch += 1;
        true
    }

    pub fn ticket(&self) -> Option<LoadTicket> {
        self.current.clone().map(|conversation_id| LoadTicket {
            conversation_id,
            epoch: self.epoch,
        })
    }

    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        self.epoch == ticket.epoch && self.current.as_ref() == Some(&ticket.conversation_id)
    }
}
