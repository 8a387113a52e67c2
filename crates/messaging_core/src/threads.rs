use std::collections::HashMap;

use shared::domain::{ConversationId, Message, MessageId, UserId};

/// Per-conversation message threads.
///
/// Each partition is kept sorted by `(created_at, id)` and holds at most one
/// entry per message id, whatever order pages and sends arrive in.
///
/// Local writes (sends, edits, deletes, receipts) bump a cache-wide revision.
/// A page fetched at revision `since` never overwrites or drops a message that
/// was written after `since`.
#[derive(Debug, Default)]
pub struct ThreadCache {
    threads: HashMap<ConversationId, Partition>,
    revision: u64,
}

#[derive(Debug, Default)]
struct Partition {
    messages: Vec<Message>,
    /// Revision of the last local write per message.
    written: HashMap<MessageId, u64>,
    /// `since` of the newest first page applied.
    loaded_since: u64,
}

impl Partition {
    fn written_after(&self, message_id: &MessageId, since: u64) -> bool {
        self.written
            .get(message_id)
            .is_some_and(|revision| *revision > since)
    }

    fn fold_page(&mut self, page: Vec<Message>, since: u64) {
        for message in page {
            if !self.written_after(&message.id, since) {
                upsert_sorted(&mut self.messages, message);
            }
        }
    }
}

impl ThreadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revision to capture before fetching a page.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, conversation_id: &ConversationId) -> Option<&[Message]> {
        self.threads
            .get(conversation_id)
            .map(|partition| partition.messages.as_slice())
    }

    /// Creates an empty partition if none exists yet.
    pub fn ensure(&mut self, conversation_id: &ConversationId) {
        self.threads.entry(conversation_id.clone()).or_default();
    }

    /// Replaces a partition with a first page fetched at revision `since`.
    ///
    /// Messages written locally after `since` survive, in their local form.
    /// Returns `false`, changing nothing, when a first page fetched later has
    /// already been applied.
    pub fn replace(
        &mut self,
        conversation_id: &ConversationId,
        page: Vec<Message>,
        since: u64,
    ) -> bool {
        let partition = self.threads.entry(conversation_id.clone()).or_default();
        if since < partition.loaded_since {
            return false;
        }

        let cached = std::mem::take(&mut partition.messages);
        let kept: Vec<Message> = cached
            .into_iter()
            .filter(|message| partition.written_after(&message.id, since))
            .collect();
        partition.messages = kept;
        partition.fold_page(page, since);
        partition.loaded_since = since;
        partition.written.retain(|_, revision| *revision > since);
        true
    }

    /// Folds an older page, fetched at revision `since`, into a partition.
    pub fn merge(&mut self, conversation_id: &ConversationId, page: Vec<Message>, since: u64) {
        self.threads
            .entry(conversation_id.clone())
            .or_default()
            .fold_page(page, since);
    }

    pub fn append(&mut self, conversation_id: &ConversationId, message: Message) {
        let revision = self.bump();
        let partition = self.threads.entry(conversation_id.clone()).or_default();
        partition.written.insert(message.id.clone(), revision);
        upsert_sorted(&mut partition.messages, message);
    }

    /// Replaces a cached message with a newer server copy. Returns `false`
    /// when its thread is not cached or does not hold it.
    pub fn patch_message(&mut self, message: &Message) -> bool {
        let revision = self.revision + 1;
        let Some(partition) = self.threads.get_mut(&message.conversation_id) else {
            return false;
        };
        if !partition.messages.iter().any(|existing| existing.id == message.id) {
            return false;
        }
        partition.written.insert(message.id.clone(), revision);
        upsert_sorted(&mut partition.messages, message.clone());
        self.revision = revision;
        true
    }

    /// Soft-deletes a message in whichever partition holds it.
    pub fn mark_deleted(&mut self, message_id: &MessageId) -> Option<ConversationId> {
        let revision = self.revision + 1;
        let conversation_id = self
            .threads
            .iter_mut()
            .find_map(|(conversation_id, partition)| {
                let message = partition
                    .messages
                    .iter_mut()
                    .find(|message| &message.id == message_id)?;
                message.is_deleted = true;
                partition.written.insert(message_id.clone(), revision);
                Some(conversation_id.clone())
            })?;
        self.revision = revision;
        Some(conversation_id)
    }

    pub fn newest_visible(&self, conversation_id: &ConversationId) -> Option<&Message> {
        self.threads
            .get(conversation_id)?
            .messages
            .iter()
            .rev()
            .find(|message| message.is_visible())
    }

    /// Adds `user_id` to `read_by` on every listed message in one partition.
    /// Returns how many messages gained the reader.
    pub fn patch_read_by(
        &mut self,
        conversation_id: &ConversationId,
        message_ids: &[MessageId],
        user_id: &UserId,
    ) -> usize {
        let revision = self.revision + 1;
        let Some(partition) = self.threads.get_mut(conversation_id) else {
            return 0;
        };
        let mut newly_read = 0;
        for message in partition
            .messages
            .iter_mut()
            .filter(|message| message_ids.contains(&message.id))
        {
            if message.read_by.insert(user_id.clone()) {
                partition.written.insert(message.id.clone(), revision);
                newly_read += 1;
            }
        }
        if newly_read > 0 {
            self.revision = revision;
        }
        newly_read
    }

    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

fn upsert_sorted(thread: &mut Vec<Message>, message: Message) {
    thread.retain(|existing| existing.id != message.id);
    let position = thread.partition_point(|existing| existing.thread_order() <= message.thread_order());
    thread.insert(position, message);
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use shared::domain::Participant;

    use super::*;

    fn message(id: &str, conversation_id: &str, second: u32) -> Message {
        Message {
            id: MessageId::from(id),
            conversation_id: ConversationId::from(conversation_id),
            sender: Participant {
                id: UserId::from("u2"),
                name: "Ben".into(),
                email: String::new(),
                avatar: None,
            },
            content: format!("body {id}"),
            attachments: Vec::new(),
            read_by: Default::default(),
            is_deleted: false,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, second).unwrap(),
            updated_at: None,
        }
    }

    fn ids(cache: &ThreadCache, conversation_id: &str) -> Vec<String> {
        cache
            .get(&conversation_id.into())
            .unwrap_or_default()
            .iter()
            .map(|m| m.id.to_string())
            .collect()
    }

    #[test]
    fn append_keeps_created_at_order_regardless_of_arrival() {
        let mut cache = ThreadCache::new();
        let c1 = ConversationId::from("c1");
        cache.append(&c1, message("m3", "c1", 30));
        cache.append(&c1, message("m1", "c1", 10));
        cache.append(&c1, message("m2", "c1", 20));
        assert_eq!(ids(&cache, "c1"), ["m1", "m2", "m3"]);
    }

    #[test]
    fn equal_timestamps_are_ordered_by_id() {
        let mut cache = ThreadCache::new();
        let c1 = ConversationId::from("c1");
        cache.append(&c1, message("b", "c1", 10));
        cache.append(&c1, message("a", "c1", 10));
        assert_eq!(ids(&cache, "c1"), ["a", "b"]);
    }

    #[test]
    fn merge_deduplicates_overlapping_pages() {
        let mut cache = ThreadCache::new();
        let c1 = ConversationId::from("c1");
        cache.replace(&c1, vec![message("m3", "c1", 30), message("m4", "c1", 40)], 0);
        cache.merge(
            &c1,
            vec![message("m1", "c1", 10), message("m2", "c1", 20), message("m3", "c1", 30)],
            cache.revision(),
        );
        assert_eq!(ids(&cache, "c1"), ["m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn partitions_are_isolated() {
        let mut cache = ThreadCache::new();
        cache.replace(&"c1".into(), vec![message("m1", "c1", 10)], 0);
        cache.replace(&"c2".into(), vec![message("m2", "c2", 10)], 0);

        cache.append(&"c1".into(), message("m3", "c1", 20));
        assert_eq!(ids(&cache, "c1"), ["m1", "m3"]);
        assert_eq!(ids(&cache, "c2"), ["m2"]);
    }

    #[test]
    fn read_by_patch_is_idempotent() {
        let mut cache = ThreadCache::new();
        let c1 = ConversationId::from("c1");
        cache.replace(&c1, vec![message("m1", "c1", 10), message("m2", "c1", 20)], 0);
        let reader = UserId::from("u1");
        let batch = [MessageId::from("m1"), MessageId::from("m2"), MessageId::from("other")];

        assert_eq!(cache.patch_read_by(&c1, &batch, &reader), 2);
        assert_eq!(cache.patch_read_by(&c1, &batch, &reader), 0);
        for message in cache.get(&c1).expect("thread") {
            assert_eq!(message.read_by.len(), 1);
            assert!(message.is_read_by(&reader));
        }
    }

    #[test]
    fn soft_delete_keeps_message_and_exposes_previous_visible() {
        let mut cache = ThreadCache::new();
        let c1 = ConversationId::from("c1");
        cache.replace(&c1, vec![message("m1", "c1", 10), message("m2", "c1", 20)], 0);

        assert_eq!(cache.mark_deleted(&"m2".into()), Some(c1.clone()));
        assert_eq!(ids(&cache, "c1"), ["m1", "m2"]);
        assert_eq!(cache.newest_visible(&c1).map(|m| m.id.as_str()), Some("m1"));
        assert_eq!(cache.mark_deleted(&"missing".into()), None);
    }

    #[test]
    fn patch_message_requires_cached_entry() {
        let mut cache = ThreadCache::new();
        let c1 = ConversationId::from("c1");
        cache.replace(&c1, vec![message("m1", "c1", 10)], 0);

        let mut edited = message("m1", "c1", 10);
        edited.content = "edited".into();
        assert!(cache.patch_message(&edited));
        assert_eq!(cache.get(&c1).expect("thread")[0].content, "edited");
        assert!(!cache.patch_message(&message("m9", "c1", 50)));
    }

    #[test]
    fn first_page_keeps_messages_written_while_it_was_in_flight() {
        let mut cache = ThreadCache::new();
        let c1 = ConversationId::from("c1");
        cache.replace(&c1, vec![message("m1", "c1", 10)], 0);

        let since = cache.revision();
        cache.append(&c1, message("m2", "c1", 20));
        let mut edited = message("m1", "c1", 10);
        edited.content = "edited".into();
        cache.patch_message(&edited);

        // Snapshot taken before either write.
        assert!(cache.replace(&c1, vec![message("m1", "c1", 10)], since));
        assert_eq!(ids(&cache, "c1"), ["m1", "m2"]);
        assert_eq!(cache.get(&c1).expect("thread")[0].content, "edited");
    }

    #[test]
    fn first_page_drops_entries_absent_from_the_server() {
        let mut cache = ThreadCache::new();
        let c1 = ConversationId::from("c1");
        cache.append(&c1, message("m1", "c1", 10));

        let since = cache.revision();
        assert!(cache.replace(&c1, vec![message("m2", "c1", 20)], since));
        assert_eq!(ids(&cache, "c1"), ["m2"]);
    }

    #[test]
    fn older_first_page_cannot_overwrite_a_newer_one() {
        let mut cache = ThreadCache::new();
        let c1 = ConversationId::from("c1");
        let early = cache.revision();
        cache.append(&"c2".into(), message("x1", "c2", 5));
        let late = cache.revision();

        assert!(cache.replace(&c1, vec![message("m1", "c1", 10), message("m2", "c1", 20)], late));
        assert!(!cache.replace(&c1, vec![message("m1", "c1", 10)], early));
        assert_eq!(ids(&cache, "c1"), ["m1", "m2"]);
    }

    #[test]
    fn older_page_does_not_undo_a_local_delete() {
        let mut cache = ThreadCache::new();
        let c1 = ConversationId::from("c1");
        cache.replace(&c1, vec![message("m2", "c1", 20)], 0);

        let since = cache.revision();
        cache.mark_deleted(&"m2".into());
        cache.merge(&c1, vec![message("m1", "c1", 10), message("m2", "c1", 20)], since);

        assert_eq!(ids(&cache, "c1"), ["m1", "m2"]);
        assert!(!cache.get(&c1).expect("thread")[1].is_visible());
    }
}
