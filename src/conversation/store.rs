//! In-memory message log for a single thread
//!
//! The log is append-only with one exception: the assistant message that is
//! still streaming. It lives in an [`Entry::InProgress`] slot whose index is
//! cached, so updates go straight to it and every other entry stays frozen.
//!
//! Message ids are always assigned here and are unique within the thread.
//! The id a backend puts on its payloads only decides which streaming
//! message an update belongs to.

use super::{Message, MessageId, Role};

/// One slot of the conversation log
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Settled(Message),
    InProgress {
        /// Id the backend sent with the payload, if any
        remote_id: Option<MessageId>,
        message: Message,
    },
}

impl Entry {
    pub fn message(&self) -> &Message {
        match self {
            Entry::Settled(message) | Entry::InProgress { message, .. } => message,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Entry::InProgress { .. })
    }
}

/// A decoded stream payload, ready to be folded into the store
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Content for the streaming assistant message. Replaces, not appends.
    /// `id` is the backend's id for the message, not a store id.
    Assistant {
        id: Option<MessageId>,
        content: String,
    },
    /// A complete message of any other role
    Append { role: Role, content: String },
}

/// Observable mutation of the store, one per fold
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Appended(Message),
    Updated(Message),
    Settled(MessageId),
    Cleared,
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    entries: Vec<Entry>,
    in_progress: Option<usize>,
    next_id: u64,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(Entry::message)
    }

    pub fn in_progress(&self) -> Option<&Message> {
        self.in_progress.map(|idx| self.entries[idx].message())
    }

    fn next_local_id(&mut self) -> MessageId {
        self.next_id += 1;
        MessageId(self.next_id)
    }

    fn append(&mut self, message: Message) -> StoreEvent {
        self.entries.push(Entry::Settled(message.clone()));
        StoreEvent::Appended(message)
    }

    pub fn push_human(&mut self, content: &str, attachments: Vec<String>) -> StoreEvent {
        let id = self.next_local_id();
        self.append(Message::new(id, Role::Human, content).with_attachments(attachments))
    }

    pub fn push_error(&mut self, content: &str) -> StoreEvent {
        let id = self.next_local_id();
        self.append(Message::new(id, Role::Error, content))
    }

    /// Fold one decoded payload into the log.
    ///
    /// An assistant update carrying a different backend id than the current
    /// in-progress message settles that message first, so two events come
    /// back. Updates without an id always target the current message.
    pub fn apply(&mut self, update: Update) -> Vec<StoreEvent> {
        match update {
            Update::Assistant { id, content } => {
                let mut events = Vec::new();

                if let Some(idx) = self.in_progress {
                    if let Entry::InProgress { remote_id, message } = &mut self.entries[idx] {
                        if id.is_none() || id == *remote_id {
                            message.content = content;
                            events.push(StoreEvent::Updated(message.clone()));
                            return events;
                        }
                    }
                    events.extend(self.settle());
                }

                let message = Message::new(self.next_local_id(), Role::Assistant, content);
                self.in_progress = Some(self.entries.len());
                self.entries.push(Entry::InProgress {
                    remote_id: id,
                    message: message.clone(),
                });
                events.push(StoreEvent::Appended(message));
                events
            }
            Update::Append { role, content } => {
                let id = self.next_local_id();
                vec![self.append(Message::new(id, role, content))]
            }
        }
    }

    /// Freeze the in-progress message, if there is one
    pub fn settle(&mut self) -> Option<StoreEvent> {
        let idx = self.in_progress.take()?;
        let message = self.entries[idx].message().clone();
        let id = message.id;
        self.entries[idx] = Entry::Settled(message);
        Some(StoreEvent::Settled(id))
    }

    pub fn clear(&mut self) -> StoreEvent {
        self.entries.clear();
        self.in_progress = None;
        StoreEvent::Cleared
    }
}
