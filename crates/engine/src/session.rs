//! Session table
//!
//! The canonical per-process store of chat sessions. All message state
//! flows in through the reconciler; authoritative chat records land via
//! `upsert`, and control events (assignment, closure) mutate the named
//! fields directly.

use std::collections::HashMap;
use std::time::Duration;

use deskline_shared::{ChatId, ChatKind, ChatSession, ChatStatus, Message, SyncCursor, UserId};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::reconcile;

pub struct SessionTable {
    sessions: HashMap<ChatId, ChatSession>,
    correlation_window: Duration,
}

impl SessionTable {
    pub fn new(correlation_window: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            correlation_window,
        }
    }

    /// Merge a message batch into the chat, synthesizing a session shell if
    /// the chat is unknown so the data is never dropped
    ///
    /// Returns the batch's confirmed high-water mark, if any.
    pub fn apply_messages(
        &mut self,
        chat_id: &ChatId,
        kind: ChatKind,
        incoming: Vec<Message>,
    ) -> Option<SyncCursor> {
        let high_water = incoming
            .iter()
            .filter_map(SyncCursor::for_message)
            .reduce(SyncCursor::advanced);

        let session = self
            .sessions
            .entry(chat_id.clone())
            .or_insert_with(|| ChatSession::shell(chat_id.clone(), kind, OffsetDateTime::now_utc()));
        reconcile::apply_batch(session, incoming, self.correlation_window);

        high_water
    }

    /// Remove a failed send's placeholder from the chat
    pub fn rollback_placeholder(&mut self, chat_id: &ChatId, key: Uuid) -> bool {
        match self.sessions.get_mut(chat_id) {
            Some(session) => reconcile::rollback_placeholder(session, key),
            None => false,
        }
    }

    /// Land an authoritative chat record
    ///
    /// Participant fields, status, names, and partition come from the
    /// record; messages already reconciled locally are kept and any
    /// messages carried on the record are merged through the reconciler.
    pub fn upsert(&mut self, incoming: ChatSession) {
        let mut base = self
            .sessions
            .remove(&incoming.id)
            .unwrap_or_else(|| ChatSession::shell(incoming.id.clone(), incoming.kind, incoming.created_at));

        base.kind = incoming.kind;
        base.client_id = incoming.client_id;
        base.operator_id = incoming.operator_id;
        base.status = incoming.status;
        base.created_at = incoming.created_at;
        base.client_name = incoming.client_name;
        base.operator_name = incoming.operator_name;
        if incoming.last_activity > base.last_activity {
            base.last_activity = incoming.last_activity;
        }
        if base.messages.is_empty() && incoming.last_message.is_some() {
            base.last_message = incoming.last_message;
        }
        if !incoming.messages.is_empty() {
            reconcile::apply_batch(&mut base, incoming.messages, self.correlation_window);
        }

        self.sessions.insert(base.id.clone(), base);
    }

    /// Mark a chat active/inactive; false if the chat is unknown
    pub fn set_status(&mut self, chat_id: &ChatId, status: ChatStatus) -> bool {
        match self.sessions.get_mut(chat_id) {
            Some(session) => {
                session.status = status;
                true
            }
            None => false,
        }
    }

    /// Record an operator assignment; false if the chat is unknown
    ///
    /// The display name is only replaced when the event carries one.
    pub fn assign_operator(
        &mut self,
        chat_id: &ChatId,
        operator_id: UserId,
        operator_name: Option<String>,
    ) -> bool {
        match self.sessions.get_mut(chat_id) {
            Some(session) => {
                session.operator_id = Some(operator_id);
                if operator_name.is_some() {
                    session.operator_name = operator_name;
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, chat_id: &ChatId) -> Option<&ChatSession> {
        self.sessions.get(chat_id)
    }

    pub fn kind_of(&self, chat_id: &ChatId) -> Option<ChatKind> {
        self.sessions.get(chat_id).map(|s| s.kind)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Cloned view of every session
    pub fn snapshot(&self) -> Vec<ChatSession> {
        self.sessions.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_shared::{MessageId, SenderType};

    fn ts(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).unwrap()
    }

    fn table() -> SessionTable {
        SessionTable::new(Duration::from_secs(10))
    }

    fn confirmed(chat: i64, id: i64, at: i64) -> Message {
        Message {
            id: MessageId::Confirmed(id),
            chat_id: ChatId::from(chat),
            sender_id: UserId(2),
            sender_type: SenderType::Client,
            text: format!("msg {}", id),
            attachments: Vec::new(),
            created_at: ts(at),
            edited_at: None,
            reactions: None,
            read_count: None,
        }
    }

    fn record(chat: i64) -> ChatSession {
        let mut session = ChatSession::shell(ChatId::from(chat), ChatKind::Regular, ts(10));
        session.client_id = Some(UserId(5));
        session.client_name = Some("Dana".to_string());
        session.last_activity = ts(10);
        session
    }

    #[test]
    fn test_shell_synthesized_for_unknown_chat() {
        let mut table = table();
        let cursor = table.apply_messages(&ChatId::from(3), ChatKind::Regular, vec![confirmed(3, 1, 100)]);

        assert_eq!(cursor.map(|c| c.message_id), Some(1));
        let session = table.get(&ChatId::from(3)).unwrap();
        assert_eq!(session.client_id, None);
        assert_eq!(session.messages.len(), 1);
    }

    #[test]
    fn test_upsert_corrects_shell_and_keeps_messages() {
        let mut table = table();
        table.apply_messages(&ChatId::from(3), ChatKind::Regular, vec![confirmed(3, 1, 100)]);
        table.upsert(record(3));

        let session = table.get(&ChatId::from(3)).unwrap();
        assert_eq!(session.client_id, Some(UserId(5)));
        assert_eq!(session.client_name.as_deref(), Some("Dana"));
        assert_eq!(session.messages.len(), 1, "reconciled messages survive upsert");
        // Local message activity is newer than the record's.
        assert_eq!(session.last_activity, ts(100));
    }

    #[test]
    fn test_upsert_merges_carried_messages() {
        let mut table = table();
        table.apply_messages(&ChatId::from(3), ChatKind::Regular, vec![confirmed(3, 2, 200)]);

        let mut incoming = record(3);
        incoming.messages = vec![confirmed(3, 1, 100), confirmed(3, 2, 200)];
        table.upsert(incoming);

        let session = table.get(&ChatId::from(3)).unwrap();
        let ids: Vec<i64> = session.messages.iter().filter_map(|m| m.confirmed_id()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_batch_high_water_mark() {
        let mut table = table();
        let cursor = table.apply_messages(
            &ChatId::from(1),
            ChatKind::Regular,
            vec![confirmed(1, 41, 100), confirmed(1, 43, 120), confirmed(1, 42, 110)],
        );
        let cursor = cursor.unwrap();
        assert_eq!(cursor.message_id, 43);
        assert_eq!(cursor.timestamp, ts(120));
    }

    #[test]
    fn test_control_mutations() {
        let mut table = table();
        assert!(!table.set_status(&ChatId::from(9), ChatStatus::Inactive));
        assert!(!table.assign_operator(&ChatId::from(9), UserId(7), None));

        table.upsert(record(9));
        assert!(table.assign_operator(&ChatId::from(9), UserId(7), Some("Rae".to_string())));
        assert!(table.set_status(&ChatId::from(9), ChatStatus::Inactive));

        let session = table.get(&ChatId::from(9)).unwrap();
        assert_eq!(session.operator_id, Some(UserId(7)));
        assert_eq!(session.operator_name.as_deref(), Some("Rae"));
        assert_eq!(session.status, ChatStatus::Inactive);

        // A later assignment without a name keeps the display name.
        assert!(table.assign_operator(&ChatId::from(9), UserId(8), None));
        let session = table.get(&ChatId::from(9)).unwrap();
        assert_eq!(session.operator_id, Some(UserId(8)));
        assert_eq!(session.operator_name.as_deref(), Some("Rae"));
    }
}
