//! Core chat data model shared across Deskline components

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Chat identifier wrapper
///
/// Opaque to the engine; the backing store hands out the string form of a
/// numeric id, and the engine never interprets it beyond equality/hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChatId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChatId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User identifier wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message identifier
///
/// A message is either `Confirmed` with the positive id assigned by the
/// backing store, or `Pending` with the correlation key of a local
/// optimistic send that has not been acknowledged yet. The two states are
/// kept as a tagged variant instead of overloading the sign of one integer.
///
/// Serde is untagged so wire payloads (always confirmed, numeric id)
/// deserialize without ceremony.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Store-assigned positive id
    Confirmed(i64),
    /// Correlation key of an unacknowledged local send
    Pending(Uuid),
}

impl MessageId {
    /// New unique pending id for a local send
    pub fn pending() -> Self {
        Self::Pending(Uuid::new_v4())
    }

    /// Store-assigned id, if confirmed
    pub fn confirmed(&self) -> Option<i64> {
        match self {
            Self::Confirmed(id) => Some(*id),
            Self::Pending(_) => None,
        }
    }

    /// Correlation key, if still pending
    pub fn correlation_key(&self) -> Option<Uuid> {
        match self {
            Self::Confirmed(_) => None,
            Self::Pending(key) => Some(*key),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Confirmed(id) => write!(f, "{}", id),
            Self::Pending(key) => write!(f, "pending:{}", key),
        }
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Which side authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Client,
    Operator,
    System,
}

impl std::fmt::Display for SenderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Operator => write!(f, "operator"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Session partition: regular client/operator chats vs. the staff track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Regular,
    Staff,
}

impl Default for ChatKind {
    fn default() -> Self {
        Self::Regular
    }
}

/// Chat lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    Active,
    Inactive,
}

impl Default for ChatStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl ChatStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Role of the current user, drives projections and channel usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Operator,
    Supervisor,
}

impl Role {
    /// Whether this role keeps a global event channel open
    ///
    /// Only staff roles need to learn about chats they have not opened.
    pub fn uses_global_channel(&self) -> bool {
        matches!(self, Self::Operator | Self::Supervisor)
    }

    /// Sender type stamped on messages authored by this role
    pub fn sender_type(&self) -> SenderType {
        match self {
            Self::Client => SenderType::Client,
            Self::Operator | Self::Supervisor => SenderType::Operator,
        }
    }
}

/// Authenticated identity the engine acts as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: impl Into<UserId>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}

// =============================================================================
// Models
// =============================================================================

/// One chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub sender_type: SenderType,
    pub text: String,
    /// Opaque attachment payloads, passed through untouched
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub edited_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_count: Option<u32>,
}

impl Message {
    /// Build the optimistic placeholder for a local send
    pub fn placeholder(
        chat_id: ChatId,
        sender_id: UserId,
        sender_type: SenderType,
        text: impl Into<String>,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: MessageId::pending(),
            chat_id,
            sender_id,
            sender_type,
            text: text.into(),
            attachments: Vec::new(),
            created_at,
            edited_at: None,
            reactions: None,
            read_count: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.id.is_pending()
    }

    pub fn confirmed_id(&self) -> Option<i64> {
        self.id.confirmed()
    }
}

/// One conversation thread with its ordered message history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: ChatId,
    #[serde(default)]
    pub kind: ChatKind,
    /// Regular chats: the client side. Staff chats: the initiating side.
    #[serde(default)]
    pub client_id: Option<UserId>,
    /// Regular chats: the assigned operator, `None` until assignment.
    /// Staff chats: the receiving side.
    #[serde(default)]
    pub operator_id: Option<UserId>,
    #[serde(default)]
    pub status: ChatStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Sort key for every chat list, descending
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity: OffsetDateTime,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Cached tail of `messages`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    /// Display-only denormalized names, not authoritative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_name: Option<String>,
}

impl ChatSession {
    /// Minimal shell for a chat we only know by id
    ///
    /// Used when message data arrives before the authoritative chat record;
    /// participant fields stay empty until that record lands.
    pub fn shell(id: ChatId, kind: ChatKind, now: OffsetDateTime) -> Self {
        Self {
            id,
            kind,
            client_id: None,
            operator_id: None,
            status: ChatStatus::Active,
            created_at: now,
            last_activity: now,
            messages: Vec::new(),
            last_message: None,
            client_name: None,
            operator_name: None,
        }
    }

    /// Whether the given user is one of the two participants
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.client_id == Some(user_id) || self.operator_id == Some(user_id)
    }

    pub fn is_assigned(&self) -> bool {
        self.operator_id.is_some()
    }
}

// =============================================================================
// Sync cursor and fetch queries
// =============================================================================

/// High-water mark of the last known confirmed message in a chat
///
/// Used to fetch only newer messages after a reconnect. A chat with no
/// cursor has never been synced and gets a full-history cold open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub message_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl SyncCursor {
    /// Cursor position of a confirmed message, `None` for placeholders
    pub fn for_message(message: &Message) -> Option<Self> {
        message.confirmed_id().map(|id| Self {
            message_id: id,
            timestamp: message.created_at,
        })
    }

    /// The further-along of two cursor positions
    pub fn advanced(self, other: Self) -> Self {
        if other.message_id > self.message_id {
            other
        } else {
            self
        }
    }
}

/// Parameters of a message history pull
///
/// With no cursor fields set the backing store returns the entire
/// chronological history, oldest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since_id: Option<i64>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub since_ts: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl MessageQuery {
    /// Entire history, oldest first
    pub fn full_history() -> Self {
        Self::default()
    }

    /// Only messages after the given high-water mark
    pub fn after(cursor: SyncCursor) -> Self {
        Self {
            since_id: Some(cursor.message_id),
            since_ts: Some(cursor.timestamp),
            limit: None,
            offset: None,
        }
    }
}

// =============================================================================
// Server stats
// =============================================================================

/// Coarse counters pushed over the global channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStats {
    #[serde(default)]
    pub active_chats: u32,
    #[serde(default)]
    pub waiting_chats: u32,
    #[serde(default)]
    pub operators_online: u32,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).unwrap()
    }

    #[test]
    fn test_chat_id_from_numeric() {
        let id = ChatId::from(42);
        assert_eq!(id.as_str(), "42");
        assert_eq!(id, ChatId::from("42"));
    }

    #[test]
    fn test_message_id_serde_untagged() {
        let confirmed: MessageId = serde_json::from_str("17").unwrap();
        assert_eq!(confirmed, MessageId::Confirmed(17));
        assert_eq!(serde_json::to_string(&confirmed).unwrap(), "17");

        let key = Uuid::new_v4();
        let pending = MessageId::Pending(key);
        let json = serde_json::to_string(&pending).unwrap();
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pending);
        assert!(back.is_pending());
    }

    #[test]
    fn test_message_id_helpers() {
        let pending = MessageId::pending();
        assert!(pending.is_pending());
        assert_eq!(pending.confirmed(), None);
        assert!(pending.correlation_key().is_some());

        let confirmed = MessageId::Confirmed(9);
        assert_eq!(confirmed.confirmed(), Some(9));
        assert_eq!(confirmed.correlation_key(), None);
    }

    #[test]
    fn test_placeholder_message() {
        let msg = Message::placeholder(
            ChatId::from(1),
            UserId(7),
            SenderType::Client,
            "hello",
            ts(100),
        );
        assert!(msg.is_pending());
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.confirmed_id(), None);
    }

    #[test]
    fn test_message_serde_round_trip() {
        let msg = Message {
            id: MessageId::Confirmed(3),
            chat_id: ChatId::from(12),
            sender_id: UserId(5),
            sender_type: SenderType::Operator,
            text: "on it".to_string(),
            attachments: vec![serde_json::json!({"url": "img.png"})],
            created_at: ts(1_700_000_000),
            edited_at: None,
            reactions: None,
            read_count: Some(1),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_session_shell_is_empty() {
        let shell = ChatSession::shell(ChatId::from(8), ChatKind::Regular, ts(50));
        assert_eq!(shell.client_id, None);
        assert_eq!(shell.operator_id, None);
        assert_eq!(shell.status, ChatStatus::Active);
        assert!(shell.messages.is_empty());
        assert!(!shell.is_assigned());
    }

    #[test]
    fn test_session_participation() {
        let mut session = ChatSession::shell(ChatId::from(8), ChatKind::Staff, ts(50));
        session.client_id = Some(UserId(1));
        session.operator_id = Some(UserId(2));
        assert!(session.has_participant(UserId(1)));
        assert!(session.has_participant(UserId(2)));
        assert!(!session.has_participant(UserId(3)));
    }

    #[test]
    fn test_role_channel_usage() {
        assert!(!Role::Client.uses_global_channel());
        assert!(Role::Operator.uses_global_channel());
        assert!(Role::Supervisor.uses_global_channel());
        assert_eq!(Role::Client.sender_type(), SenderType::Client);
        assert_eq!(Role::Supervisor.sender_type(), SenderType::Operator);
    }

    #[test]
    fn test_cursor_advance() {
        let a = SyncCursor {
            message_id: 41,
            timestamp: ts(100),
        };
        let b = SyncCursor {
            message_id: 43,
            timestamp: ts(120),
        };
        assert_eq!(a.advanced(b).message_id, 43);
        assert_eq!(b.advanced(a).message_id, 43);
    }

    #[test]
    fn test_query_after_cursor() {
        let cursor = SyncCursor {
            message_id: 41,
            timestamp: ts(100),
        };
        let query = MessageQuery::after(cursor);
        assert_eq!(query.since_id, Some(41));
        assert!(query.since_ts.is_some());
        assert_eq!(MessageQuery::full_history(), MessageQuery::default());
    }
}
