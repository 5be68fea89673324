//! Wire event types for the per-chat and global streams
//!
//! Everything pushed over a duplex connection is one of these tagged
//! enums; connection owners consume them through a single dispatch point
//! instead of per-event callbacks.

use serde::{Deserialize, Serialize};

use crate::types::{ChatId, ChatSession, Message, ServerStats, UserId};

// =============================================================================
// Per-chat stream events
// =============================================================================

/// Events emitted by a per-chat duplex connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    /// New or updated message pushed by the store
    ///
    /// The payload's own `chat_id` decides which session it lands in; it is
    /// not necessarily the chat this connection subscribed to.
    MessageReceived { message: Message },

    /// A participant started or stopped typing
    TypingChanged {
        chat_id: ChatId,
        user_id: UserId,
        typing: bool,
    },

    /// Chat was assigned to an operator
    ChatAssigned {
        chat_id: ChatId,
        operator_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        operator_name: Option<String>,
    },

    /// Chat was closed
    ChatInactive { chat_id: ChatId },

    /// Transport re-established the link on its own
    Reconnected,

    /// Non-fatal transport-level error report
    Error { message: String },
}

// =============================================================================
// Global stream events
// =============================================================================

/// Events emitted by the per-identity global connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GlobalEvent {
    /// Coarse server-side counters
    StatsUpdate { stats: ServerStats },

    /// Presence delta: user connected
    UserOnline { user_id: UserId },

    /// Presence delta: user disconnected
    UserOffline { user_id: UserId },

    /// Coarse chat lifecycle event
    ChatEvent { event: ChatLifecycleEvent },
}

/// Chat lifecycle payloads carried on the global channel
///
/// Every variant names the chat; the full session payload is optional. An
/// id-only event forces a point fetch before the session table is touched,
/// so the table never sees partial data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatLifecycleEvent {
    New {
        chat_id: ChatId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat: Option<Box<ChatSession>>,
    },
    Assigned {
        chat_id: ChatId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        operator_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat: Option<Box<ChatSession>>,
    },
    Inactive {
        chat_id: ChatId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat: Option<Box<ChatSession>>,
    },
    Message {
        chat_id: ChatId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<Box<Message>>,
    },
}

impl ChatLifecycleEvent {
    /// The chat this event is about
    pub fn chat_id(&self) -> &ChatId {
        match self {
            Self::New { chat_id, .. }
            | Self::Assigned { chat_id, .. }
            | Self::Inactive { chat_id, .. }
            | Self::Message { chat_id, .. } => chat_id,
        }
    }
}
