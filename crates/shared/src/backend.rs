//! Collaborator contract the sync engine consumes
//!
//! The REST endpoints, their authentication, and the duplex transport all
//! live behind this trait; the engine only sees typed calls and typed
//! event streams.

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::error::TransportError;
use crate::events::{ChatStreamEvent, GlobalEvent};
use crate::types::{ChatId, ChatSession, Identity, Message, MessageQuery, SenderType, UserId};

/// Handle on an open per-chat duplex connection
///
/// Dropping the handle closes the connection. The stream ending without an
/// explicit close signals a disconnect to the owner.
pub struct ChatStreamHandle {
    pub events: BoxStream<'static, ChatStreamEvent>,
}

impl ChatStreamHandle {
    pub fn new(events: impl Stream<Item = ChatStreamEvent> + Send + 'static) -> Self {
        Self {
            events: events.boxed(),
        }
    }
}

impl std::fmt::Debug for ChatStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStreamHandle").finish_non_exhaustive()
    }
}

/// Handle on the open per-identity global connection
pub struct GlobalStreamHandle {
    pub events: BoxStream<'static, GlobalEvent>,
}

impl GlobalStreamHandle {
    pub fn new(events: impl Stream<Item = GlobalEvent> + Send + 'static) -> Self {
        Self {
            events: events.boxed(),
        }
    }
}

impl std::fmt::Debug for GlobalStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalStreamHandle").finish_non_exhaustive()
    }
}

/// Backing store and transport collaborator
///
/// `fetch_messages` returns ascending chronological order, oldest first,
/// and with no cursor in the query it returns the entire history.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// All chat sessions visible to the identity
    async fn fetch_chats(&self, identity: &Identity) -> Result<Vec<ChatSession>, TransportError>;

    /// Point fetch of one chat by id
    async fn fetch_chat(&self, chat_id: &ChatId) -> Result<Option<ChatSession>, TransportError>;

    /// Message history page for one chat
    async fn fetch_messages(
        &self,
        chat_id: &ChatId,
        query: MessageQuery,
    ) -> Result<Vec<Message>, TransportError>;

    /// Write a message; returns the store-assigned id
    async fn send_message(
        &self,
        chat_id: &ChatId,
        sender_id: UserId,
        text: &str,
        sender_type: SenderType,
    ) -> Result<i64, TransportError>;

    /// Open the duplex connection for one chat
    async fn open_chat_stream(
        &self,
        chat_id: &ChatId,
        identity: &Identity,
    ) -> Result<ChatStreamHandle, TransportError>;

    /// Open the per-identity global presence/lifecycle connection
    async fn open_global_stream(
        &self,
        identity: &Identity,
    ) -> Result<GlobalStreamHandle, TransportError>;
}
