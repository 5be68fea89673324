//! Engine facade
//!
//! The component the hosting shell owns: it seeds the session table over
//! REST, runs the global channel for staff roles, hands out per-chat
//! lifecycle hooks, and exposes read-only snapshots and role-projected
//! lists. One instance per signed-in identity.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use deskline_shared::{
    ChatBackend, ChatId, ChatSession, Identity, Message, MessageId, TransportError, UserId,
};
use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::EngineConfig;
use crate::connection::{ConnectionManager, ConnectionStatus};
use crate::error::EngineError;
use crate::global::GlobalChannel;
use crate::projection;
use crate::projection::{OperatorChats, SupervisorChats};
use crate::state::{EngineStats, SyncState};

pub struct SyncEngine {
    identity: Identity,
    backend: Arc<dyn ChatBackend>,
    config: EngineConfig,
    state: Arc<SyncState>,
    connections: ConnectionManager,
    global: GlobalChannel,
}

impl SyncEngine {
    pub fn new(backend: Arc<dyn ChatBackend>, identity: Identity, config: EngineConfig) -> Self {
        let state = Arc::new(SyncState::new(&config));
        let connections = ConnectionManager::new(
            Arc::clone(&backend),
            Arc::clone(&state),
            identity,
            config.clone(),
        );
        let global = GlobalChannel::new(
            Arc::clone(&backend),
            Arc::clone(&state),
            identity,
            config.clone(),
        );
        Self {
            identity,
            backend,
            config,
            state,
            connections,
            global,
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Seed the session table and, for staff roles, open the global channel
    pub async fn start(&self) -> Result<(), EngineError> {
        let retry_strategy =
            ExponentialBackoff::from_millis(self.config.fetch_retry_base_delay.as_millis() as u64)
                .max_delay(self.config.fetch_retry_max_delay)
                .take(self.config.fetch_max_retries)
                .map(jitter);
        let chats = RetryIf::spawn(
            retry_strategy,
            || self.backend.fetch_chats(&self.identity),
            |error: &TransportError| error.is_transient(),
        )
        .await?;

        let seeded = chats.len();
        for chat in chats {
            self.state.upsert_session(chat).await;
        }
        tracing::info!(
            user_id = %self.identity.user_id,
            role = ?self.identity.role,
            seeded,
            "Engine started"
        );

        self.global.start().await;
        Ok(())
    }

    /// Tear down every connection; the engine is not usable afterwards
    pub async fn shutdown(&self) {
        self.connections.shutdown().await;
        self.global.stop().await;
        tracing::info!(user_id = %self.identity.user_id, "Engine shut down");
    }

    // =========================================================================
    // Chat lifecycle
    // =========================================================================

    /// Open a chat view: subscribes its duplex connection, which cold-opens
    /// the full history on first sync
    pub async fn open_chat(&self, chat_id: &ChatId) {
        let kind = self.state.kind_of(chat_id).await.unwrap_or_default();
        self.connections.subscribe(chat_id.clone(), kind).await;
    }

    /// Close a chat view: drops the connection and its backoff timer
    ///
    /// The resync cursor survives, so reopening is incremental.
    pub async fn close_chat(&self, chat_id: &ChatId) {
        self.connections.unsubscribe(chat_id).await;
    }

    pub async fn is_connected(&self, chat_id: &ChatId) -> bool {
        self.connections.is_connected(chat_id).await
    }

    pub async fn connection_status(&self, chat_id: &ChatId) -> Option<ConnectionStatus> {
        self.connections.status(chat_id).await
    }

    pub async fn global_status(&self) -> ConnectionStatus {
        self.global.status().await
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Optimistically insert the message, then write it over REST
    ///
    /// The placeholder shows up in snapshots immediately; the authoritative
    /// message arriving via push replaces it through the reconciler. On a
    /// rejected write the placeholder is rolled back and the error returned
    /// so the UI can offer a retry.
    pub async fn send(&self, chat_id: &ChatId, text: &str) -> Result<MessageId, EngineError> {
        let kind = self.state.kind_of(chat_id).await.unwrap_or_default();
        let placeholder = Message::placeholder(
            chat_id.clone(),
            self.identity.user_id,
            self.identity.role.sender_type(),
            text,
            OffsetDateTime::now_utc(),
        );
        let placeholder_id = placeholder.id;
        self.state
            .apply_messages(chat_id, kind, vec![placeholder])
            .await;

        match self
            .backend
            .send_message(
                chat_id,
                self.identity.user_id,
                text,
                self.identity.role.sender_type(),
            )
            .await
        {
            Ok(message_id) => {
                tracing::debug!(chat_id = %chat_id, message_id, "Message accepted");
                Ok(MessageId::Confirmed(message_id))
            }
            Err(error) => {
                if let Some(key) = placeholder_id.correlation_key() {
                    self.state.rollback_placeholder(chat_id, key).await;
                }
                tracing::warn!(chat_id = %chat_id, error = %error, "Send failed; placeholder rolled back");
                Err(EngineError::SendFailed(error))
            }
        }
    }

    // =========================================================================
    // Snapshots and projections
    // =========================================================================

    pub async fn sessions(&self) -> Vec<ChatSession> {
        self.state.sessions_snapshot().await
    }

    pub async fn session(&self, chat_id: &ChatId) -> Option<ChatSession> {
        self.state.session(chat_id).await
    }

    pub async fn online_users(&self) -> HashSet<UserId> {
        self.state.online_snapshot().await
    }

    pub async fn typing_in(&self, chat_id: &ChatId) -> HashSet<UserId> {
        self.state.typing_in(chat_id).await
    }

    pub async fn typing_snapshot(&self) -> HashMap<ChatId, HashSet<UserId>> {
        self.state.typing_snapshot().await
    }

    pub async fn stats(&self) -> EngineStats {
        self.state.stats().await
    }

    /// Sessions where the current user is the client
    pub async fn client_chats(&self) -> Vec<ChatSession> {
        let snapshot = self.state.sessions_snapshot().await;
        projection::client_chats(&snapshot, self.identity.user_id)
    }

    /// Open/history lists for the current user as operator
    pub async fn operator_chats(&self) -> OperatorChats {
        let snapshot = self.state.sessions_snapshot().await;
        projection::operator_chats(&snapshot, self.identity.user_id)
    }

    /// Inbox/active/history lists over all regular chats
    pub async fn supervisor_chats(&self) -> SupervisorChats {
        let snapshot = self.state.sessions_snapshot().await;
        projection::supervisor_chats(&snapshot)
    }

    /// Staff-track chats the current user participates in
    pub async fn staff_chats(&self) -> Vec<ChatSession> {
        let snapshot = self.state.sessions_snapshot().await;
        projection::staff_chats(&snapshot, self.identity.user_id)
    }
}
