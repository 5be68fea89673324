//! Per-chat connection management
//!
//! Owns one live duplex connection per subscribed chat, the reconnect
//! backoff timers, and the resync cursor table. All of that state lives
//! inside the manager instance; callers hold the manager by handle.
//!
//! Connection failures never surface to callers: the worker degrades to
//! eventual consistency through backoff plus resync. The one exception is
//! an authorization failure on stream open, which parks the chat in a
//! terminal state since retrying cannot succeed with the same credentials.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use deskline_shared::{
    ChatBackend, ChatId, ChatKind, ChatStatus, ChatStreamEvent, Identity, SyncCursor,
};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::state::SyncState;
use crate::sync;

/// Health of one chat's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    /// Between open attempts; feeds the optional "reconnecting" indicator
    Reconnecting,
    /// Authorization failed; no further attempts for this chat
    Terminal,
}

/// Bookkeeping for one subscribed chat
struct ChatSubscription {
    status: Arc<RwLock<ConnectionStatus>>,
    task: JoinHandle<()>,
}

/// Registry of per-chat connections and their resync cursors
pub struct ConnectionManager {
    backend: Arc<dyn ChatBackend>,
    state: Arc<SyncState>,
    identity: Identity,
    config: EngineConfig,
    subscriptions: RwLock<HashMap<ChatId, ChatSubscription>>,
    /// High-water marks survive unsubscribe so a reopened chat resyncs
    /// incrementally instead of refetching everything
    cursors: Arc<RwLock<HashMap<ChatId, SyncCursor>>>,
}

impl ConnectionManager {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        state: Arc<SyncState>,
        identity: Identity,
        config: EngineConfig,
    ) -> Self {
        Self {
            backend,
            state,
            identity,
            config,
            subscriptions: RwLock::new(HashMap::new()),
            cursors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Open (or keep) the connection for a chat
    ///
    /// Idempotent: a healthy existing connection is left alone; a stale or
    /// terminal record is torn down first. Exactly one worker task exists
    /// per chat id.
    pub async fn subscribe(&self, chat_id: ChatId, kind: ChatKind) {
        let mut subscriptions = self.subscriptions.write().await;

        if let Some(existing) = subscriptions.get(&chat_id) {
            let status = *existing.status.read().await;
            if !existing.task.is_finished() && status != ConnectionStatus::Terminal {
                tracing::debug!(chat_id = %chat_id, "Already subscribed to chat");
                return;
            }
            existing.task.abort();
            subscriptions.remove(&chat_id);
        }

        let status = Arc::new(RwLock::new(ConnectionStatus::Reconnecting));
        let worker = ChatStreamWorker {
            chat_id: chat_id.clone(),
            kind,
            backend: Arc::clone(&self.backend),
            state: Arc::clone(&self.state),
            identity: self.identity,
            config: self.config.clone(),
            status: Arc::clone(&status),
            cursors: Arc::clone(&self.cursors),
        };
        let task = tokio::spawn(worker.run());
        subscriptions.insert(chat_id.clone(), ChatSubscription { status, task });

        tracing::info!(
            chat_id = %chat_id,
            total_subscriptions = subscriptions.len(),
            "Subscribed to chat"
        );
    }

    /// Close the connection and cancel any pending backoff timer
    ///
    /// The chat's cursor is kept so a later reopen stays incremental.
    pub async fn unsubscribe(&self, chat_id: &ChatId) {
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(subscription) = subscriptions.remove(chat_id) {
            subscription.task.abort();
            tracing::info!(
                chat_id = %chat_id,
                remaining_subscriptions = subscriptions.len(),
                "Unsubscribed from chat"
            );
        }
    }

    pub async fn is_connected(&self, chat_id: &ChatId) -> bool {
        self.status(chat_id).await == Some(ConnectionStatus::Connected)
    }

    pub async fn status(&self, chat_id: &ChatId) -> Option<ConnectionStatus> {
        let subscriptions = self.subscriptions.read().await;
        match subscriptions.get(chat_id) {
            Some(subscription) => Some(*subscription.status.read().await),
            None => None,
        }
    }

    pub async fn subscription_count(&self) -> usize {
        let subscriptions = self.subscriptions.read().await;
        subscriptions.len()
    }

    pub async fn cursor(&self, chat_id: &ChatId) -> Option<SyncCursor> {
        let cursors = self.cursors.read().await;
        cursors.get(chat_id).copied()
    }

    /// Abort every worker; used only on engine teardown
    pub async fn shutdown(&self) {
        let mut subscriptions = self.subscriptions.write().await;
        let count = subscriptions.len();
        for (_, subscription) in subscriptions.drain() {
            subscription.task.abort();
        }
        if count > 0 {
            tracing::info!(closed = count, "Closed all chat connections");
        }
    }
}

/// The per-chat worker: open, resync, drain, back off, repeat
struct ChatStreamWorker {
    chat_id: ChatId,
    kind: ChatKind,
    backend: Arc<dyn ChatBackend>,
    state: Arc<SyncState>,
    identity: Identity,
    config: EngineConfig,
    status: Arc<RwLock<ConnectionStatus>>,
    cursors: Arc<RwLock<HashMap<ChatId, SyncCursor>>>,
}

impl ChatStreamWorker {
    async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            match self
                .backend
                .open_chat_stream(&self.chat_id, &self.identity)
                .await
            {
                Ok(handle) => {
                    attempt = 0;
                    *self.status.write().await = ConnectionStatus::Connected;
                    tracing::info!(chat_id = %self.chat_id, "Chat stream open");

                    self.resync().await;

                    let mut events = handle.events;
                    while let Some(event) = events.next().await {
                        self.dispatch(event).await;
                    }

                    *self.status.write().await = ConnectionStatus::Reconnecting;
                    tracing::warn!(chat_id = %self.chat_id, "Chat stream closed; scheduling reconnect");
                }
                Err(error) if error.is_transient() => {
                    tracing::warn!(
                        chat_id = %self.chat_id,
                        error = %error,
                        "Chat stream open failed; will retry"
                    );
                }
                Err(error) => {
                    *self.status.write().await = ConnectionStatus::Terminal;
                    tracing::warn!(
                        chat_id = %self.chat_id,
                        error = %error,
                        "Chat stream open failed terminally"
                    );
                    return;
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = backoff_delay(
                self.config.reconnect_base_delay,
                self.config.reconnect_max_delay,
                attempt,
            );
            tracing::debug!(
                chat_id = %self.chat_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Backing off before reconnect"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Catch up from the high-water mark; cold open fetches everything
    async fn resync(&self) {
        let since = {
            let cursors = self.cursors.read().await;
            cursors.get(&self.chat_id).copied()
        };
        match sync::resync(
            self.backend.as_ref(),
            &self.state,
            &self.chat_id,
            self.kind,
            since,
            &self.config,
        )
        .await
        {
            Ok(Some(high_water)) => self.advance_cursor(&self.chat_id, high_water).await,
            Ok(None) => {}
            Err(error) => {
                // Cursor stays put; the next reconnect repeats this resync.
                tracing::warn!(chat_id = %self.chat_id, error = %error, "Resync failed");
            }
        }
    }

    async fn advance_cursor(&self, chat_id: &ChatId, cursor: SyncCursor) {
        let mut cursors = self.cursors.write().await;
        let entry = cursors.entry(chat_id.clone()).or_insert(cursor);
        *entry = entry.advanced(cursor);
    }

    async fn dispatch(&self, event: ChatStreamEvent) {
        match event {
            ChatStreamEvent::MessageReceived { message } => {
                // Keyed by the payload's own chat id, which is not
                // necessarily the chat this connection subscribed to.
                let target = message.chat_id.clone();
                let kind = if target == self.chat_id {
                    self.kind
                } else {
                    self.state.kind_of(&target).await.unwrap_or_default()
                };
                if let Some(high_water) =
                    self.state.apply_messages(&target, kind, vec![message]).await
                {
                    self.advance_cursor(&target, high_water).await;
                }
            }
            ChatStreamEvent::TypingChanged {
                chat_id,
                user_id,
                typing,
            } => {
                self.state.set_typing(&chat_id, user_id, typing).await;
            }
            ChatStreamEvent::ChatAssigned {
                chat_id,
                operator_id,
                operator_name,
            } => {
                self.state
                    .assign_operator(&chat_id, operator_id, operator_name)
                    .await;
            }
            ChatStreamEvent::ChatInactive { chat_id } => {
                self.state.set_status(&chat_id, ChatStatus::Inactive).await;
            }
            ChatStreamEvent::Reconnected => {
                tracing::info!(chat_id = %self.chat_id, "Transport reconnected; resyncing");
                self.resync().await;
            }
            ChatStreamEvent::Error { message } => {
                tracing::warn!(
                    chat_id = %self.chat_id,
                    error = %message,
                    "Chat stream reported error"
                );
            }
        }
    }
}

/// Doubling delay, capped
pub(crate) fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(2u32.saturating_pow(exponent)).min(cap)
}
