//! Global event channel
//!
//! One connection per operator/supervisor identity carrying presence
//! deltas, server stats, and coarse chat lifecycle events. This is how
//! staff roles learn about chats they have not opened (and so have no
//! per-chat connection for). It is a second ingestion path into the same
//! session table, not a separate cache: message payloads flow through the
//! same reconciler.
//!
//! The channel lives for the whole engine session; it reconnects with the
//! same capped backoff as per-chat connections and is torn down only on
//! engine shutdown.

use std::sync::Arc;

use deskline_shared::{
    ChatBackend, ChatId, ChatLifecycleEvent, ChatSession, ChatStatus, GlobalEvent, Identity,
};
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::connection::ConnectionStatus;
use crate::state::SyncState;

pub struct GlobalChannel {
    backend: Arc<dyn ChatBackend>,
    state: Arc<SyncState>,
    identity: Identity,
    config: EngineConfig,
    status: Arc<RwLock<ConnectionStatus>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GlobalChannel {
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
            status: Arc::new(RwLock::new(ConnectionStatus::Reconnecting)),
            task: Mutex::new(None),
        }
    }

    /// Open the channel; no-op for the client role and for an already
    /// running channel
    pub async fn start(&self) {
        if !self.identity.role.uses_global_channel() {
            tracing::debug!(role = ?self.identity.role, "Global channel not used for this role");
            return;
        }

        let mut task = self.task.lock().await;
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            tracing::debug!("Global channel already running");
            return;
        }

        let worker = GlobalStreamWorker {
            backend: Arc::clone(&self.backend),
            state: Arc::clone(&self.state),
            identity: self.identity,
            config: self.config.clone(),
            status: Arc::clone(&self.status),
        };
        *task = Some(tokio::spawn(worker.run()));
        tracing::info!(user_id = %self.identity.user_id, "Global channel started");
    }

    /// Tear the channel down; only called on full engine shutdown
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        if let Some(task) = task.take() {
            task.abort();
            tracing::info!("Global channel stopped");
        }
    }

    pub async fn status(&self) -> ConnectionStatus {
        *self.status.read().await
    }
}

struct GlobalStreamWorker {
    backend: Arc<dyn ChatBackend>,
    state: Arc<SyncState>,
    identity: Identity,
    config: EngineConfig,
    status: Arc<RwLock<ConnectionStatus>>,
}

impl GlobalStreamWorker {
    async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            match self.backend.open_global_stream(&self.identity).await {
                Ok(handle) => {
                    attempt = 0;
                    *self.status.write().await = ConnectionStatus::Connected;
                    tracing::info!("Global stream open");

                    let mut events = handle.events;
                    while let Some(event) = events.next().await {
                        self.dispatch(event).await;
                    }

                    *self.status.write().await = ConnectionStatus::Reconnecting;
                    tracing::warn!("Global stream closed; scheduling reconnect");
                }
                Err(error) if error.is_transient() => {
                    tracing::warn!(error = %error, "Global stream open failed; will retry");
                }
                Err(error) => {
                    *self.status.write().await = ConnectionStatus::Terminal;
                    tracing::warn!(error = %error, "Global stream open failed terminally");
                    return;
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = crate::connection::backoff_delay(
                self.config.reconnect_base_delay,
                self.config.reconnect_max_delay,
                attempt,
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn dispatch(&self, event: GlobalEvent) {
        match event {
            GlobalEvent::StatsUpdate { stats } => {
                self.state.set_server_stats(stats).await;
            }
            GlobalEvent::UserOnline { user_id } => {
                self.state.set_online(user_id, true).await;
            }
            GlobalEvent::UserOffline { user_id } => {
                self.state.set_online(user_id, false).await;
            }
            GlobalEvent::ChatEvent { event } => {
                self.handle_lifecycle(event).await;
            }
        }
    }

    async fn handle_lifecycle(&self, event: ChatLifecycleEvent) {
        match event {
            ChatLifecycleEvent::New { chat_id, chat } => {
                self.upsert_or_fetch(&chat_id, chat).await;
            }
            ChatLifecycleEvent::Assigned {
                chat_id,
                operator_id,
                chat,
            } => {
                self.upsert_or_fetch(&chat_id, chat).await;
                if let Some(operator_id) = operator_id {
                    self.state.assign_operator(&chat_id, operator_id, None).await;
                }
            }
            ChatLifecycleEvent::Inactive { chat_id, chat } => {
                self.upsert_or_fetch(&chat_id, chat).await;
                self.state.set_status(&chat_id, ChatStatus::Inactive).await;
            }
            ChatLifecycleEvent::Message { chat_id, message } => match message {
                Some(message) => {
                    let target = message.chat_id.clone();
                    let kind = self.state.kind_of(&target).await.unwrap_or_default();
                    self.state.apply_messages(&target, kind, vec![*message]).await;
                }
                // Id-only event: the point fetch brings the fresh tail along.
                None => {
                    self.upsert_or_fetch(&chat_id, None).await;
                }
            },
        }
    }

    /// Upsert a full payload, or point-fetch the chat when the event only
    /// carried an id, so the table never sees partial data
    async fn upsert_or_fetch(&self, chat_id: &ChatId, chat: Option<Box<ChatSession>>) {
        if let Some(chat) = chat {
            self.state.upsert_session(*chat).await;
            return;
        }

        match self.backend.fetch_chat(chat_id).await {
            Ok(Some(chat)) => {
                self.state.upsert_session(chat).await;
            }
            Ok(None) => {
                tracing::warn!(chat_id = %chat_id, "Point fetch found no such chat");
            }
            Err(error) => {
                // Skipped, not queued: the next lifecycle event for this
                // chat repeats the fetch.
                tracing::warn!(chat_id = %chat_id, error = %error, "Point fetch failed");
            }
        }
    }
}
