//! Shared engine state
//!
//! Single writer for the session table, the online set, the typing map,
//! and the stats snapshot. Connections and the sync protocol propose
//! mutations through these methods; nothing else touches the table, so
//! every merge runs through one reconciler.

use std::collections::{HashMap, HashSet};

use deskline_shared::{
    ChatId, ChatKind, ChatSession, ChatStatus, Message, ServerStats, SyncCursor, UserId,
};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::session::SessionTable;

/// Counters derived from the session table plus the last server push
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub active_chats: usize,
    pub unassigned_chats: usize,
    pub inactive_chats: usize,
    pub staff_chats: usize,
    pub online_users: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerStats>,
}

/// Engine state shared across connections
pub struct SyncState {
    sessions: RwLock<SessionTable>,
    online: RwLock<HashSet<UserId>>,
    typing: RwLock<HashMap<ChatId, HashSet<UserId>>>,
    stats: RwLock<EngineStats>,
}

impl SyncState {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            sessions: RwLock::new(SessionTable::new(config.correlation_window)),
            online: RwLock::new(HashSet::new()),
            typing: RwLock::new(HashMap::new()),
            stats: RwLock::new(EngineStats::default()),
        }
    }

    // =========================================================================
    // Session table
    // =========================================================================

    /// Reconcile a message batch into its chat
    ///
    /// Returns the batch's confirmed high-water mark for cursor tracking.
    pub async fn apply_messages(
        &self,
        chat_id: &ChatId,
        kind: ChatKind,
        incoming: Vec<Message>,
    ) -> Option<SyncCursor> {
        let count = incoming.len();
        let high_water = {
            let mut sessions = self.sessions.write().await;
            sessions.apply_messages(chat_id, kind, incoming)
        };
        tracing::debug!(
            chat_id = %chat_id,
            batch_size = count,
            "Reconciled message batch"
        );
        high_water
    }

    /// Drop the placeholder of a failed send
    pub async fn rollback_placeholder(&self, chat_id: &ChatId, key: Uuid) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            sessions.rollback_placeholder(chat_id, key)
        };
        if removed {
            tracing::debug!(chat_id = %chat_id, correlation_key = %key, "Rolled back placeholder");
        }
        removed
    }

    /// Land an authoritative chat record
    pub async fn upsert_session(&self, session: ChatSession) {
        {
            let mut sessions = self.sessions.write().await;
            sessions.upsert(session);
        }
        self.refresh_stats().await;
    }

    /// Mark a chat active/inactive and refresh stats
    pub async fn set_status(&self, chat_id: &ChatId, status: ChatStatus) -> bool {
        let changed = {
            let mut sessions = self.sessions.write().await;
            sessions.set_status(chat_id, status)
        };
        if changed {
            self.refresh_stats().await;
        } else {
            tracing::warn!(chat_id = %chat_id, "Status change for unknown chat ignored");
        }
        changed
    }

    /// Record an operator assignment and refresh stats
    pub async fn assign_operator(
        &self,
        chat_id: &ChatId,
        operator_id: UserId,
        operator_name: Option<String>,
    ) -> bool {
        let changed = {
            let mut sessions = self.sessions.write().await;
            sessions.assign_operator(chat_id, operator_id, operator_name)
        };
        if changed {
            tracing::debug!(chat_id = %chat_id, operator_id = %operator_id, "Chat assigned");
            self.refresh_stats().await;
        } else {
            tracing::warn!(chat_id = %chat_id, "Assignment for unknown chat ignored");
        }
        changed
    }

    pub async fn session(&self, chat_id: &ChatId) -> Option<ChatSession> {
        let sessions = self.sessions.read().await;
        sessions.get(chat_id).cloned()
    }

    pub async fn kind_of(&self, chat_id: &ChatId) -> Option<ChatKind> {
        let sessions = self.sessions.read().await;
        sessions.kind_of(chat_id)
    }

    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Cloned view of every session
    pub async fn sessions_snapshot(&self) -> Vec<ChatSession> {
        let sessions = self.sessions.read().await;
        sessions.snapshot()
    }

    // =========================================================================
    // Online set
    // =========================================================================

    pub async fn set_online(&self, user_id: UserId, online: bool) {
        let changed = {
            let mut set = self.online.write().await;
            if online {
                set.insert(user_id)
            } else {
                set.remove(&user_id)
            }
        };
        if changed {
            tracing::debug!(user_id = %user_id, online, "Presence updated");
            self.refresh_stats().await;
        }
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        let set = self.online.read().await;
        set.contains(&user_id)
    }

    pub async fn online_snapshot(&self) -> HashSet<UserId> {
        let set = self.online.read().await;
        set.clone()
    }

    // =========================================================================
    // Typing map
    // =========================================================================

    /// Set or clear a typing flag; no decay timer, expiry is the sender's
    /// responsibility via periodic clear events
    pub async fn set_typing(&self, chat_id: &ChatId, user_id: UserId, typing: bool) {
        let mut map = self.typing.write().await;
        if typing {
            map.entry(chat_id.clone()).or_default().insert(user_id);
        } else if let Some(users) = map.get_mut(chat_id) {
            users.remove(&user_id);
            if users.is_empty() {
                map.remove(chat_id);
            }
        }
    }

    pub async fn typing_in(&self, chat_id: &ChatId) -> HashSet<UserId> {
        let map = self.typing.read().await;
        map.get(chat_id).cloned().unwrap_or_default()
    }

    pub async fn typing_snapshot(&self) -> HashMap<ChatId, HashSet<UserId>> {
        let map = self.typing.read().await;
        map.clone()
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// Merge a server-pushed stats payload
    pub async fn set_server_stats(&self, server: ServerStats) {
        let mut stats = self.stats.write().await;
        stats.server = Some(server);
    }

    pub async fn stats(&self) -> EngineStats {
        let stats = self.stats.read().await;
        *stats
    }

    /// Recompute local counters from the session table
    pub async fn refresh_stats(&self) {
        let (active, unassigned, inactive, staff) = {
            let sessions = self.sessions.read().await;
            let snapshot = sessions.snapshot();
            let mut active = 0;
            let mut unassigned = 0;
            let mut inactive = 0;
            let mut staff = 0;
            for session in &snapshot {
                if session.kind == ChatKind::Staff {
                    staff += 1;
                    continue;
                }
                match session.status {
                    ChatStatus::Active => {
                        active += 1;
                        if !session.is_assigned() {
                            unassigned += 1;
                        }
                    }
                    ChatStatus::Inactive => inactive += 1,
                }
            }
            (active, unassigned, inactive, staff)
        };
        let online_users = {
            let set = self.online.read().await;
            set.len()
        };

        let mut stats = self.stats.write().await;
        stats.active_chats = active;
        stats.unassigned_chats = unassigned;
        stats.inactive_chats = inactive;
        stats.staff_chats = staff;
        stats.online_users = online_users;
    }
}
