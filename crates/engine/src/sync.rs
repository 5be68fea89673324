//! Cursor-based history resynchronization
//!
//! Runs after a reconnect and on the first open of a chat. The pull is
//! strictly additive: it proposes messages through the reconciler and
//! never replaces what is already present, so an overlapping page (the
//! server may re-return the boundary message) is absorbed by
//! deduplication.

use deskline_shared::{ChatBackend, ChatId, ChatKind, MessageQuery, SyncCursor, TransportError};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::EngineConfig;
use crate::state::SyncState;

/// Pull and reconcile history for one chat
///
/// With no cursor this is a cold open and fetches the entire chronological
/// history in one request; with a cursor only newer messages are pulled.
/// Transient pull failures are retried with jittered exponential backoff;
/// a resync that still fails leaves the cursor untouched so the next
/// reconnect repeats it.
///
/// Returns the fetched batch's confirmed high-water mark, if any.
pub async fn resync(
    backend: &dyn ChatBackend,
    state: &SyncState,
    chat_id: &ChatId,
    kind: ChatKind,
    since: Option<SyncCursor>,
    config: &EngineConfig,
) -> Result<Option<SyncCursor>, TransportError> {
    let query = match since {
        Some(cursor) => MessageQuery::after(cursor),
        None => MessageQuery::full_history(),
    };

    let retry_strategy =
        ExponentialBackoff::from_millis(config.fetch_retry_base_delay.as_millis() as u64)
            .max_delay(config.fetch_retry_max_delay)
            .take(config.fetch_max_retries)
            .map(jitter);

    let messages = RetryIf::spawn(
        retry_strategy,
        || backend.fetch_messages(chat_id, query),
        |error: &TransportError| error.is_transient(),
    )
    .await?;

    if messages.is_empty() {
        return Ok(None);
    }

    tracing::debug!(
        chat_id = %chat_id,
        fetched = messages.len(),
        cold_open = since.is_none(),
        "Resync fetched history"
    );

    Ok(state.apply_messages(chat_id, kind, messages).await)
}
