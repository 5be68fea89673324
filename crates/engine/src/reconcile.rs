//! Message reconciliation
//!
//! Pure merge logic applied whenever message data arrives from any source:
//! optimistic local writes, per-chat pushes, global-channel pushes, and
//! REST history pulls. Arrival order is not trusted; repeated application
//! of the same batch must leave the session unchanged.

use std::collections::HashMap;
use std::time::Duration;

use deskline_shared::{ChatSession, Message, MessageId};
use uuid::Uuid;

/// Merge a batch of incoming messages into a session
///
/// Resolution order per message:
/// 1. same confirmed id already present: overwrite in place (edits,
///    reactions, read counts, server-side name backfill);
/// 2. a pending placeholder with identical text timestamped within
///    `correlation_window`: replace it (optimistic-send confirmation);
/// 3. otherwise append.
///
/// The full list is then deduplicated by confirmed id (last write wins)
/// and re-sorted by `created_at`, and the cached tail and activity stamp
/// are refreshed.
pub fn apply_batch(session: &mut ChatSession, incoming: Vec<Message>, correlation_window: Duration) {
    for message in incoming {
        apply_one(session, message, correlation_window);
    }
    finalize(session);
}

/// Remove the placeholder of a failed local send
///
/// Returns false if no placeholder with the given correlation key exists
/// (already confirmed, or rolled back previously).
pub fn rollback_placeholder(session: &mut ChatSession, key: Uuid) -> bool {
    let before = session.messages.len();
    session
        .messages
        .retain(|m| m.id.correlation_key() != Some(key));
    let removed = session.messages.len() < before;
    if removed {
        session.last_message = session.messages.last().cloned();
    }
    removed
}

fn apply_one(session: &mut ChatSession, incoming: Message, correlation_window: Duration) {
    match incoming.id {
        MessageId::Confirmed(id) => {
            if let Some(existing) = session
                .messages
                .iter_mut()
                .find(|m| m.confirmed_id() == Some(id))
            {
                *existing = incoming;
                return;
            }
            if let Some(slot) = matching_placeholder(session, &incoming, correlation_window) {
                session.messages[slot] = incoming;
                return;
            }
            session.messages.push(incoming);
        }
        // Locally-created placeholders enter through here; they are only
        // ever inserted once per send, keyed by a fresh correlation key.
        MessageId::Pending(_) => session.messages.push(incoming),
    }
}

/// Oldest pending placeholder with identical text inside the window
fn matching_placeholder(
    session: &ChatSession,
    incoming: &Message,
    correlation_window: Duration,
) -> Option<usize> {
    session.messages.iter().position(|m| {
        m.is_pending()
            && m.text == incoming.text
            && (m.created_at - incoming.created_at).unsigned_abs() <= correlation_window
    })
}

/// Restore the session invariants after a merge
///
/// Deduplication runs before the sort so a duplicate delivered through a
/// second ingestion path can never survive under a different position.
fn finalize(session: &mut ChatSession) {
    let mut kept: Vec<Message> = Vec::with_capacity(session.messages.len());
    let mut slot_by_id: HashMap<i64, usize> = HashMap::new();

    for message in session.messages.drain(..) {
        match message.confirmed_id() {
            Some(id) => {
                if let Some(&slot) = slot_by_id.get(&id) {
                    kept[slot] = message;
                } else {
                    slot_by_id.insert(id, kept.len());
                    kept.push(message);
                }
            }
            None => kept.push(message),
        }
    }

    kept.sort_by_key(|m| m.created_at);
    session.messages = kept;

    if let Some(tail) = session.messages.last() {
        session.last_activity = tail.created_at;
        session.last_message = Some(tail.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_shared::{ChatId, ChatKind, SenderType, UserId};
    use time::OffsetDateTime;

    fn ts(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).unwrap()
    }

    fn session() -> ChatSession {
        ChatSession::shell(ChatId::from(1), ChatKind::Regular, ts(0))
    }

    fn confirmed(id: i64, text: &str, at: i64) -> Message {
        Message {
            id: MessageId::Confirmed(id),
            chat_id: ChatId::from(1),
            sender_id: UserId(2),
            sender_type: SenderType::Client,
            text: text.to_string(),
            attachments: Vec::new(),
            created_at: ts(at),
            edited_at: None,
            reactions: None,
            read_count: None,
        }
    }

    fn placeholder(text: &str, at: i64) -> Message {
        Message::placeholder(ChatId::from(1), UserId(2), SenderType::Client, text, ts(at))
    }

    const WINDOW: Duration = Duration::from_secs(10);

    fn assert_invariants(session: &ChatSession) {
        for pair in session.messages.windows(2) {
            assert!(
                pair[0].created_at <= pair[1].created_at,
                "messages out of order"
            );
        }
        let mut ids: Vec<i64> = session
            .messages
            .iter()
            .filter_map(|m| m.confirmed_id())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        let confirmed_count = session
            .messages
            .iter()
            .filter(|m| !m.is_pending())
            .count();
        assert_eq!(ids.len(), confirmed_count, "duplicate confirmed id");
    }

    #[test]
    fn test_out_of_order_batch_is_sorted() {
        let mut chat = session();
        apply_batch(
            &mut chat,
            vec![
                confirmed(3, "third", 300),
                confirmed(1, "first", 100),
                confirmed(2, "second", 200),
            ],
            WINDOW,
        );
        let texts: Vec<&str> = chat.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert_invariants(&chat);
    }

    #[test]
    fn test_idempotent_application() {
        let mut chat = session();
        let batch = vec![confirmed(1, "a", 100), confirmed(2, "b", 200)];
        apply_batch(&mut chat, batch.clone(), WINDOW);
        let once = chat.messages.clone();
        apply_batch(&mut chat, batch, WINDOW);
        assert_eq!(chat.messages, once);
        assert_invariants(&chat);
    }

    #[test]
    fn test_overwrite_in_place_carries_edits() {
        let mut chat = session();
        apply_batch(&mut chat, vec![confirmed(5, "typo", 100)], WINDOW);

        let mut edited = confirmed(5, "fixed", 100);
        edited.edited_at = Some(ts(150));
        apply_batch(&mut chat, vec![edited], WINDOW);

        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].text, "fixed");
        assert_eq!(chat.messages[0].edited_at, Some(ts(150)));
    }

    #[test]
    fn test_placeholder_confirmed_within_window() {
        let mut chat = session();
        apply_batch(&mut chat, vec![placeholder("hello", 100)], WINDOW);
        assert_eq!(chat.messages.len(), 1);
        assert!(chat.messages[0].is_pending());

        apply_batch(&mut chat, vec![confirmed(9, "hello", 104)], WINDOW);
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].confirmed_id(), Some(9));
        assert_invariants(&chat);
    }

    #[test]
    fn test_placeholder_survives_outside_window() {
        let mut chat = session();
        apply_batch(&mut chat, vec![placeholder("hello", 100)], WINDOW);
        apply_batch(&mut chat, vec![confirmed(9, "hello", 140)], WINDOW);

        // Too far apart to correlate: both entries remain.
        assert_eq!(chat.messages.len(), 2);
        assert_invariants(&chat);
    }

    #[test]
    fn test_placeholder_text_must_match() {
        let mut chat = session();
        apply_batch(&mut chat, vec![placeholder("hello", 100)], WINDOW);
        apply_batch(&mut chat, vec![confirmed(9, "hello!", 101)], WINDOW);

        assert_eq!(chat.messages.len(), 2);
        assert!(chat.messages.iter().any(|m| m.is_pending()));
    }

    #[test]
    fn test_rollback_removes_placeholder() {
        let mut chat = session();
        let pending = placeholder("doomed", 100);
        let key = pending.id.correlation_key().unwrap();
        apply_batch(&mut chat, vec![pending, confirmed(1, "kept", 50)], WINDOW);
        assert_eq!(chat.messages.len(), 2);

        assert!(rollback_placeholder(&mut chat, key));
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].text, "kept");
        assert_eq!(chat.last_message.as_ref().unwrap().text, "kept");

        // Second rollback is a no-op.
        assert!(!rollback_placeholder(&mut chat, key));
    }

    #[test]
    fn test_duplicate_ids_last_write_wins() {
        let mut chat = session();
        apply_batch(
            &mut chat,
            vec![confirmed(7, "first write", 100), confirmed(7, "second write", 100)],
            WINDOW,
        );
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].text, "second write");
        assert_invariants(&chat);
    }

    #[test]
    fn test_resync_overlap_absorbed() {
        let mut chat = session();
        apply_batch(&mut chat, vec![confirmed(41, "known", 100)], WINDOW);

        // Resync may re-return the boundary message.
        apply_batch(
            &mut chat,
            vec![
                confirmed(41, "known", 100),
                confirmed(42, "new", 110),
                confirmed(43, "newer", 120),
            ],
            WINDOW,
        );

        let ids: Vec<i64> = chat.messages.iter().filter_map(|m| m.confirmed_id()).collect();
        assert_eq!(ids, vec![41, 42, 43]);
        assert_invariants(&chat);
    }

    #[test]
    fn test_tail_and_activity_updated() {
        let mut chat = session();
        apply_batch(
            &mut chat,
            vec![confirmed(1, "a", 100), confirmed(2, "b", 200)],
            WINDOW,
        );
        assert_eq!(chat.last_activity, ts(200));
        assert_eq!(chat.last_message.as_ref().unwrap().confirmed_id(), Some(2));
    }
}
