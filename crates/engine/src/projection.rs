//! Role-projected chat lists
//!
//! Pure, stateless derivations over a session-table snapshot. Safe to
//! recompute on every state change; nothing here mutates. All lists are
//! sorted by `last_activity`, newest first. Staff chats are a disjoint
//! partition and never appear in the regular-chat views.

use deskline_shared::{ChatKind, ChatSession, UserId};

/// Operator's regular-chat lists
#[derive(Debug, Clone, Default)]
pub struct OperatorChats {
    /// Active chats assigned to this operator
    pub open: Vec<ChatSession>,
    /// Closed chats this operator handled
    pub history: Vec<ChatSession>,
}

/// Supervisor's regular-chat lists
#[derive(Debug, Clone, Default)]
pub struct SupervisorChats {
    /// Active chats awaiting an operator
    pub inbox: Vec<ChatSession>,
    /// Active chats with an operator assigned
    pub active: Vec<ChatSession>,
    /// Every regular chat, open or closed
    pub history: Vec<ChatSession>,
}

/// Sessions where the given client participates
pub fn client_chats(sessions: &[ChatSession], client: UserId) -> Vec<ChatSession> {
    by_recency(
        sessions
            .iter()
            .filter(|s| s.kind == ChatKind::Regular && s.client_id == Some(client))
            .cloned()
            .collect(),
    )
}

pub fn operator_chats(sessions: &[ChatSession], operator: UserId) -> OperatorChats {
    let mine = sessions
        .iter()
        .filter(|s| s.kind == ChatKind::Regular && s.operator_id == Some(operator));

    let (open, history) = mine.fold(
        (Vec::new(), Vec::new()),
        |(mut open, mut history), session| {
            if session.status.is_active() {
                open.push(session.clone());
            } else {
                history.push(session.clone());
            }
            (open, history)
        },
    );

    OperatorChats {
        open: by_recency(open),
        history: by_recency(history),
    }
}

pub fn supervisor_chats(sessions: &[ChatSession]) -> SupervisorChats {
    let regular: Vec<&ChatSession> = sessions
        .iter()
        .filter(|s| s.kind == ChatKind::Regular)
        .collect();

    let inbox = regular
        .iter()
        .filter(|s| s.status.is_active() && !s.is_assigned())
        .map(|s| (*s).clone())
        .collect();
    let active = regular
        .iter()
        .filter(|s| s.status.is_active() && s.is_assigned())
        .map(|s| (*s).clone())
        .collect();
    let history = regular.iter().map(|s| (*s).clone()).collect();

    SupervisorChats {
        inbox: by_recency(inbox),
        active: by_recency(active),
        history: by_recency(history),
    }
}

/// Staff-track chats the given user participates in
pub fn staff_chats(sessions: &[ChatSession], user: UserId) -> Vec<ChatSession> {
    by_recency(
        sessions
            .iter()
            .filter(|s| s.kind == ChatKind::Staff && s.has_participant(user))
            .cloned()
            .collect(),
    )
}

fn by_recency(mut sessions: Vec<ChatSession>) -> Vec<ChatSession> {
    sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    sessions
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_shared::{ChatId, ChatStatus};
    use time::OffsetDateTime;

    fn ts(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).unwrap()
    }

    fn session(
        id: i64,
        kind: ChatKind,
        client: Option<i64>,
        operator: Option<i64>,
        status: ChatStatus,
        activity: i64,
    ) -> ChatSession {
        let mut session = ChatSession::shell(ChatId::from(id), kind, ts(0));
        session.client_id = client.map(UserId);
        session.operator_id = operator.map(UserId);
        session.status = status;
        session.last_activity = ts(activity);
        session
    }

    fn ids(sessions: &[ChatSession]) -> Vec<&str> {
        sessions.iter().map(|s| s.id.as_str()).collect()
    }

    /// A: unassigned/active, B: operator 7/active, C: operator 7/inactive
    fn fixture() -> Vec<ChatSession> {
        vec![
            session(1, ChatKind::Regular, Some(100), None, ChatStatus::Active, 30),
            session(2, ChatKind::Regular, Some(101), Some(7), ChatStatus::Active, 20),
            session(3, ChatKind::Regular, Some(102), Some(7), ChatStatus::Inactive, 10),
        ]
    }

    #[test]
    fn test_supervisor_projection() {
        let sessions = fixture();
        let views = supervisor_chats(&sessions);
        assert_eq!(ids(&views.inbox), vec!["1"]);
        assert_eq!(ids(&views.active), vec!["2"]);
        assert_eq!(ids(&views.history), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_operator_projection() {
        let sessions = fixture();
        let views = operator_chats(&sessions, UserId(7));
        assert_eq!(ids(&views.open), vec!["2"]);
        assert_eq!(ids(&views.history), vec!["3"]);

        let other = operator_chats(&sessions, UserId(8));
        assert!(other.open.is_empty());
        assert!(other.history.is_empty());
    }

    #[test]
    fn test_client_projection() {
        let sessions = fixture();
        assert_eq!(ids(&client_chats(&sessions, UserId(101))), vec!["2"]);
        assert!(client_chats(&sessions, UserId(999)).is_empty());
    }

    #[test]
    fn test_staff_partition_is_disjoint() {
        let mut sessions = fixture();
        sessions.push(session(4, ChatKind::Staff, Some(7), Some(8), ChatStatus::Active, 40));

        let views = supervisor_chats(&sessions);
        assert_eq!(ids(&views.history), vec!["1", "2", "3"], "staff never mixes in");

        assert_eq!(ids(&staff_chats(&sessions, UserId(7))), vec!["4"]);
        assert_eq!(ids(&staff_chats(&sessions, UserId(8))), vec!["4"]);
        assert!(staff_chats(&sessions, UserId(100)).is_empty());
    }

    #[test]
    fn test_lists_sorted_by_recency() {
        let sessions = vec![
            session(1, ChatKind::Regular, Some(1), Some(7), ChatStatus::Active, 10),
            session(2, ChatKind::Regular, Some(2), Some(7), ChatStatus::Active, 30),
            session(3, ChatKind::Regular, Some(3), Some(7), ChatStatus::Active, 20),
        ];
        let views = operator_chats(&sessions, UserId(7));
        assert_eq!(ids(&views.open), vec!["2", "3", "1"]);
    }
}
