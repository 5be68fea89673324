//! Channel-backed fixtures for async engine tests
//!
//! `FakeBackend` implements the collaborator contract in memory: history
//! pages come from a seeded map, duplex streams are unbounded channels the
//! test pushes into, and failure modes are toggled per call site.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use deskline_shared::{
    ChatBackend, ChatId, ChatKind, ChatSession, ChatStatus, ChatStreamEvent, ChatStreamHandle,
    GlobalEvent, GlobalStreamHandle, Identity, Message, MessageId, MessageQuery, SenderType,
    TransportError, UserId,
};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Route worker logs through `RUST_LOG` while debugging a test
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub(crate) fn ts(secs: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(secs).unwrap()
}

pub(crate) fn confirmed_msg(chat: i64, id: i64, text: &str, at: i64) -> Message {
    Message {
        id: MessageId::Confirmed(id),
        chat_id: ChatId::from(chat),
        sender_id: UserId(100),
        sender_type: SenderType::Client,
        text: text.to_string(),
        attachments: Vec::new(),
        created_at: ts(at),
        edited_at: None,
        reactions: None,
        read_count: None,
    }
}

pub(crate) fn chat_record(
    chat: i64,
    kind: ChatKind,
    client: Option<i64>,
    operator: Option<i64>,
    status: ChatStatus,
) -> ChatSession {
    let mut session = ChatSession::shell(ChatId::from(chat), kind, ts(0));
    session.client_id = client.map(UserId);
    session.operator_id = operator.map(UserId);
    session.status = status;
    session
}

/// Poll until the condition holds, panicking after two seconds
pub(crate) async fn wait_for<F, Fut>(what: &str, condition: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = async {
        loop {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(2), deadline).await.is_err() {
        panic!("timed out waiting for {}", what);
    }
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    seed: Mutex<Vec<ChatSession>>,
    history: Mutex<HashMap<ChatId, Vec<Message>>>,
    chat_senders: Mutex<HashMap<ChatId, Vec<mpsc::UnboundedSender<ChatStreamEvent>>>>,
    global_senders: Mutex<Vec<mpsc::UnboundedSender<GlobalEvent>>>,
    chat_opens: Mutex<HashMap<ChatId, usize>>,
    global_opens: AtomicUsize,
    fetch_failures: AtomicUsize,
    fail_next_send: AtomicBool,
    deny_chat_streams: AtomicBool,
    deny_global_streams: AtomicBool,
    next_message_id: AtomicI64,
    sent: Mutex<Vec<(ChatId, String)>>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(1000),
            ..Self::default()
        }
    }

    pub(crate) fn with_seed(chats: Vec<ChatSession>) -> Self {
        let backend = Self::new();
        *backend.seed.lock().unwrap() = chats;
        backend
    }

    pub(crate) fn set_history(&self, chat_id: &ChatId, messages: Vec<Message>) {
        self.history.lock().unwrap().insert(chat_id.clone(), messages);
    }

    /// Make the next `count` history pulls fail with a transient error
    pub(crate) fn fail_fetches(&self, count: usize) {
        self.fetch_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }

    pub(crate) fn deny_chat_streams(&self) {
        self.deny_chat_streams.store(true, Ordering::SeqCst);
    }

    pub(crate) fn deny_global_streams(&self) {
        self.deny_global_streams.store(true, Ordering::SeqCst);
    }

    pub(crate) fn chat_open_count(&self, chat_id: &ChatId) -> usize {
        self.chat_opens.lock().unwrap().get(chat_id).copied().unwrap_or(0)
    }

    pub(crate) fn global_open_count(&self) -> usize {
        self.global_opens.load(Ordering::SeqCst)
    }

    pub(crate) fn sent_messages(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Push an event into every open stream for the chat
    pub(crate) fn push_chat_event(&self, chat_id: &ChatId, event: ChatStreamEvent) {
        let senders = self.chat_senders.lock().unwrap();
        if let Some(list) = senders.get(chat_id) {
            for sender in list {
                let _ = sender.send(event.clone());
            }
        }
    }

    pub(crate) fn push_global_event(&self, event: GlobalEvent) {
        for sender in self.global_senders.lock().unwrap().iter() {
            let _ = sender.send(event.clone());
        }
    }

    /// Close every open stream for the chat, simulating a disconnect
    pub(crate) fn drop_chat_streams(&self, chat_id: &ChatId) {
        self.chat_senders.lock().unwrap().remove(chat_id);
    }

    pub(crate) fn drop_global_streams(&self) {
        self.global_senders.lock().unwrap().clear();
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn fetch_chats(&self, _identity: &Identity) -> Result<Vec<ChatSession>, TransportError> {
        Ok(self.seed.lock().unwrap().clone())
    }

    async fn fetch_chat(&self, chat_id: &ChatId) -> Result<Option<ChatSession>, TransportError> {
        Ok(self
            .seed
            .lock()
            .unwrap()
            .iter()
            .find(|c| &c.id == chat_id)
            .cloned())
    }

    async fn fetch_messages(
        &self,
        chat_id: &ChatId,
        query: MessageQuery,
    ) -> Result<Vec<Message>, TransportError> {
        let remaining = self.fetch_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fetch_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Network("fake fetch failure".to_string()));
        }

        let history = self.history.lock().unwrap();
        let messages = history.get(chat_id).cloned().unwrap_or_default();
        // Inclusive boundary on purpose: real servers may re-return the
        // cursor message, and callers must absorb the overlap.
        Ok(match query.since_id {
            Some(since) => messages
                .into_iter()
                .filter(|m| m.confirmed_id().map(|id| id >= since).unwrap_or(false))
                .collect(),
            None => messages,
        })
    }

    async fn send_message(
        &self,
        chat_id: &ChatId,
        _sender_id: UserId,
        text: &str,
        _sender_type: SenderType,
    ) -> Result<i64, TransportError> {
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Rejected("fake send failure".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.clone(), text.to_string()));
        Ok(self.next_message_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn open_chat_stream(
        &self,
        chat_id: &ChatId,
        _identity: &Identity,
    ) -> Result<ChatStreamHandle, TransportError> {
        if self.deny_chat_streams.load(Ordering::SeqCst) {
            return Err(TransportError::Unauthorized("fake denial".to_string()));
        }
        *self
            .chat_opens
            .lock()
            .unwrap()
            .entry(chat_id.clone())
            .or_insert(0) += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        self.chat_senders
            .lock()
            .unwrap()
            .entry(chat_id.clone())
            .or_default()
            .push(tx);
        Ok(ChatStreamHandle::new(UnboundedReceiverStream::new(rx)))
    }

    async fn open_global_stream(
        &self,
        _identity: &Identity,
    ) -> Result<GlobalStreamHandle, TransportError> {
        if self.deny_global_streams.load(Ordering::SeqCst) {
            return Err(TransportError::Unauthorized("fake denial".to_string()));
        }
        self.global_opens.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        self.global_senders.lock().unwrap().push(tx);
        Ok(GlobalStreamHandle::new(UnboundedReceiverStream::new(rx)))
    }
}
