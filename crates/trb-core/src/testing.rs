//! Fake ports shared by unit tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    domain::{Channel, ChatId, MessageId, MessageRef, UserId},
    errors::{Error, ResolveError, TransferError},
    gate::{MemberStatus, MembershipPort},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, InlineKeyboard, MessagingCapabilities, OutgoingFile, UploadKind},
    },
    resolver::{LinkResolver, ResolvedSource},
    transfer::{ByteFetcher, ByteStream},
    Result,
};

/// Everything the relay said, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum Sent {
    Html(ChatId, String),
    Edit(MessageRef, String),
    Delete(MessageRef),
    Action(ChatId, ChatAction),
    Keyboard(ChatId, String, InlineKeyboard),
    EditKeyboard(MessageRef, String, InlineKeyboard),
    CallbackAnswer(String, Option<String>, bool),
    File {
        chat_id: ChatId,
        file_name: String,
        kind: UploadKind,
        bytes: usize,
        keyboard: Option<InlineKeyboard>,
    },
}

#[derive(Default)]
pub struct FakeMessenger {
    next_id: Mutex<i32>,
    pub sent: Mutex<Vec<Sent>>,
    pub fail_uploads: bool,
    pub chat_actions: bool,
}

impl FakeMessenger {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(1),
            ..Default::default()
        }
    }

    pub fn failing_uploads() -> Self {
        Self {
            fail_uploads: true,
            ..Self::new()
        }
    }

    pub fn with_chat_actions() -> Self {
        Self {
            chat_actions: true,
            ..Self::new()
        }
    }

    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        let mut guard = self.next_id.lock().unwrap();
        let id = *guard;
        *guard += 1;
        MessageRef {
            chat_id,
            message_id: MessageId(id),
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// All text the user could read (sends, edits, keyboard messages).
    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Html(_, t)
                | Sent::Edit(_, t)
                | Sent::Keyboard(_, t, _)
                | Sent::EditKeyboard(_, t, _) => Some(t),
                Sent::CallbackAnswer(_, t, _) => t,
                _ => None,
            })
            .collect()
    }

    pub fn files(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::File { file_name, .. } => Some(file_name),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_chat_actions: self.chat_actions,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Html(chat_id, html.to_string()));
        Ok(self.alloc(chat_id))
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Edit(msg, html.to_string()));
        Ok(())
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::Delete(msg));
        Ok(())
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Action(chat_id, action));
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Keyboard(chat_id, text.to_string(), keyboard));
        Ok(self.alloc(chat_id))
    }

    async fn edit_inline_keyboard(
        &self,
        msg: MessageRef,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::EditKeyboard(msg, text.to_string(), keyboard));
        Ok(())
    }

    async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::CallbackAnswer(
            callback_id.to_string(),
            text.map(|t| t.to_string()),
            show_alert,
        ));
        Ok(())
    }

    async fn send_file(&self, chat_id: ChatId, file: OutgoingFile<'_>) -> Result<MessageRef> {
        let bytes = std::fs::read(file.path)
            .map_err(|e| Error::UploadFailed(format!("file missing during upload: {e}")))?
            .len();
        self.sent.lock().unwrap().push(Sent::File {
            chat_id,
            file_name: file.file_name.to_string(),
            kind: file.kind,
            bytes,
            keyboard: file.keyboard,
        });
        if self.fail_uploads {
            return Err(Error::External("telegram error: request timed out".to_string()));
        }
        Ok(self.alloc(chat_id))
    }
}

/// Membership port answering from a fixed table; unknown channels error.
#[derive(Default)]
pub struct FakeMembership {
    pub statuses: HashMap<String, MemberStatus>,
    pub calls: AtomicUsize,
}

impl FakeMembership {
    pub fn with(entries: &[(&str, MemberStatus)]) -> Self {
        Self {
            statuses: entries
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MembershipPort for FakeMembership {
    async fn member_status(&self, channel: &Channel, _user: UserId) -> Result<MemberStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .get(&channel.to_string())
            .copied()
            .ok_or_else(|| Error::External("request timed out".to_string()))
    }
}

/// Resolver returning a canned answer and counting calls.
pub struct FakeResolver {
    pub answer: Mutex<Option<std::result::Result<Vec<ResolvedSource>, ResolveError>>>,
    pub calls: AtomicUsize,
}

impl FakeResolver {
    pub fn new(answer: std::result::Result<Vec<ResolvedSource>, ResolveError>) -> Self {
        Self {
            answer: Mutex::new(Some(answer)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkResolver for FakeResolver {
    async fn resolve(&self, _link: &str) -> std::result::Result<Vec<ResolvedSource>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
            .lock()
            .unwrap()
            .take()
            .unwrap_or(Err(ResolveError::NotFound))
    }
}

/// Fetcher serving in-memory bodies; unknown URLs are refused.
#[derive(Default)]
pub struct StaticFetcher {
    pub bodies: HashMap<String, Vec<u8>>,
    pub opened: AtomicUsize,
}

impl StaticFetcher {
    pub fn with(entries: &[(&str, usize)]) -> Self {
        Self {
            bodies: entries
                .iter()
                .map(|(url, len)| (url.to_string(), vec![0xAB; *len]))
                .collect(),
            opened: AtomicUsize::new(0),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ByteFetcher for StaticFetcher {
    async fn open(&self, url: &str) -> std::result::Result<ByteStream, TransferError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let body = self
            .bodies
            .get(url)
            .cloned()
            .ok_or_else(|| TransferError::Network(format!("unexpected status 404 for {url}")))?;
        Ok(ByteStream {
            content_length: Some(body.len() as u64),
            reader: Box::new(std::io::Cursor::new(body)),
        })
    }
}
