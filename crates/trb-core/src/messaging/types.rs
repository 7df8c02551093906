use std::path::Path;

use crate::domain::{ChatId, MessageRef, UserId};

/// Cross-messenger incoming update model.
///
/// Telegram-specific fields should live in the Telegram adapter.
#[derive(Clone, Debug)]
pub enum IncomingUpdate {
    Command(Command),
    Text(TextMessage),
    Callback(CallbackQuery),
}

impl IncomingUpdate {
    /// Chat to notify when handling this update fails.
    pub fn chat_id(&self) -> Option<ChatId> {
        match self {
            IncomingUpdate::Command(c) => Some(c.chat_id),
            IncomingUpdate::Text(t) => Some(t.chat_id),
            IncomingUpdate::Callback(q) => q.message.map(|m| m.chat_id),
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            IncomingUpdate::Command(c) => c.user_id,
            IncomingUpdate::Text(t) => t.user_id,
            IncomingUpdate::Callback(q) => q.user_id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Command {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: Option<String>,
    pub name: String,
    pub args: String,
}

#[derive(Clone, Debug)]
pub struct TextMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: Option<String>,
    pub text: String,
}

#[derive(Clone, Debug)]
pub struct CallbackQuery {
    pub user_id: UserId,
    pub username: Option<String>,
    pub callback_id: String,
    pub data: String,
    pub message: Option<MessageRef>,
}

/// Outgoing "chat action" (typing indicator, etc).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
    UploadVideo,
    UploadDocument,
}

/// Inline keyboard (buttons), one button per row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub buttons: Vec<InlineButton>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub action: ButtonAction,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ButtonAction {
    Callback(String),
    Url(String),
}

impl InlineKeyboard {
    pub fn callback(mut self, label: impl Into<String>, data: impl Into<String>) -> Self {
        self.buttons.push(InlineButton {
            label: label.into(),
            action: ButtonAction::Callback(data.into()),
        });
        self
    }

    pub fn url(mut self, label: impl Into<String>, url: impl Into<String>) -> Self {
        self.buttons.push(InlineButton {
            label: label.into(),
            action: ButtonAction::Url(url.into()),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty()
    }
}

/// How an artifact is presented in the chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadKind {
    Video,
    Document,
}

impl UploadKind {
    pub fn for_path(path: &Path) -> Self {
        const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "webm", "avi", "m4v"];
        let is_video = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_video {
            UploadKind::Video
        } else {
            UploadKind::Document
        }
    }
}

/// A local file to be relayed to a chat.
#[derive(Clone, Debug)]
pub struct OutgoingFile<'a> {
    pub path: &'a Path,
    pub file_name: &'a str,
    pub caption: &'a str,
    pub kind: UploadKind,
    pub keyboard: Option<InlineKeyboard>,
}

/// What a messenger implementation can do beyond the required calls.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    /// "typing" / "uploading" indicators.
    pub supports_chat_actions: bool,
}
