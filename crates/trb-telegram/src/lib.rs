//! Telegram adapter (teloxide).
//!
//! This crate implements the `trb-core` ports over the Telegram Bot API:
//! `MessagingPort`, `MembershipPort` and the long-polling `UpdateSource`.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode},
    ApiError, RequestError,
};

use tokio::time::sleep;
use tracing::warn;

pub mod membership;
pub mod router;
pub mod updates;

pub use membership::TelegramMembership;
pub use updates::TelegramUpdateSource;

use trb_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{
            ButtonAction, ChatAction, InlineKeyboard, MessagingCapabilities, OutgoingFile,
            UploadKind,
        },
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        self.with_retry_raw(op).await.map_err(Self::map_err)
    }

    async fn with_retry_raw<T, Fut>(
        &self,
        mut op: impl FnMut() -> Fut,
    ) -> std::result::Result<T, RequestError>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Edits that would not change anything are not failures.
    fn ignore_not_modified(res: std::result::Result<Message, RequestError>) -> Result<()> {
        match res {
            Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => Err(Self::map_err(e)),
        }
    }
}

fn to_markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .buttons
        .into_iter()
        .filter_map(|b| match b.action {
            ButtonAction::Callback(data) => Some(InlineKeyboardButton::callback(b.label, data)),
            ButtonAction::Url(raw) => match reqwest::Url::parse(&raw) {
                Ok(url) => Some(InlineKeyboardButton::url(b.label, url)),
                Err(e) => {
                    warn!(url = %raw, "dropping button with invalid url: {e}");
                    None
                }
            },
        })
        .map(|button| vec![button])
        .collect();
    InlineKeyboardMarkup::new(rows)
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_chat_actions: true,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        let res = self
            .with_retry_raw(|| {
                self.bot
                    .edit_message_text(
                        Self::tg_chat(msg.chat_id),
                        Self::tg_msg_id(msg.message_id),
                        html.to_string(),
                    )
                    .parse_mode(ParseMode::Html)
            })
            .await;
        Self::ignore_not_modified(res)
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .delete_message(Self::tg_chat(msg.chat_id), Self::tg_msg_id(msg.message_id))
        })
        .await?;
        Ok(())
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        let tg_action = match action {
            ChatAction::Typing => teloxide::types::ChatAction::Typing,
            ChatAction::UploadVideo => teloxide::types::ChatAction::UploadVideo,
            ChatAction::UploadDocument => teloxide::types::ChatAction::UploadDocument,
        };
        self.with_retry(|| self.bot.send_chat_action(Self::tg_chat(chat_id), tg_action))
            .await?;
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        let markup = to_markup(keyboard);

        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), text.to_string())
                    .parse_mode(ParseMode::Html)
                    .reply_markup(markup.clone())
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit_inline_keyboard(
        &self,
        msg: MessageRef,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<()> {
        let markup = to_markup(keyboard);
        let res = self
            .with_retry_raw(|| {
                self.bot
                    .edit_message_text(
                        Self::tg_chat(msg.chat_id),
                        Self::tg_msg_id(msg.message_id),
                        text.to_string(),
                    )
                    .parse_mode(ParseMode::Html)
                    .reply_markup(markup.clone())
            })
            .await;
        Self::ignore_not_modified(res)
    }

    async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<()> {
        self.with_retry(|| {
            let mut req = self
                .bot
                .answer_callback_query(callback_id.to_string())
                .show_alert(show_alert);
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await?;
        Ok(())
    }

    async fn send_file(&self, chat_id: ChatId, file: OutgoingFile<'_>) -> Result<MessageRef> {
        let input = || InputFile::file(file.path.to_path_buf()).file_name(file.file_name.to_string());
        let markup = file.keyboard.clone().map(to_markup);

        let res = match file.kind {
            UploadKind::Video => {
                self.with_retry_raw(|| {
                    let mut req = self
                        .bot
                        .send_video(Self::tg_chat(chat_id), input())
                        .caption(file.caption.to_string())
                        .supports_streaming(true);
                    if let Some(m) = &markup {
                        req = req.reply_markup(m.clone());
                    }
                    req
                })
                .await
            }
            UploadKind::Document => {
                self.with_retry_raw(|| {
                    let mut req = self
                        .bot
                        .send_document(Self::tg_chat(chat_id), input())
                        .caption(file.caption.to_string());
                    if let Some(m) = &markup {
                        req = req.reply_markup(m.clone());
                    }
                    req
                })
                .await
            }
        };

        let msg = res.map_err(|e| Error::UploadFailed(format!("telegram upload error: {e}")))?;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }
}
