//! Long-polling update source.
//!
//! `prepare` drops any webhook registration (and the updates queued for it)
//! so `getUpdates` does not race a stale push delivery.

use async_trait::async_trait;
use teloxide::{
    prelude::*,
    types::{AllowedUpdate, UpdateKind},
};
use tracing::info;

use trb_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    errors::Error,
    messaging::types::{CallbackQuery, Command, IncomingUpdate, TextMessage},
    supervisor::UpdateSource,
    Result,
};

/// Server-side long-poll wait, in seconds.
const POLL_TIMEOUT_SECS: u32 = 10;

pub struct TelegramUpdateSource {
    bot: Bot,
    offset: i32,
}

impl TelegramUpdateSource {
    pub fn new(bot: Bot) -> Self {
        Self { bot, offset: 0 }
    }
}

#[async_trait]
impl UpdateSource for TelegramUpdateSource {
    async fn prepare(&mut self) -> Result<()> {
        self.bot
            .delete_webhook()
            .drop_pending_updates(true)
            .await
            .map_err(|e| Error::TransportDisconnect(format!("deleteWebhook failed: {e}")))?;
        info!("webhook cleared, long polling enabled");
        Ok(())
    }

    async fn next_batch(&mut self) -> Result<Vec<IncomingUpdate>> {
        let updates = self
            .bot
            .get_updates()
            .offset(self.offset)
            .timeout(POLL_TIMEOUT_SECS)
            .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery])
            .await
            .map_err(|e| Error::TransportDisconnect(format!("getUpdates failed: {e}")))?;

        let mut out = Vec::with_capacity(updates.len());
        for update in updates {
            self.offset = self.offset.max(update.id + 1);
            if let Some(incoming) = to_incoming(update) {
                out.push(incoming);
            }
        }
        Ok(out)
    }
}

/// Map a Telegram update onto the core event model. Anything the relay does
/// not react to is dropped.
pub fn to_incoming(update: Update) -> Option<IncomingUpdate> {
    match update.kind {
        UpdateKind::Message(msg) => from_message(&msg),
        UpdateKind::CallbackQuery(q) => Some(from_callback(q)),
        _ => None,
    }
}

fn from_message(msg: &Message) -> Option<IncomingUpdate> {
    let text = msg.text()?;
    let user = msg.from()?;
    let chat_id = ChatId(msg.chat.id.0);
    let user_id = UserId(user.id.0 as i64);
    let username = user.username.clone();

    if text.starts_with('/') {
        let (name, args) = parse_command(text);
        return Some(IncomingUpdate::Command(Command {
            chat_id,
            user_id,
            username,
            name,
            args,
        }));
    }

    Some(IncomingUpdate::Text(TextMessage {
        chat_id,
        user_id,
        username,
        text: text.to_string(),
    }))
}

fn from_callback(q: teloxide::types::CallbackQuery) -> IncomingUpdate {
    IncomingUpdate::Callback(CallbackQuery {
        user_id: UserId(q.from.id.0 as i64),
        username: q.from.username.clone(),
        callback_id: q.id,
        data: q.data.unwrap_or_default(),
        message: q.message.map(|m| MessageRef {
            chat_id: ChatId(m.chat.id.0),
            message_id: MessageId(m.id.0),
        }),
    })
}

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}
