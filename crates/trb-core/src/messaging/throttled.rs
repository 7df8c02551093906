//! Outbound rate limiting for the chat transport.
//!
//! Telegram allows roughly 30 calls/sec per bot and about one message per
//! second per chat. Every call reserves a slot on the global schedule and on
//! its chat's schedule, then sleeps until both are free. Chat actions are
//! cosmetic and are dropped instead of queued when the chat is busy.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::trace;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, InlineKeyboard, MessagingCapabilities, OutgoingFile},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    pub global_min_interval: Duration,
    pub per_chat_min_interval: Duration,
    /// Idle chats are forgotten after this long.
    pub chat_idle_ttl: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),
            per_chat_min_interval: Duration::from_millis(1050),
            chat_idle_ttl: Duration::from_secs(300),
        }
    }
}

/// Next free instant on one schedule.
#[derive(Debug)]
struct Schedule {
    interval: Duration,
    next: Instant,
}

impl Schedule {
    fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next: now,
        }
    }

    /// Slot start for a call issued at `now`; does not reserve.
    fn earliest(&self, now: Instant) -> Instant {
        self.next.max(now)
    }

    fn book(&mut self, start: Instant) {
        self.next = start + self.interval;
    }
}

#[derive(Debug)]
struct Schedules {
    global: Schedule,
    chats: HashMap<i64, Schedule>,
    last_prune: Instant,
}

impl Schedules {
    /// Book the next global slot and the next chat slot independently and
    /// return the later of the two. A backlog in one chat never moves the
    /// global schedule, so other chats only pay the global spacing.
    fn reserve(&mut self, cfg: &ThrottleConfig, chat_id: Option<i64>, now: Instant) -> Instant {
        self.prune(cfg, now);

        let global_start = self.global.earliest(now);
        self.global.book(global_start);

        let Some(id) = chat_id else {
            return global_start;
        };
        let chat = self
            .chats
            .entry(id)
            .or_insert_with(|| Schedule::new(cfg.per_chat_min_interval, now));
        let chat_start = chat.earliest(now);
        chat.book(chat_start);
        global_start.max(chat_start)
    }

    /// True when a call for `chat_id` could run immediately.
    fn is_idle(&self, chat_id: i64, now: Instant) -> bool {
        self.global.earliest(now) <= now
            && self
                .chats
                .get(&chat_id)
                .map(|s| s.earliest(now) <= now)
                .unwrap_or(true)
    }

    fn prune(&mut self, cfg: &ThrottleConfig, now: Instant) {
        if now.saturating_duration_since(self.last_prune) < cfg.chat_idle_ttl {
            return;
        }
        self.last_prune = now;
        let before = self.chats.len();
        self.chats
            .retain(|_, s| now.saturating_duration_since(s.next) < cfg.chat_idle_ttl);
        trace!(removed = before - self.chats.len(), "pruned idle chat schedules");
    }
}

/// MessagingPort decorator that spaces outbound calls.
///
/// Per-job progress is throttled separately by the transfer pipeline; this
/// layer keeps many concurrent jobs from tripping Telegram's flood control.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    schedules: Mutex<Schedules>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        let now = Instant::now();
        Self {
            inner,
            cfg,
            schedules: Mutex::new(Schedules {
                global: Schedule::new(cfg.global_min_interval, now),
                chats: HashMap::new(),
                last_prune: now,
            }),
        }
    }

    async fn wait_turn(&self, chat_id: Option<i64>) {
        let start = {
            let mut s = self.schedules.lock().await;
            s.reserve(&self.cfg, chat_id, Instant::now())
        };
        sleep_until(start).await;
    }
}

async fn sleep_until(start: Instant) {
    let now = Instant::now();
    if start > now {
        sleep(start - now).await;
    }
}

#[async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.wait_turn(Some(chat_id.0)).await;
        self.inner.send_html(chat_id, html).await
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.wait_turn(Some(msg.chat_id.0)).await;
        self.inner.edit_html(msg, html).await
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.wait_turn(Some(msg.chat_id.0)).await;
        self.inner.delete_message(msg).await
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        {
            let mut s = self.schedules.lock().await;
            let now = Instant::now();
            if !s.is_idle(chat_id.0, now) {
                trace!(chat_id = chat_id.0, ?action, "dropping chat action, chat busy");
                return Ok(());
            }
            s.reserve(&self.cfg, Some(chat_id.0), now);
        }
        self.inner.send_chat_action(chat_id, action).await
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.wait_turn(Some(chat_id.0)).await;
        self.inner
            .send_inline_keyboard(chat_id, text, keyboard)
            .await
    }

    async fn edit_inline_keyboard(
        &self,
        msg: MessageRef,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<()> {
        self.wait_turn(Some(msg.chat_id.0)).await;
        self.inner.edit_inline_keyboard(msg, text, keyboard).await
    }

    async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<()> {
        // Callback answers are not chat messages; only the global limit applies.
        self.wait_turn(None).await;
        self.inner
            .answer_callback_query(callback_id, text, show_alert)
            .await
    }

    async fn send_file(&self, chat_id: ChatId, file: OutgoingFile<'_>) -> Result<MessageRef> {
        self.wait_turn(Some(chat_id.0)).await;
        self.inner.send_file(chat_id, file).await
    }
}
