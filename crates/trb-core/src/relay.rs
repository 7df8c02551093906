//! Per-event orchestration: Gate -> Resolver -> Pipeline -> Dispatcher.
//!
//! `RelayService` is the [`EventHandler`] driven by the supervisor. Each
//! event is independent; nothing here assumes it is the only job in flight.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    dispatcher::Dispatcher,
    domain::{ChatId, MessageRef, UserId},
    errors::{Error, ResolveError, TransferError},
    gate::{Admission, MembershipGate, MembershipPort},
    messaging::{
        port::MessagingPort,
        types::{
            CallbackQuery, ChatAction, Command, IncomingUpdate, InlineKeyboard, TextMessage,
        },
    },
    progress::StatusMessageReporter,
    resolver::{extract_link, is_share_link, LinkResolver},
    scratch::ScratchDir,
    supervisor::EventHandler,
    sweeper::Sweeper,
    transfer::{ByteFetcher, Pipeline, TransferJob},
    usage::UsageStore,
    views, Result,
};

/// Adapters the relay talks to.
#[derive(Clone)]
pub struct RelayPorts {
    pub messenger: Arc<dyn MessagingPort>,
    pub membership: Arc<dyn MembershipPort>,
    pub resolver: Arc<dyn LinkResolver>,
    pub fetcher: Arc<dyn ByteFetcher>,
}

pub struct RelayService {
    cfg: Arc<Config>,
    messenger: Arc<dyn MessagingPort>,
    gate: MembershipGate,
    resolver: Arc<dyn LinkResolver>,
    pipeline: Pipeline,
    dispatcher: Dispatcher,
    usage: Arc<UsageStore>,
    sweeper: Sweeper,
}

impl RelayService {
    pub fn new(
        cfg: Arc<Config>,
        ports: RelayPorts,
        scratch: Arc<ScratchDir>,
        usage: Arc<UsageStore>,
    ) -> Self {
        let gate = MembershipGate::new(ports.membership, cfg.membership_timeout);
        let pipeline = Pipeline::new(
            ports.fetcher,
            scratch.clone(),
            cfg.read_timeout,
            cfg.progress_interval,
        );
        let dispatcher = Dispatcher::new(ports.messenger.clone(), usage.clone());
        let sweeper = Sweeper::new(scratch, cfg.scratch_retention);
        Self {
            cfg,
            messenger: ports.messenger,
            gate,
            resolver: ports.resolver,
            pipeline,
            dispatcher,
            usage,
            sweeper,
        }
    }

    async fn on_command(&self, cmd: Command) -> Result<()> {
        match cmd.name.as_str() {
            "start" => self.on_start(&cmd, views::WELCOME).await,
            "help" => self.on_start(&cmd, views::HELP).await,
            "stats" | "clean" if !self.cfg.is_admin(cmd.user_id.0) => {
                debug!(user_id = cmd.user_id.0, "ignoring admin command from non-admin");
                Ok(())
            }
            "stats" => self.send_stats(cmd.chat_id).await,
            "clean" => self.clean(cmd.chat_id).await,
            _ => Ok(()),
        }
    }

    async fn on_start(&self, cmd: &Command, text: &str) -> Result<()> {
        if !self.admit(cmd.user_id, cmd.chat_id).await? {
            return Ok(());
        }
        self.messenger
            .send_inline_keyboard(cmd.chat_id, text, self.menu_for(cmd.user_id))
            .await?;
        Ok(())
    }

    async fn on_text(&self, msg: TextMessage) -> Result<()> {
        if !self.admit(msg.user_id, msg.chat_id).await? {
            return Ok(());
        }
        if !is_share_link(&msg.text, &self.cfg.link_markers) {
            self.messenger
                .send_html(msg.chat_id, views::INVALID_LINK)
                .await?;
            return Ok(());
        }
        self.process_link(msg.chat_id, &extract_link(&msg.text))
            .await
    }

    /// Gate the user; on denial show the join prompt. Admitted users are
    /// counted.
    async fn admit(&self, user: UserId, chat_id: ChatId) -> Result<bool> {
        match self.gate.check(user, &self.cfg.required_channels).await {
            Admission::Allowed => {
                self.record_user(user).await;
                Ok(true)
            }
            Admission::Denied { channel } => {
                info!(user_id = user.0, %channel, "join required");
                self.messenger
                    .send_inline_keyboard(
                        chat_id,
                        views::JOIN_REQUIRED,
                        views::join_keyboard(&self.cfg.required_channels),
                    )
                    .await?;
                Ok(false)
            }
        }
    }

    async fn record_user(&self, user: UserId) {
        match self.usage.record_user(user).await {
            Ok(true) => info!(user_id = user.0, "new user"),
            Ok(false) => {}
            Err(e) => warn!("failed to persist user counter: {e}"),
        }
    }

    async fn process_link(&self, chat_id: ChatId, link: &str) -> Result<()> {
        if self.messenger.capabilities().supports_chat_actions {
            let _ = self
                .messenger
                .send_chat_action(chat_id, ChatAction::Typing)
                .await;
        }
        let status = self.messenger.send_html(chat_id, views::FETCHING).await?;

        let sources = match self.resolver.resolve(link).await {
            Ok(sources) => sources,
            Err(ResolveError::NotFound) => {
                info!(chat_id = chat_id.0, "share link has no files");
                self.messenger.edit_html(status, views::NO_FILES).await?;
                return Ok(());
            }
            Err(e) => {
                warn!(chat_id = chat_id.0, "resolution failed: {e}");
                self.messenger
                    .edit_html(status, views::RESOLVE_FAILED)
                    .await?;
                return Ok(());
            }
        };

        let count = sources.len();
        info!(chat_id = chat_id.0, files = count, "link resolved");
        let mut delivered = 0usize;
        for (idx, source) in sources.into_iter().enumerate() {
            let name = source.display_name.clone();
            self.edit_status(status, &views::starting_text(&name, idx + 1, count))
                .await;
            if self.relay_one(chat_id, status, TransferJob::new(source)).await {
                delivered += 1;
            }
        }

        if let Err(e) = self.messenger.delete_message(status).await {
            debug!("failed to delete status message: {e}");
        }
        info!(chat_id = chat_id.0, delivered, files = count, "link processed");
        Ok(())
    }

    /// Transfer and publish one file. Failures are reported to the user and
    /// never stop the remaining files.
    async fn relay_one(&self, chat_id: ChatId, status: MessageRef, mut job: TransferJob) -> bool {
        let name = job.source.display_name.clone();
        let reporter = StatusMessageReporter::new(self.messenger.as_ref(), status);

        let notice = match self
            .pipeline
            .transfer(&mut job, self.cfg.max_file_size, &reporter)
            .await
        {
            Ok(path) => match self
                .dispatcher
                .publish(&path, &name, chat_id, views::download_more_keyboard())
                .await
            {
                Ok(_) => return true,
                Err(e) => {
                    warn!(chat_id = chat_id.0, file = %name, "publish failed: {e}");
                    views::upload_failed_text(&name)
                }
            },
            Err(TransferError::TooLarge { size, ceiling }) => {
                views::too_large_text(&name, size, ceiling)
            }
            Err(e) => {
                warn!(chat_id = chat_id.0, file = %name, state = ?job.state, "download failed: {e}");
                views::download_failed_text(&name)
            }
        };

        if let Err(e) = self.messenger.send_html(chat_id, &notice).await {
            warn!(chat_id = chat_id.0, "failed to report job failure: {e}");
        }
        false
    }

    async fn edit_status(&self, status: MessageRef, html: &str) {
        if let Err(e) = self.messenger.edit_html(status, html).await {
            debug!("status edit failed: {e}");
        }
    }

    async fn on_callback(&self, q: CallbackQuery) -> Result<()> {
        let chat_id = q
            .message
            .map(|m| m.chat_id)
            .unwrap_or(ChatId(q.user_id.0));

        match q.data.as_str() {
            views::CB_CHECK_JOIN => {
                let admission = self.gate.check(q.user_id, &self.cfg.required_channels).await;
                if !admission.is_allowed() {
                    self.messenger
                        .answer_callback_query(&q.callback_id, Some(views::JOIN_FIRST), true)
                        .await?;
                    return Ok(());
                }
                self.record_user(q.user_id).await;
                self.messenger
                    .answer_callback_query(&q.callback_id, None, false)
                    .await?;
                let menu = self.menu_for(q.user_id);
                match q.message {
                    Some(msg) => {
                        self.messenger
                            .edit_inline_keyboard(msg, views::VERIFIED, menu)
                            .await?
                    }
                    None => {
                        self.messenger
                            .send_inline_keyboard(chat_id, views::VERIFIED, menu)
                            .await?;
                    }
                }
                Ok(())
            }
            views::CB_DOWNLOAD_MORE => {
                self.messenger
                    .answer_callback_query(&q.callback_id, None, false)
                    .await?;
                self.messenger.send_html(chat_id, views::SEND_LINK).await?;
                Ok(())
            }
            views::CB_STATS | views::CB_CLEAN if !self.cfg.is_admin(q.user_id.0) => {
                self.messenger
                    .answer_callback_query(&q.callback_id, Some(views::ADMINS_ONLY), true)
                    .await
            }
            views::CB_STATS => {
                self.messenger
                    .answer_callback_query(&q.callback_id, None, false)
                    .await?;
                self.send_stats(chat_id).await
            }
            views::CB_CLEAN => {
                self.messenger
                    .answer_callback_query(&q.callback_id, None, false)
                    .await?;
                self.clean(chat_id).await
            }
            other => {
                debug!(data = other, "unknown callback");
                self.messenger
                    .answer_callback_query(&q.callback_id, None, false)
                    .await
            }
        }
    }

    async fn send_stats(&self, chat_id: ChatId) -> Result<()> {
        let counters = self.usage.snapshot().await;
        let sweeper = self.sweeper.clone();
        let scratch_files = tokio::task::spawn_blocking(move || sweeper.stored_files())
            .await
            .map_err(|e| Error::External(format!("stats task failed: {e}")))??;
        self.messenger
            .send_inline_keyboard(
                chat_id,
                &views::stats_text(counters, scratch_files),
                views::admin_keyboard(),
            )
            .await?;
        Ok(())
    }

    async fn clean(&self, chat_id: ChatId) -> Result<()> {
        let sweeper = self.sweeper.clone();
        let removed = tokio::task::spawn_blocking(move || sweeper.purge())
            .await
            .map_err(|e| Error::External(format!("purge task failed: {e}")))??;
        self.messenger
            .send_html(chat_id, &views::cleaned_text(removed))
            .await?;
        Ok(())
    }

    fn menu_for(&self, user: UserId) -> InlineKeyboard {
        let mut kb = views::main_menu_keyboard();
        if self.cfg.is_admin(user.0) {
            kb.buttons.extend(views::admin_keyboard().buttons);
        }
        kb
    }
}

#[async_trait]
impl EventHandler for RelayService {
    async fn handle(&self, update: IncomingUpdate) -> Result<()> {
        match update {
            IncomingUpdate::Command(cmd) => self.on_command(cmd).await,
            IncomingUpdate::Text(msg) => self.on_text(msg).await,
            IncomingUpdate::Callback(q) => self.on_callback(q).await,
        }
    }

    async fn handle_failure(&self, update: &IncomingUpdate, reason: &str) {
        debug!(reason, "reporting generic failure");
        if let IncomingUpdate::Callback(q) = update {
            let _ = self
                .messenger
                .answer_callback_query(&q.callback_id, None, false)
                .await;
        }
        let Some(chat_id) = update.chat_id() else {
            return;
        };
        if let Err(e) = self
            .messenger
            .send_html(chat_id, views::GENERIC_FAILURE)
            .await
        {
            warn!(chat_id = chat_id.0, "failed to send failure notice: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        domain::MessageId,
        gate::MemberStatus,
        messaging::types::ButtonAction,
        resolver::{parse_response, ResolvedSource},
        testing::{FakeMembership, FakeMessenger, FakeResolver, Sent, StaticFetcher},
    };

    const MIB: usize = 1024 * 1024;

    struct Harness {
        _dir: tempfile::TempDir,
        scratch: Arc<ScratchDir>,
        messenger: Arc<FakeMessenger>,
        membership: Arc<FakeMembership>,
        resolver: Arc<FakeResolver>,
        fetcher: Arc<StaticFetcher>,
        usage: Arc<UsageStore>,
        relay: RelayService,
    }

    impl Harness {
        async fn new(
            membership: FakeMembership,
            answer: std::result::Result<Vec<ResolvedSource>, ResolveError>,
            fetcher: StaticFetcher,
        ) -> Self {
            Self::build(membership, answer, fetcher, FakeMessenger::new()).await
        }

        async fn build(
            membership: FakeMembership,
            answer: std::result::Result<Vec<ResolvedSource>, ResolveError>,
            fetcher: StaticFetcher,
            messenger: FakeMessenger,
        ) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let scratch_path = dir.path().join("downloads");
            let usage_path = dir.path().join("usage.json");
            let env = HashMap::from([
                ("BOT_TOKEN", "123:abc".to_string()),
                ("XAPIVERSE_KEY", "key".to_string()),
                ("ADMIN_IDS", "99".to_string()),
                ("FORCE_CHANNELS", "@news".to_string()),
                ("MAX_FILE_SIZE_MB", "1900".to_string()),
                ("SCRATCH_RETENTION_SECS", "600".to_string()),
            ]);
            let cfg = Arc::new(Config::from_lookup(|k| env.get(k).cloned()).unwrap());

            let scratch = Arc::new(ScratchDir::open(&scratch_path).unwrap());
            let usage = Arc::new(UsageStore::open(usage_path).await.unwrap());
            let messenger = Arc::new(messenger);
            let membership = Arc::new(membership);
            let resolver = Arc::new(FakeResolver::new(answer));
            let fetcher = Arc::new(fetcher);
            let relay = RelayService::new(
                cfg,
                RelayPorts {
                    messenger: messenger.clone(),
                    membership: membership.clone(),
                    resolver: resolver.clone(),
                    fetcher: fetcher.clone(),
                },
                scratch.clone(),
                usage.clone(),
            );
            Self {
                _dir: dir,
                scratch,
                messenger,
                membership,
                resolver,
                fetcher,
                usage,
                relay,
            }
        }

        fn scratch_is_empty(&self) -> bool {
            std::fs::read_dir(self.scratch.root())
                .unwrap()
                .next()
                .is_none()
        }
    }

    fn member() -> FakeMembership {
        FakeMembership::with(&[("@news", MemberStatus::Member)])
    }

    fn text(user: i64, s: &str) -> IncomingUpdate {
        IncomingUpdate::Text(TextMessage {
            chat_id: ChatId(user),
            user_id: UserId(user),
            username: None,
            text: s.to_string(),
        })
    }

    fn command(user: i64, name: &str) -> IncomingUpdate {
        IncomingUpdate::Command(Command {
            chat_id: ChatId(user),
            user_id: UserId(user),
            username: None,
            name: name.to_string(),
            args: String::new(),
        })
    }

    fn callback(user: i64, data: &str) -> IncomingUpdate {
        IncomingUpdate::Callback(CallbackQuery {
            user_id: UserId(user),
            username: None,
            callback_id: "cb1".to_string(),
            data: data.to_string(),
            message: Some(MessageRef {
                chat_id: ChatId(user),
                message_id: MessageId(500),
            }),
        })
    }

    fn source(name: &str, size: u64, url: &str) -> ResolvedSource {
        ResolvedSource {
            display_name: name.to_string(),
            byte_size: size,
            direct_endpoint: url.to_string(),
            fallback_endpoints: Vec::new(),
        }
    }

    #[tokio::test]
    async fn relays_a_resolved_file_and_leaves_no_artifact() {
        let body = r#"{"status":"success","list":[{"name":"clip.mp4","size":500000000,"download_link":"https://cdn/x"}]}"#;
        let h = Harness::new(
            member(),
            parse_response(body),
            StaticFetcher::with(&[("https://cdn/x", 3 * MIB + 5)]),
        )
        .await;

        h.relay
            .handle(text(1, "look https://terabox.example/s/abc"))
            .await
            .unwrap();

        assert_eq!(h.messenger.files(), vec!["clip.mp4".to_string()]);
        assert!(h.scratch_is_empty());
        let counters = h.usage.snapshot().await;
        assert_eq!(counters.total_downloads, 1);
        assert_eq!(counters.total_users, 1);

        let sent = h.messenger.sent();
        let file = sent
            .iter()
            .find_map(|s| match s {
                Sent::File { bytes, keyboard, .. } => Some((*bytes, keyboard.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(file.0, 3 * MIB + 5);
        assert_eq!(file.1, Some(views::download_more_keyboard()));
        assert!(matches!(sent.last(), Some(Sent::Delete(_))));
    }

    #[tokio::test]
    async fn empty_listing_reports_no_files_without_transfer() {
        let h = Harness::new(
            member(),
            parse_response(r#"{"status":"success","list":[]}"#),
            StaticFetcher::default(),
        )
        .await;

        h.relay
            .handle(text(1, "https://terabox.example/s/abc"))
            .await
            .unwrap();

        assert_eq!(h.resolver.calls(), 1);
        assert_eq!(h.fetcher.opened(), 0);
        assert!(h.messenger.texts().iter().any(|t| t == views::NO_FILES));
        assert!(h.messenger.files().is_empty());
    }

    #[tokio::test]
    async fn membership_timeout_shows_join_prompt() {
        // Unknown channel makes the fake membership port error out.
        let h = Harness::new(
            FakeMembership::default(),
            Ok(vec![source("clip.mp4", 10, "https://cdn/x")]),
            StaticFetcher::with(&[("https://cdn/x", 10)]),
        )
        .await;

        h.relay
            .handle(text(1, "https://terabox.example/s/abc"))
            .await
            .unwrap();

        assert_eq!(h.resolver.calls(), 0);
        let sent = h.messenger.sent();
        let Some(Sent::Keyboard(_, prompt, kb)) = sent.first() else {
            panic!("expected join prompt, got {sent:?}");
        };
        assert_eq!(prompt, views::JOIN_REQUIRED);
        assert!(kb
            .buttons
            .iter()
            .any(|b| b.action == ButtonAction::Url("https://t.me/news".to_string())));
        assert_eq!(h.usage.snapshot().await.total_users, 0);
    }

    #[tokio::test]
    async fn text_without_marker_never_resolves() {
        let h = Harness::new(member(), Ok(Vec::new()), StaticFetcher::default()).await;

        for msg in ["hello", "https://example.com/file.mp4", "tera box"] {
            h.relay.handle(text(1, msg)).await.unwrap();
        }

        assert_eq!(h.resolver.calls(), 0);
        assert_eq!(
            h.messenger.texts(),
            vec![views::INVALID_LINK.to_string(); 3]
        );
    }

    #[tokio::test]
    async fn oversize_file_is_skipped_and_the_rest_continue() {
        let h = Harness::new(
            member(),
            Ok(vec![
                source("huge.mkv", 2000 * 1024 * 1024, "https://cdn/huge"),
                source("broken.mp4", 10, "https://cdn/missing"),
                source("small.pdf", 2048, "https://cdn/small"),
            ]),
            StaticFetcher::with(&[("https://cdn/huge", 16), ("https://cdn/small", 2048)]),
        )
        .await;

        h.relay
            .handle(text(1, "https://1024TERA.com/s/multi"))
            .await
            .unwrap();

        assert_eq!(h.messenger.files(), vec!["small.pdf".to_string()]);
        // The oversize source is never opened.
        assert_eq!(h.fetcher.opened(), 2);
        let texts = h.messenger.texts();
        assert!(texts.iter().any(|t| t.contains("Skipped <b>huge.mkv</b>")));
        assert!(texts.contains(&views::download_failed_text("broken.mp4")));
        assert!(h.scratch_is_empty());
        assert_eq!(h.usage.snapshot().await.total_downloads, 1);
    }

    #[tokio::test]
    async fn failed_upload_is_reported_and_cleaned_up() {
        let h = Harness::build(
            member(),
            Ok(vec![source("clip.mp4", 64, "https://cdn/x")]),
            StaticFetcher::with(&[("https://cdn/x", 64)]),
            FakeMessenger::failing_uploads(),
        )
        .await;

        h.relay
            .handle(text(1, "https://terabox.example/s/abc"))
            .await
            .unwrap();

        assert!(h
            .messenger
            .texts()
            .contains(&views::upload_failed_text("clip.mp4")));
        assert_eq!(h.usage.snapshot().await.total_downloads, 0);
        assert!(h.scratch_is_empty());
    }

    #[tokio::test]
    async fn upstream_errors_surface_a_failure_message() {
        let h = Harness::new(
            member(),
            Err(ResolveError::Timeout),
            StaticFetcher::default(),
        )
        .await;

        h.relay
            .handle(text(1, "https://terabox.example/s/abc"))
            .await
            .unwrap();

        assert!(h
            .messenger
            .texts()
            .iter()
            .any(|t| t == views::RESOLVE_FAILED));
    }

    #[tokio::test]
    async fn start_is_gated_and_counts_the_user_once() {
        let h = Harness::new(member(), Ok(Vec::new()), StaticFetcher::default()).await;

        h.relay.handle(command(1, "start")).await.unwrap();
        h.relay.handle(command(1, "help")).await.unwrap();

        assert_eq!(h.membership.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(h.usage.snapshot().await.total_users, 1);
        assert_eq!(
            h.messenger.texts(),
            vec![views::WELCOME.to_string(), views::HELP.to_string()]
        );
    }

    #[tokio::test]
    async fn check_join_edits_prompt_or_alerts() {
        let h = Harness::new(member(), Ok(Vec::new()), StaticFetcher::default()).await;
        h.relay.handle(callback(1, views::CB_CHECK_JOIN)).await.unwrap();
        assert!(matches!(
            h.messenger.sent().last(),
            Some(Sent::EditKeyboard(_, t, _)) if t == views::VERIFIED
        ));

        let denied = Harness::new(
            FakeMembership::with(&[("@news", MemberStatus::Left)]),
            Ok(Vec::new()),
            StaticFetcher::default(),
        )
        .await;
        denied
            .relay
            .handle(callback(1, views::CB_CHECK_JOIN))
            .await
            .unwrap();
        assert_eq!(
            denied.messenger.sent(),
            vec![Sent::CallbackAnswer(
                "cb1".to_string(),
                Some(views::JOIN_FIRST.to_string()),
                true
            )]
        );
    }

    #[tokio::test]
    async fn admin_actions_are_restricted() {
        let h = Harness::new(member(), Ok(Vec::new()), StaticFetcher::default()).await;
        std::fs::write(h.scratch.root().join("old_1_1.mp4"), b"x").unwrap();

        h.relay.handle(command(1, "clean")).await.unwrap();
        assert!(h.messenger.sent().is_empty());
        h.relay.handle(callback(1, views::CB_STATS)).await.unwrap();
        assert_eq!(
            h.messenger.texts(),
            vec![views::ADMINS_ONLY.to_string()]
        );

        h.relay.handle(command(99, "stats")).await.unwrap();
        assert!(h
            .messenger
            .texts()
            .iter()
            .any(|t| t.contains("Scratch files: 1")));

        h.relay.handle(callback(99, views::CB_CLEAN)).await.unwrap();
        assert!(h.messenger.texts().contains(&views::cleaned_text(1)));
        assert!(h.scratch_is_empty());
    }

    #[tokio::test]
    async fn failure_notice_goes_to_the_originating_chat() {
        let h = Harness::new(member(), Ok(Vec::new()), StaticFetcher::default()).await;
        h.relay
            .handle_failure(&text(7, "https://terabox.example/s/abc"), "boom")
            .await;
        assert_eq!(
            h.messenger.sent(),
            vec![Sent::Html(ChatId(7), views::GENERIC_FAILURE.to_string())]
        );
    }
}
