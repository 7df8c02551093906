use std::sync::Arc;

use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use trb_core::{
    config::Config,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    relay::{RelayPorts, RelayService},
    resolver::LinkResolver,
    scratch::ScratchDir,
    supervisor::Supervisor,
    transfer::HttpFetcher,
    usage::UsageStore,
};

use crate::{TelegramMembership, TelegramMessenger, TelegramUpdateSource};

/// Build the Telegram bot and run the relay until `cancel` fires.
pub async fn run_polling(
    cfg: Arc<Config>,
    scratch: Arc<ScratchDir>,
    usage: Arc<UsageStore>,
    resolver: Arc<dyn LinkResolver>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    // Uploads of large files must not hit teloxide's default request timeout.
    let client = teloxide::net::default_reqwest_settings()
        .timeout(cfg.upload_timeout)
        .build()?;
    let bot = Bot::with_client(cfg.telegram_bot_token.clone(), client);

    match bot.get_me().await {
        Ok(me) => info!(bot = %me.username(), "bot authenticated"),
        Err(e) => warn!("getMe failed, continuing: {e}"),
    }
    info!(
        channels = cfg.required_channels.len(),
        admins = cfg.admin_ids.len(),
        scratch = %scratch.root().display(),
        "relay configured"
    );

    // Wrap the raw Telegram messenger with a throttling decorator to reduce 429s when several
    // transfers report progress at once. A 429 RetryAfter retry stays in the adapter layer.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let fetcher = Arc::new(HttpFetcher::new(cfg.read_timeout)?);
    let relay = Arc::new(RelayService::new(
        cfg.clone(),
        RelayPorts {
            messenger,
            membership: Arc::new(TelegramMembership::new(bot.clone())),
            resolver,
            fetcher,
        },
        scratch,
        usage,
    ));

    let mut source = TelegramUpdateSource::new(bot);
    Supervisor::new(relay, cfg.poll_retry_delay, cancel)
        .run(&mut source)
        .await;

    info!("polling stopped");
    Ok(())
}
