use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use trb_core::{config::Config, scratch::ScratchDir, sweeper::Sweeper, usage::UsageStore};
use trb_xapiverse::XapiverseResolver;

mod health;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    trb_core::logging::init("trb")?;

    let cfg = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!("refusing to start: {e}");
            return Err(e.into());
        }
    };

    let scratch = Arc::new(ScratchDir::open(&cfg.scratch_dir)?);
    let usage = Arc::new(UsageStore::open(&cfg.usage_file).await?);
    let counters = usage.snapshot().await;
    info!(
        file = %usage.path().display(),
        users = counters.total_users,
        downloads = counters.total_downloads,
        "usage counters loaded"
    );
    let resolver = Arc::new(XapiverseResolver::new(
        cfg.resolver_url.clone(),
        cfg.resolver_api_key.clone(),
        cfg.resolve_timeout,
    )?);

    let cancel = CancellationToken::new();

    let sweeper = Sweeper::new(scratch.clone(), cfg.scratch_retention)
        .spawn(cfg.sweep_interval, cancel.clone());

    let health = match cfg.health_port {
        Some(port) => {
            let listener = health::bind(port).await?;
            let cancel = cancel.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = health::serve(listener, cancel).await {
                    error!("liveness endpoint failed: {e}");
                }
            }))
        }
        None => None,
    };

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutdown requested");
                    cancel.cancel();
                }
                Err(e) => warn!("failed to listen for ctrl-c: {e}"),
            }
        });
    }

    let res = trb_telegram::router::run_polling(cfg, scratch, usage, resolver, cancel.clone()).await;

    cancel.cancel();
    let _ = sweeper.await;
    if let Some(h) = health {
        let _ = h.await;
    }
    res
}
