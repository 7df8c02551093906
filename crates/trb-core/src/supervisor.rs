//! Long-lived event loop.
//!
//! Pulls batches from an [`UpdateSource`] and runs each event in its own task.
//! A failing pull is treated as a transport disconnect: sleep a fixed delay,
//! then retry, forever. A failing or panicking event is reported back to the
//! handler and never reaches the loop.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{errors::Error, messaging::types::IncomingUpdate, Result};

/// Pull-style inbound transport.
#[async_trait]
pub trait UpdateSource: Send {
    /// Called before the first pull and after every failed `prepare`.
    /// Implementations drop stale push-style registrations here.
    async fn prepare(&mut self) -> Result<()>;

    async fn next_batch(&mut self) -> Result<Vec<IncomingUpdate>>;
}

#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, update: IncomingUpdate) -> Result<()>;

    /// Tell the requester that their event could not be processed.
    async fn handle_failure(&self, update: &IncomingUpdate, reason: &str);
}

pub struct Supervisor<H: EventHandler> {
    handler: Arc<H>,
    retry_delay: Duration,
    cancel: CancellationToken,
}

impl<H: EventHandler> Supervisor<H> {
    pub fn new(handler: Arc<H>, retry_delay: Duration, cancel: CancellationToken) -> Self {
        Self {
            handler,
            retry_delay,
            cancel,
        }
    }

    /// Run until the cancellation token fires, then wait for in-flight events.
    pub async fn run(&self, source: &mut dyn UpdateSource) {
        if !self.prepare(source).await {
            return;
        }
        info!("event loop started");

        let mut tasks = JoinSet::new();
        loop {
            while tasks.try_join_next().is_some() {}

            let batch = tokio::select! {
                _ = self.cancel.cancelled() => break,
                batch = source.next_batch() => batch,
            };

            match batch {
                Ok(updates) => {
                    if !updates.is_empty() {
                        debug!(count = updates.len(), "received updates");
                    }
                    for update in updates {
                        tasks.spawn(run_one(self.handler.clone(), update));
                    }
                }
                Err(e) => {
                    let e = as_disconnect(e);
                    warn!(
                        retry_in_secs = self.retry_delay.as_secs_f64(),
                        "polling failed: {e}"
                    );
                    if !self.pause().await {
                        break;
                    }
                }
            }
        }

        info!(in_flight = tasks.len(), "event loop stopping");
        while tasks.join_next().await.is_some() {}
    }

    async fn prepare(&self, source: &mut dyn UpdateSource) -> bool {
        loop {
            let res = tokio::select! {
                _ = self.cancel.cancelled() => return false,
                res = source.prepare() => res,
            };
            match res {
                Ok(()) => return true,
                Err(e) => {
                    warn!("transport setup failed: {e}");
                    if !self.pause().await {
                        return false;
                    }
                }
            }
        }
    }

    /// Fixed sleep; false when cancelled meanwhile.
    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.retry_delay) => true,
        }
    }
}

/// Classify a failed pull. Sources that already report a disconnect keep
/// their message as is.
fn as_disconnect(e: Error) -> Error {
    match e {
        Error::TransportDisconnect(_) => e,
        other => Error::TransportDisconnect(other.to_string()),
    }
}

async fn run_one<H: EventHandler>(handler: Arc<H>, update: IncomingUpdate) {
    let inner = {
        let handler = handler.clone();
        let update = update.clone();
        tokio::spawn(async move { handler.handle(update).await })
    };

    let reason = match inner.await {
        Ok(Ok(())) => return,
        Ok(Err(e)) => {
            warn!(user_id = update.user_id().0, "event failed: {e}");
            e.to_string()
        }
        Err(e) => {
            error!(user_id = update.user_id().0, "event handler panicked: {e}");
            "internal error".to_string()
        }
    };
    handler.handle_failure(&update, &reason).await;
}
