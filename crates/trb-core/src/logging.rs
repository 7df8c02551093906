use tracing_subscriber::{fmt, EnvFilter};

use crate::{errors::Error, Result};

/// Initialize logging/tracing for the bot.
///
/// Default: info for the workspace crates, warn for everything else (teloxide
/// and hyper are chatty at info). Can be overridden with `RUST_LOG`.
pub fn init(service_name: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(service_name));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install tracing subscriber: {e}")))
}

fn default_filter(service_name: &str) -> EnvFilter {
    let service = service_name.replace('-', "_");
    EnvFilter::new(format!(
        "warn,trb_core=info,trb_telegram=info,trb_xapiverse=info,{service}=info"
    ))
}
