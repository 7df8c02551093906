use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::Channel, errors::Error, Result};

const MIB: u64 = 1024 * 1024;

/// Typed configuration for the relay bot.
///
/// Required keys are fatal when missing or malformed; the process must not
/// start half-configured.
#[derive(Clone, Debug)]
pub struct Config {
    // Core (required)
    pub telegram_bot_token: String,
    pub resolver_api_key: String,
    pub admin_ids: Vec<i64>,
    pub required_channels: Vec<Channel>,
    pub max_file_size: u64,
    pub scratch_retention: Duration,

    // Storage
    pub scratch_dir: PathBuf,
    pub usage_file: PathBuf,

    // Resolution API
    pub resolver_url: String,
    pub resolve_timeout: Duration,
    pub link_markers: Vec<String>,

    // Transfers
    pub read_timeout: Duration,
    pub progress_interval: Duration,
    pub upload_timeout: Duration,

    // Membership
    pub membership_timeout: Duration,

    // Runtime
    pub poll_retry_delay: Duration,
    pub sweep_interval: Duration,
    pub health_port: Option<u16>,
}

impl Config {
    /// Load from the process environment (plus an optional `.env` file).
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        // Required env vars
        let telegram_bot_token = get("BOT_TOKEN").ok_or_else(|| missing("BOT_TOKEN"))?;
        let resolver_api_key = get("XAPIVERSE_KEY").ok_or_else(|| missing("XAPIVERSE_KEY"))?;

        let admin_ids = parse_csv_i64(get("ADMIN_IDS"));
        if admin_ids.is_empty() {
            return Err(missing("ADMIN_IDS"));
        }

        let required_channels = parse_csv_channels(get("FORCE_CHANNELS"));
        if required_channels.is_empty() {
            return Err(missing("FORCE_CHANNELS"));
        }

        let max_file_size_mb = parse_required_u64(get("MAX_FILE_SIZE_MB"), "MAX_FILE_SIZE_MB")?;
        let max_file_size = max_file_size_mb.saturating_mul(MIB);

        let retention_secs =
            parse_required_u64(get("SCRATCH_RETENTION_SECS"), "SCRATCH_RETENTION_SECS")?;
        let scratch_retention = Duration::from_secs(retention_secs);

        // Storage
        let scratch_dir = PathBuf::from(get("SCRATCH_DIR").unwrap_or("downloads".to_string()));
        let usage_file = PathBuf::from(get("USAGE_FILE").unwrap_or("usage.json".to_string()));

        // Resolution API
        let resolver_url =
            get("RESOLVER_URL").unwrap_or("https://xapiverse.com/api/terabox".to_string());
        let link_markers = parse_csv_lower(
            get("LINK_MARKERS").or_else(|| Some("terabox,1024tera".to_string())),
        );

        // Runtime
        let poll_retry_secs = parse_u64(get("POLL_RETRY_SECS")).unwrap_or(5).clamp(5, 10);
        let sweep_interval =
            Duration::from_secs(parse_u64(get("SWEEP_INTERVAL_SECS")).unwrap_or(60).max(1));
        let upload_timeout =
            Duration::from_secs(parse_u64(get("UPLOAD_TIMEOUT_SECS")).unwrap_or(600));

        // `0` disables the liveness listener.
        let health_port = match get("HEALTH_PORT").or_else(|| get("PORT")) {
            Some(raw) => match raw.trim().parse::<u16>() {
                Ok(0) => None,
                Ok(p) => Some(p),
                Err(_) => {
                    return Err(Error::Config(format!("HEALTH_PORT is not a port: {raw}")));
                }
            },
            None => Some(10_000),
        };

        Ok(Self {
            telegram_bot_token,
            resolver_api_key,
            admin_ids,
            required_channels,
            max_file_size,
            scratch_retention,
            scratch_dir,
            usage_file,
            resolver_url,
            resolve_timeout: Duration::from_secs(60),
            link_markers,
            read_timeout: Duration::from_secs(60),
            progress_interval: Duration::from_secs(3),
            upload_timeout,
            membership_timeout: Duration::from_secs(10),
            poll_retry_delay: Duration::from_secs(poll_retry_secs),
            sweep_interval,
            health_port,
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

fn missing(key: &str) -> Error {
    Error::Config(format!("{key} environment variable is required"))
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

fn parse_required_u64(v: Option<String>, key: &str) -> Result<u64> {
    let raw = v.ok_or_else(|| missing(key))?;
    raw.trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got {raw:?}")))
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn parse_csv_lower(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_csv_channels(v: Option<String>) -> Vec<Channel> {
    v.unwrap_or_default()
        .split(',')
        .filter_map(Channel::parse)
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
