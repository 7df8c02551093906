//! Share-link resolution: port, resolved source model and the API response
//! contract.
//!
//! The HTTP client lives in `trb-xapiverse`; this module owns the parsing and
//! endpoint-selection policy so it can be tested without a network.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::errors::ResolveError;

/// Streaming tiers tried after the direct link, best first.
const STREAM_TIERS: [&str; 3] = ["720p", "480p", "360p"];

/// One downloadable file behind a share link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSource {
    pub display_name: String,
    /// `0` when the API did not report a size.
    pub byte_size: u64,
    pub direct_endpoint: String,
    /// Remaining endpoints, ordered by preference.
    pub fallback_endpoints: Vec<String>,
}

impl ResolvedSource {
    /// All endpoints in the order the pipeline should try them.
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.direct_endpoint.as_str())
            .chain(self.fallback_endpoints.iter().map(String::as_str))
    }
}

#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Resolve a share link into every downloadable file it contains.
    async fn resolve(&self, link: &str) -> std::result::Result<Vec<ResolvedSource>, ResolveError>;
}

/// Case-insensitive marker match identifying a share-link submission.
pub fn is_share_link(text: &str, markers: &[String]) -> bool {
    let lower = text.to_lowercase();
    markers.iter().any(|m| !m.is_empty() && lower.contains(m.as_str()))
}

/// Pull the first URL-looking token out of a message, falling back to the
/// whole trimmed text.
pub fn extract_link(text: &str) -> String {
    text.split_whitespace()
        .find(|t| t.starts_with("http://") || t.starts_with("https://"))
        .unwrap_or_else(|| text.trim())
        .to_string()
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: Option<serde_json::Value>,
    #[serde(default)]
    list: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    size: Option<serde_json::Value>,
    #[serde(default)]
    download_link: Option<String>,
    #[serde(default)]
    stream_url: Option<String>,
    #[serde(default)]
    fast_stream_url: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Parse a resolution API body into resolved sources.
///
/// - unparsable body / non-success status -> `Upstream`
/// - missing, malformed or empty `list` -> `NotFound`
/// - files without any endpoint are skipped; none left -> `NotFound`
pub fn parse_response(body: &str) -> std::result::Result<Vec<ResolvedSource>, ResolveError> {
    let resp: ApiResponse = serde_json::from_str(body)
        .map_err(|e| ResolveError::Upstream(format!("unparsable response: {e}")))?;

    if let Some(status) = &resp.status {
        if !is_success_status(status) {
            return Err(ResolveError::Upstream(format!("api status: {status}")));
        }
    }

    let Some(serde_json::Value::Array(items)) = resp.list else {
        return Err(ResolveError::NotFound);
    };

    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let file: ApiFile = match serde_json::from_value(item) {
            Ok(f) => f,
            Err(e) => {
                warn!(index = idx, "skipping malformed file entry: {e}");
                continue;
            }
        };
        match select_endpoints(file, idx + 1) {
            Some(src) => out.push(src),
            None => warn!(index = idx, "skipping file entry without a download endpoint"),
        }
    }

    if out.is_empty() {
        return Err(ResolveError::NotFound);
    }
    Ok(out)
}

fn select_endpoints(file: ApiFile, ordinal: usize) -> Option<ResolvedSource> {
    let mut endpoints: Vec<String> = Vec::new();
    let mut push = |url: Option<&str>| {
        let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) else {
            return;
        };
        if !endpoints.iter().any(|e| e == url) {
            endpoints.push(url.to_string());
        }
    };

    push(file.download_link.as_deref());
    if let Some(tiers) = &file.fast_stream_url {
        for tier in STREAM_TIERS {
            push(tiers.get(tier).and_then(|v| v.as_str()));
        }
    }
    push(file.stream_url.as_deref());

    let mut endpoints = endpoints.into_iter();
    let direct_endpoint = endpoints.next()?;

    let display_name = file
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("file_{ordinal}.mp4"));

    Some(ResolvedSource {
        display_name,
        byte_size: file.size.as_ref().map(parse_size).unwrap_or(0),
        direct_endpoint,
        fallback_endpoints: endpoints.collect(),
    })
}

fn parse_size(v: &serde_json::Value) -> u64 {
    match v {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse::<u64>().unwrap_or(0),
        _ => 0,
    }
}

fn is_success_status(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_u64() == Some(200),
        serde_json::Value::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "success" | "ok" | "200" | "true"
        ),
        _ => false,
    }
}
