//! xAPIverse adapter (share-link resolution).
//!
//! One POST per link with the API key in the `xAPIverse-Key` header. Parsing
//! and endpoint selection live in `trb_core::resolver`.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use trb_core::{
    errors::{Error, ResolveError},
    resolver::{parse_response, LinkResolver, ResolvedSource},
    Result,
};

const API_KEY_HEADER: &str = "xAPIverse-Key";

#[derive(Clone, Debug)]
pub struct XapiverseResolver {
    endpoint: String,
    api_key: String,
    http: reqwest::Client,
}

impl XapiverseResolver {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("xapiverse client build failed: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            http,
        })
    }
}

#[async_trait]
impl LinkResolver for XapiverseResolver {
    async fn resolve(&self, link: &str) -> std::result::Result<Vec<ResolvedSource>, ResolveError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&serde_json::json!({ "url": link }))
            .send()
            .await
            .map_err(map_request_error)?;

        let status = resp.status();
        let body = resp.text().await.map_err(map_request_error)?;
        if !status.is_success() {
            warn!(%status, "resolution api returned an error status");
            return Err(ResolveError::Upstream(format!(
                "xapiverse status {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let sources = parse_response(&body)?;
        debug!(files = sources.len(), "share link resolved");
        Ok(sources)
    }
}

fn map_request_error(e: reqwest::Error) -> ResolveError {
    if e.is_timeout() {
        ResolveError::Timeout
    } else {
        ResolveError::Upstream(format!("xapiverse request error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::{
        http::{HeaderMap, StatusCode},
        routing::post,
        Json, Router,
    };

    use super::*;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        addr
    }

    async fn listing(
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> (StatusCode, String) {
        if headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) != Some("secret") {
            return (StatusCode::UNAUTHORIZED, "bad key".to_string());
        }
        let url = body["url"].as_str().unwrap_or_default();
        let reply = serde_json::json!({
            "status": "success",
            "list": [{
                "name": "clip.mp4",
                "size": "500000000",
                "download_link": format!("https://cdn/direct?src={url}"),
                "fast_stream_url": {"720p": "https://cdn/720", "360p": "https://cdn/360"}
            }]
        });
        (StatusCode::OK, reply.to_string())
    }

    fn resolver(addr: SocketAddr, key: &str, timeout: Duration) -> XapiverseResolver {
        XapiverseResolver::new(format!("http://{addr}/api/terabox"), key, timeout).unwrap()
    }

    #[tokio::test]
    async fn resolves_listing_with_fallbacks() {
        let addr = serve(Router::new().route("/api/terabox", post(listing))).await;

        let sources = resolver(addr, "secret", Duration::from_secs(5))
            .resolve("https://terabox.example/s/abc")
            .await
            .unwrap();

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].display_name, "clip.mp4");
        assert_eq!(sources[0].byte_size, 500_000_000);
        assert_eq!(
            sources[0].direct_endpoint,
            "https://cdn/direct?src=https://terabox.example/s/abc"
        );
        assert_eq!(
            sources[0].fallback_endpoints,
            vec!["https://cdn/720".to_string(), "https://cdn/360".to_string()]
        );
    }

    #[tokio::test]
    async fn error_status_is_upstream() {
        let addr = serve(Router::new().route("/api/terabox", post(listing))).await;

        let err = resolver(addr, "wrong", Duration::from_secs(5))
            .resolve("https://terabox.example/s/abc")
            .await
            .unwrap_err();

        assert!(matches!(err, ResolveError::Upstream(ref m) if m.contains("401")));
    }

    #[tokio::test]
    async fn slow_api_times_out() {
        let app = Router::new().route(
            "/api/terabox",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "{}"
            }),
        );
        let addr = serve(app).await;

        let err = resolver(addr, "secret", Duration::from_millis(100))
            .resolve("https://terabox.example/s/abc")
            .await
            .unwrap_err();

        assert!(matches!(err, ResolveError::Timeout));
    }
}
