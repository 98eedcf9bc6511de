use std::time::Duration;

use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct GatewayClientConfig {
    /// Per-request timeout. `None` leaves the HTTP client default (no timeout).
    pub timeout: Option<Duration>,
    /// Cap on how much of an upstream error body is kept for the error message.
    pub max_error_body_bytes: usize,
    /// Skip TLS certificate verification for upstream connections.
    pub accept_invalid_certs: bool,
}

impl Default for GatewayClientConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            max_error_body_bytes: 64 * 1024,
            accept_invalid_certs: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("{status} {body}")]
    Upstream { status: StatusCode, body: String },
}

/// A fully resolved outbound call to the chat gateway.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    /// Sent verbatim as the `Authorization` header when present.
    pub authorization: Option<HeaderValue>,
    pub body: Vec<u8>,
}

/// Thin HTTP client for the external chat gateway. Every request carries
/// `Content-Type: application/json` and `Accept: application/json`; there is
/// no retry.
#[derive(Clone)]
pub struct GatewayClient {
    config: GatewayClientConfig,
    http: reqwest::Client,
}

impl GatewayClient {
    pub fn new(config: GatewayClientConfig) -> Result<Self, GatewayError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("counsel-proxy/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(config.accept_invalid_certs);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &GatewayClientConfig {
        &self.config
    }

    /// Send the request and hand back the raw response, whatever its status.
    pub async fn send(&self, request: OutboundRequest) -> Result<reqwest::Response, GatewayError> {
        debug!(method = %request.method, url = %request.url, "sending gateway request");
        let mut builder = self
            .http
            .request(request.method, &request.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");
        if let Some(auth) = request.authorization {
            builder = builder.header(AUTHORIZATION, auth);
        }
        Ok(builder.body(request.body).send().await?)
    }

    /// Send the request and parse a successful response as JSON.
    ///
    /// A non-success status becomes `GatewayError::Upstream` carrying the
    /// (size-limited) response text.
    pub async fn send_json(
        &self,
        request: OutboundRequest,
    ) -> Result<serde_json::Value, GatewayError> {
        let resp = self.send(request).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = read_limited_text(resp, self.config.max_error_body_bytes).await;
            return Err(GatewayError::Upstream { status, body });
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

async fn read_limited_text(resp: reqwest::Response, max_bytes: usize) -> String {
    match resp.bytes().await {
        Ok(b) => truncate_text(&b, max_bytes),
        Err(e) => {
            warn!(error = %e, "failed to read upstream error body");
            "<failed to read error body>".to_string()
        }
    }
}

/// Lossy text of at most `max_bytes`, never ending in a split character.
fn truncate_text(bytes: &[u8], max_bytes: usize) -> String {
    let mut end = bytes.len().min(max_bytes);
    // back off while the cut lands on a UTF-8 continuation byte
    while end > 0 && end < bytes.len() && bytes[end] & 0xC0 == 0x80 {
        end -= 1;
    }
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::http::HeaderMap;
    use axum::{routing::post, Router};

    use super::*;

    async fn spawn(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn request(addr: SocketAddr, path: &str, body: &str) -> OutboundRequest {
        OutboundRequest {
            method: Method::POST,
            url: format!("http://{addr}{path}"),
            authorization: Some(HeaderValue::from_static("Bearer k-1")),
            body: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_send_json_echoes_headers() {
        let app = Router::new().route(
            "/echo",
            post(|headers: HeaderMap, body: String| async move {
                let h = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                };
                axum::Json(serde_json::json!({
                    "auth": h("authorization"),
                    "content_type": h("content-type"),
                    "accept": h("accept"),
                    "body": body,
                }))
            }),
        );
        let addr = spawn(app).await;
        let client = GatewayClient::new(GatewayClientConfig::default()).unwrap();

        let value = client
            .send_json(request(addr, "/echo", r#"{"query":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(value["auth"], "Bearer k-1");
        assert_eq!(value["content_type"], "application/json");
        assert_eq!(value["accept"], "application/json");
        assert_eq!(value["body"], r#"{"query":"hi"}"#);
    }

    #[tokio::test]
    async fn test_send_json_upstream_error_is_truncated() {
        let app = Router::new().route(
            "/fail",
            post(|| async { (StatusCode::UNAUTHORIZED, "invalid api key, please retry") }),
        );
        let addr = spawn(app).await;
        let client = GatewayClient::new(GatewayClientConfig {
            max_error_body_bytes: 11,
            ..Default::default()
        })
        .unwrap();

        let err = client
            .send_json(request(addr, "/fail", "{}"))
            .await
            .unwrap_err();
        match err {
            GatewayError::Upstream { status, body } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(body, "invalid api");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_upstream_error_truncation_keeps_whole_chars() {
        let app = Router::new().route(
            "/fail",
            post(|| async { (StatusCode::BAD_REQUEST, "应用密钥无效") }),
        );
        let addr = spawn(app).await;
        // 7 bytes: two full characters plus one byte of the third
        let client = GatewayClient::new(GatewayClientConfig {
            max_error_body_bytes: 7,
            ..Default::default()
        })
        .unwrap();

        let err = client
            .send_json(request(addr, "/fail", "{}"))
            .await
            .unwrap_err();
        match err {
            GatewayError::Upstream { body, .. } => assert_eq!(body, "应用"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("暂无".as_bytes(), 6), "暂无");
        assert_eq!(truncate_text("暂无".as_bytes(), 5), "暂");
        assert_eq!(truncate_text("暂无".as_bytes(), 2), "");
        assert_eq!(truncate_text(b"plain", 3), "pla");
        assert_eq!(truncate_text(b"plain", 64), "plain");
    }

    #[tokio::test]
    async fn test_send_json_rejects_non_json_success() {
        let app = Router::new().route("/text", post(|| async { "plain text" }));
        let addr = spawn(app).await;
        let client = GatewayClient::new(GatewayClientConfig::default()).unwrap();

        let err = client
            .send_json(request(addr, "/text", "{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidJson(_)));
    }

    #[tokio::test]
    async fn test_connection_failure() {
        // bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = GatewayClient::new(GatewayClientConfig::default()).unwrap();
        let err = client
            .send(request(addr, "/", "{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Request(_)));
    }
}
