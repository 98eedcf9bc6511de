use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use counsel_common::gateway::{GatewayClient, GatewayError};

use crate::error::ProxyError;
use crate::policy::{ForwardPolicy, Inbound, RelayMode};

/// Headers that describe the upstream connection rather than the message.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

#[derive(Clone)]
pub struct AppState {
    gateway: Arc<GatewayClient>,
    envelope: Arc<ForwardPolicy>,
    passthrough: Arc<ForwardPolicy>,
}

impl AppState {
    pub fn new(
        gateway: Arc<GatewayClient>,
        envelope: ForwardPolicy,
        passthrough: ForwardPolicy,
    ) -> Self {
        Self {
            gateway,
            envelope: Arc::new(envelope),
            passthrough: Arc::new(passthrough),
        }
    }
}

/// `forward_path` takes precedence over the `/api/*` pass-through route.
pub fn router(state: AppState, forward_path: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(forward_path, any(forward_envelope))
        .route("/api/{*path}", any(forward_passthrough))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn forward_envelope(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&state, &state.envelope, method, uri, headers, body).await
}

async fn forward_passthrough(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&state, &state.passthrough, method, uri, headers, body).await
}

async fn handle(
    state: &AppState,
    policy: &ForwardPolicy,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::OPTIONS {
        return policy.cors.preflight();
    }

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    let inbound = Inbound {
        method,
        path_and_query,
        authorization: headers.get(AUTHORIZATION).cloned(),
        body,
    };

    let mut response = match forward(&state.gateway, policy, inbound).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };
    policy.cors.apply(response.headers_mut());
    response
}

async fn forward(
    gateway: &GatewayClient,
    policy: &ForwardPolicy,
    inbound: Inbound,
) -> Result<Response, ProxyError> {
    let inbound_path = inbound.path_and_query.clone();
    let plan = policy.plan(inbound)?;
    info!(
        method = %plan.request.method,
        target = %plan.request.url,
        "forwarding request"
    );

    match plan.relay {
        RelayMode::Json => {
            let value = gateway.send_json(plan.request).await.inspect_err(|e| match e {
                GatewayError::Upstream { status, body } => {
                    warn!(status = status.as_u16(), body = %body, "upstream returned error")
                }
                other => error!(error = %other, "forwarding failed"),
            })?;
            Ok((StatusCode::OK, Json(value)).into_response())
        }
        RelayMode::Passthrough => {
            let upstream = gateway.send(plan.request).await.map_err(|e| {
                error!(error = %e, url = %inbound_path, "forwarding failed");
                ProxyError::Passthrough {
                    message: e.to_string(),
                    url: inbound_path.clone(),
                }
            })?;
            info!(status = upstream.status().as_u16(), url = %inbound_path, "upstream responded");
            Ok(relay(upstream))
        }
    }
}

fn relay(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    for name in HOP_BY_HOP {
        headers.remove(name);
    }

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Mutex;

    use counsel_common::gateway::GatewayClientConfig;
    use serde_json::Value;

    use super::*;

    /// What the stub upstream saw.
    #[derive(Debug, Clone)]
    struct Seen {
        method: String,
        uri: String,
        authorization: Option<String>,
        accept: Option<String>,
        content_type: Option<String>,
        body: String,
    }

    type Log = Arc<Mutex<Vec<Seen>>>;

    async fn spawn(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn header(headers: &HeaderMap, name: &str) -> Option<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Stub gateway: records every call and answers by path.
    async fn spawn_upstream() -> (SocketAddr, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&log);
        let app = Router::new().fallback(
            move |method: Method, uri: Uri, headers: HeaderMap, body: String| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(Seen {
                        method: method.to_string(),
                        uri: uri.to_string(),
                        authorization: header(&headers, "authorization"),
                        accept: header(&headers, "accept"),
                        content_type: header(&headers, "content-type"),
                        body,
                    });
                    let path = uri.path().to_string();
                    if path.ends_with("/broken/chat-messages") {
                        return (StatusCode::BAD_GATEWAY, "upstream exploded").into_response();
                    }
                    if path.ends_with("/garbled/chat-messages") {
                        return (StatusCode::OK, "{not json").into_response();
                    }
                    if path.ends_with("/ordered/chat-messages") {
                        return (
                            [("content-type", "application/json")],
                            r#"{"zeta":1,"answer":"a","conversation_id":"c"}"#,
                        )
                            .into_response();
                    }
                    let mut response =
                        Json(json!({"answer": "嗯……最近确实睡不好。", "conversation_id": "c-1"}))
                            .into_response();
                    let h = response.headers_mut();
                    h.insert("access-control-allow-origin", "https://gw.example".parse().unwrap());
                    h.insert("access-control-allow-credentials", "false".parse().unwrap());
                    h.insert("access-control-expose-headers", "x-trace".parse().unwrap());
                    h.insert("x-trace", "t-9".parse().unwrap());
                    response
                }
            },
        );
        (spawn(app).await, log)
    }

    async fn spawn_proxy(origin: String) -> SocketAddr {
        let gateway = Arc::new(GatewayClient::new(GatewayClientConfig::default()).unwrap());
        let state = AppState::new(
            gateway,
            ForwardPolicy::envelope(),
            ForwardPolicy::fixed_base(origin, "/api", "/v1"),
        );
        spawn(router(state, "/api/dify")).await
    }

    async fn setup() -> (SocketAddr, SocketAddr, Log) {
        let (upstream, log) = spawn_upstream().await;
        let proxy = spawn_proxy(format!("http://{upstream}/dify-test")).await;
        (upstream, proxy, log)
    }

    fn assert_envelope_cors(headers: &reqwest::header::HeaderMap) {
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], "POST, OPTIONS");
        assert_eq!(
            headers["access-control-allow-headers"],
            "Content-Type, Authorization"
        );
    }

    #[tokio::test]
    async fn test_envelope_forwards_to_chat_messages() {
        let (upstream, proxy, log) = setup().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("http://{proxy}/api/dify"))
            .json(&json!({
                "apiUrl": format!("http://{upstream}/v1"),
                "apiKey": "app-secret",
                "payload": {"query": "你好", "user": "trainee-1", "inputs": {}}
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_envelope_cors(resp.headers());
        assert!(resp.headers().get("access-control-allow-credentials").is_none());
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, json!({"answer": "嗯……最近确实睡不好。", "conversation_id": "c-1"}));

        let seen = log.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].uri, "/v1/chat-messages");
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer app-secret"));
        assert_eq!(seen[0].accept.as_deref(), Some("application/json"));
        assert_eq!(seen[0].content_type.as_deref(), Some("application/json"));
        let sent: Value = serde_json::from_str(&seen[0].body).unwrap();
        assert_eq!(sent, json!({"query": "你好", "user": "trainee-1", "inputs": {}}));
    }

    #[tokio::test]
    async fn test_envelope_missing_fields_never_reach_upstream() {
        let (upstream, proxy, log) = setup().await;
        let client = reqwest::Client::new();

        for body in [
            json!({"apiKey": "k", "payload": {"query": "q"}}),
            json!({"apiUrl": format!("http://{upstream}"), "payload": {"query": "q"}}),
            json!({"apiUrl": format!("http://{upstream}"), "apiKey": "k"}),
        ] {
            let resp = client
                .post(format!("http://{proxy}/api/dify"))
                .json(&body)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            assert_envelope_cors(resp.headers());
            let err: Value = resp.json().await.unwrap();
            assert_eq!(
                err["error"],
                "缺少必要参数: apiUrl, apiKey, payload"
            );
        }
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_envelope_unreadable_body_is_500() {
        let (_, proxy, log) = setup().await;
        let client = reqwest::Client::new();

        for raw in ["{not json", "null"] {
            let resp = client
                .post(format!("http://{proxy}/api/dify"))
                .header("content-type", "application/json")
                .body(raw)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR, "body: {raw}");
            assert_envelope_cors(resp.headers());
            let err: Value = resp.json().await.unwrap();
            assert!(err["error"].as_str().is_some_and(|m| !m.is_empty()));
        }

        for raw in ["[1,2]", r#""str""#] {
            let resp = client
                .post(format!("http://{proxy}/api/dify"))
                .header("content-type", "application/json")
                .body(raw)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body: {raw}");
            let err: Value = resp.json().await.unwrap();
            assert_eq!(err["error"], "缺少必要参数: apiUrl, apiKey, payload");
        }
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_are_both_forwarded() {
        let (upstream, proxy, log) = setup().await;
        let client = reqwest::Client::new();
        let body = json!({
            "apiUrl": format!("http://{upstream}/v1"),
            "apiKey": "k",
            "payload": {"query": "同一条消息", "user": "trainee-1"}
        });
        let send = || {
            client
                .post(format!("http://{proxy}/api/dify"))
                .json(&body)
                .send()
        };

        let (first, second) = tokio::join!(send(), send());
        assert_eq!(first.unwrap().status(), StatusCode::OK);
        assert_eq!(second.unwrap().status(), StatusCode::OK);

        let seen = log.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].body, seen[1].body);
    }

    #[tokio::test]
    async fn test_envelope_keeps_upstream_key_order() {
        let (upstream, proxy, _) = setup().await;
        let resp = reqwest::Client::new()
            .post(format!("http://{proxy}/api/dify"))
            .json(&json!({
                "apiUrl": format!("http://{upstream}/ordered"),
                "apiKey": "k",
                "payload": {"query": "q"}
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.text().await.unwrap(),
            r#"{"zeta":1,"answer":"a","conversation_id":"c"}"#
        );
    }

    #[tokio::test]
    async fn test_options_is_answered_locally() {
        let (_, proxy, log) = setup().await;
        let client = reqwest::Client::new();

        for path in ["/api/dify", "/api/chat-messages"] {
            let resp = client
                .request(Method::OPTIONS, format!("http://{proxy}{path}"))
                .header("content-type", "application/json")
                .body(r#"{"apiUrl": "http://ignored"}"#)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(resp.headers()["access-control-allow-origin"], "*");
            assert!(resp.headers().contains_key("access-control-allow-methods"));
            assert!(resp.headers().contains_key("access-control-allow-headers"));
            assert!(resp.bytes().await.unwrap().is_empty());
        }
        assert_envelope_cors(
            client
                .request(Method::OPTIONS, format!("http://{proxy}/api/dify"))
                .send()
                .await
                .unwrap()
                .headers(),
        );
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_envelope_rejects_other_methods() {
        let (_, proxy, log) = setup().await;
        let resp = reqwest::get(format!("http://{proxy}/api/dify")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_envelope_cors(resp.headers());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_envelope_propagates_upstream_error() {
        let (upstream, proxy, _) = setup().await;
        let resp = reqwest::Client::new()
            .post(format!("http://{proxy}/api/dify"))
            .json(&json!({
                "apiUrl": format!("http://{upstream}/broken"),
                "apiKey": "k",
                "payload": {"query": "q"}
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_envelope_cors(resp.headers());
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err, json!({"error": "API请求失败: 502 upstream exploded"}));
    }

    #[tokio::test]
    async fn test_envelope_garbled_upstream_body_is_500() {
        let (upstream, proxy, _) = setup().await;
        let resp = reqwest::Client::new()
            .post(format!("http://{proxy}/api/dify"))
            .json(&json!({
                "apiUrl": format!("http://{upstream}/garbled"),
                "apiKey": "k",
                "payload": {"query": "q"}
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let err: Value = resp.json().await.unwrap();
        let message = err["error"].as_str().unwrap();
        assert!(message.starts_with("invalid response JSON"), "{message}");
        assert!(!message.contains("{not json"));
    }

    #[tokio::test]
    async fn test_envelope_unreachable_upstream_is_500() {
        let (_, proxy, _) = setup().await;
        let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);

        let resp = reqwest::Client::new()
            .post(format!("http://{proxy}/api/dify"))
            .json(&json!({
                "apiUrl": format!("http://{dead_addr}"),
                "apiKey": "k",
                "payload": {"query": "q"}
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_envelope_cors(resp.headers());
        let err: Value = resp.json().await.unwrap();
        assert!(err["error"].as_str().unwrap().starts_with("request failed"));
    }

    #[tokio::test]
    async fn test_passthrough_rewrites_path_and_copies_auth() {
        let (_, proxy, log) = setup().await;
        let resp = reqwest::Client::new()
            .post(format!("http://{proxy}/api/chat-messages?user=u1"))
            .header("authorization", "Bearer caller-key")
            .body(r#"{"query":"hi","response_mode":"blocking"}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let headers = resp.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-credentials"], "true");
        assert!(headers.get("access-control-expose-headers").is_none());
        assert_eq!(headers["x-trace"], "t-9");
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["conversation_id"], "c-1");

        let seen = log.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].uri, "/dify-test/v1/chat-messages?user=u1");
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer caller-key"));
        assert_eq!(seen[0].content_type.as_deref(), Some("application/json"));
        assert_eq!(seen[0].body, r#"{"query":"hi","response_mode":"blocking"}"#);
    }

    #[tokio::test]
    async fn test_passthrough_keeps_method_and_status() {
        let (_, proxy, log) = setup().await;
        let resp = reqwest::Client::new()
            .get(format!("http://{proxy}/api/broken/chat-messages"))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(resp.text().await.unwrap(), "upstream exploded");

        let seen = log.lock().unwrap().clone();
        assert_eq!(seen[0].method, "GET");
        assert_eq!(seen[0].uri, "/dify-test/v1/broken/chat-messages");
        assert!(seen[0].authorization.is_none());
    }

    #[tokio::test]
    async fn test_passthrough_transport_failure() {
        let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);
        let proxy = spawn_proxy(format!("http://{dead_addr}")).await;

        let resp = reqwest::Client::new()
            .post(format!("http://{proxy}/api/chat-messages"))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.headers()["access-control-allow-credentials"], "true");
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["error"], "代理服务器错误");
        assert_eq!(err["url"], "/api/chat-messages");
        assert!(err["message"].as_str().is_some_and(|m| !m.is_empty()));
    }

    #[tokio::test]
    async fn test_health() {
        let (_, proxy, _) = setup().await;
        let body: Value = reqwest::get(format!("http://{proxy}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, json!({"status": "ok"}));
    }
}
