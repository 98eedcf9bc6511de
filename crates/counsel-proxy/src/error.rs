use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use counsel_common::gateway::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("config error: {0}")]
    Config(String),

    #[error("缺少必要参数: apiUrl, apiKey, payload")]
    MissingParameters,

    /// The envelope could not be read or turned into an upstream call.
    #[error("请求体无效: {0}")]
    MalformedBody(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Transport failure on a pass-through route.
    #[error("代理服务器错误: {message}")]
    Passthrough { message: String, url: String },
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

impl ErrorBody {
    fn new(error: String) -> Self {
        Self {
            error,
            message: None,
            url: None,
        }
    }
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingParameters => StatusCode::BAD_REQUEST,
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::Gateway(GatewayError::Upstream { status, .. }) => *status,
            ProxyError::Config(_)
            | ProxyError::MalformedBody(_)
            | ProxyError::Gateway(_)
            | ProxyError::Passthrough { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ProxyError::Gateway(GatewayError::Upstream { status, body }) => {
                ErrorBody::new(format!("API请求失败: {} {}", status.as_u16(), body))
            }
            ProxyError::Passthrough { message, url } => ErrorBody {
                error: "代理服务器错误".to_string(),
                message: Some(message),
                url: Some(url),
            },
            other => ErrorBody::new(other.to_string()),
        };
        (status, Json(body)).into_response()
    }
}
