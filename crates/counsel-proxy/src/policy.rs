/// Forwarding policies.
///
/// Both forwarding routes run the same contract; they differ only in where the
/// upstream target comes from and where the credentials come from. A route
/// that needs either from the request body accepts a JSON envelope
/// `{apiUrl, apiKey, payload}` and relays the upstream JSON; any other route
/// forwards the inbound body untouched and streams the upstream response back.
use axum::body::Bytes;
use axum::http::{HeaderValue, Method};
use serde_json::{Map, Value};

use counsel_common::gateway::OutboundRequest;

use crate::cors::CorsPolicy;
use crate::error::ProxyError;

/// Path appended to a caller-supplied `apiUrl`.
pub const CHAT_MESSAGES_PATH: &str = "/chat-messages";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPolicy {
    /// `{apiUrl}/chat-messages`, `apiUrl` taken from the envelope.
    CallerSupplied,
    /// `origin` + inbound path with a leading `strip_prefix` swapped for
    /// `replace_with`.
    FixedBase {
        origin: String,
        strip_prefix: String,
        replace_with: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialPolicy {
    /// `Authorization: Bearer {apiKey}` from the envelope.
    BodyField,
    /// The inbound `Authorization` header, copied unchanged.
    InboundHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Parse the upstream body and answer 200 with it; errors become `{error}`.
    Json,
    /// Relay status, headers and body as they come.
    Passthrough,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardPolicy {
    pub target: TargetPolicy,
    pub credentials: CredentialPolicy,
    pub cors: CorsPolicy,
}

/// The parts of an inbound request the policies look at.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub method: Method,
    pub path_and_query: String,
    pub authorization: Option<HeaderValue>,
    pub body: Bytes,
}

#[derive(Debug)]
pub struct ForwardPlan {
    pub request: OutboundRequest,
    pub relay: RelayMode,
}

/// Body of an envelope request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRequest {
    pub api_url: String,
    pub api_key: String,
    pub payload: Value,
}

impl ProxyRequest {
    /// Parse an envelope. All three fields must be present and non-empty.
    ///
    /// A body that is not JSON, or is JSON `null`, cannot be read at all and
    /// is a server-side failure. Any other non-object carries none of the
    /// fields and is reported as missing parameters.
    pub fn from_body(body: &[u8]) -> Result<Self, ProxyError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| ProxyError::MalformedBody(e.to_string()))?;
        let mut fields = match value {
            Value::Object(fields) => fields,
            Value::Null => return Err(ProxyError::MalformedBody("body is null".to_string())),
            _ => Map::new(),
        };

        let api_url = take_string(&mut fields, "apiUrl");
        let api_key = take_string(&mut fields, "apiKey");
        let payload = fields.remove("payload").filter(is_truthy);

        match (api_url, api_key, payload) {
            (Some(api_url), Some(api_key), Some(payload)) => Ok(Self {
                api_url,
                api_key,
                payload,
            }),
            _ => Err(ProxyError::MissingParameters),
        }
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

// null, false, 0, and "" count as absent
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Swap a leading `from` for `to`; other paths are returned as they are.
pub fn rewrite_path(path_and_query: &str, from: &str, to: &str) -> String {
    match path_and_query.strip_prefix(from) {
        Some(rest) => format!("{to}{rest}"),
        None => path_and_query.to_string(),
    }
}

impl ForwardPolicy {
    /// Caller names the gateway and key in the body.
    pub fn envelope() -> Self {
        Self {
            target: TargetPolicy::CallerSupplied,
            credentials: CredentialPolicy::BodyField,
            cors: CorsPolicy::ENVELOPE,
        }
    }

    /// Fixed gateway origin, caller's own `Authorization` header.
    pub fn fixed_base(
        origin: impl Into<String>,
        strip_prefix: impl Into<String>,
        replace_with: impl Into<String>,
    ) -> Self {
        Self {
            target: TargetPolicy::FixedBase {
                origin: origin.into(),
                strip_prefix: strip_prefix.into(),
                replace_with: replace_with.into(),
            },
            credentials: CredentialPolicy::InboundHeader,
            cors: CorsPolicy::PASSTHROUGH,
        }
    }

    pub fn uses_envelope(&self) -> bool {
        self.target == TargetPolicy::CallerSupplied
            || self.credentials == CredentialPolicy::BodyField
    }

    pub fn plan(&self, inbound: Inbound) -> Result<ForwardPlan, ProxyError> {
        let envelope = if self.uses_envelope() {
            if inbound.method != Method::POST {
                return Err(ProxyError::MethodNotAllowed);
            }
            Some(ProxyRequest::from_body(&inbound.body)?)
        } else {
            None
        };

        let url = match &self.target {
            TargetPolicy::CallerSupplied => {
                let envelope = envelope.as_ref().ok_or(ProxyError::MissingParameters)?;
                format!("{}{CHAT_MESSAGES_PATH}", envelope.api_url)
            }
            TargetPolicy::FixedBase {
                origin,
                strip_prefix,
                replace_with,
            } => format!(
                "{origin}{}",
                rewrite_path(&inbound.path_and_query, strip_prefix, replace_with)
            ),
        };

        let authorization = match self.credentials {
            CredentialPolicy::BodyField => {
                let envelope = envelope.as_ref().ok_or(ProxyError::MissingParameters)?;
                let mut value = HeaderValue::from_str(&format!("Bearer {}", envelope.api_key))
                    .map_err(|_| {
                        ProxyError::MalformedBody("apiKey is not a valid header value".to_string())
                    })?;
                value.set_sensitive(true);
                Some(value)
            }
            CredentialPolicy::InboundHeader => inbound.authorization,
        };

        let plan = match envelope {
            Some(envelope) => ForwardPlan {
                request: OutboundRequest {
                    method: Method::POST,
                    url,
                    authorization,
                    body: serde_json::to_vec(&envelope.payload)
                        .map_err(|e| ProxyError::MalformedBody(e.to_string()))?,
                },
                relay: RelayMode::Json,
            },
            None => ForwardPlan {
                request: OutboundRequest {
                    method: inbound.method,
                    url,
                    authorization,
                    body: inbound.body.to_vec(),
                },
                relay: RelayMode::Passthrough,
            },
        };
        Ok(plan)
    }
}
