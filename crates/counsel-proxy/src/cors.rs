use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// Permissive CORS headers attached to every response of a forwarding route.
///
/// Any `access-control-*` header already on the response (for example one
/// relayed from upstream) is dropped first, so the browser only ever sees
/// this policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorsPolicy {
    pub allow_methods: &'static str,
    pub allow_headers: &'static str,
    pub allow_credentials: bool,
}

impl CorsPolicy {
    pub const ENVELOPE: CorsPolicy = CorsPolicy {
        allow_methods: "POST, OPTIONS",
        allow_headers: "Content-Type, Authorization",
        allow_credentials: false,
    };

    pub const PASSTHROUGH: CorsPolicy = CorsPolicy {
        allow_methods: "GET, HEAD, PUT, PATCH, POST, DELETE, OPTIONS",
        allow_headers: "Content-Type, Authorization",
        allow_credentials: true,
    };

    pub fn apply(&self, headers: &mut HeaderMap) {
        let stale: Vec<HeaderName> = headers
            .keys()
            .filter(|name| name.as_str().starts_with("access-control-"))
            .cloned()
            .collect();
        for name in stale {
            headers.remove(name);
        }

        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(self.allow_methods),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(self.allow_headers),
        );
        if self.allow_credentials {
            headers.insert(
                ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
    }

    /// Answer to an `OPTIONS` pre-flight: 200, empty body, CORS headers only.
    pub fn preflight(&self) -> Response {
        let mut response = StatusCode::OK.into_response();
        self.apply(response.headers_mut());
        response
    }
}
