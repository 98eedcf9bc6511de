/// Error types shared by the session domain and its surfaces.
///
/// Gateway transport failures have their own type in `gateway`; surfaces wrap
/// `CommonError` in their own error enums via `#[from]`.

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("unknown scenario: {0}")]
    UnknownScenario(u32),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
