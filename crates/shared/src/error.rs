use thiserror::Error;

/// Why an inbound frame was dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("unknown frame type `{0}`")]
    UnknownType(String),
    #[error("invalid `{field}` in `{frame}` frame")]
    InvalidField {
        frame: &'static str,
        field: &'static str,
    },
}
