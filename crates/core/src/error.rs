use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("payload must be a JSON object")]
    PayloadNotObject,

    #[error("payload message is required and must not be empty")]
    EmptyMessage,

    #[error("invalid keyboard: {0}")]
    InvalidKeyboard(String),

    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}
