//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue closed: {0}")]
    Closed(String),

    #[error("invalid task arguments: {0}")]
    Args(String),

    #[error("routing config error: {0}")]
    Routing(String),

    #[error("routing config parse error: {0}")]
    RoutingParse(#[from] toml::de::Error),

    #[error("routing config I/O error: {0}")]
    RoutingIo(#[from] std::io::Error),
}
