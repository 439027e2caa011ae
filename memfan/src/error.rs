//! Client-level errors.
//!
//! These only surface from constructors and configuration: once a request is
//! accepted, every runtime failure completes it with the command's default
//! value instead of an error (see the command methods on
//! [`Client`](crate::Client)).

/// Errors from client construction and configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A server address could not be parsed as `host[:port]`.
    #[error("invalid server address: {0:?}")]
    InvalidServer(String),

    /// A server weight of zero was supplied.
    #[error("server weight must be positive: {0:?}")]
    ZeroWeight(String),

    /// The blocking facade could not build its runtime.
    #[error("runtime: {0}")]
    Runtime(#[from] std::io::Error),
}
