//! Error taxonomy for the render farm core (spec §7).
//!
//! Component-local failures are reported as [`FarmError`] values. Only
//! [`FarmError::InvalidConfig`] and [`FarmError::Cancelled`] are meant to
//! surface synchronously to the caller that invoked the scheduler; every
//! other variant becomes a [`crate::events::LogEvent`] and the component that
//! raised it continues (listeners re-accept, dispatches do not retry).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FarmError {
    /// Chunk size non-positive, missing renderer path, or no scenes queued.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The renderer could not report the scene's frame range.
    #[error("failed to probe scene frame range: {0}")]
    SceneProbeFailed(String),

    /// Dependency enumeration failed; callers may proceed with an empty
    /// dependency list per spec §4.3/§7.
    #[error("dependency scan failed: {0}")]
    DependencyScanFailed(String),

    /// The renderer exited non-zero without a cancellation in effect.
    #[error("renderer exited with code {0}")]
    RendererFailed(i32),

    /// Discovery, dispatch, or upload I/O error. Per-connection fatal,
    /// per-component recoverable.
    #[error("network error: {0}")]
    NetworkError(String),

    /// Cooperative cancellation took effect before the operation completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Received-payload size mismatch, truncated frame, or JSON parse
    /// failure. The connection that produced it is dropped.
    #[error("integrity error: {0}")]
    IntegrityError(String),
}

impl From<std::io::Error> for FarmError {
    fn from(err: std::io::Error) -> Self {
        FarmError::NetworkError(err.to_string())
    }
}

impl From<serde_json::Error> for FarmError {
    fn from(err: serde_json::Error) -> Self {
        FarmError::IntegrityError(err.to_string())
    }
}
