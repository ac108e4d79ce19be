//! Structured error type shared by the workspace.
//!
//! Construction errors abort the pipeline and the partial artifact is
//! discarded; query errors are swallowed at the FFI boundary and surfaced as
//! `false`. The verifier never returns an error at all — any malformed input
//! is a plain reject.

use thiserror::Error;

/// Errors produced by plot construction and queries.
#[derive(Debug, Error)]
pub enum PosError {
    /// A parameter or decoded field is outside its legal range, or an
    /// artifact region failed validation.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The configured working buffer cannot hold a sort bucket.
    #[error("insufficient memory: {0}")]
    InsufficientMemory(String),

    /// An operation was issued against a component in the wrong state
    /// (write to a read-only disk, add after reads started, ...).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// A single bit-field extraction wider than 64 bits was requested.
    #[error("bit width {0} exceeds a single 64-bit extraction")]
    WidthOverflow(u32),

    /// A sort-manager read fell outside the current window and the
    /// retained tail of the previous bucket.
    #[error("read outside the sort window at position {position}")]
    ReadOutOfWindow {
        /// Byte position of the failed read.
        position: u64,
    },

    /// An internal invariant that holds by construction was violated.
    #[error("internal invariant violated: {0}")]
    Unreachable(&'static str),
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, PosError>;

impl PosError {
    /// Shorthand for an [`PosError::InvalidValue`] with a formatted message.
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }
}
