//! Error classification shared across the dialer crates.
//!
//! # Strategic Purpose
//! Typed errors allow pattern matching and policy-based handling. Each crate
//! keeps its own `thiserror` enum; `ErrorClass` is the common vocabulary used in
//! log fields and by callers deciding whether a failure is worth retrying.

use serde::{Deserialize, Serialize};
use std::fmt;

/// High-level error classification for logging and retry policy.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Invalid or inconsistent configuration. Never retried.
    Config,
    /// DNS resolution produced no usable address.
    Dns,
    /// I/O or network connectivity errors.
    Io,
    /// The caller cancelled or the deadline passed.
    Cancelled,
    /// Operation not supported by this dialer.
    Unsupported,
    /// Internal logic error (bug).
    Internal,
}

impl ErrorClass {
    /// Whether higher-level logic may reasonably retry the whole operation.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Dns | Self::Io)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Dns => "dns",
            Self::Io => "io",
            Self::Cancelled => "cancelled",
            Self::Unsupported => "unsupported",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}
