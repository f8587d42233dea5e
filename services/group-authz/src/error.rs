//! Error handling for the authorization plugin.
//!
//! None of these errors ever reach standard output: the binary logs them
//! and exits non-zero, so the consumer of the decision only ever sees
//! `allow` or silence.

use crate::config::ConfigError;
use rust_common::PlatformError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while evaluating an authorization request.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PluginError {
    /// Configuration could not be loaded or is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Plugin environment variable is malformed
    #[error("Invalid request variable {name}: {reason}")]
    InvalidRequest {
        /// Environment variable name
        name: String,
        /// Description of the problem
        reason: String,
    },

    /// Service account credentials are unusable
    #[error("Credential error: {reason}")]
    Credentials {
        /// Description of the problem
        reason: String,
    },

    /// Directory lookup for a group failed
    #[error("Directory lookup failed for group {group}: {source}")]
    Directory {
        /// Group email
        group: String,
        /// Underlying transport or API error
        #[source]
        source: PlatformError,
    },

    /// Cache state could not be serialized
    #[error("Failed to serialize cache: {0}")]
    CacheSerialize(#[from] serde_json::Error),

    /// Cache file could not be written
    #[error("Failed to {action} cache file {}: {source}", .path.display())]
    CacheWrite {
        /// Step of the save sequence that failed
        action: &'static str,
        /// Path involved in the failing step
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Cross-process cache lock could not be acquired
    #[error("Failed to lock cache {}: {source}", .path.display())]
    CacheLock {
        /// Lock file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Evaluation of a group rule failed
    #[error("Failed to fetch members of group {group}: {source}")]
    GroupLookup {
        /// Group email from the policy
        group: String,
        /// Error reported by the fetcher
        #[source]
        source: Box<PluginError>,
    },

    /// Evaluation was interrupted by the cancel signal
    #[error("Authorization evaluation cancelled")]
    Cancelled,

    /// Shared platform error
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

impl PluginError {
    /// Stable error code for log records.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_INVALID",
            Self::InvalidRequest { .. } => "REQUEST_INVALID",
            Self::Credentials { .. } => "CREDENTIALS_INVALID",
            Self::Directory { .. } => "DIRECTORY_ERROR",
            Self::CacheSerialize(_) | Self::CacheWrite { .. } => "CACHE_WRITE_FAILED",
            Self::CacheLock { .. } => "CACHE_LOCK_FAILED",
            Self::GroupLookup { source, .. } => source.code(),
            Self::Cancelled => "CANCELLED",
            Self::Platform(_) => "PLATFORM_ERROR",
        }
    }

    /// Check if a later invocation could succeed without operator action.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Directory { source, .. } | Self::Platform(source) => source.is_retryable(),
            Self::GroupLookup { source, .. } => source.is_retryable(),
            Self::CacheLock { .. } | Self::Cancelled => true,
            _ => false,
        }
    }

    pub(crate) fn credentials(reason: impl Into<String>) -> Self {
        Self::Credentials {
            reason: reason.into(),
        }
    }

    pub(crate) fn cache_write(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CacheWrite {
            action,
            path: path.into(),
            source,
        }
    }
}
