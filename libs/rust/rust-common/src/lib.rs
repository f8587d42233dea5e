//! Shared library for cross-cutting concerns of the group authorization plugin.
//!
//! This crate provides centralized implementations for:
//! - Error types with retryability classification
//! - HTTP client configuration, building and JSON response decoding
//! - Tracing subscriber setup with a selectable log sink

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod http;
pub mod tracing_config;

pub use error::PlatformError;
pub use http::{HttpConfig, build_http_client, read_json};
pub use tracing_config::{LogTarget, TracingConfig, init_tracing};
