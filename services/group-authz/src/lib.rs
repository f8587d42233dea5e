//! Group authorization plugin for opkssh.
//!
//! Decides whether an OpenID identity may log into a local account, either
//! because its email is listed for that account or because it belongs to one
//! of the account's Google Workspace groups. Group memberships are cached in
//! a file shared by concurrent plugin invocations, and negative answers are
//! delayed to a fixed latency floor.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod decision;
pub mod directory;
pub mod error;
pub mod request;
pub mod shutdown;

pub use cache::{CacheEngine, Store};
pub use config::{CacheSettings, ConfigError, PluginConfig, Policy, PrincipalPolicy};
pub use decision::{Decision, Verifier};
pub use directory::{GoogleDirectory, GroupMembersFetcher, Member, ServiceAccountKey};
pub use error::PluginError;
pub use request::Request;
pub use shutdown::{CancelHandle, CancelSignal, cancel_pair};
