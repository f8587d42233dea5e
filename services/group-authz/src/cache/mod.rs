//! Membership caching.

pub mod engine;
pub mod store;

pub use engine::{CacheEngine, LOCK_SUFFIX};
pub use store::{Customer, Group, GroupEntry, Store};
