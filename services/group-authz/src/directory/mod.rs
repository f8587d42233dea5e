//! Group directory abstraction.
//!
//! Both the cache engine and the decision engine depend only on the
//! [`GroupMembersFetcher`] capability, never on a concrete provider.

pub mod google;

use crate::error::PluginError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use google::{GoogleDirectory, ServiceAccountKey};

/// Snapshot of one directory member at fetch time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Member {
    /// Directory identifier
    pub id: String,
    /// Member email, the key within a group
    pub email: String,
    /// Membership status (e.g. `ACTIVE`)
    pub status: String,
    /// Member kind (e.g. `USER`, `GROUP`)
    #[serde(rename = "type")]
    pub kind: String,
}

impl Member {
    /// Creates an active user member with the given id and email.
    pub fn user(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            status: "ACTIVE".to_string(),
            kind: "USER".to_string(),
        }
    }
}

/// Capability: list the current members of a group by its email.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GroupMembersFetcher: Send + Sync {
    /// Returns the members of `group_email`, sorted by email ascending.
    async fn group_members(&self, group_email: &str) -> Result<Vec<Member>, PluginError>;
}

/// Sorts members by email, the order every fetcher hands out.
pub(crate) fn sort_by_email(members: &mut [Member]) {
    members.sort_by(|left, right| left.email.cmp(&right.email));
}
