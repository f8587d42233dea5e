//! In-memory membership tree: customer → group → member.
//!
//! A group's `fetched_at` covers its whole member set. Writes are routed
//! through [`Store::add_or_get_group`], which refuses to touch a group that is
//! already at least as fresh as the write, so merges and direct updates can
//! never regress freshness or mix two snapshots of one group.

use crate::directory::{Member, sort_by_email};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// One group's membership snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Group {
    /// When the member set was fetched from the directory
    pub fetched_at: DateTime<Utc>,
    /// Group email
    pub email: String,
    /// Members keyed by email
    pub members: BTreeMap<String, Member>,
}

impl Group {
    fn new(fetched_at: DateTime<Utc>, email: &str) -> Self {
        Self {
            fetched_at,
            email: email.to_string(),
            members: BTreeMap::new(),
        }
    }

    /// Whether this snapshot is usable for the given freshness deadline.
    #[must_use]
    pub fn is_fresh(&self, deadline: DateTime<Utc>) -> bool {
        self.fetched_at >= deadline
    }

    /// Members sorted by email ascending.
    #[must_use]
    pub fn sorted_members(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self.members.values().cloned().collect();
        sort_by_email(&mut members);
        members
    }
}

/// Namespace partition for one directory customer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Customer {
    /// Directory customer id
    pub customer_id: String,
    /// Groups keyed by email
    pub groups: BTreeMap<String, Group>,
}

/// Root of the persisted cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Store {
    /// Customers keyed by id
    pub customers: BTreeMap<String, Customer>,
}

/// Write handle returned by [`Store::add_or_get_group`].
#[derive(Debug)]
pub enum GroupEntry<'a> {
    /// The stored group, open for member upserts.
    Live(&'a mut Group),
    /// Detached copy of a group that is already at least as fresh as the
    /// attempted write. Member upserts are discarded.
    Stale(Group),
}

impl GroupEntry<'_> {
    /// Upserts a member keyed by email; no-op for a stale entry.
    pub fn add_member(&mut self, member: Member) {
        if let Self::Live(group) = self {
            group.members.insert(member.email.clone(), member);
        }
    }

    /// Freshness timestamp of the group behind this entry.
    #[must_use]
    pub fn fetched_at(&self) -> DateTime<Utc> {
        match self {
            Self::Live(group) => group.fetched_at,
            Self::Stale(group) => group.fetched_at,
        }
    }

    /// Whether writes through this entry reach the store.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

impl Store {
    /// Returns the group if present and fetched at or after `deadline`.
    #[must_use]
    pub fn get_group(&self, customer_id: &str, deadline: DateTime<Utc>, group_email: &str) -> Option<&Group> {
        self.customers
            .get(customer_id)?
            .groups
            .get(group_email)
            .filter(|group| group.is_fresh(deadline))
    }

    /// Opens a group for writing a snapshot fetched at `fetch_time`.
    ///
    /// A missing group is created empty. A strictly older group is replaced
    /// by an empty one, since a snapshot replaces membership as a whole. A
    /// group at least as fresh as `fetch_time` is left untouched and a
    /// [`GroupEntry::Stale`] copy without members is returned.
    pub fn add_or_get_group(
        &mut self,
        customer_id: &str,
        fetch_time: DateTime<Utc>,
        group_email: &str,
    ) -> GroupEntry<'_> {
        let customer = self
            .customers
            .entry(customer_id.to_string())
            .or_insert_with(|| Customer {
                customer_id: customer_id.to_string(),
                groups: BTreeMap::new(),
            });

        match customer.groups.entry(group_email.to_string()) {
            Entry::Vacant(slot) => GroupEntry::Live(slot.insert(Group::new(fetch_time, group_email))),
            Entry::Occupied(slot) => {
                let group = slot.into_mut();
                if group.fetched_at >= fetch_time {
                    return GroupEntry::Stale(Group::new(group.fetched_at, &group.email));
                }
                *group = Group::new(fetch_time, group_email);
                GroupEntry::Live(group)
            }
        }
    }

    /// Deep-merges `other` into this store; the freshest snapshot of every
    /// group wins and equally fresh groups already present are kept.
    pub fn merge(&mut self, other: &Self) {
        for (customer_id, customer) in &other.customers {
            for (group_email, group) in &customer.groups {
                let mut entry = self.add_or_get_group(customer_id, group.fetched_at, group_email);
                for member in group.members.values() {
                    entry.add_member(member.clone());
                }
            }
        }
    }

    /// Number of groups stored for a customer, fresh or not.
    #[must_use]
    pub fn group_count(&self, customer_id: &str) -> usize {
        self.customers
            .get(customer_id)
            .map_or(0, |customer| customer.groups.len())
    }
}
