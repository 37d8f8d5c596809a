//! Diffing snapshot records against database records.
//!
//! Everything here is pure: the output is a [`Plan`] describing which rows to
//! insert, update, delete or disable, and nothing touches the database.
//! Action lists follow snapshot order for snapshot-derived actions and
//! database read order for database-derived ones.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use crate::snapshot::Snapshot;
use crate::store::DatabaseState;
use crate::types::*;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserPlan {
    pub to_insert: Vec<User>,
    pub to_update: Vec<User>,
    /// External ids of users missing from the snapshot and not yet disabled.
    pub to_disable: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupPlan {
    pub to_insert: Vec<Group>,
    pub to_update: Vec<Group>,
    /// External ids of groups missing from the snapshot that still have
    /// members. The group rows themselves stay.
    pub to_purge_memberships: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentityPlan {
    pub to_insert: Vec<Identity>,
    /// Logins to remove.
    pub to_delete: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipPlan {
    pub to_insert: Vec<Membership>,
    pub to_delete: Vec<StoredMembership>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub users: UserPlan,
    pub groups: GroupPlan,
    pub identities: IdentityPlan,
    pub memberships: MembershipPlan,
}

/// Number of actions of each kind in a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub users_inserted: usize,
    pub users_updated: usize,
    pub users_disabled: usize,
    pub groups_inserted: usize,
    pub groups_updated: usize,
    pub groups_purged: usize,
    pub identities_inserted: usize,
    pub identities_deleted: usize,
    pub memberships_inserted: usize,
    pub memberships_deleted: usize,
}

impl PlanSummary {
    #[must_use]
    pub fn total(&self) -> usize {
        self.users_inserted
            + self.users_updated
            + self.users_disabled
            + self.groups_inserted
            + self.groups_updated
            + self.groups_purged
            + self.identities_inserted
            + self.identities_deleted
            + self.memberships_inserted
            + self.memberships_deleted
    }
}

impl Plan {
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            users_inserted: self.users.to_insert.len(),
            users_updated: self.users.to_update.len(),
            users_disabled: self.users.to_disable.len(),
            groups_inserted: self.groups.to_insert.len(),
            groups_updated: self.groups.to_update.len(),
            groups_purged: self.groups.to_purge_memberships.len(),
            identities_inserted: self.identities.to_insert.len(),
            identities_deleted: self.identities.to_delete.len(),
            memberships_inserted: self.memberships.to_insert.len(),
            memberships_deleted: self.memberships.to_delete.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.summary().total() == 0
    }
}

pub fn reconcile(snapshot: &Snapshot, db: &DatabaseState) -> Plan {
    Plan {
        users: reconcile_users(&snapshot.users, &db.users),
        groups: reconcile_groups(&snapshot.groups, &db.groups, &db.groups_with_members),
        identities: reconcile_identities(
            &snapshot.identities,
            &db.identities,
            &db.foreign_logins,
        ),
        memberships: reconcile_memberships(&snapshot.memberships, &db.memberships),
    }
}

pub fn reconcile_users(snapshot: &[User], db: &[User]) -> UserPlan {
    let stored: HashMap<i64, &User> = db.iter().map(|u| (u.external_id, u)).collect();
    let wanted: HashSet<i64> = snapshot.iter().map(|u| u.external_id).collect();

    let mut plan = UserPlan::default();
    for user in snapshot {
        match stored.get(&user.external_id) {
            None => plan.to_insert.push(user.clone()),
            Some(existing) if *existing != user => plan.to_update.push(user.clone()),
            Some(_) => {}
        }
    }

    plan.to_disable = db
        .iter()
        .filter(|u| !wanted.contains(&u.external_id) && !u.is_disabled())
        .map(|u| u.external_id)
        .collect();
    plan
}

pub fn reconcile_groups(
    snapshot: &[Group],
    db: &[Group],
    groups_with_members: &BTreeSet<i64>,
) -> GroupPlan {
    let stored: HashMap<i64, &Group> = db.iter().map(|g| (g.external_id, g)).collect();
    let wanted: HashSet<i64> = snapshot.iter().map(|g| g.external_id).collect();

    let mut plan = GroupPlan::default();
    for group in snapshot {
        match stored.get(&group.external_id) {
            None => plan.to_insert.push(group.clone()),
            Some(existing) if *existing != group => plan.to_update.push(group.clone()),
            Some(_) => {}
        }
    }

    plan.to_purge_memberships = db
        .iter()
        .map(|g| g.external_id)
        .filter(|id| !wanted.contains(id) && groups_with_members.contains(id))
        .collect();
    plan
}

/// Identities are keyed by login alone; there is no update path.
///
/// Logins held by users without an external id are never inserted or
/// deleted.
pub fn reconcile_identities(
    snapshot: &[Identity],
    db: &[Identity],
    foreign_logins: &BTreeSet<String>,
) -> IdentityPlan {
    let stored: HashSet<&str> = db
        .iter()
        .map(|i| i.login.as_str())
        .chain(foreign_logins.iter().map(String::as_str))
        .collect();
    let wanted: HashSet<&str> = snapshot.iter().map(|i| i.login.as_str()).collect();

    let mut seen = HashSet::new();
    let to_insert = snapshot
        .iter()
        .filter(|i| seen.insert(i.login.as_str()) && !stored.contains(i.login.as_str()))
        .cloned()
        .collect();

    seen.clear();
    let to_delete = db
        .iter()
        .filter(|i| seen.insert(i.login.as_str()) && !wanted.contains(i.login.as_str()))
        .map(|i| i.login.clone())
        .collect();

    IdentityPlan {
        to_insert,
        to_delete,
    }
}

/// Memberships are keyed by the (user, group) external id pair; there is no
/// update path.
pub fn reconcile_memberships(snapshot: &[Membership], db: &[StoredMembership]) -> MembershipPlan {
    let stored: HashSet<Membership> = db.iter().map(|m| m.membership).collect();
    let wanted: HashSet<Membership> = snapshot.iter().copied().collect();

    let mut seen = HashSet::new();
    let to_insert = snapshot
        .iter()
        .filter(|m| seen.insert(**m) && !stored.contains(*m))
        .copied()
        .collect();

    let to_delete = db
        .iter()
        .filter(|m| !wanted.contains(&m.membership))
        .copied()
        .collect();

    MembershipPlan {
        to_insert,
        to_delete,
    }
}
