//! Executing a [`Plan`] against a [`Store`].
//!
//! Steps run in a fixed order so that referenced rows exist before the rows
//! that point at them: users, groups (parents before children), identities,
//! new memberships, then the removals. The first failure aborts the run.
//! Without [`ApplyOptions::single_transaction`] every statement commits on
//! its own and earlier steps stay applied.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::reconcile::{Plan, PlanSummary};
use crate::store::Store;
use crate::types::Group;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Wrap the whole run in one transaction and roll back on failure.
    pub single_transaction: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub applied: PlanSummary,
    /// Membership rows removed from groups missing from the snapshot.
    pub membership_rows_purged: usize,
    /// Groups that had to wait for their parent within a pass.
    pub groups_deferred: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupPass {
    Insert,
    Update,
}

impl GroupPass {
    fn verb(self) -> &'static str {
        match self {
            Self::Insert => "inserting",
            Self::Update => "updating",
        }
    }
}

pub fn apply(store: &dyn Store, plan: &Plan, options: ApplyOptions) -> Result<ApplyReport> {
    if !options.single_transaction {
        return apply_steps(store, plan);
    }

    store
        .begin()
        .map_err(|e| e.during("starting transaction"))?;

    match apply_steps(store, plan) {
        Ok(report) => {
            store
                .commit()
                .map_err(|e| e.during("committing transaction"))?;
            Ok(report)
        }
        Err(e) => {
            if let Err(rollback_err) = store.rollback() {
                error!("Rolling back transaction failed: {rollback_err}");
            }
            Err(e)
        }
    }
}

fn apply_steps(store: &dyn Store, plan: &Plan) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();

    for user in &plan.users.to_insert {
        store
            .create_user(user)
            .map_err(|e| e.during(format!("inserting user with ext_id:{}", user.external_id)))?;
        debug!("Inserted user {}", user.external_id);
        report.applied.users_inserted += 1;
    }

    for user in &plan.users.to_update {
        store
            .update_user(user)
            .map_err(|e| e.during(format!("updating user with ext_id:{}", user.external_id)))?;
        debug!("Updated user {}", user.external_id);
        report.applied.users_updated += 1;
    }

    report.groups_deferred += apply_groups(store, &plan.groups.to_insert, GroupPass::Insert)?;
    report.applied.groups_inserted = plan.groups.to_insert.len();
    report.groups_deferred += apply_groups(store, &plan.groups.to_update, GroupPass::Update)?;
    report.applied.groups_updated = plan.groups.to_update.len();

    for identity in &plan.identities.to_insert {
        let operation = || format!("inserting identity with login:{}", identity.login);
        let user_id = require_user(store, identity.user_external_id)
            .map_err(|e| e.during(operation()))?;
        store
            .create_identity(user_id, &identity.login)
            .map_err(|e| e.during(operation()))?;
        debug!("Inserted identity {}", identity.login);
        report.applied.identities_inserted += 1;
    }

    for membership in &plan.memberships.to_insert {
        let operation = || {
            format!(
                "inserting membership with user.ext_id:{} and group.ext_id:{}",
                membership.user_external_id, membership.group_external_id
            )
        };
        let user_id =
            require_user(store, membership.user_external_id).map_err(|e| e.during(operation()))?;
        let group_id =
            require_group(store, membership.group_external_id).map_err(|e| e.during(operation()))?;
        store
            .create_membership(user_id, group_id)
            .map_err(|e| e.during(operation()))?;
        report.applied.memberships_inserted += 1;
    }

    for stored in &plan.memberships.to_delete {
        store
            .delete_membership(stored.user_id, stored.group_id)
            .map_err(|e| {
                e.during(format!(
                    "deleting membership with user.id:{} and group.id:{}",
                    stored.user_id, stored.group_id
                ))
            })?;
        report.applied.memberships_deleted += 1;
    }

    for login in &plan.identities.to_delete {
        store
            .delete_identity(login)
            .map_err(|e| e.during(format!("deleting identity with login:{login}")))?;
        debug!("Deleted identity {login}");
        report.applied.identities_deleted += 1;
    }

    for &external_id in &plan.users.to_disable {
        store
            .disable_user(external_id)
            .map_err(|e| e.during(format!("disabling user with ext_id:{external_id}")))?;
        debug!("Disabled user {external_id}");
        report.applied.users_disabled += 1;
    }

    for &external_id in &plan.groups.to_purge_memberships {
        let operation = || format!("deleting users from group with ext_id:{external_id}");
        let group_id = require_group(store, external_id).map_err(|e| e.during(operation()))?;
        let rows = store
            .delete_group_memberships(group_id)
            .map_err(|e| e.during(operation()))?;
        debug!("Removed {rows} members from group {external_id}");
        report.applied.groups_purged += 1;
        report.membership_rows_purged += rows;
    }

    Ok(report)
}

/// Runs one group pass, deferring children whose parent is still queued in
/// the same pass. Returns how many deferrals happened.
fn apply_groups(store: &dyn Store, groups: &[Group], pass: GroupPass) -> Result<usize> {
    let mut pending: VecDeque<&Group> = groups.iter().collect();
    let mut deferrals = 0;

    loop {
        let round = pending.len();
        let mut deferred: Vec<(&Group, i64)> = Vec::new();

        while let Some(group) = pending.pop_front() {
            let operation = || format!("{} group with ext_id:{}", pass.verb(), group.external_id);

            let parent_id = match group.parent_external_id {
                None => None,
                Some(parent) => match store
                    .get_group_id(parent)
                    .map_err(|e| e.during(operation()))?
                {
                    Some(id) => Some(id),
                    None if is_queued(parent, &pending, &deferred) => {
                        warn!(
                            "Deferring group {} until parent {parent} is written",
                            group.external_id
                        );
                        deferred.push((group, parent));
                        continue;
                    }
                    None => {
                        return Err(Error::DanglingReference {
                            entity: "group",
                            external_id: parent,
                        }
                        .during(operation()));
                    }
                },
            };

            match pass {
                GroupPass::Insert => {
                    store
                        .create_group(group, parent_id)
                        .map_err(|e| e.during(operation()))?;
                }
                GroupPass::Update => {
                    store
                        .update_group(group, parent_id)
                        .map_err(|e| e.during(operation()))?;
                }
            }
            debug!("{} group {}", pass.verb(), group.external_id);
        }

        if deferred.is_empty() {
            return Ok(deferrals);
        }
        // Nothing was written this round: the remaining parents form a cycle.
        if deferred.len() == round {
            let (group, parent) = deferred[0];
            return Err(Error::DanglingReference {
                entity: "group",
                external_id: parent,
            }
            .during(format!("{} group with ext_id:{}", pass.verb(), group.external_id)));
        }

        deferrals += deferred.len();
        pending = deferred.into_iter().map(|(group, _)| group).collect();
    }
}

fn is_queued(external_id: i64, pending: &VecDeque<&Group>, deferred: &[(&Group, i64)]) -> bool {
    pending.iter().any(|g| g.external_id == external_id)
        || deferred.iter().any(|(g, _)| g.external_id == external_id)
}

fn require_user(store: &dyn Store, external_id: i64) -> Result<i64> {
    store
        .get_user_id(external_id)?
        .ok_or(Error::DanglingReference {
            entity: "user",
            external_id,
        })
}

fn require_group(store: &dyn Store, external_id: i64) -> Result<i64> {
    store
        .get_group_id(external_id)?
        .ok_or(Error::DanglingReference {
            entity: "group",
            external_id,
        })
}
