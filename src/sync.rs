//! One reconciliation run: read the database, diff it against the snapshot,
//! apply the result.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::apply::{ApplyOptions, ApplyReport, apply};
use crate::error::Result;
use crate::reconcile::{Plan, PlanSummary, reconcile};
use crate::snapshot::{Snapshot, SnapshotDigest};
use crate::store::{DatabaseState, Store};

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub snapshot: SnapshotDigest,
    pub planned: PlanSummary,
    pub applied: ApplyReport,
}

/// Computes the plan for `snapshot` without writing anything.
pub fn plan(store: &dyn Store, snapshot: &Snapshot) -> Result<Plan> {
    let state = DatabaseState::read(store)?;
    let plan = reconcile(snapshot, &state);

    let summary = plan.summary();
    info!(
        users_inserted = summary.users_inserted,
        users_updated = summary.users_updated,
        users_disabled = summary.users_disabled,
        groups_inserted = summary.groups_inserted,
        groups_updated = summary.groups_updated,
        groups_purged = summary.groups_purged,
        identities_inserted = summary.identities_inserted,
        identities_deleted = summary.identities_deleted,
        memberships_inserted = summary.memberships_inserted,
        memberships_deleted = summary.memberships_deleted,
        "Computed plan with {} actions",
        summary.total()
    );
    Ok(plan)
}

pub fn run(store: &dyn Store, snapshot: &Snapshot, options: ApplyOptions) -> Result<SyncReport> {
    let started_at = Utc::now();
    let plan = plan(store, snapshot)?;

    let applied = if plan.is_empty() {
        info!("Database already matches snapshot");
        ApplyReport::default()
    } else {
        apply(store, &plan, options)?
    };

    let finished_at = Utc::now();
    info!(
        "Applied {} actions in {} ms",
        applied.applied.total(),
        (finished_at - started_at).num_milliseconds()
    );

    Ok(SyncReport {
        started_at,
        finished_at,
        snapshot: snapshot.digest.clone(),
        planned: plan.summary(),
        applied,
    })
}
