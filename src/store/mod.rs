mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::Result;
use crate::types::*;

/// Store defines the database interface.
///
/// Every read skips rows whose external id is NULL: those belong to data the
/// upstream source does not own and are never matched or modified.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Reads
    fn list_users(&self) -> Result<Vec<User>>;
    fn list_groups(&self) -> Result<Vec<Group>>;
    fn list_identities(&self) -> Result<Vec<Identity>>;
    fn list_memberships(&self) -> Result<Vec<StoredMembership>>;
    /// External ids of groups that have at least one membership row.
    fn list_groups_with_members(&self) -> Result<Vec<i64>>;
    /// Logins owned by users without an external id.
    fn list_foreign_logins(&self) -> Result<Vec<String>>;

    // Internal id lookups
    fn get_user_id(&self, external_id: i64) -> Result<Option<i64>>;
    fn get_group_id(&self, external_id: i64) -> Result<Option<i64>>;

    // User operations
    fn create_user(&self, user: &User) -> Result<i64>;
    fn update_user(&self, user: &User) -> Result<()>;
    fn disable_user(&self, external_id: i64) -> Result<bool>;

    // Group operations
    fn create_group(&self, group: &Group, parent_id: Option<i64>) -> Result<i64>;
    fn update_group(&self, group: &Group, parent_id: Option<i64>) -> Result<()>;

    // Identity operations
    fn create_identity(&self, user_id: i64, login: &str) -> Result<()>;
    fn delete_identity(&self, login: &str) -> Result<bool>;

    // Membership operations
    fn create_membership(&self, user_id: i64, group_id: i64) -> Result<()>;
    fn delete_membership(&self, user_id: i64, group_id: i64) -> Result<bool>;
    fn delete_group_memberships(&self, group_id: i64) -> Result<usize>;

    // Explicit transaction control; without it every statement autocommits.
    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
}

/// Everything the reconciler needs to know about the current database.
#[derive(Debug, Clone, Default)]
pub struct DatabaseState {
    pub users: Vec<User>,
    pub groups: Vec<Group>,
    pub identities: Vec<Identity>,
    pub memberships: Vec<StoredMembership>,
    pub groups_with_members: BTreeSet<i64>,
    pub foreign_logins: BTreeSet<String>,
}

impl DatabaseState {
    pub fn read(store: &dyn Store) -> Result<Self> {
        let state = Self {
            users: store.list_users().map_err(|e| e.during("getting users"))?,
            groups: store.list_groups().map_err(|e| e.during("getting groups"))?,
            identities: store
                .list_identities()
                .map_err(|e| e.during("getting identities"))?,
            memberships: store
                .list_memberships()
                .map_err(|e| e.during("getting memberships"))?,
            groups_with_members: store
                .list_groups_with_members()
                .map_err(|e| e.during("getting group memberships"))?
                .into_iter()
                .collect(),
            foreign_logins: store
                .list_foreign_logins()
                .map_err(|e| e.during("getting identities"))?
                .into_iter()
                .collect(),
        };

        debug!(
            users = state.users.len(),
            groups = state.groups.len(),
            identities = state.identities.len(),
            memberships = state.memberships.len(),
            "Read database state"
        );
        Ok(state)
    }
}
