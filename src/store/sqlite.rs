use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens an existing database. A missing file is a connection error,
    /// not an empty database.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Self::connect(db_path.as_ref(), flags)
    }

    /// Opens the database, creating the file if it does not exist.
    pub fn create<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::connect(db_path.as_ref(), OpenFlags::default())
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connect(path: &Path, flags: OpenFlags) -> Result<Self> {
        let connection_error = |source| Error::Connection {
            path: path.to_path_buf(),
            source,
        };

        let conn = Connection::open_with_flags(path, flags).map_err(connection_error)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(connection_error)?;
        // Opening is lazy; touch the header so a non-database file fails here.
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(connection_error)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }

    /// Closes the connection, surfacing any error SQLite reports on close.
    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner().unwrap_or_else(|e| e.into_inner());
        conn.close().map_err(|(_, e)| Error::from(e))
    }
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT display_name, mail, status, liferay_sn, external_id
             FROM users WHERE external_id IS NOT NULL ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(User {
                display_name: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                mail: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                status: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                screen_name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                external_id: row.get(4)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_groups(&self) -> Result<Vec<Group>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT g.name, g.external_id, p.external_id
             FROM idm_group g
             LEFT JOIN idm_group p ON p.id = g.parent_group_id
             WHERE g.external_id IS NOT NULL ORDER BY g.id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Group {
                name: row.get(0)?,
                external_id: row.get(1)?,
                parent_external_id: row.get(2)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_identities(&self) -> Result<Vec<Identity>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT i.login, u.external_id
             FROM user_identity i
             JOIN users u ON u.id = i.user_id
             WHERE u.external_id IS NOT NULL ORDER BY i.id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Identity {
                login: row.get(0)?,
                user_external_id: row.get(1)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_memberships(&self) -> Result<Vec<StoredMembership>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT m.user_id, m.idm_group_id, u.external_id, g.external_id
             FROM user_idm_group m
             JOIN users u ON u.id = m.user_id
             JOIN idm_group g ON g.id = m.idm_group_id
             WHERE u.external_id IS NOT NULL AND g.external_id IS NOT NULL
             ORDER BY m.idm_group_id, m.user_id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(StoredMembership {
                user_id: row.get(0)?,
                group_id: row.get(1)?,
                membership: Membership {
                    user_external_id: row.get(2)?,
                    group_external_id: row.get(3)?,
                },
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_groups_with_members(&self) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT g.external_id
             FROM user_idm_group m
             JOIN idm_group g ON g.id = m.idm_group_id
             WHERE g.external_id IS NOT NULL",
        )?;

        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_foreign_logins(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT i.login
             FROM user_identity i
             JOIN users u ON u.id = i.user_id
             WHERE u.external_id IS NULL",
        )?;

        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_user_id(&self, external_id: i64) -> Result<Option<i64>> {
        self.conn()
            .query_row(
                "SELECT id FROM users WHERE external_id = ?1",
                params![external_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_group_id(&self, external_id: i64) -> Result<Option<i64>> {
        self.conn()
            .query_row(
                "SELECT id FROM idm_group WHERE external_id = ?1",
                params![external_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Error::from)
    }

    // User operations

    fn create_user(&self, user: &User) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (display_name, mail, status, liferay_sn, external_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.display_name,
                user.mail,
                user.status,
                user.screen_name,
                user.external_id,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_user(&self, user: &User) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE users SET display_name = ?1, mail = ?2, status = ?3, liferay_sn = ?4
             WHERE external_id = ?5",
            params![
                user.display_name,
                user.mail,
                user.status,
                user.screen_name,
                user.external_id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::DanglingReference {
                entity: "user",
                external_id: user.external_id,
            });
        }
        Ok(())
    }

    fn disable_user(&self, external_id: i64) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE users SET status = ?1 WHERE external_id = ?2",
            params![DISABLED_STATUS, external_id],
        )?;
        Ok(rows > 0)
    }

    // Group operations

    fn create_group(&self, group: &Group, parent_id: Option<i64>) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO idm_group (name, external_id, parent_group_id) VALUES (?1, ?2, ?3)",
            params![group.name, group.external_id, parent_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_group(&self, group: &Group, parent_id: Option<i64>) -> Result<()> {
        // A root group keeps whatever parent it already has.
        let rows = match parent_id {
            Some(parent_id) => self.conn().execute(
                "UPDATE idm_group SET name = ?1, parent_group_id = ?2 WHERE external_id = ?3",
                params![group.name, parent_id, group.external_id],
            )?,
            None => self.conn().execute(
                "UPDATE idm_group SET name = ?1 WHERE external_id = ?2",
                params![group.name, group.external_id],
            )?,
        };

        if rows == 0 {
            return Err(Error::DanglingReference {
                entity: "group",
                external_id: group.external_id,
            });
        }
        Ok(())
    }

    // Identity operations

    fn create_identity(&self, user_id: i64, login: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO user_identity (user_id, login) VALUES (?1, ?2)",
            params![user_id, login],
        )?;
        Ok(())
    }

    fn delete_identity(&self, login: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM user_identity WHERE login = ?1", params![login])?;
        Ok(rows > 0)
    }

    // Membership operations

    fn create_membership(&self, user_id: i64, group_id: i64) -> Result<()> {
        self.conn().execute(
            "INSERT INTO user_idm_group (user_id, idm_group_id) VALUES (?1, ?2)",
            params![user_id, group_id],
        )?;
        Ok(())
    }

    fn delete_membership(&self, user_id: i64, group_id: i64) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM user_idm_group WHERE user_id = ?1 AND idm_group_id = ?2",
            params![user_id, group_id],
        )?;
        Ok(rows > 0)
    }

    fn delete_group_memberships(&self, group_id: i64) -> Result<usize> {
        let rows = self.conn().execute(
            "DELETE FROM user_idm_group WHERE idm_group_id = ?1",
            params![group_id],
        )?;
        Ok(rows)
    }

    fn begin(&self) -> Result<()> {
        self.conn().execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.conn().execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.conn().execute_batch("ROLLBACK")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::create(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        (temp, store)
    }

    fn user(external_id: i64) -> User {
        User {
            display_name: format!("User {external_id}"),
            mail: format!("user{external_id}@example.org"),
            status: "VALID".to_string(),
            screen_name: format!("user{external_id}"),
            external_id,
        }
    }

    fn group(external_id: i64, name: &str) -> Group {
        Group {
            name: name.to_string(),
            external_id,
            parent_external_id: None,
        }
    }

    #[test]
    fn test_initialize_creates_tables() {
        let (_temp, store) = test_store();

        let conn = store.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"users".to_string()));
        assert!(tables.contains(&"idm_group".to_string()));
        assert!(tables.contains(&"user_identity".to_string()));
        assert!(tables.contains(&"user_idm_group".to_string()));
    }

    #[test]
    fn test_open_missing_database_is_connection_error() {
        let temp = TempDir::new().unwrap();
        let result = SqliteStore::open(temp.path().join("missing.db"));
        assert!(matches!(result, Err(Error::Connection { .. })));
    }

    #[test]
    fn test_open_non_database_file_is_connection_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("garbage.db");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();

        let result = SqliteStore::open(&path);
        assert!(matches!(result, Err(Error::Connection { .. })));
    }

    #[test]
    fn test_user_crud() {
        let (_temp, store) = test_store();

        let id = store.create_user(&user(1)).unwrap();
        assert_eq!(store.get_user_id(1).unwrap(), Some(id));
        assert_eq!(store.list_users().unwrap(), vec![user(1)]);

        let changed = User {
            mail: "new@example.org".to_string(),
            ..user(1)
        };
        store.update_user(&changed).unwrap();
        assert_eq!(store.list_users().unwrap(), vec![changed]);

        assert!(store.disable_user(1).unwrap());
        assert!(store.list_users().unwrap()[0].is_disabled());
        assert!(!store.disable_user(99).unwrap());
    }

    #[test]
    fn test_update_unknown_user_is_dangling() {
        let (_temp, store) = test_store();
        let result = store.update_user(&user(5));
        assert!(matches!(
            result,
            Err(Error::DanglingReference {
                entity: "user",
                external_id: 5
            })
        ));
    }

    #[test]
    fn test_rows_without_external_id_are_invisible() {
        let (_temp, store) = test_store();
        store.create_user(&user(1)).unwrap();
        store.create_group(&group(10, "staff"), None).unwrap();

        {
            let conn = store.conn();
            conn.execute(
                "INSERT INTO users (display_name, mail, status, liferay_sn)
                 VALUES ('t', 't', 't', 't')",
                [],
            )
            .unwrap();
            let local_user = conn.last_insert_rowid();
            conn.execute("INSERT INTO idm_group (name) VALUES ('local')", [])
                .unwrap();
            let local_group = conn.last_insert_rowid();
            conn.execute(
                "INSERT INTO user_identity (user_id, login) VALUES (?1, 'tester')",
                params![local_user],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO user_idm_group (user_id, idm_group_id) VALUES (?1, ?2)",
                params![local_user, local_group],
            )
            .unwrap();
        }

        assert_eq!(store.list_users().unwrap().len(), 1);
        assert_eq!(store.list_groups().unwrap().len(), 1);
        assert!(store.list_identities().unwrap().is_empty());
        assert!(store.list_memberships().unwrap().is_empty());
        assert!(store.list_groups_with_members().unwrap().is_empty());
        assert_eq!(store.list_foreign_logins().unwrap(), vec!["tester".to_string()]);
    }

    #[test]
    fn test_group_parent_is_read_as_external_id() {
        let (_temp, store) = test_store();
        let root = store.create_group(&group(1, "root"), None).unwrap();
        store.create_group(&group(2, "child"), Some(root)).unwrap();

        let groups = store.list_groups().unwrap();
        assert_eq!(groups[0].parent_external_id, None);
        assert_eq!(groups[1].parent_external_id, Some(1));
    }

    #[test]
    fn test_update_root_group_keeps_parent() {
        let (_temp, store) = test_store();
        let root = store.create_group(&group(1, "root"), None).unwrap();
        store.create_group(&group(2, "child"), Some(root)).unwrap();

        store.update_group(&group(2, "renamed"), None).unwrap();

        let groups = store.list_groups().unwrap();
        assert_eq!(groups[1].name, "renamed");
        assert_eq!(groups[1].parent_external_id, Some(1));
    }

    #[test]
    fn test_identity_and_membership_crud() {
        let (_temp, store) = test_store();
        let user_id = store.create_user(&user(3)).unwrap();
        let group_id = store.create_group(&group(5, "staff"), None).unwrap();

        store.create_identity(user_id, "user3@idp").unwrap();
        assert_eq!(
            store.list_identities().unwrap(),
            vec![Identity {
                login: "user3@idp".to_string(),
                user_external_id: 3,
            }]
        );

        store.create_membership(user_id, group_id).unwrap();
        let memberships = store.list_memberships().unwrap();
        assert_eq!(memberships.len(), 1);
        assert_eq!(memberships[0].user_id, user_id);
        assert_eq!(memberships[0].group_id, group_id);
        assert_eq!(
            memberships[0].membership,
            Membership {
                user_external_id: 3,
                group_external_id: 5,
            }
        );
        assert_eq!(store.list_groups_with_members().unwrap(), vec![5]);

        assert!(store.create_membership(user_id, group_id).is_err());

        assert!(store.delete_membership(user_id, group_id).unwrap());
        assert!(!store.delete_membership(user_id, group_id).unwrap());
        assert!(store.delete_identity("user3@idp").unwrap());
        assert!(store.list_identities().unwrap().is_empty());
    }

    #[test]
    fn test_delete_group_memberships() {
        let (_temp, store) = test_store();
        let group_id = store.create_group(&group(5, "staff"), None).unwrap();
        for external_id in 1..=3 {
            let user_id = store.create_user(&user(external_id)).unwrap();
            store.create_membership(user_id, group_id).unwrap();
        }

        assert_eq!(store.delete_group_memberships(group_id).unwrap(), 3);
        assert!(store.list_memberships().unwrap().is_empty());
        assert_eq!(store.list_groups().unwrap().len(), 1);
    }

    #[test]
    fn test_rollback_discards_writes() {
        let (_temp, store) = test_store();

        store.begin().unwrap();
        store.create_user(&user(1)).unwrap();
        store.rollback().unwrap();
        assert!(store.list_users().unwrap().is_empty());

        store.begin().unwrap();
        store.create_user(&user(2)).unwrap();
        store.commit().unwrap();
        assert_eq!(store.list_users().unwrap().len(), 1);
    }

    #[test]
    fn test_close() {
        let (temp, store) = test_store();
        store.create_user(&user(1)).unwrap();
        store.close().unwrap();

        let reopened = SqliteStore::open(temp.path().join("test.db")).unwrap();
        assert_eq!(reopened.list_users().unwrap().len(), 1);
    }
}
