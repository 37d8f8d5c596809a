//! CLI integration tests for idmsync.
//!
//! Each test uses an isolated temp directory for settings, snapshots and the
//! database, ensuring tests can run in parallel safely.

#![allow(deprecated)] // Command::cargo_bin deprecation only affects custom build dirs

use std::path::PathBuf;

use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use idmsync::store::{SqliteStore, Store};
use predicates::prelude::*;
use serde_json::{Value, json};

const USERS: &str = r#"[
    {"id": 9, "displayName": "Nine", "mail": "nine@example.org", "status": "VALID",
     "liferayScreenName": "nine", "identities": ["nine@idp"]}
]"#;

const GROUPS: &str = r#"[
    {"id": 1, "name": "root", "parentGroupId": null, "members": []},
    {"id": 2, "name": "root:child", "parentGroupId": 1, "members": [{"userId": 9}]}
]"#;

struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        let ctx = Self {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
        };
        ctx.temp_dir
            .child("db_settings.toml")
            .write_str(&format!(
                "[database]\npath = \"idm.db\"\n\n[snapshot]\nusers = \"{}\"\ngroups = \"{}\"\n",
                ctx.path("users.scim").display(),
                ctx.path("groups.scim").display(),
            ))
            .unwrap();
        ctx.write_snapshot(USERS, GROUPS);
        ctx
    }

    fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    fn config(&self) -> String {
        self.path("db_settings.toml").to_string_lossy().to_string()
    }

    fn write_snapshot(&self, users: &str, groups: &str) {
        self.temp_dir.child("users.scim").write_str(users).unwrap();
        self.temp_dir.child("groups.scim").write_str(groups).unwrap();
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("idmsync").expect("failed to find binary");
        cmd.env_remove("PERUN_CUSTOM_SCRIPTS_DIR")
            .env_remove("PERUN_SERVICE")
            .env("RUST_LOG", "idmsync=warn");
        cmd
    }

    fn init(&self) -> assert_cmd::assert::Assert {
        self.cmd()
            .args(["init", "--config", &self.config()])
            .assert()
    }

    fn sync(&self, extra: &[&str]) -> assert_cmd::assert::Assert {
        self.cmd()
            .args(["sync", "--config", &self.config()])
            .args(extra)
            .assert()
    }

    fn store(&self) -> SqliteStore {
        SqliteStore::open(self.path("idm.db")).expect("open database")
    }
}

#[test]
fn test_init_creates_database() {
    let ctx = TestContext::new();

    ctx.init()
        .success()
        .stdout(predicate::str::contains("Initialized database"));
    ctx.init().success();

    assert!(ctx.path("idm.db").exists());
    assert!(ctx.store().list_users().unwrap().is_empty());
}

#[test]
fn test_sync_applies_snapshot() {
    let ctx = TestContext::new();
    ctx.init().success();

    ctx.sync(&[])
        .success()
        .stdout(predicate::str::contains("Applied 5 actions"));

    let store = ctx.store();
    assert_eq!(store.list_users().unwrap().len(), 1);
    let groups = store.list_groups().unwrap();
    assert_eq!(groups[1].name, "child");
    assert_eq!(groups[1].parent_external_id, Some(1));
    assert_eq!(store.list_memberships().unwrap().len(), 1);
}

#[test]
fn test_sync_json_report() {
    let ctx = TestContext::new();
    ctx.init().success();

    let output = ctx.sync(&["--json"]).success().get_output().stdout.clone();
    let report: Value = serde_json::from_slice(&output).expect("failed to parse JSON");

    assert_eq!(report["applied"]["applied"]["groups_inserted"], 2);
    assert_eq!(report["planned"]["memberships_inserted"], 1);
    assert_eq!(report["snapshot"]["users"].as_str().unwrap().len(), 64);

    let output = ctx.sync(&["--json"]).success().get_output().stdout.clone();
    let report: Value = serde_json::from_slice(&output).expect("failed to parse JSON");
    assert_eq!(report["applied"]["applied"]["groups_inserted"], 0);
}

#[test]
fn test_plan_does_not_write() {
    let ctx = TestContext::new();
    ctx.init().success();

    let output = ctx
        .cmd()
        .args(["plan", "--config", &ctx.config(), "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let plan: Value = serde_json::from_slice(&output).expect("failed to parse JSON");

    assert_eq!(plan["groups"]["to_insert"][1]["name"], "child");
    assert_eq!(plan["groups"]["to_insert"][1]["parent_external_id"], 1);
    assert_eq!(
        plan["memberships"]["to_insert"][0],
        json!({"user_external_id": 9, "group_external_id": 2})
    );
    assert!(ctx.store().list_groups().unwrap().is_empty());

    ctx.sync(&["--dry-run"])
        .success()
        .stdout(predicate::str::contains("Planned 5 actions"));
    assert!(ctx.store().list_users().unwrap().is_empty());
}

#[test]
fn test_snapshot_paths_can_be_overridden() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.temp_dir.child("empty.json").write_str("[]").unwrap();
    let empty = ctx.path("empty.json").to_string_lossy().to_string();

    ctx.sync(&["--users", &empty, "--groups", &empty])
        .success()
        .stdout(predicate::str::contains("Applied 0 actions"));
}

#[test]
fn test_settings_path_from_environment() {
    let ctx = TestContext::new();
    let service_dir = ctx.temp_dir.child("kypo_portal.d");
    service_dir.create_dir_all().unwrap();
    service_dir
        .child("db_settings.toml")
        .write_str(&std::fs::read_to_string(ctx.path("db_settings.toml")).unwrap())
        .unwrap();

    ctx.cmd()
        .env("PERUN_CUSTOM_SCRIPTS_DIR", ctx.temp_dir.path())
        .env("PERUN_SERVICE", "kypo_portal")
        .arg("init")
        .assert()
        .success();

    assert!(service_dir.child("idm.db").path().exists());
}

#[test]
fn test_missing_settings_fails() {
    let ctx = TestContext::new();

    ctx.cmd()
        .arg("sync")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid configuration"))
        .stderr(predicate::str::contains("PERUN_CUSTOM_SCRIPTS_DIR"));

    ctx.cmd()
        .args(["sync", "--config", &ctx.path("nope.toml").to_string_lossy()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nope.toml"));
}

#[test]
fn test_missing_database_fails() {
    let ctx = TestContext::new();

    ctx.sync(&[])
        .code(1)
        .stderr(predicate::str::contains("unable to connect to database"));
    assert!(!ctx.path("idm.db").exists());
}

#[test]
fn test_malformed_snapshot_fails() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.write_snapshot(r#"[{"id": "abc"}]"#, "[]");

    ctx.sync(&[])
        .code(1)
        .stderr(predicate::str::contains("malformed snapshot"));
}

#[test]
fn test_dangling_parent_names_failing_group() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.write_snapshot(
        USERS,
        r#"[{"id": 2, "name": "root:child", "parentGroupId": 1, "members": []}]"#,
    );

    ctx.sync(&[])
        .code(1)
        .stderr(predicate::str::contains(
            "inserting group with ext_id:2: no group with external id 1",
        ));

    // Users were committed before the failing group step.
    assert_eq!(ctx.store().list_users().unwrap().len(), 1);
}
