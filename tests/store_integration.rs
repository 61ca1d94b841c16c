//! Integration tests for the data-access core.
//!
//! Each test builds a store on a throwaway on-disk database, initializes
//! it through the migration engine, and drives it the way the API layer
//! would: registry statements through the executor, guarded mutations
//! through the mutation guard.
#![allow(
    clippy::panic,
    clippy::too_many_lines,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::uninlined_format_args
)]

use mailstation_store::{
    CommandRunner, CredentialHasher, Error, ExecOutput, Params, Row, SaltHash, StatementKind,
    Store, StoreConfig,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

struct StubHasher;

impl CredentialHasher for StubHasher {
    fn hash(&self, password: &str, salt: Option<&str>) -> mailstation_store::Result<SaltHash> {
        let salt = salt.unwrap_or("f00dcafe").to_string();
        Ok(SaltHash {
            hash: format!("{salt}:{password}:derived"),
            salt,
        })
    }
}

/// Records every dispatched command; fails when `returncode` is nonzero.
struct RecordingRunner {
    returncode: i32,
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingRunner {
    fn new(returncode: i32) -> Self {
        Self {
            returncode,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn exec(&self, command: &str, target: &str) -> mailstation_store::Result<ExecOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((command.to_string(), target.to_string()));
        Ok(ExecOutput {
            returncode: self.returncode,
            stdout: String::new(),
            stderr: if self.returncode == 0 {
                String::new()
            } else {
                "account unknown on this server".to_string()
            },
        })
    }
}

fn named(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn statement(table: &str, kind: StatementKind, key: &str) -> &'static str {
    mailstation_store::store::registry::table(table)
        .unwrap()
        .statement(kind, key)
        .unwrap()
}

fn fresh_store_with_runner(runner: Arc<RecordingRunner>) -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::new(dir.path().join("mailstation.sqlite3"));
    let store = Store::new(config, Arc::new(StubHasher), runner);
    store.init(false).unwrap();
    (dir, store)
}

fn fresh_store() -> (tempfile::TempDir, Store) {
    fresh_store_with_runner(Arc::new(RecordingRunner::new(0)))
}

fn insert_login(store: &Store, email: &str, username: &str, is_admin: i64, is_active: i64) {
    store
        .run(
            statement("logins", StatementKind::Insert, "login"),
            Params::Single(&named(&[
                ("email", json!(email)),
                ("username", json!(username)),
                ("salt", json!("")),
                ("hash", json!("")),
                ("is_admin", json!(is_admin)),
                ("is_account", json!(0)),
                ("is_active", json!(is_active)),
                ("roles", json!("[]")),
            ])),
            &[],
        )
        .unwrap();
}

#[test]
fn test_init_seeds_every_version_marker() {
    let (_dir, store) = fresh_store();
    for table in [
        "settings", "configs", "logins", "roles", "accounts", "aliases", "domains", "dns",
    ] {
        assert_eq!(
            store.recorded_version(table).unwrap().as_deref(),
            Some(APP_VERSION),
            "missing marker for {table}"
        );
    }
}

#[test]
fn test_init_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::new(dir.path().join("mailstation.sqlite3"));
    let store = Store::new(
        config,
        Arc::new(StubHasher),
        Arc::new(RecordingRunner::new(0)),
    );
    store.init(false).unwrap();
    insert_login(&store, "second@example.com", "second", 0, 1);
    store.init(false).unwrap();
    // A second init must neither recreate tables nor lose rows.
    assert_eq!(store.count("logins", None, None).unwrap(), 2);
}

#[test]
fn test_round_trip_settings() {
    let (_dir, store) = fresh_store();
    store
        .run(
            statement("settings", StatementKind::Insert, "setting"),
            Params::Single(&named(&[
                ("name", json!("webmail_url")),
                ("value", json!("https://mail.example.com")),
                ("scope", json!("tenant-a")),
            ])),
            &[],
        )
        .unwrap();
    let row = store
        .get(
            statement("settings", StatementKind::Select, "setting"),
            &named(&[("scope", json!("tenant-a"))]),
            &[json!("webmail_url")],
        )
        .unwrap()
        .unwrap();
    assert_eq!(row.get("value"), Some(&json!("https://mail.example.com")));
}

#[test]
fn test_round_trip_configs() {
    let (_dir, store) = fresh_store();
    store
        .run(
            statement("configs", StatementKind::Insert, "config"),
            Params::Single(&named(&[
                ("plugin", json!("mailserver")),
                ("name", json!("relay_host")),
                ("value", json!("smtp.upstream.example")),
                ("schema", json!("smtp")),
                ("scope", json!("tenant-a")),
            ])),
            &[],
        )
        .unwrap();
    let row = store
        .get(
            statement("configs", StatementKind::Select, "config"),
            &named(&[("plugin", json!("mailserver")), ("scope", json!("tenant-a"))]),
            &[json!("relay_host")],
        )
        .unwrap()
        .unwrap();
    assert_eq!(row.get("value"), Some(&json!("smtp.upstream.example")));
}

#[test]
fn test_round_trip_logins() {
    let (_dir, store) = fresh_store();
    insert_login(&store, "ops@example.com", "ops", 0, 1);
    let row = store
        .get(
            statement("logins", StatementKind::Select, "login"),
            &named(&[
                ("email", json!("ops@example.com")),
                ("username", json!("ops@example.com")),
            ]),
            &[],
        )
        .unwrap()
        .unwrap();
    assert_eq!(row.get("email"), Some(&json!("ops@example.com")));
    assert_eq!(row.get("username"), Some(&json!("ops")));
    assert_eq!(row.get("is_admin"), Some(&json!(0)));
    assert_eq!(row.get("is_active"), Some(&json!(1)));
    assert_eq!(row.get("roles"), Some(&json!("[]")));
}

#[test]
fn test_round_trip_roles_with_positional_scope() {
    let (_dir, store) = fresh_store();
    // The role insert binds its scope through the trailing positional
    // placeholder, mixed with named parameters.
    store
        .run(
            statement("roles", StatementKind::Insert, "role"),
            Params::Single(&named(&[
                ("username", json!("ops")),
                ("mailbox", json!("support@example.com")),
            ])),
            &[json!("tenant-a")],
        )
        .unwrap();
    let row = store
        .get(
            statement("roles", StatementKind::Select, "mailbox"),
            &named(&[("scope", json!("tenant-a"))]),
            &[json!("ops")],
        )
        .unwrap()
        .unwrap();
    assert_eq!(row.get("mailbox"), Some(&json!("support@example.com")));
}

#[test]
fn test_round_trip_accounts() {
    let (_dir, store) = fresh_store();
    store
        .run(
            statement("accounts", StatementKind::Insert, "from_server"),
            Params::Single(&named(&[
                ("mailbox", json!("box@example.com")),
                ("domain", json!("example.com")),
                ("storage", json!(r#"{"used":"12M"}"#)),
                ("scope", json!("tenant-a")),
            ])),
            &[],
        )
        .unwrap();
    let rows = store
        .all(
            statement("accounts", StatementKind::Select, "accounts"),
            &named(&[("scope", json!("tenant-a"))]),
            &[],
        )
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("mailbox"), Some(&json!("box@example.com")));
    assert_eq!(rows[0].get("domain"), Some(&json!("example.com")));
    assert_eq!(rows[0].get("storage"), Some(&json!(r#"{"used":"12M"}"#)));
}

#[test]
fn test_round_trip_aliases() {
    let (_dir, store) = fresh_store();
    store
        .run(
            statement("aliases", StatementKind::Insert, "alias"),
            Params::Single(&named(&[
                ("source", json!("info@example.com")),
                ("destination", json!("box@example.com")),
                ("regex", json!(0)),
                ("scope", json!("tenant-a")),
            ])),
            &[],
        )
        .unwrap();
    let row = store
        .get(
            statement("aliases", StatementKind::Select, "by_source"),
            &named(&[("scope", json!("tenant-a"))]),
            &[json!("info@example.com")],
        )
        .unwrap()
        .unwrap();
    assert_eq!(row.get("destination"), Some(&json!("box@example.com")));
}

#[test]
fn test_round_trip_domains() {
    let (_dir, store) = fresh_store();
    store
        .run(
            statement("domains", StatementKind::Insert, "domain"),
            Params::Single(&named(&[
                ("domain", json!("example.com")),
                ("dkim", json!("mail")),
                ("keytype", json!("rsa")),
                ("keysize", json!("2048")),
                ("path", json!("/config/dkim/rsa-2048-mail-example.com.private.txt")),
                ("scope", json!("tenant-a")),
            ])),
            &[],
        )
        .unwrap();
    let row = store
        .get(
            statement("domains", StatementKind::Select, "domain"),
            &named(&[("scope", json!("tenant-a"))]),
            &[json!("example.com")],
        )
        .unwrap()
        .unwrap();
    assert_eq!(row.get("dkim"), Some(&json!("mail")));
    assert_eq!(row.get("keysize"), Some(&json!("2048")));
}

#[test]
fn test_round_trip_dns() {
    let (_dir, store) = fresh_store();
    store
        .run(
            statement("dns", StatementKind::Insert, "record"),
            Params::Single(&named(&[
                ("name", json!("mail._domainkey.example.com")),
                ("rtype", json!("TXT")),
                ("value", json!("v=DKIM1; k=rsa; p=MIIB...")),
                ("ttl", json!(3600)),
                ("scope", json!("tenant-a")),
            ])),
            &[],
        )
        .unwrap();
    let row = store
        .get(
            statement("dns", StatementKind::Select, "by_name"),
            &named(&[("scope", json!("tenant-a"))]),
            &[json!("mail._domainkey.example.com")],
        )
        .unwrap()
        .unwrap();
    assert_eq!(row.get("rtype"), Some(&json!("TXT")));
    assert_eq!(row.get("ttl"), Some(&json!(3600)));
}

#[test]
fn test_last_admin_protection() {
    let (_dir, store) = fresh_store();
    let admin = "admin@mailstation.local";

    // Demoting the only active admin is rejected.
    let report = store
        .update_row("logins", admin, &named(&[("is_admin", json!(0))]), None)
        .unwrap();
    assert!(!report.success);
    assert!(report.message.contains("last administrator"));

    // Deactivating it is rejected too.
    let report = store
        .update_row("logins", admin, &named(&[("is_active", json!(0))]), None)
        .unwrap();
    assert!(!report.success);

    // And so is deleting it.
    let err = store.delete_entry("logins", admin, "email", None).unwrap_err();
    assert!(matches!(err, Error::GuardRejected(_)));

    // With a second active admin present, the same operations succeed.
    insert_login(&store, "second@example.com", "second", 1, 1);
    let report = store
        .update_row("logins", admin, &named(&[("is_admin", json!(0))]), None)
        .unwrap();
    assert!(report.success, "{}", report.message);

    // Promotion back is always allowed and unlinks the mailbox flag.
    let report = store
        .update_row("logins", admin, &named(&[("is_admin", json!(1))]), None)
        .unwrap();
    assert!(report.success);

    let summary = store
        .delete_entry("logins", "second@example.com", "email", None)
        .unwrap();
    assert_eq!(summary.changes, 1);
}

#[test]
fn test_batch_atomicity() {
    let (_dir, store) = fresh_store();
    let rows: Vec<Row> = [
        ("a@example.com", "box1@example.com"),
        ("b@example.com", "box2@example.com"),
        // Same (source, scope) as the first row: UNIQUE violation.
        ("a@example.com", "box3@example.com"),
        ("c@example.com", "box4@example.com"),
    ]
    .iter()
    .map(|(source, destination)| {
        named(&[
            ("source", json!(source)),
            ("destination", json!(destination)),
            ("regex", json!(0)),
            ("scope", json!("tenant-a")),
        ])
    })
    .collect();

    let err = store
        .run(
            "INSERT INTO aliases (source, destination, regex, scope) VALUES (@source, @destination, @regex, @scope)",
            Params::Batch(&rows),
            &[],
        )
        .unwrap_err();
    assert!(matches!(err, Error::Constraint { .. }));
    assert_eq!(
        store.count("aliases", Some("tenant-a"), None).unwrap(),
        0,
        "a mid-batch failure must leave zero rows persisted"
    );
}

#[test]
fn test_upgrade_is_idempotent_on_current_store() {
    let (_dir, store) = fresh_store();
    store.upgrade().unwrap();
    store.upgrade().unwrap();
    for table in ["settings", "logins", "domains"] {
        assert_eq!(
            store.recorded_version(table).unwrap().as_deref(),
            Some(APP_VERSION),
            "upgrade must not regress the {table} marker"
        );
    }
}

/// Builds a database shaped like a pre-1.0.14 deployment: `logins` still
/// has a plaintext `password` column and none of the later flags.
fn seed_old_store(store: &Store) {
    let script = format!(
        "BEGIN TRANSACTION;
         CREATE TABLE settings (
           id         INTEGER PRIMARY KEY,
           name       TEXT NOT NULL,
           value      TEXT NOT NULL,
           scope      TEXT NOT NULL,
           is_mutable INTEGER NOT NULL DEFAULT 0,
           UNIQUE (name, scope)
         );
         CREATE TABLE logins (
           id       INTEGER PRIMARY KEY,
           email    TEXT NOT NULL UNIQUE,
           username TEXT NOT NULL UNIQUE,
           password TEXT NOT NULL DEFAULT ''
         );
         INSERT INTO settings (name, value, scope, is_mutable)
           VALUES ('DB_VERSION_settings', '{APP_VERSION}', 'mailstation', 0);
         INSERT INTO settings (name, value, scope, is_mutable)
           VALUES ('DB_VERSION_logins', '1.0.2', 'mailstation', 0);
         INSERT INTO logins (email, username, password)
           VALUES ('admin@mailstation.local', 'admin', 'hunter2');
         COMMIT;"
    );
    store.run(&script, Params::Empty, &[]).unwrap();
}

#[test]
fn test_upgrade_patches_old_store_and_skips_reapplied_patches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mailstation.sqlite3");
    let store = Store::new(
        StoreConfig::new(path),
        Arc::new(StubHasher),
        Arc::new(RecordingRunner::new(0)),
    );
    seed_old_store(&store);
    store.init(false).unwrap();

    // All three login patches applied in ascending order.
    assert_eq!(
        store.recorded_version("logins").unwrap().as_deref(),
        Some("1.1.9")
    );
    let row = store
        .get(
            "SELECT email, username, salt, hash, is_admin, is_active, roles FROM logins WHERE username = ?",
            &Row::new(),
            &[json!("admin")],
        )
        .unwrap()
        .unwrap();
    assert_eq!(row.get("is_admin"), Some(&json!(1)));
    assert_eq!(row.get("salt"), Some(&json!("")));
    assert_eq!(row.get("roles"), Some(&json!("[]")));

    // Wind the marker back and upgrade again: every ADD hits a duplicate
    // column, the DROP hits a missing column, and all of them are skipped.
    store
        .run(
            statement("settings", StatementKind::Insert, "env"),
            Params::Single(&named(&[
                ("name", json!("DB_VERSION_logins")),
                ("value", json!("1.0.2")),
                ("scope", json!("mailstation")),
            ])),
            &[],
        )
        .unwrap();
    store.upgrade().unwrap();
    assert_eq!(
        store.recorded_version("logins").unwrap().as_deref(),
        Some("1.1.9")
    );
    // The admin row survived both passes.
    assert_eq!(store.count("logins", None, None).unwrap(), 1);
}

#[test]
fn test_validation_isolation() {
    let (_dir, store) = fresh_store();
    let admin = "admin@mailstation.local";
    // One wrong-typed column and one correct one: the good column applies,
    // the bad one is skipped, and the message reports both.
    let report = store
        .update_row(
            "logins",
            admin,
            &named(&[
                ("roles", json!(["postmaster"])),
                ("username", json!(12345)),
            ]),
            None,
        )
        .unwrap();
    assert!(!report.success);
    assert_eq!(report.outcomes.len(), 2);
    assert!(report.message.contains("expected a text value"));
    assert!(report.message.contains("updated roles"));

    let row = store
        .get(
            "SELECT username, roles FROM logins WHERE email = ?",
            &Row::new(),
            &[json!(admin)],
        )
        .unwrap()
        .unwrap();
    assert_eq!(row.get("username"), Some(&json!("admin")));
    assert_eq!(row.get("roles"), Some(&json!(r#"["postmaster"]"#)));
}

#[test]
fn test_password_change_stops_the_batch() {
    let (_dir, store) = fresh_store();
    let admin = "admin@mailstation.local";
    let report = store
        .update_row(
            "logins",
            admin,
            &named(&[
                ("password", json!("s3cret!")),
                ("username", json!("renamed")),
            ]),
            None,
        )
        .unwrap();
    // The credential column routes the call and stops processing.
    assert_eq!(report.outcomes.len(), 1);
    assert!(report.success);
    let row = store
        .get(
            "SELECT username FROM logins WHERE email = ?",
            &Row::new(),
            &[json!(admin)],
        )
        .unwrap()
        .unwrap();
    assert_eq!(row.get("username"), Some(&json!("admin")));
    assert!(store.verify_password("logins", admin, "s3cret!").unwrap());
    assert!(!store.verify_password("logins", admin, "wrong").unwrap());
}

#[test]
fn test_account_password_runs_server_command_first() {
    let runner = Arc::new(RecordingRunner::new(0));
    let (_dir, store) = fresh_store_with_runner(Arc::clone(&runner));
    store
        .run(
            statement("accounts", StatementKind::Insert, "from_server"),
            Params::Single(&named(&[
                ("mailbox", json!("box@example.com")),
                ("domain", json!("example.com")),
                ("storage", json!("{}")),
                ("scope", json!("tenant-a")),
            ])),
            &[],
        )
        .unwrap();

    let message = store
        .change_password("accounts", "box@example.com", "n3w-pass", Some("tenant-a"))
        .unwrap();
    assert!(message.contains("box@example.com"));
    assert_eq!(
        runner.calls(),
        vec![(
            "email update box@example.com password".to_string(),
            "tenant-a".to_string()
        )]
    );
    assert!(store
        .verify_password("accounts", "box@example.com", "n3w-pass")
        .unwrap());
}

#[test]
fn test_account_password_is_untouched_when_server_command_fails() {
    let runner = Arc::new(RecordingRunner::new(1));
    let (_dir, store) = fresh_store_with_runner(Arc::clone(&runner));
    store
        .run(
            statement("accounts", StatementKind::Insert, "from_server"),
            Params::Single(&named(&[
                ("mailbox", json!("box@example.com")),
                ("domain", json!("example.com")),
                ("storage", json!("{}")),
                ("scope", json!("tenant-a")),
            ])),
            &[],
        )
        .unwrap();

    let err = store
        .change_password("accounts", "box@example.com", "n3w-pass", Some("tenant-a"))
        .unwrap_err();
    assert!(matches!(err, Error::OperationFailed { .. }));
    // No credentials were written locally.
    assert!(!store
        .verify_password("accounts", "box@example.com", "n3w-pass")
        .unwrap());
}

#[test]
fn test_verify_password_is_false_without_stored_credentials() {
    let (_dir, store) = fresh_store();
    // The seeded admin has no password set yet.
    assert!(!store
        .verify_password("logins", "admin@mailstation.local", "anything")
        .unwrap());
    assert!(!store
        .verify_password("logins", "ghost@example.com", "anything")
        .unwrap());
}

#[test]
fn test_count_applies_scope_and_schema_filters() {
    let (_dir, store) = fresh_store();
    for (name, schema, scope) in [
        ("relay_host", "smtp", "tenant-a"),
        ("relay_port", "smtp", "tenant-a"),
        ("quota_warn", "storage", "tenant-a"),
        ("relay_host", "smtp", "tenant-b"),
    ] {
        store
            .run(
                statement("configs", StatementKind::Insert, "config"),
                Params::Single(&named(&[
                    ("plugin", json!("mailserver")),
                    ("name", json!(name)),
                    ("value", json!("x")),
                    ("schema", json!(schema)),
                    ("scope", json!(scope)),
                ])),
                &[],
            )
            .unwrap();
    }
    assert_eq!(store.count("configs", Some("tenant-a"), None).unwrap(), 3);
    assert_eq!(
        store.count("configs", Some("tenant-a"), Some("smtp")).unwrap(),
        2
    );
    assert_eq!(
        store.count("configs", Some("tenant-b"), Some("smtp")).unwrap(),
        1
    );
    // Tables without a schema-filtered count ignore the filter.
    assert_eq!(store.count("logins", None, Some("smtp")).unwrap(), 1);
}
