//! Persistence integration tests
//!
//! Covers what the in-module store tests cannot: reopening a database
//! file across pool lifetimes, and behavior spanning several repos.

use chrono::{Duration, Utc};
use spyglass::store::{self, AccountRepo, LogRepo, ProjectRepo, UsageRepo};
use spyglass::{LogEntry, Speaker};
use uuid::Uuid;

mod common;
use common::{create_test_account, setup_test_db};

#[test]
fn test_store_survives_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spyglass.db");

    let account_id = {
        let pool = store::init(&path).unwrap();
        let account = AccountRepo::new(pool.clone()).find_or_create("keeper").unwrap();

        let projects = ProjectRepo::new(pool.clone());
        let project = projects.active_project(&account.id).unwrap();
        projects.add_task(&project.id, "Persist me", None, None).unwrap();

        let entry = LogEntry::new(Speaker::User, "hello disk".to_string(), true, None);
        LogRepo::new(pool).append(&account.id, &entry).unwrap();

        account.id
    };

    // Reopening runs the migrations again; they must be no-ops now
    let pool = store::init(&path).unwrap();
    let account = AccountRepo::new(pool.clone())
        .find_by_username("keeper")
        .unwrap()
        .expect("account persisted");
    assert_eq!(account.id, account_id);

    let projects = ProjectRepo::new(pool.clone());
    let project = projects.active_project(&account.id).unwrap();
    let tasks = projects.tasks_for_project(&project.id).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Persist me");

    let entries = LogRepo::new(pool).recent(&account.id, 10).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "hello disk");
}

#[test]
fn test_recent_log_is_chronological_regardless_of_insert_order() {
    let db = setup_test_db();
    let account = create_test_account(&db, "scribe");
    let repo = LogRepo::new(db.clone());

    let base = Utc::now();
    for offset in [3i64, 1, 4, 0, 2] {
        let entry = LogEntry {
            id: Uuid::new_v4(),
            timestamp: base + Duration::seconds(offset),
            speaker: Speaker::System,
            message: format!("entry {offset}"),
            is_final: true,
            response_time_ms: None,
        };
        repo.append(&account.id, &entry).unwrap();
    }

    let entries = repo.recent(&account.id, 3).unwrap();
    let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, ["entry 2", "entry 3", "entry 4"]);
}

#[test]
fn test_find_or_create_respects_a_password_account() {
    let db = setup_test_db();
    let repo = AccountRepo::new(db.clone());

    let created = repo.create("maria", "hunter2").unwrap();
    let found = repo.find_or_create("maria").unwrap();
    assert_eq!(found.id, created.id);

    // The password must still work after the passwordless lookup
    let verified = repo.verify("maria", "hunter2").unwrap();
    assert_eq!(verified.id, created.id);
    assert!(repo.verify("maria", "wrong").is_err());
}

#[test]
fn test_usage_counters_are_scoped_per_account() {
    let db = setup_test_db();
    let first = create_test_account(&db, "first");
    let second = create_test_account(&db, "second");
    let repo = UsageRepo::new(db.clone());

    repo.increment_today(&first.id).unwrap();
    repo.increment_today(&first.id).unwrap();
    repo.increment_today(&second.id).unwrap();

    assert_eq!(repo.count_today(&first.id).unwrap(), 2);
    assert_eq!(repo.count_today(&second.id).unwrap(), 1);

    let idle = create_test_account(&db, "idle");
    assert_eq!(repo.count_today(&idle.id).unwrap(), 0);
}
