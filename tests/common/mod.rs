//! Shared test utilities

use spyglass::DbPool;
use spyglass::store::{Account, AccountRepo, ProjectRepo};
use spyglass::tools::{TaskTools, ToolRegistry};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    spyglass::store::init_memory().expect("failed to init test db")
}

/// Create a test account in the database
pub fn create_test_account(db: &DbPool, username: &str) -> Account {
    let repo = AccountRepo::new(db.clone());
    repo.find_or_create(username)
        .expect("failed to create test account")
}

/// Build a tool registry scoped to a test account
pub fn build_test_registry(db: &DbPool, account_id: &str) -> ToolRegistry {
    ToolRegistry::new(TaskTools::new(
        ProjectRepo::new(db.clone()),
        account_id.to_string(),
    ))
}
