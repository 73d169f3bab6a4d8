//! Project and task repository

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DbPool;
use super::account::parse_datetime;
use crate::{Error, Result};

/// Name of the project created automatically when an account has none
pub const DEFAULT_PROJECT: &str = "Inbox";

/// A project grouping tasks
#[derive(Debug, Clone)]
pub struct Project {
    pub id: String,
    pub account_id: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A task within a project
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub priority: Option<String>,
    pub due_date: Option<String>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Project repository, also owning task CRUD
#[derive(Clone)]
pub struct ProjectRepo {
    pool: DbPool,
}

impl ProjectRepo {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a project (initially inactive)
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create(&self, account_id: &str, name: &str) -> Result<Project> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO projects (id, account_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            [&id, account_id, name, &now],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Project {
            id,
            account_id: account_id.to_string(),
            name: name.to_string(),
            is_active: false,
            created_at: Utc::now(),
        })
    }

    /// Find a project by name, trying an exact match before a
    /// case-insensitive one
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_by_name(&self, account_id: &str, name: &str) -> Result<Option<Project>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let exact = conn
            .query_row(
                "SELECT id, account_id, name, is_active, created_at
                 FROM projects WHERE account_id = ?1 AND name = ?2",
                [account_id, name],
                project_from_row,
            )
            .ok();
        if exact.is_some() {
            return Ok(exact);
        }

        let relaxed = conn
            .query_row(
                "SELECT id, account_id, name, is_active, created_at
                 FROM projects WHERE account_id = ?1 AND LOWER(name) = LOWER(?2)
                 ORDER BY created_at LIMIT 1",
                [account_id, name],
                project_from_row,
            )
            .ok();

        Ok(relaxed)
    }

    /// Make `project_id` the single active project for the account
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn set_active(&self, account_id: &str, project_id: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            "UPDATE projects SET is_active = CASE WHEN id = ?2 THEN 1 ELSE 0 END
             WHERE account_id = ?1",
            [account_id, project_id],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    /// The account's active project, creating and activating the default
    /// one when none exists
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn active_project(&self, account_id: &str) -> Result<Project> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let active = conn
            .query_row(
                "SELECT id, account_id, name, is_active, created_at
                 FROM projects WHERE account_id = ?1 AND is_active = 1 LIMIT 1",
                [account_id],
                project_from_row,
            )
            .ok();
        drop(conn);

        if let Some(project) = active {
            return Ok(project);
        }

        let mut project = self.create(account_id, DEFAULT_PROJECT)?;
        self.set_active(account_id, &project.id)?;
        project.is_active = true;
        Ok(project)
    }

    /// List the account's projects, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self, account_id: &str) -> Result<Vec<Project>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT id, account_id, name, is_active, created_at
                 FROM projects WHERE account_id = ?1 ORDER BY created_at",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let projects = stmt
            .query_map([account_id], project_from_row)
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(projects)
    }

    /// Add a task to a project
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn add_task(
        &self,
        project_id: &str,
        title: &str,
        priority: Option<&str>,
        due_date: Option<&str>,
    ) -> Result<Task> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO tasks (id, project_id, title, priority, due_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![id, project_id, title, priority, due_date, now],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Task {
            id,
            project_id: project_id.to_string(),
            title: title.to_string(),
            priority: priority.map(str::to_string),
            due_date: due_date.map(str::to_string),
            completed: false,
            created_at: Utc::now(),
            completed_at: None,
        })
    }

    /// Find a task in a project by title, exact match first, then
    /// case-insensitive; pending tasks win over completed ones.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_task_by_title(&self, project_id: &str, title: &str) -> Result<Option<Task>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let exact = conn
            .query_row(
                "SELECT id, project_id, title, priority, due_date, completed, created_at, completed_at
                 FROM tasks WHERE project_id = ?1 AND title = ?2
                 ORDER BY completed, created_at LIMIT 1",
                [project_id, title],
                task_from_row,
            )
            .ok();
        if exact.is_some() {
            return Ok(exact);
        }

        let relaxed = conn
            .query_row(
                "SELECT id, project_id, title, priority, due_date, completed, created_at, completed_at
                 FROM tasks WHERE project_id = ?1 AND LOWER(title) = LOWER(?2)
                 ORDER BY completed, created_at LIMIT 1",
                [project_id, title],
                task_from_row,
            )
            .ok();

        Ok(relaxed)
    }

    /// Update a task's title, priority, or due date. `None` keeps the
    /// current value.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn edit_task(
        &self,
        task_id: &str,
        new_title: Option<&str>,
        new_priority: Option<&str>,
        new_due_date: Option<&str>,
    ) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            "UPDATE tasks SET
                title = COALESCE(?1, title),
                priority = COALESCE(?2, priority),
                due_date = COALESCE(?3, due_date)
             WHERE id = ?4",
            rusqlite::params![new_title, new_priority, new_due_date, task_id],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    /// Mark a task complete
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn complete_task(&self, task_id: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE tasks SET completed = 1, completed_at = ?1 WHERE id = ?2",
            [&now, task_id],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    /// Tasks in a project, pending first, then oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn tasks_for_project(&self, project_id: &str) -> Result<Vec<Task>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT id, project_id, title, priority, due_date, completed, created_at, completed_at
                 FROM tasks WHERE project_id = ?1 ORDER BY completed, created_at",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let tasks = stmt
            .query_map([project_id], task_from_row)
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(tasks)
    }
}

fn project_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        account_id: row.get(1)?,
        name: row.get(2)?,
        is_active: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        priority: row.get(3)?,
        due_date: row.get(4)?,
        completed: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        completed_at: row
            .get::<_, Option<String>>(7)?
            .map(|s| parse_datetime(&s)),
    })
}
