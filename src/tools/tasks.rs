//! Built-in task management tools for the assistant

use serde_json::{Value, json};

use crate::live::protocol::FunctionDecl;
use crate::store::ProjectRepo;
use crate::{Error, Result};

/// Names of the tools this module handles
pub const TASK_TOOL_NAMES: [&str; 6] = [
    "create_project",
    "switch_project",
    "add_task",
    "edit_task",
    "mark_task_complete",
    "get_tasks",
];

/// Task tools operating on one account's projects
#[derive(Clone)]
pub struct TaskTools {
    projects: ProjectRepo,
    account_id: String,
}

impl TaskTools {
    #[must_use]
    pub const fn new(projects: ProjectRepo, account_id: String) -> Self {
        Self {
            projects,
            account_id,
        }
    }

    /// Declarations for every task tool, serialized into session setup
    /// and fallback requests
    #[must_use]
    pub fn declarations() -> Vec<FunctionDecl> {
        vec![
            FunctionDecl {
                name: "create_project".to_string(),
                description: "Create a new project and make it the active one. Use when the user wants a new list or area to organize tasks under.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "name": {
                            "type": "string",
                            "description": "Name for the new project"
                        }
                    },
                    "required": ["name"]
                }),
            },
            FunctionDecl {
                name: "switch_project".to_string(),
                description: "Switch the active project by name. Task operations apply to the active project.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "name": {
                            "type": "string",
                            "description": "Name of the project to switch to"
                        }
                    },
                    "required": ["name"]
                }),
            },
            FunctionDecl {
                name: "add_task".to_string(),
                description: "Add a task to the active project.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "title": {
                            "type": "string",
                            "description": "Task title"
                        },
                        "priority": {
                            "type": "string",
                            "enum": ["low", "medium", "high"],
                            "description": "Optional priority"
                        }
                    },
                    "required": ["title"]
                }),
            },
            FunctionDecl {
                name: "edit_task".to_string(),
                description: "Edit a task in the active project. Only the provided fields change.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "originalTitle": {
                            "type": "string",
                            "description": "Current title of the task to edit"
                        },
                        "newTitle": {
                            "type": "string",
                            "description": "Replacement title"
                        },
                        "newPriority": {
                            "type": "string",
                            "enum": ["low", "medium", "high"],
                            "description": "Replacement priority"
                        },
                        "newDueDate": {
                            "type": "string",
                            "description": "Replacement due date, YYYY-MM-DD"
                        }
                    },
                    "required": ["originalTitle"]
                }),
            },
            FunctionDecl {
                name: "mark_task_complete".to_string(),
                description: "Mark a task in the active project as complete, matched by title.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "title": {
                            "type": "string",
                            "description": "Title of the task to complete"
                        }
                    },
                    "required": ["title"]
                }),
            },
            FunctionDecl {
                name: "get_tasks".to_string(),
                description: "List the tasks in the active project.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {}
                }),
            },
        ]
    }

    /// Execute a named task tool
    ///
    /// # Errors
    ///
    /// Returns error if arguments are malformed or a database operation
    /// fails. "Not found" outcomes are result strings, not errors, so
    /// the model can react to them.
    pub fn execute(&self, name: &str, arguments: &Value) -> Result<String> {
        match name {
            "create_project" => self.create_project(arguments),
            "switch_project" => self.switch_project(arguments),
            "add_task" => self.add_task(arguments),
            "edit_task" => self.edit_task(arguments),
            "mark_task_complete" => self.mark_task_complete(arguments),
            "get_tasks" => self.get_tasks(),
            _ => Err(Error::Tool(format!("unknown task tool: {name}"))),
        }
    }

    fn create_project(&self, arguments: &Value) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct Args {
            name: String,
        }

        let args: Args = parse_args("create_project", arguments)?;

        if let Some(existing) = self.projects.find_by_name(&self.account_id, &args.name)? {
            self.projects.set_active(&self.account_id, &existing.id)?;
            return Ok(format!(
                "Project \"{}\" already exists; switched to it.",
                existing.name
            ));
        }

        let project = self.projects.create(&self.account_id, &args.name)?;
        self.projects.set_active(&self.account_id, &project.id)?;
        Ok(format!(
            "Created project \"{}\" and switched to it.",
            project.name
        ))
    }

    fn switch_project(&self, arguments: &Value) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct Args {
            name: String,
        }

        let args: Args = parse_args("switch_project", arguments)?;

        if let Some(project) = self.projects.find_by_name(&self.account_id, &args.name)? {
            self.projects.set_active(&self.account_id, &project.id)?;
            return Ok(format!("Switched to project \"{}\".", project.name));
        }

        let names: Vec<String> = self
            .projects
            .list(&self.account_id)?
            .into_iter()
            .map(|p| p.name)
            .collect();
        if names.is_empty() {
            Ok(format!(
                "No project named \"{}\" and no projects exist yet.",
                args.name
            ))
        } else {
            Ok(format!(
                "No project named \"{}\". Available projects: {}.",
                args.name,
                names.join(", ")
            ))
        }
    }

    fn add_task(&self, arguments: &Value) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct Args {
            title: String,
            #[serde(default)]
            priority: Option<String>,
        }

        let args: Args = parse_args("add_task", arguments)?;
        let project = self.projects.active_project(&self.account_id)?;
        let task = self.projects.add_task(
            &project.id,
            &args.title,
            args.priority.as_deref(),
            None,
        )?;

        Ok(match task.priority {
            Some(priority) => format!(
                "Added task \"{}\" ({priority} priority) to project \"{}\".",
                task.title, project.name
            ),
            None => format!(
                "Added task \"{}\" to project \"{}\".",
                task.title, project.name
            ),
        })
    }

    fn edit_task(&self, arguments: &Value) -> Result<String> {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Args {
            original_title: String,
            #[serde(default)]
            new_title: Option<String>,
            #[serde(default)]
            new_priority: Option<String>,
            #[serde(default)]
            new_due_date: Option<String>,
        }

        let args: Args = parse_args("edit_task", arguments)?;
        let project = self.projects.active_project(&self.account_id)?;

        let Some(task) = self
            .projects
            .find_task_by_title(&project.id, &args.original_title)?
        else {
            return Ok(format!(
                "No task titled \"{}\" in project \"{}\".",
                args.original_title, project.name
            ));
        };

        self.projects.edit_task(
            &task.id,
            args.new_title.as_deref(),
            args.new_priority.as_deref(),
            args.new_due_date.as_deref(),
        )?;

        let title = args.new_title.unwrap_or(task.title);
        Ok(format!("Updated task \"{title}\"."))
    }

    fn mark_task_complete(&self, arguments: &Value) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct Args {
            title: String,
        }

        let args: Args = parse_args("mark_task_complete", arguments)?;
        let project = self.projects.active_project(&self.account_id)?;

        let Some(task) = self.projects.find_task_by_title(&project.id, &args.title)? else {
            return Ok(format!(
                "No task titled \"{}\" in project \"{}\".",
                args.title, project.name
            ));
        };

        self.projects.complete_task(&task.id)?;
        Ok(format!("Marked \"{}\" complete.", task.title))
    }

    fn get_tasks(&self) -> Result<String> {
        let project = self.projects.active_project(&self.account_id)?;
        let tasks = self.projects.tasks_for_project(&project.id)?;

        if tasks.is_empty() {
            return Ok(format!("No tasks in project \"{}\".", project.name));
        }

        let mut lines = vec![format!("Tasks in project \"{}\":", project.name)];
        for task in tasks {
            let mark = if task.completed { "x" } else { " " };
            let mut line = format!("- [{mark}] {}", task.title);
            if let Some(priority) = &task.priority {
                line.push_str(&format!(" ({priority} priority)"));
            }
            if let Some(due) = &task.due_date {
                line.push_str(&format!(" (due {due})"));
            }
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, arguments: &Value) -> Result<T> {
    serde_json::from_value(arguments.clone())
        .map_err(|e| Error::Tool(format!("{tool}: invalid arguments: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AccountRepo, init_memory};

    fn make_tools() -> TaskTools {
        let pool = init_memory().unwrap();
        let account = AccountRepo::new(pool.clone()).find_or_create("test").unwrap();
        TaskTools::new(ProjectRepo::new(pool), account.id)
    }

    #[test]
    fn create_project_switches_to_it() {
        let tools = make_tools();
        let result = tools
            .execute("create_project", &json!({"name": "Work"}))
            .unwrap();
        assert!(result.contains("Created project \"Work\""), "result: {result}");

        let listed = tools.execute("get_tasks", &json!({})).unwrap();
        assert!(listed.contains("Work"), "result: {listed}");
    }

    #[test]
    fn add_task_defaults_to_inbox() {
        let tools = make_tools();
        let result = tools
            .execute("add_task", &json!({"title": "Buy milk", "priority": "high"}))
            .unwrap();
        assert!(result.contains("Buy milk"), "result: {result}");
        assert!(result.contains("Inbox"), "result: {result}");
    }

    #[test]
    fn switch_to_missing_project_lists_alternatives() {
        let tools = make_tools();
        tools
            .execute("create_project", &json!({"name": "Work"}))
            .unwrap();
        let result = tools
            .execute("switch_project", &json!({"name": "Home"}))
            .unwrap();
        assert!(result.contains("No project named \"Home\""), "result: {result}");
        assert!(result.contains("Work"), "result: {result}");
    }

    #[test]
    fn switch_project_matches_case_insensitively() {
        let tools = make_tools();
        tools
            .execute("create_project", &json!({"name": "Groceries"}))
            .unwrap();
        let result = tools
            .execute("switch_project", &json!({"name": "groceries"}))
            .unwrap();
        assert!(result.contains("Switched to project \"Groceries\""), "result: {result}");
    }

    #[test]
    fn edit_task_renames_and_reschedules() {
        let tools = make_tools();
        tools
            .execute("add_task", &json!({"title": "Draft report"}))
            .unwrap();
        let result = tools
            .execute(
                "edit_task",
                &json!({
                    "originalTitle": "draft report",
                    "newTitle": "Draft quarterly report",
                    "newDueDate": "2026-09-15"
                }),
            )
            .unwrap();
        assert!(result.contains("Draft quarterly report"), "result: {result}");

        let listed = tools.execute("get_tasks", &json!({})).unwrap();
        assert!(listed.contains("due 2026-09-15"), "result: {listed}");
    }

    #[test]
    fn mark_task_complete_by_title() {
        let tools = make_tools();
        tools
            .execute("add_task", &json!({"title": "Water plants"}))
            .unwrap();
        let result = tools
            .execute("mark_task_complete", &json!({"title": "Water plants"}))
            .unwrap();
        assert!(result.contains("complete"), "result: {result}");

        let listed = tools.execute("get_tasks", &json!({})).unwrap();
        assert!(listed.contains("[x] Water plants"), "result: {listed}");
    }

    #[test]
    fn missing_task_is_a_result_not_an_error() {
        let tools = make_tools();
        let result = tools
            .execute("mark_task_complete", &json!({"title": "Ghost"}))
            .unwrap();
        assert!(result.contains("No task titled"), "result: {result}");
    }

    #[test]
    fn unknown_tool_returns_error() {
        let tools = make_tools();
        assert!(tools.execute("teleport", &json!({})).is_err());
    }

    #[test]
    fn invalid_arguments_return_error() {
        let tools = make_tools();
        assert!(tools.execute("add_task", &json!({"priority": "high"})).is_err());
    }

    #[test]
    fn declarations_cover_all_tools() {
        let decls = TaskTools::declarations();
        assert_eq!(decls.len(), TASK_TOOL_NAMES.len());
        for name in TASK_TOOL_NAMES {
            assert!(decls.iter().any(|d| d.name == name), "missing {name}");
        }
    }
}
